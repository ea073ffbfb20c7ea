//! MNIST IDX files: `idx3-ubyte` images and `idx1-ubyte` labels, big-endian headers.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::dataset::{EvalSample, EvalSet};
use crate::model::MAX_INPUT_DIM;

pub const IMAGES_MAGIC: u32 = 0x0000_0803;
pub const LABELS_MAGIC: u32 = 0x0000_0801;

/// Header counts beyond this are not trusted for up-front allocation.
const PREALLOC_LIMIT: usize = 1 << 16;

/// Loads an image/label file pair into an eval set, in file order.
pub fn load_eval_set<P: AsRef<Path>, Q: AsRef<Path>>(images: P, labels: Q) -> Result<EvalSet> {
    let img = open(images.as_ref())?;
    let lbl = open(labels.as_ref())?;
    let (dim, pixels) = read_images(img).with_context(|| format!("read images: {}", images.as_ref().display()))?;
    let targets = read_labels(lbl).with_context(|| format!("read labels: {}", labels.as_ref().display()))?;
    pair(dim, pixels, targets)
}

pub fn pair(dim: usize, pixels: Vec<Vec<u8>>, labels: Vec<u8>) -> Result<EvalSet> {
    if pixels.len() != labels.len() {
        bail!("{} images but {} labels", pixels.len(), labels.len());
    }
    let samples = pixels.into_iter().zip(labels).map(|(pixels, label)| EvalSample { pixels, label }).collect();
    Ok(EvalSet::new(samples, dim)?)
}

/// Returns the flattened image size and one pixel vector per image.
pub fn read_images<R: Read>(mut r: R) -> Result<(usize, Vec<Vec<u8>>)> {
    let magic = read_be_u32(&mut r).context("read magic")?;
    if magic != IMAGES_MAGIC { bail!("bad idx3 magic {:#010x}", magic); }
    let count = read_be_u32(&mut r).context("read count")? as usize;
    let rows = read_be_u32(&mut r).context("read rows")? as usize;
    let cols = read_be_u32(&mut r).context("read cols")? as usize;
    let dim = rows.checked_mul(cols).context("image size overflows")?;
    if dim > MAX_INPUT_DIM {
        bail!("{}x{} images exceed the {} pixel limit", rows, cols, MAX_INPUT_DIM);
    }
    let mut images = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    for i in 0..count {
        let mut px = vec![0u8; dim];
        r.read_exact(&mut px).with_context(|| format!("read image {}", i))?;
        images.push(px);
    }
    Ok((dim, images))
}

pub fn read_labels<R: Read>(mut r: R) -> Result<Vec<u8>> {
    let magic = read_be_u32(&mut r).context("read magic")?;
    if magic != LABELS_MAGIC { bail!("bad idx1 magic {:#010x}", magic); }
    let count = read_be_u32(&mut r).context("read count")? as usize;
    let mut labels = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    r.take(count as u64).read_to_end(&mut labels).context("read labels")?;
    if labels.len() != count {
        bail!("truncated labels: header says {}, found {}", count, labels.len());
    }
    Ok(labels)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let f = File::open(path).with_context(|| format!("open idx file: {}", path.display()))?;
    Ok(BufReader::new(f))
}

fn read_be_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut b4 = [0u8; 4];
    r.read_exact(&mut b4)?;
    Ok(u32::from_be_bytes(b4))
}
