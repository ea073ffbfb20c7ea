//! Upscaled grayscale previews of the test vectors as binary PGM (P5) files.

use anyhow::{bail, Context, Result};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::quant::TestVector;

/// Writes `digit_<label>.pgm` for each vector; returns the written paths.
pub fn save_previews<P: AsRef<Path>>(dir: P, vectors: &[TestVector], side: usize, upscale: usize) -> Result<Vec<PathBuf>> {
    create_dir_all(&dir).with_context(|| format!("create dir: {}", dir.as_ref().display()))?;
    let mut out = Vec::with_capacity(vectors.len());
    for v in vectors {
        let path = dir.as_ref().join(format!("digit_{}.pgm", v.label));
        let f = File::create(&path).with_context(|| format!("create preview: {}", path.display()))?;
        let mut w = BufWriter::new(f);
        write_pgm(&mut w, &v.pixels, side, upscale)?;
        w.flush()?;
        out.push(path);
    }
    Ok(out)
}

/// Nearest-neighbour upscale of a `side` x `side` image.
pub fn write_pgm<W: Write>(w: &mut W, pixels: &[u8], side: usize, upscale: usize) -> Result<()> {
    if side * side != pixels.len() || upscale == 0 {
        bail!("cannot render {} pixels as {}x{} at x{}", pixels.len(), side, side, upscale);
    }
    let n = side * upscale;
    write!(w, "P5\n{} {}\n255\n", n, n)?;
    let mut row = vec![0u8; n];
    for y in 0..n {
        let src = &pixels[(y / upscale) * side..(y / upscale + 1) * side];
        for (x, px) in row.iter_mut().enumerate() { *px = src[x / upscale]; }
        w.write_all(&row)?;
    }
    Ok(())
}
