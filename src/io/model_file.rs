use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::model::{FloatModel, ModelMeta};

pub const F_MAGIC: &[u8; 8] = b"MNISTF01"; // float model v1
pub const F_VERSION: u32 = 1;

/// Loads a float model, picking the format from the extension (`.json` or binary).
pub fn load_float_model<P: AsRef<Path>>(path: P) -> Result<FloatModel> {
    let path = path.as_ref();
    if path.extension().map_or(false, |e| e.eq_ignore_ascii_case("json")) {
        load_json(path)
    } else {
        load_binary(path)
    }
}

pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<FloatModel> {
    // Format:
    // magic: 8 bytes b"MNISTF01"
    // u32 version (LE)
    // u32 input_dim, u32 hidden_dim, u32 output_dim (LE)
    // f32 w1[hidden_dim * input_dim]   rows = hidden units
    // f32 b1[hidden_dim]
    // f32 w2[output_dim * hidden_dim]  rows = output units
    // f32 b2[output_dim]
    let f = File::open(&path).with_context(|| format!("open float model: {}", path.as_ref().display()))?;
    read_binary(BufReader::new(f))
}

pub fn read_binary<R: Read>(mut r: R) -> Result<FloatModel> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic).context("read magic")?;
    if &magic != F_MAGIC {
        bail!("bad float model magic");
    }
    let version = read_u32(&mut r).context("read version")?;
    if version != F_VERSION {
        bail!("unsupported float model version {}", version);
    }
    let input_dim = read_u32(&mut r).context("read input_dim")? as usize;
    let hidden_dim = read_u32(&mut r).context("read hidden_dim")? as usize;
    let output_dim = read_u32(&mut r).context("read output_dim")? as usize;
    let meta = ModelMeta { input_dim, hidden_dim, output_dim };
    meta.validate()?;
    let w1_len = hidden_dim.checked_mul(input_dim).context("w1 size overflows")?;
    let w2_len = output_dim.checked_mul(hidden_dim).context("w2 size overflows")?;
    let w1 = read_f32s(&mut r, w1_len).context("read w1")?;
    let b1 = read_f32s(&mut r, hidden_dim).context("read b1")?;
    let w2 = read_f32s(&mut r, w2_len).context("read w2")?;
    let b2 = read_f32s(&mut r, output_dim).context("read b2")?;
    Ok(FloatModel::new(meta, w1, b1, w2, b2)?)
}

pub fn save_binary<P: AsRef<Path>>(model: &FloatModel, path: P) -> Result<()> {
    let f = File::create(&path).with_context(|| format!("create float model: {}", path.as_ref().display()))?;
    let mut w = BufWriter::new(f);
    w.write_all(F_MAGIC)?;
    w.write_all(&F_VERSION.to_le_bytes())?;
    for d in [model.meta.input_dim, model.meta.hidden_dim, model.meta.output_dim] {
        w.write_all(&(d as u32).to_le_bytes())?;
    }
    for v in [&model.w1, &model.b1, &model.w2, &model.b2] {
        for x in v.iter() { w.write_all(&x.to_le_bytes())?; }
    }
    w.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// `w1[hidden][input]`, `w2[output][hidden]`.
    #[default]
    OutputMajor,
    /// Dense-kernel convention: `w1[input][hidden]`, `w2[hidden][output]`.
    InputMajor,
}

#[derive(Debug, Deserialize)]
struct JsonModel {
    #[serde(default)]
    layout: Layout,
    w1: Vec<Vec<f32>>,
    b1: Vec<f32>,
    w2: Vec<Vec<f32>>,
    b2: Vec<f32>,
}

pub fn load_json<P: AsRef<Path>>(path: P) -> Result<FloatModel> {
    let f = File::open(&path).with_context(|| format!("open float model: {}", path.as_ref().display()))?;
    let j: JsonModel = serde_json::from_reader(BufReader::new(f)).context("parse float model json")?;
    model_from_json(j)
}

pub fn parse_json(s: &str) -> Result<FloatModel> {
    let j: JsonModel = serde_json::from_str(s).context("parse float model json")?;
    model_from_json(j)
}

fn model_from_json(j: JsonModel) -> Result<FloatModel> {
    let (w1_rows, w1_cols) = matrix_dims(&j.w1).context("w1")?;
    let (w2_rows, w2_cols) = matrix_dims(&j.w2).context("w2")?;
    let w1: Vec<f32> = j.w1.concat();
    let w2: Vec<f32> = j.w2.concat();
    let model = match j.layout {
        Layout::OutputMajor => {
            let meta = ModelMeta { input_dim: w1_cols, hidden_dim: w1_rows, output_dim: w2_rows };
            if w2_cols != meta.hidden_dim { bail!("w2 has {} columns, expected {}", w2_cols, meta.hidden_dim); }
            FloatModel::new(meta, w1, j.b1, w2, j.b2)?
        }
        Layout::InputMajor => {
            let meta = ModelMeta { input_dim: w1_rows, hidden_dim: w1_cols, output_dim: w2_cols };
            if w2_rows != meta.hidden_dim { bail!("w2 has {} rows, expected {}", w2_rows, meta.hidden_dim); }
            FloatModel::from_input_major(meta, &w1, j.b1, &w2, j.b2)?
        }
    };
    Ok(model)
}

fn matrix_dims(m: &[Vec<f32>]) -> Result<(usize, usize)> {
    let cols = m.first().map_or(0, Vec::len);
    if m.iter().any(|row| row.len() != cols) {
        bail!("ragged matrix");
    }
    Ok((m.len(), cols))
}

fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut b4 = [0u8; 4];
    r.read_exact(&mut b4)?;
    Ok(u32::from_le_bytes(b4))
}

fn read_f32s<R: Read>(r: &mut R, n: usize) -> Result<Vec<f32>> {
    // Strict: a truncated file is an error, never zero-padded. The buffer only grows
    // with bytes actually present, whatever the header claims.
    let want = n.checked_mul(4).context("f32 count overflows")?;
    let mut buf = Vec::new();
    r.by_ref().take(want as u64).read_to_end(&mut buf)?;
    if buf.len() != want {
        bail!("truncated: wanted {} f32s, found {} bytes", n, buf.len());
    }
    Ok(buf.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect())
}
