//! C header emission for integer-only targets.

use anyhow::{Context, Result};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::quant::{QuantizedModelBundle, TestVector};

pub const GUARD: &str = "MNIST_WEIGHTS_INT8_H";

pub fn save_header<P: AsRef<Path>>(path: P, bundle: &QuantizedModelBundle, vectors: &[TestVector]) -> Result<()> {
    let f = File::create(&path).with_context(|| format!("create header: {}", path.as_ref().display()))?;
    let mut w = BufWriter::new(f);
    write_header(&mut w, bundle, vectors)?;
    w.flush()?;
    Ok(())
}

pub fn write_header<W: Write>(w: &mut W, bundle: &QuantizedModelBundle, vectors: &[TestVector]) -> Result<()> {
    let m = bundle.weights.meta;
    let rule = "// =====================================================";
    writeln!(w, "{}", rule)?;
    writeln!(w, "// INT8 PTQ MNIST Weights")?;
    writeln!(w, "// Generated by mnist-ptq")?;
    writeln!(w, "//")?;
    writeln!(w, "// Pure integer inference (no FPU):")?;
    writeln!(w, "//   Layer1:")?;
    writeln!(w, "//     acc[r] = sum_c(w1[r][c] * (int32)pixel[c]) + b1[r]")?;
    writeln!(w, "//     h[r]   = clip(relu(acc[r]) / H_DIV, 0, 127)")?;
    writeln!(w, "//   Layer2:")?;
    writeln!(w, "//     out[r] = sum_c(w2[r][c] * h[c]) + b2[r]")?;
    writeln!(w, "//     pred   = argmax(out)")?;
    writeln!(w, "//")?;
    writeln!(w, "// Accuracy: {:.2}%", bundle.accuracy)?;
    writeln!(w, "{}\n", rule)?;
    writeln!(w, "#ifndef {}", GUARD)?;
    writeln!(w, "#define {}\n", GUARD)?;
    writeln!(w, "#include <stdint.h>\n")?;
    define(w, "INPUT_SIZE", m.input_dim)?;
    define(w, "HIDDEN_SIZE", m.hidden_dim)?;
    define(w, "OUTPUT_SIZE", m.output_dim)?;
    define(w, "NUM_TEST_IMAGES", vectors.len())?;
    writeln!(w)?;
    writeln!(w, "#define H_DIV  {}\n", bundle.h_div())?;

    let aligned = " __attribute__((aligned(4)))";
    array(w, "int8_t", "w1_int8", &bundle.weights.w1, 16, 4, aligned,
        &format!("Layer1 weights [{}][{}] INT8", m.hidden_dim, m.input_dim))?;
    array(w, "int32_t", "b1_int32", &bundle.b1, 8, 12, aligned,
        &format!("Layer1 biases  [{}] INT32", m.hidden_dim))?;
    array(w, "int8_t", "w2_int8", &bundle.weights.w2, 16, 4, aligned,
        &format!("Layer2 weights [{}][{}]  INT8", m.output_dim, m.hidden_dim))?;
    array(w, "int32_t", "b2_int32", &bundle.stage.b2, 8, 12, aligned,
        &format!("Layer2 biases  [{}] INT32", m.output_dim))?;

    for v in vectors {
        array(w, "uint8_t", &format!("test_image_{}", v.label), &v.pixels, 16, 3, "", &format!("Digit {}", v.label))?;
    }
    writeln!(w, "static const uint8_t* test_images[NUM_TEST_IMAGES] = {{")?;
    for (i, v) in vectors.iter().enumerate() {
        let sep = if i + 1 < vectors.len() { "," } else { "" };
        writeln!(w, "    test_image_{}{}", v.label, sep)?;
    }
    writeln!(w, "}};\n")?;
    let labels: Vec<String> = vectors.iter().map(|v| v.label.to_string()).collect();
    writeln!(w, "static const uint8_t test_labels[NUM_TEST_IMAGES] = {{{}}};\n", labels.join(", "))?;
    writeln!(w, "#endif")?;
    Ok(())
}

fn define<W: Write>(w: &mut W, name: &str, value: usize) -> Result<()> {
    writeln!(w, "#define {:<15}{:>5}", name, value)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn array<W: Write, T: Display>(
    w: &mut W,
    ctype: &str,
    name: &str,
    values: &[T],
    per_row: usize,
    width: usize,
    attr: &str,
    comment: &str,
) -> Result<()> {
    if !comment.is_empty() { writeln!(w, "// {}", comment)?; }
    writeln!(w, "static const {} {}[{}]{} = {{", ctype, name, values.len(), attr)?;
    let rows: Vec<&[T]> = values.chunks(per_row).collect();
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(|v| format!("{:>width$}", v, width = width)).collect();
        let sep = if i + 1 < rows.len() { "," } else { "" };
        writeln!(w, "    {}{}", cells.join(", "), sep)?;
    }
    writeln!(w, "}};\n")?;
    Ok(())
}
