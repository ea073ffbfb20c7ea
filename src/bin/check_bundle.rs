use anyhow::{bail, Context, Result};
use clap::Parser;
use mnist_ptq::io::load_eval_set;
use mnist_ptq::quant::TestVector;
use mnist_ptq::QuantizedModelBundle;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "check_bundle", about = "Re-run a saved bundle over an eval set and compare with its recorded accuracy")]
struct Args {
    /// Bundle JSON written by mnist-ptq --bundle-json
    #[arg(long)]
    bundle: PathBuf,
    #[arg(long)]
    images: PathBuf,
    #[arg(long)]
    labels: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let f = File::open(&args.bundle).with_context(|| format!("open bundle: {}", args.bundle.display()))?;
    let bundle: QuantizedModelBundle = serde_json::from_reader(BufReader::new(f)).context("parse bundle json")?;
    bundle.validate()?;
    let eval = load_eval_set(&args.images, &args.labels)?;

    let acc = bundle.recompute_accuracy(&eval)?;
    println!("recomputed {:.2}% ({}/{}), recorded {:.2}%", acc.percent(), acc.correct, acc.total, bundle.accuracy);
    let vectors = TestVector::first_of_each_class(&eval, bundle.weights.meta.output_dim)?;
    for c in bundle.smoke_test(&vectors)? {
        println!("  Digit {}: pred={}  {}", c.label, c.predicted, if c.ok() { "OK" } else { "WRONG" });
    }
    if (acc.percent() - bundle.accuracy).abs() > 1e-9 {
        bail!("recorded accuracy does not match this eval set");
    }
    Ok(())
}
