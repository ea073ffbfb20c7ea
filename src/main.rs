use anyhow::{bail, Context, Result};
use clap::Parser;
use mnist_ptq::io::{digits, load_eval_set, load_float_model, save_header};
use mnist_ptq::{quantize_model, CalibrationParams};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mnist-ptq", version, about = "Quantize a two-layer MNIST classifier to integer-only inference")]
struct Args {
    /// Float model (.json, or MNISTF01 binary)
    #[arg(long)]
    model: PathBuf,

    /// Eval images (idx3-ubyte)
    #[arg(long)]
    images: PathBuf,

    /// Eval labels (idx1-ubyte)
    #[arg(long)]
    labels: PathBuf,

    /// Output C header
    #[arg(long, default_value = "mnist_weights_int8.h")]
    header: PathBuf,

    /// Also write the bundle as JSON (readable by check_bundle)
    #[arg(long)]
    bundle_json: Option<PathBuf>,

    /// Directory for PGM previews of the test vectors
    #[arg(long)]
    digits_dir: Option<PathBuf>,

    /// Image side length for previews
    #[arg(long, default_value_t = 28)]
    image_side: usize,

    /// Calibration params as JSON; missing fields keep their defaults
    #[arg(long)]
    params: Option<PathBuf>,

    /// Override: samples in the range survey
    #[arg(long)]
    survey_len: Option<usize>,

    /// Override: samples per coarse candidate
    #[arg(long)]
    coarse_len: Option<usize>,

    /// Override: samples per fine candidate
    #[arg(long)]
    fine_len: Option<usize>,

    /// Fail if the full-set integer accuracy (percent) ends up below this
    #[arg(long)]
    min_accuracy: Option<f64>,

    /// Show a progress bar during the divisor search
    #[arg(long, default_value_t = false)]
    progress: bool,
}

fn load_params(args: &Args) -> Result<CalibrationParams> {
    let mut p = match &args.params {
        Some(path) => {
            let f = File::open(path).with_context(|| format!("open params: {}", path.display()))?;
            serde_json::from_reader(BufReader::new(f)).context("parse params json")?
        }
        None => CalibrationParams::default(),
    };
    if let Some(n) = args.survey_len { p.survey_len = n; }
    if let Some(n) = args.coarse_len { p.coarse_len = n; }
    if let Some(n) = args.fine_len { p.fine_len = n; }
    p.progress = args.progress;
    Ok(p)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let model = load_float_model(&args.model)?;
    eprintln!("Loaded model {}x{}x{} from {}", model.meta.input_dim, model.meta.hidden_dim, model.meta.output_dim, args.model.display());
    let eval = load_eval_set(&args.images, &args.labels)?;
    eprintln!("Loaded {} eval samples", eval.len());
    let params = load_params(&args)?;

    let report = quantize_model(&model, &eval, params)?;
    let bundle = &report.bundle;

    println!("Per-digit verification:");
    for c in &report.checks {
        println!("  Digit {}: pred={}  {}", c.label, c.predicted, if c.ok() { "OK" } else { "WRONG" });
    }

    save_header(&args.header, bundle, &report.vectors)?;
    eprintln!("Wrote {}", args.header.display());
    if let Some(path) = &args.bundle_json {
        let f = File::create(path).with_context(|| format!("create bundle json: {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(f), bundle).context("write bundle json")?;
        eprintln!("Wrote {}", path.display());
    }
    if let Some(dir) = &args.digits_dir {
        let written = digits::save_previews(dir, &report.vectors, args.image_side, 10)?;
        eprintln!("Wrote {} previews to {}", written.len(), dir.display());
    }

    println!(
        "H_DIV={} accuracy={:.2}% (float {:.2}%, sample {:.2}%)",
        bundle.h_div(),
        bundle.accuracy,
        report.float_accuracy,
        report.calibration.sample_accuracy()
    );
    if let Some(min) = args.min_accuracy {
        if bundle.accuracy < min {
            bail!("integer accuracy {:.2}% below required {:.2}%", bundle.accuracy, min);
        }
    }
    Ok(())
}
