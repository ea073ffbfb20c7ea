#![allow(dead_code)]

use mnist_ptq::{CalibrationParams, EvalSample, EvalSet, FloatModel, ModelMeta};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

pub const BLOCK: usize = 4;
pub const CLASSES: usize = 10;
pub const INPUT: usize = BLOCK * CLASSES;

pub fn meta() -> ModelMeta {
    ModelMeta { input_dim: INPUT, hidden_dim: CLASSES, output_dim: CLASSES }
}

/// Class k lights up pixel block k; hidden unit k detects block k; output k reads hidden k.
/// Output biases differ per class so a badly clipped hidden layer loses to the bias.
pub fn block_model(seed: u64) -> FloatModel {
    let mut rng = SmallRng::seed_from_u64(seed);
    let noise = Normal::new(0.0f32, 0.01).unwrap();
    let mut w1 = vec![0f32; CLASSES * INPUT];
    for r in 0..CLASSES {
        for c in 0..INPUT {
            let base = if c / BLOCK == r { 0.5 } else { -0.1 };
            w1[r * INPUT + c] = base + noise.sample(&mut rng);
        }
    }
    let b1 = vec![0.05f32; CLASSES];
    let mut w2 = vec![0f32; CLASSES * CLASSES];
    for o in 0..CLASSES {
        for h in 0..CLASSES { w2[o * CLASSES + h] = if o == h { 1.0 } else { -0.2 }; }
    }
    let b2: Vec<f32> = (0..CLASSES).map(|o| 0.01 * o as f32).collect();
    FloatModel::new(meta(), w1, b1, w2, b2).unwrap()
}

pub fn block_image(rng: &mut SmallRng, label: usize) -> Vec<u8> {
    (0..INPUT)
        .map(|c| if c / BLOCK == label { rng.gen_range(200..=255u8) } else { rng.gen_range(0..=30u8) })
        .collect()
}

/// `n` samples, labels balanced and shuffled.
pub fn block_eval(seed: u64, n: usize) -> EvalSet {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut labels: Vec<usize> = (0..n).map(|i| i % CLASSES).collect();
    labels.shuffle(&mut rng);
    let samples = labels
        .into_iter()
        .map(|label| EvalSample { pixels: block_image(&mut rng, label), label: label as u8 })
        .collect();
    EvalSet::new(samples, INPUT).unwrap()
}

pub fn small_params() -> CalibrationParams {
    CalibrationParams { survey_len: 200, coarse_len: 50, fine_len: 100, ..Default::default() }
}

pub fn random_weights(seed: u64, n: usize, std: f32) -> Vec<f32> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let dist = Normal::new(0.0f32, std).unwrap();
    (0..n).map(|_| dist.sample(&mut rng)).collect()
}
