mod common;

use mnist_ptq::quant::calibrate::{candidate_divisors, initial_divisor};
use mnist_ptq::quant::infer::accuracy_from_relu1;
use mnist_ptq::quant::{
    derive_bias2, ActivationCalibrator, CalibrationParams, IntegerNetwork, QuantizedWeights, WeightQuantizer,
};
use mnist_ptq::{EvalSample, EvalSet, FloatModel, ModelMeta, PtqError};
use pretty_assertions::assert_eq;

#[test]
fn initial_guess_from_percentile() {
    assert_eq!(initial_divisor(1280), 10);
    let c = candidate_divisors(10, &CalibrationParams::default());
    assert_eq!(&c[..8], &[1, 2, 4, 5, 7, 8, 10, 12]);
}

#[test]
fn survey_matches_relu_peaks() {
    let model = common::block_model(1);
    let q = WeightQuantizer.quantize(&model).unwrap();
    let eval = common::block_eval(2, 300);
    let cal = ActivationCalibrator::new(&q.weights, &q.b1, &model.b2, common::small_params()).unwrap();
    let survey = cal.survey(&eval).unwrap();
    assert_eq!(survey.peaks.len(), 200);
    assert_eq!(survey.p100, *survey.peaks.iter().max().unwrap() as i64);
    assert!(survey.p999 <= survey.p100);
    assert!(survey.p999 > 0);
}

#[test]
fn calibration_is_deterministic_and_consistent() {
    let model = common::block_model(1);
    let q = WeightQuantizer.quantize(&model).unwrap();
    let eval = common::block_eval(2, 300);
    let cal = ActivationCalibrator::new(&q.weights, &q.b1, &model.b2, common::small_params()).unwrap();
    let a = cal.calibrate(&eval).unwrap();
    let b = cal.calibrate(&eval).unwrap();
    assert_eq!(a, b);

    // B2 belongs to the chosen divisor
    let (stage, _) = derive_bias2(&model.b2, q.weights.s_w1, q.weights.s_w2, a.h_div());
    assert_eq!(stage, a.stage);
    assert_eq!(a.full.total, 300);
    assert_eq!(a.sample.total, 100);
    assert!(a.accuracy() >= 90.0, "accuracy {}", a.accuracy());
    assert!(a.h_div() >= 1);
}

/// Two-stage search written out plainly: one running best percentage shared by the
/// coarse sweep (first `coarse_len` samples) and the fine scan (first `fine_len`).
fn two_stage_search(model: &FloatModel, eval: &EvalSet, params: &CalibrationParams) -> u32 {
    let q = WeightQuantizer.quantize(model).unwrap();
    let net = IntegerNetwork::new(&q.weights, &q.b1).unwrap();
    let relu1: Vec<Vec<i32>> = eval.iter().map(|s| net.relu1(&s.pixels)).collect();
    let labels: Vec<u8> = eval.iter().map(|s| s.label).collect();
    let score = |d: u32, n: usize| {
        let (stage, _) = derive_bias2(&model.b2, q.weights.s_w1, q.weights.s_w2, d);
        let acc = accuracy_from_relu1(&q.weights, &relu1[..n], &labels[..n], &stage);
        acc.correct as f64 / n as f64 * 100.0
    };

    let cal = ActivationCalibrator::new(&q.weights, &q.b1, &model.b2, params.clone()).unwrap();
    let init = initial_divisor(cal.survey(eval).unwrap().p999);
    let (mut best_acc, mut best_div) = (0.0, init);
    for d in candidate_divisors(init, params) {
        let a = score(d, params.coarse_len);
        if a > best_acc {
            best_acc = a;
            best_div = d;
        }
    }
    let lo = best_div.saturating_sub(params.fine_radius).max(1);
    let hi = best_div + params.fine_radius;
    for d in lo..=hi {
        let a = score(d, params.fine_len);
        if a > best_acc {
            best_acc = a;
            best_div = d;
        }
    }
    best_div
}

fn random_model(seed: u64) -> FloatModel {
    let meta = common::meta();
    FloatModel::new(
        meta,
        common::random_weights(seed, meta.hidden_dim * meta.input_dim, 0.1),
        common::random_weights(seed + 1, meta.hidden_dim, 0.2),
        common::random_weights(seed + 2, meta.output_dim * meta.hidden_dim, 0.5),
        common::random_weights(seed + 3, meta.output_dim, 0.2),
    )
    .unwrap()
}

#[test]
fn search_matches_two_stage_reference() {
    let params = common::small_params();
    for seed in 0..24u64 {
        let model = if seed % 3 == 0 { common::block_model(seed) } else { random_model(seed * 10) };
        let eval = common::block_eval(seed + 100, 300);
        let q = WeightQuantizer.quantize(&model).unwrap();
        let cal = ActivationCalibrator::new(&q.weights, &q.b1, &model.b2, params.clone()).unwrap();
        let got = cal.calibrate(&eval).unwrap();
        assert_eq!(got.h_div(), two_stage_search(&model, &eval, &params), "seed {}", seed);
    }
}

// Hand-built 2-2-2 network: identity layers, zero biases, unit scales. Hidden unit k
// holds pixel k, so `hidden = pixel / d` and the prediction is 1 only when
// pixel[1] / d > pixel[0] / d.

fn identity_weights(gain: i8) -> QuantizedWeights {
    QuantizedWeights {
        meta: ModelMeta { input_dim: 2, hidden_dim: 2, output_dim: 2 },
        w1: vec![gain, 0, 0, gain],
        w2: vec![1, 0, 0, 1],
        s_w1: 1.0,
        s_w2: 1.0,
    }
}

/// Label 1, correct while `d <= k`.
fn above(k: u8) -> EvalSample { EvalSample { pixels: vec![0, k], label: 1 } }

/// Label 0, correct once `d > k`.
fn below(k: u8) -> EvalSample { EvalSample { pixels: vec![0, k], label: 0 } }

/// Label 1 but class 0 always wins.
fn never() -> EvalSample { EvalSample { pixels: vec![5, 0], label: 1 } }

fn search(gain: i8, samples: Vec<EvalSample>, coarse_len: usize, fine_radius: u32) -> mnist_ptq::quant::CalibrationResult {
    let n = samples.len();
    let eval = EvalSet::new(samples, 2).unwrap();
    let weights = identity_weights(gain);
    let b1 = [0, 0];
    let b2 = [0.0f32, 0.0];
    let params = CalibrationParams { survey_len: n, coarse_len, fine_len: n, fine_radius, ..Default::default() };
    ActivationCalibrator::new(&weights, &b1, &b2, params).unwrap().calibrate(&eval).unwrap()
}

#[test]
fn coarse_sweep_picks_only_winning_candidate() {
    // only d in 11..=20 gets everything right; 16 is the one power of two in there
    let samples = vec![above(20), above(20), above(20), below(10), below(10), below(10)];
    let r = search(1, samples, 6, 0);
    assert_eq!(r.initial_divisor, 1);
    assert_eq!(r.h_div(), 16);
    assert_eq!(r.coarse.correct, 6);
    assert_eq!(r.full.correct, 6);
}

#[test]
fn coarse_tie_goes_to_smaller_divisor() {
    // 16 and 32 both score 6/6
    let samples = vec![above(40), above(40), above(40), below(10), below(10), below(10)];
    let r = search(1, samples, 6, 0);
    assert_eq!(r.h_div(), 16);
}

#[test]
fn fine_scan_takes_first_strict_improvement() {
    // coarse slice: 16 wins at 2/4. fine slice: 14..=20 reach 6/8, 11..=13 stay at 4/8.
    let samples = vec![above(20), below(10), never(), never(), above(20), below(13), above(20), below(13)];
    let r = search(1, samples, 4, 5);
    assert_eq!(r.coarse.correct, 2);
    assert_eq!(r.h_div(), 14);
    assert_eq!(r.sample.correct, 6);
    assert_eq!(r.sample.total, 8);
}

#[test]
fn fine_tie_keeps_coarse_winner() {
    // every divisor in 11..=20 scores 4/8 on the fine slice, equal to 16's 2/4
    let samples = vec![above(20), below(10), never(), never(), never(), never(), above(20), below(10)];
    let r = search(1, samples, 4, 5);
    assert_eq!(r.h_div(), 16);
    assert_eq!(r.sample.correct, 4);
}

#[test]
fn hopeless_search_keeps_initial_divisor() {
    // relu1 = 25500 everywhere, so the guess is 25500 / 127 = 200; nothing ever scores
    let samples = vec![EvalSample { pixels: vec![255, 0], label: 1 }; 4];
    let r = search(100, samples, 4, 30);
    assert_eq!(r.p999, 25500);
    assert_eq!(r.initial_divisor, 200);
    assert_eq!(r.coarse.correct, 0);
    assert_eq!(r.h_div(), 200);
    assert_eq!(r.full.correct, 0);
}

#[test]
fn dead_network_falls_back_to_divisor_one() {
    let meta = common::meta();
    let w1 = vec![0.01f32; meta.hidden_dim * meta.input_dim];
    let b1 = vec![-1000.0f32; meta.hidden_dim];
    let w2 = common::random_weights(3, meta.output_dim * meta.hidden_dim, 0.5);
    let b2 = vec![0.0f32; meta.output_dim];
    let model = FloatModel::new(meta, w1, b1, w2, b2).unwrap();
    let q = WeightQuantizer.quantize(&model).unwrap();
    let eval = common::block_eval(4, 300);
    let cal = ActivationCalibrator::new(&q.weights, &q.b1, &model.b2, common::small_params()).unwrap();
    let r = cal.calibrate(&eval).unwrap();
    assert_eq!(r.p999, 0);
    assert_eq!(r.p100, 0);
    assert_eq!(r.initial_divisor, 1);
    assert_eq!(r.h_div(), 1);
    assert_eq!(r.b2(), &[0; 10]);
    // every logit is zero, so class 0 always wins
    assert_eq!(r.full.correct, 30);
}

#[test]
fn undersized_eval_set_is_rejected() {
    let model = common::block_model(1);
    let q = WeightQuantizer.quantize(&model).unwrap();
    let eval = common::block_eval(2, 300);
    let cal = ActivationCalibrator::new(&q.weights, &q.b1, &model.b2, CalibrationParams::default()).unwrap();
    assert_eq!(cal.calibrate(&eval).unwrap_err(), PtqError::EvalSetTooSmall { required: 2000, actual: 300 });
}

#[test]
fn params_roundtrip_through_json_with_defaults() {
    let p: CalibrationParams = serde_json::from_str(r#"{"coarse_len": 64}"#).unwrap();
    assert_eq!(p, CalibrationParams { coarse_len: 64, ..Default::default() });
}
