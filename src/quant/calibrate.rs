//! Hidden-layer divisor calibration.
//!
//! Survey the post-ReLU layer-1 peaks, guess a divisor from the 99.9th percentile, then
//! search: a coarse sweep over a neighbourhood of the guess plus all powers of two, and a
//! fine scan of every integer around the coarse winner.
//!
//! One running best carries through both stages and only a strictly higher hit rate
//! replaces it. The fine scan compares its 1000-sample rates against the coarse winner's
//! 500-sample rate. Both stages visit divisors in ascending order, so a tie keeps the
//! divisor reached first: the smaller one within a stage, and the coarse winner over
//! any fine divisor that merely matches it.

use std::collections::BTreeSet;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::EvalSet;
use crate::error::{PtqError, Result};
use crate::model::PIXEL_MAX;
use crate::quant::infer::{accuracy_from_relu1, Accuracy, IntegerNetwork, OutputStage};
use crate::quant::weights::{round_to_i32, QuantizedWeights, QMAX};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    /// Samples surveyed for the activation range.
    pub survey_len: usize,
    /// Samples scored per coarse candidate.
    pub coarse_len: usize,
    /// Samples scored per fine candidate.
    pub fine_len: usize,
    /// Percentile of per-sample peaks used for the initial guess.
    pub percentile: f64,
    /// Factors applied to the initial guess in the coarse sweep.
    pub multipliers: Vec<f64>,
    /// Coarse sweep includes 2^0 ..= 2^max_pow2_exp.
    pub max_pow2_exp: u32,
    /// Fine scan covers best-radius ..= best+radius.
    pub fine_radius: u32,
    #[serde(skip)]
    pub progress: bool,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            survey_len: 2000,
            coarse_len: 500,
            fine_len: 1000,
            percentile: 99.9,
            multipliers: vec![0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 2.0],
            max_pow2_exp: 19,
            fine_radius: 30,
            progress: false,
        }
    }
}

impl CalibrationParams {
    pub fn validate(&self) -> Result<()> {
        if self.survey_len == 0 || self.coarse_len == 0 || self.fine_len == 0 {
            return Err(PtqError::InvalidParams("slice lengths must be > 0".to_string()));
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(PtqError::InvalidParams(format!("percentile {} outside 0..=100", self.percentile)));
        }
        if self.multipliers.is_empty() || self.multipliers.iter().any(|m| !m.is_finite() || *m <= 0.0) {
            return Err(PtqError::InvalidParams("multipliers must be positive and finite".to_string()));
        }
        if self.max_pow2_exp > 30 {
            return Err(PtqError::InvalidParams(format!("max_pow2_exp {} > 30", self.max_pow2_exp)));
        }
        Ok(())
    }

    /// Samples the eval set must provide.
    pub fn required_len(&self) -> usize {
        self.survey_len.max(self.coarse_len).max(self.fine_len)
    }
}

/// Distribution of per-sample `max(relu1)` over the survey slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSurvey {
    pub peaks: Vec<i32>,
    pub p999: i64,
    pub p100: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub stage: OutputStage,
    pub initial_divisor: u32,
    pub p999: i64,
    pub p100: i64,
    /// Coarse winner's score on the coarse slice.
    pub coarse: Accuracy,
    /// Chosen divisor's score on the fine slice.
    pub sample: Accuracy,
    /// Best divisor's score on the whole eval set.
    pub full: Accuracy,
    pub b2_clipped: usize,
}

impl CalibrationResult {
    pub fn h_div(&self) -> u32 { self.stage.h_div }

    pub fn b2(&self) -> &[i32] { &self.stage.b2 }

    pub fn accuracy(&self) -> f64 { self.full.percent() }

    pub fn sample_accuracy(&self) -> f64 { self.sample.percent() }
}

/// Layer-2 bias for a given divisor. A requantized hidden unit is worth
/// `h_div * S_w1 / 255` in float terms, so `B2[o] = round(b2[o] / (S_w2 * h_div * S_w1 / 255))`.
/// Returns the stage and how many entries saturated into i32.
pub fn derive_bias2(b2: &[f32], s_w1: f64, s_w2: f64, h_div: u32) -> (OutputStage, usize) {
    let scale_h = h_div as f64 * s_w1 / PIXEL_MAX;
    let mut clipped = 0usize;
    let b2 = b2
        .iter()
        .map(|&b| {
            let (v, c) = round_to_i32(b as f64 / (s_w2 * scale_h));
            clipped += c as usize;
            v
        })
        .collect();
    (OutputStage { h_div, b2 }, clipped)
}

/// Linear-interpolated percentile of an ascending slice.
pub fn percentile(sorted: &[i32], q: f64) -> f64 {
    if sorted.is_empty() { return 0.0; }
    let pos = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let (a, b) = (sorted[lo] as f64, sorted[hi] as f64);
    a + (b - a) * (pos - lo as f64)
}

/// Smallest divisor that brings `peak` into 0..=127, never below 1.
pub fn initial_divisor(peak: i64) -> u32 {
    (peak / QMAX as i64).clamp(1, u32::MAX as i64) as u32
}

/// Coarse candidates in ascending order, without duplicates.
pub fn candidate_divisors(initial: u32, params: &CalibrationParams) -> Vec<u32> {
    let mut set = BTreeSet::new();
    for &m in &params.multipliers {
        set.insert(((initial as f64 * m).floor() as u32).max(1));
    }
    for e in 0..=params.max_pow2_exp {
        set.insert(1u32 << e);
    }
    set.into_iter().collect()
}

pub struct ActivationCalibrator<'a> {
    net: IntegerNetwork<'a>,
    b2: &'a [f32],
    params: CalibrationParams,
}

impl<'a> ActivationCalibrator<'a> {
    pub fn new(weights: &'a QuantizedWeights, b1: &'a [i32], b2: &'a [f32], params: CalibrationParams) -> Result<Self> {
        params.validate()?;
        let net = IntegerNetwork::new(weights, b1)?;
        if b2.len() != weights.meta.output_dim {
            return Err(PtqError::ShapeMismatch { what: "b2", expected: weights.meta.output_dim, actual: b2.len() });
        }
        Ok(Self { net, b2, params })
    }

    pub fn params(&self) -> &CalibrationParams { &self.params }

    pub fn derive_bias2(&self, h_div: u32) -> (OutputStage, usize) {
        let w = self.net.weights;
        derive_bias2(self.b2, w.s_w1, w.s_w2, h_div)
    }

    /// Range survey on its own; `calibrate` runs the same computation on cached activations.
    pub fn survey(&self, eval: &EvalSet) -> Result<RangeSurvey> {
        let samples = eval.prefix(self.params.survey_len)?;
        let relu1: Vec<Vec<i32>> = samples.par_iter().map(|s| self.net.relu1(&s.pixels)).collect();
        Ok(self.survey_cached(&relu1))
    }

    pub fn calibrate(&self, eval: &EvalSet) -> Result<CalibrationResult> {
        let p = &self.params;
        let head = eval.prefix(p.required_len())?;
        let relu1: Vec<Vec<i32>> = head.par_iter().map(|s| self.net.relu1(&s.pixels)).collect();
        let labels: Vec<u8> = head.iter().map(|s| s.label).collect();

        let survey = self.survey_cached(&relu1[..p.survey_len]);
        let initial = initial_divisor(survey.p999);
        info!("post-relu peak over {} samples: p{}={} p100={}", p.survey_len, p.percentile, survey.p999, survey.p100);
        info!("initial H_DIV = {}", initial);
        if survey.p999 == 0 {
            warn!("layer 1 is dead on the survey slice; searching from H_DIV=1");
        }

        let candidates = candidate_divisors(initial, p);
        let fine_count = 2 * p.fine_radius as u64 + 1;
        let bar = self.progress_bar(candidates.len() as u64 + fine_count);

        let coarse_relu = &relu1[..p.coarse_len];
        let coarse_labels = &labels[..p.coarse_len];
        let mut best_div = initial;
        let mut coarse = Accuracy { correct: 0, total: p.coarse_len, saturated: 0 };
        for &d in &candidates {
            let (stage, _) = self.derive_bias2(d);
            let acc = accuracy_from_relu1(self.net.weights, coarse_relu, coarse_labels, &stage);
            debug!("coarse H_DIV={} acc={:.2}%", d, acc.percent());
            if acc.beats(&coarse) {
                coarse = acc;
                best_div = d;
            }
            bar.inc(1);
        }
        info!("coarse best H_DIV = {} ({:.2}% on {})", best_div, coarse.percent(), p.coarse_len);

        let fine_relu = &relu1[..p.fine_len];
        let fine_labels = &labels[..p.fine_len];
        let lo = best_div.saturating_sub(p.fine_radius).max(1);
        let hi = best_div.saturating_add(p.fine_radius);
        let mut best = coarse;
        let mut sample = Accuracy { correct: 0, total: p.fine_len, saturated: 0 };
        for d in lo..=hi {
            let (stage, _) = self.derive_bias2(d);
            let acc = accuracy_from_relu1(self.net.weights, fine_relu, fine_labels, &stage);
            debug!("fine H_DIV={} acc={:.2}%", d, acc.percent());
            if acc.beats(&best) {
                best = acc;
                best_div = d;
            }
            if d == best_div {
                sample = acc;
            }
            bar.inc(1);
        }
        bar.finish_and_clear();
        info!("best H_DIV = {} ({:.2}% on {})", best_div, sample.percent(), p.fine_len);

        let (stage, b2_clipped) = self.derive_bias2(best_div);
        if let (Some(lo), Some(hi)) = (stage.b2.iter().min(), stage.b2.iter().max()) {
            info!("B2 range: [{}, {}]", lo, hi);
        }
        if b2_clipped > 0 {
            warn!("{} layer-2 biases saturated into i32", b2_clipped);
        }
        let full = self.net.accuracy(eval.samples(), &stage);
        info!("full-set accuracy: {:.2}% ({}/{})", full.percent(), full.correct, full.total);
        if full.saturated > 0 {
            debug!("{} hidden activations saturated at {}", full.saturated, QMAX);
        }

        Ok(CalibrationResult {
            stage,
            initial_divisor: initial,
            p999: survey.p999,
            p100: survey.p100,
            coarse,
            sample,
            full,
            b2_clipped,
        })
    }

    fn survey_cached(&self, relu1: &[Vec<i32>]) -> RangeSurvey {
        let peaks: Vec<i32> = relu1.iter().map(|acts| acts.iter().copied().max().unwrap_or(0)).collect();
        let mut sorted = peaks.clone();
        sorted.sort_unstable();
        let p999 = percentile(&sorted, self.params.percentile) as i64;
        let p100 = sorted.last().copied().unwrap_or(0) as i64;
        RangeSurvey { peaks, p999, p100 }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.params.progress { return ProgressBar::hidden(); }
        let bar = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.cyan} H_DIV search [{bar:40}] {pos}/{len}") {
            bar.set_style(style);
        }
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_divisor_literal_example() {
        assert_eq!(initial_divisor(1280), 10);
        assert_eq!(initial_divisor(0), 1);
        assert_eq!(initial_divisor(126), 1);
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let v: Vec<i32> = (0..=10).map(|x| x * 10).collect();
        assert_eq!(percentile(&v, 50.0), 50.0);
        assert_eq!(percentile(&v, 100.0), 100.0);
        assert!((percentile(&v, 99.9) - 99.9).abs() < 1e-9);
        assert!((percentile(&[0, 1000], 99.9) - 999.0).abs() < 1e-9);
    }

    #[test]
    fn candidates_cover_neighbourhood_and_powers_of_two() {
        let c = candidate_divisors(10, &CalibrationParams::default());
        for d in [2u32, 5, 7, 10, 12, 15, 20, 1, 1 << 19] {
            assert!(c.contains(&d), "missing {d}");
        }
        assert!(c.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(c.len(), 26); // 2 is shared between the two families
    }

    #[test]
    fn candidates_never_drop_below_one() {
        let c = candidate_divisors(1, &CalibrationParams::default());
        assert_eq!(c[0], 1);
        assert_eq!(c.len(), 20);
    }

    #[test]
    fn bias2_follows_divisor() {
        // scale_h = 10 * 0.051 / 255 = 0.002; S_w2 * scale_h = 0.0002
        let (stage, clipped) = derive_bias2(&[0.1, -0.05], 0.051, 0.1, 10);
        assert_eq!(stage, OutputStage { h_div: 10, b2: vec![500, -250] });
        assert_eq!(clipped, 0);
        let (stage, _) = derive_bias2(&[0.1, -0.05], 0.051, 0.1, 20);
        assert_eq!(stage.b2, vec![250, -125]);
    }

    #[test]
    fn params_validation() {
        assert!(CalibrationParams::default().validate().is_ok());
        let bad = CalibrationParams { coarse_len: 0, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = CalibrationParams { percentile: 101.0, ..Default::default() };
        assert!(bad.validate().is_err());
        assert_eq!(CalibrationParams::default().required_len(), 2000);
    }
}
