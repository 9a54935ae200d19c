//! Weak-link detection from per-transfer throughput/failure samples.
//!
//! Four signals are maintained online and fused per sample:
//! an EWMA of throughput, a bounded failure window, a two-sided CUSUM on the
//! relative change against a baseline, and a score gate. A weak verdict
//! requires every conjunct at once: warm-up complete, CUSUM change, fused
//! score above 0.5, and EWMA below the gate. The baseline is the mean of the
//! earliest quarter of observed speeds, so it tracks what the link looked
//! like when the batch started.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Detector tuning. Immutable after construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// EWMA smoothing factor for throughput.
    pub ewma_alpha: f64,
    /// CUSUM drift allowance.
    pub cusum_k: f64,
    /// CUSUM alarm threshold.
    pub cusum_h: f64,
    /// Weak gate: EWMA must fall below `gate_ratio * baseline`.
    pub gate_ratio: f64,
    /// Weight of the speed-drop term in the fused score.
    pub fuse_alpha: f64,
    /// Weight of the failure-rate term in the fused score.
    pub fuse_gamma: f64,
    /// Capacity of the failure window.
    pub win_size: usize,
    /// Samples required before any weak verdict.
    pub warmup_min: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.2,
            cusum_k: 0.3,
            cusum_h: 1.2,
            gate_ratio: 0.5,
            fuse_alpha: 0.7,
            fuse_gamma: 0.3,
            win_size: 20,
            warmup_min: 10,
        }
    }
}

/// Per-sample detector output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub is_weak: bool,
    /// In `[0, 1]`; blends speed drop, failure rate, and CUSUM magnitude.
    pub confidence: f64,
}

/// Online weak-link detector. One instance per batch; owned by the
/// orchestrator and never shared.
#[derive(Debug)]
pub struct WeakLinkDetector {
    cfg: DetectorConfig,
    ewma: f64,
    history: Vec<f64>,
    fail_window: VecDeque<u8>,
    cusum_pos: f64,
    cusum_neg: f64,
}

impl WeakLinkDetector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self {
            cfg,
            ewma: 0.0,
            history: Vec::new(),
            fail_window: VecDeque::new(),
            cusum_pos: 0.0,
            cusum_neg: 0.0,
        }
    }

    /// Restore initial state for reuse across rounds.
    pub fn reset(&mut self) {
        self.ewma = 0.0;
        self.history.clear();
        self.fail_window.clear();
        self.cusum_pos = 0.0;
        self.cusum_neg = 0.0;
    }

    /// Number of samples observed so far.
    pub fn samples(&self) -> usize {
        self.history.len()
    }

    /// Consume one sample and produce a verdict. `ttfb_ms` is accepted for
    /// interface stability but does not enter the current fusion.
    pub fn feed(&mut self, speed_kbps: f64, _ttfb_ms: Option<f64>, ok: bool) -> Verdict {
        let cfg = self.cfg;
        let v = if speed_kbps.is_nan() {
            0.0
        } else {
            speed_kbps.max(0.0)
        };

        if self.history.is_empty() {
            self.ewma = v;
        } else {
            self.ewma = cfg.ewma_alpha * v + (1.0 - cfg.ewma_alpha) * self.ewma;
        }
        self.history.push(v);

        self.fail_window.push_back(u8::from(!ok));
        while self.fail_window.len() > cfg.win_size {
            self.fail_window.pop_front();
        }
        let fail_rate = self.fail_window.iter().map(|&f| f as f64).sum::<f64>()
            / self.fail_window.len() as f64;

        let base = self.baseline(v);

        let x = (v - base) / base.max(1e-3);

        self.cusum_pos = (self.cusum_pos + x - cfg.cusum_k).max(0.0);
        self.cusum_neg = (self.cusum_neg + x + cfg.cusum_k).min(0.0);
        let change = self.cusum_pos > cfg.cusum_h || self.cusum_neg.abs() > cfg.cusum_h;

        let score = cfg.fuse_alpha * (-x) + cfg.fuse_gamma * fail_rate;
        let weak_by_score = score > 0.5;

        let gate = self.ewma < cfg.gate_ratio * base;

        let enough = self.history.len() >= cfg.warmup_min.max(3);

        let is_weak = enough && change && weak_by_score && gate;

        let conf_drop = if base <= 0.0 {
            0.0
        } else {
            clamp01((base - self.ewma) / base)
        };
        let cusum_mag = clamp01(self.cusum_pos.max(self.cusum_neg.abs()) / (2.0 * cfg.cusum_h));
        let confidence = clamp01(0.45 * conf_drop + 0.35 * fail_rate + 0.20 * cusum_mag);

        if is_weak {
            // Hysteresis: dampen the accumulators so one verdict doesn't
            // immediately re-fire on the next sample.
            self.cusum_pos *= 0.25;
            self.cusum_neg *= 0.25;
        }

        Verdict {
            is_weak,
            confidence,
        }
    }

    /// Mean of the earliest quarter of observed speeds (at least one sample),
    /// falling back to the current sample, then a small epsilon, when the
    /// prefix mean is zero.
    fn baseline(&self, v: f64) -> f64 {
        let k = ((self.history.len() as f64) * 0.25).floor() as usize;
        let k = k.max(1).min(self.history.len());
        let base_raw = self.history[..k].iter().sum::<f64>() / k as f64;
        if base_raw > 0.0 {
            base_raw
        } else if v > 0.0 {
            v
        } else {
            1e-3
        }
    }
}

fn clamp01(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
