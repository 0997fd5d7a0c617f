//! End-of-shot prediction from a least-squares line over recent samples.
//!
//! The estimate is always a finite time inside `[min_s, max_s]`. Whenever the
//! data cannot support an extrapolation (too few samples, bloom, flat or
//! falling trend) the answer is `max_s`, which means "do not stop yet".

use crate::buffer::{Sample, SampleBuffer};
use crate::config::{ShotLimits, TrendCfg};

/// `weight = slope_gps * time + intercept_g`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope_gps: f32,
    pub intercept_g: f32,
}

/// Why an estimate has the value it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    /// Fewer samples than the regression window.
    InsufficientData,
    /// Latest reading is below the flow-start threshold.
    BelowFlowThreshold,
    /// Fit failed or slope is at or below epsilon.
    DegenerateSlope,
    /// Extrapolated time was already inside the limits.
    Extrapolated,
    /// Extrapolated time was pulled into the limits.
    Clamped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub end_time_s: f32,
    pub basis: Basis,
    pub fit: Option<LineFit>,
}

/// Ordinary least squares over `points`.
///
/// Accumulates in f64. Returns `None` for fewer than two points, a
/// zero-variance time axis, or a non-finite result; the divisor is checked
/// before dividing.
pub fn ols(points: impl Iterator<Item = Sample>) -> Option<LineFit> {
    let mut n = 0.0f64;
    let (mut sx, mut sy, mut sxx, mut sxy) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for p in points {
        let x = f64::from(p.time_s);
        let y = f64::from(p.weight_g);
        n += 1.0;
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
    }
    if n < 2.0 {
        return None;
    }
    let denom = n * sxx - sx * sx;
    // Relative guard: the subtraction above cancels badly for clustered times.
    let scale = (n * sxx).abs().max(1.0);
    if !denom.is_finite() || denom.abs() <= scale * 1e-12 {
        return None;
    }
    let slope = (n * sxy - sx * sy) / denom;
    let intercept = sy / n - slope * (sx / n);
    if !(slope.is_finite() && intercept.is_finite()) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some(LineFit {
        slope_gps: slope as f32,
        intercept_g: intercept as f32,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct TrendEstimator {
    cfg: TrendCfg,
    limits: ShotLimits,
}

impl TrendEstimator {
    pub fn new(cfg: TrendCfg, limits: ShotLimits) -> Self {
        Self { cfg, limits }
    }

    pub fn cfg(&self) -> &TrendCfg {
        &self.cfg
    }

    pub fn limits(&self) -> &ShotLimits {
        &self.limits
    }

    /// Line through the last `window` samples, if there are that many.
    pub fn fit(&self, buf: &SampleBuffer) -> Option<LineFit> {
        ols(buf.last_n(self.cfg.window)?)
    }

    /// Predicted end time with its basis.
    pub fn estimate(&self, buf: &SampleBuffer, goal_g: f32, offset_g: f32) -> Estimate {
        let max = self.limits.max_s;
        let fallback = |basis| Estimate {
            end_time_s: max,
            basis,
            fit: None,
        };

        if buf.len() < self.cfg.window.max(2) {
            return fallback(Basis::InsufficientData);
        }
        match buf.last() {
            Some(last) if last.weight_g >= self.cfg.flow_start_g => {}
            _ => return fallback(Basis::BelowFlowThreshold),
        }
        let Some(fit) = self.fit(buf) else {
            return fallback(Basis::DegenerateSlope);
        };
        if fit.slope_gps <= self.cfg.slope_epsilon_gps {
            return Estimate {
                fit: Some(fit),
                ..fallback(Basis::DegenerateSlope)
            };
        }

        let raw = (goal_g - offset_g - fit.intercept_g) / fit.slope_gps;
        if !raw.is_finite() {
            return Estimate {
                fit: Some(fit),
                ..fallback(Basis::DegenerateSlope)
            };
        }
        let basis = if raw < self.limits.min_s || raw > max {
            Basis::Clamped
        } else {
            Basis::Extrapolated
        };
        Estimate {
            end_time_s: raw.max(self.limits.min_s).min(max),
            basis,
            fit: Some(fit),
        }
    }

    /// Predicted end time in seconds, always within the shot limits.
    pub fn predict(&self, buf: &SampleBuffer, goal_g: f32, offset_g: f32) -> f32 {
        self.estimate(buf, goal_g, offset_g).end_time_s
    }
}
