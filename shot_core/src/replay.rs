//! Offline evaluation of a recorded trace against the estimator and stop rules.

use crate::buffer::{Sample, SampleBuffer};
use crate::config::ShotParams;
use crate::status::EndReason;
use crate::trend::{Basis, TrendEstimator};
use crate::util::grams;

/// Where the controller would have stopped on a recorded trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    /// `Undefined` when the trace ends before any stop rule fires.
    pub reason: EndReason,
    pub stop_time_s: Option<f32>,
    pub stop_weight_g: Option<f32>,
    /// Prediction in effect at the stop (or at the end of the trace).
    pub predicted_end_s: f32,
    pub basis: Option<Basis>,
    /// Last weight in the trace.
    pub final_weight_g: f32,
    /// Samples refused as non-finite or out of order.
    pub rejected: usize,
}

/// Time of the first tick that would stop the shot while `s` is the latest
/// sample, given the prediction made from it.
///
/// The controller evaluates the stop rules every tick, so a stop usually
/// falls between two samples. `next_s` is the arrival of the following
/// sample; `None` means the trace ends here and the prediction stays in
/// effect.
fn stop_between(
    s: Sample,
    next_s: Option<f32>,
    predicted: f32,
    params: &ShotParams,
) -> Option<(EndReason, f32)> {
    let limits = params.limits;
    if s.time_s > limits.max_s {
        return Some((EndReason::TimeExceeded, s.time_s));
    }
    // A prediction at the cap means "no estimate".
    if predicted < limits.max_s {
        let at = predicted.max(limits.min_s).max(s.time_s);
        if next_s.is_none_or(|n| at < n) {
            return Some((EndReason::WeightAchieved, at));
        }
    }
    match next_s {
        Some(n) if n > limits.max_s => Some((EndReason::TimeExceeded, limits.max_s)),
        _ => None,
    }
}

/// Feed `samples` through the stop rules as if they arrived live.
///
/// Times are seconds from the start of the shot. The reported stop time is
/// the tick at which the controller would have stopped, which may lie
/// between samples or after the last one.
pub fn replay_trace(
    samples: &[Sample],
    goal_g: u32,
    offset_g: f32,
    params: &ShotParams,
) -> ReplayReport {
    let est = TrendEstimator::new(params.trend, params.limits);
    let mut buf = SampleBuffer::with_capacity(params.buffer_capacity);
    let goal = grams(goal_g);
    let mut predicted = params.limits.max_s;
    let mut basis = None;
    let mut rejected = 0;

    for (i, s) in samples.iter().enumerate() {
        if buf.push(*s).is_err() {
            rejected += 1;
            continue;
        }
        let e = est.estimate(&buf, goal, offset_g);
        predicted = e.end_time_s;
        basis = Some(e.basis);

        let next_s = samples[i + 1..]
            .iter()
            .map(|n| n.time_s)
            .find(|t| t.is_finite() && *t >= s.time_s);
        if let Some((reason, at)) = stop_between(*s, next_s, predicted, params) {
            tracing::debug!(target: "shot::shot", ?reason, t = at, w = s.weight_g, "replay stop");
            return ReplayReport {
                reason,
                stop_time_s: Some(at),
                stop_weight_g: Some(s.weight_g),
                predicted_end_s: predicted,
                basis,
                final_weight_g: samples.last().map_or(s.weight_g, |l| l.weight_g),
                rejected,
            };
        }
    }

    ReplayReport {
        reason: EndReason::Undefined,
        stop_time_s: None,
        stop_weight_g: None,
        predicted_end_s: predicted,
        basis,
        final_weight_g: samples.last().map_or(0.0, |l| l.weight_g),
        rejected,
    }
}
