//! Post-shot bias correction.
//!
//! After a shot that stopped on the prediction, the weight that finally
//! settles in the cup is compared to the goal and the difference is folded
//! into a persistent offset, which the estimator subtracts from the goal on
//! the next shot. The only safety rail is the magnitude bound: a correction
//! that would push the offset past `max_offset_g` is taken as bad data and
//! ignored.

use crate::config::{Boundary, LearnCfg};

/// Result of one learning attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Learned {
    Updated {
        previous_g: f32,
        offset_g: f32,
        error_g: f32,
    },
    /// Outlier; the offset stayed at `offset_g`.
    Rejected { error_g: f32, offset_g: f32 },
}

impl Learned {
    /// Offset in effect after this attempt.
    pub fn offset_g(&self) -> f32 {
        match *self {
            Learned::Updated { offset_g, .. } | Learned::Rejected { offset_g, .. } => offset_g,
        }
    }
}

/// `Some(current + error)` when the correction stays within the bound.
fn correction(
    final_g: f32,
    goal_g: f32,
    current_g: f32,
    max_offset_g: f32,
    boundary: Boundary,
) -> Option<f32> {
    let error = final_g - goal_g;
    let candidate = current_g + error;
    if !candidate.is_finite() {
        return None;
    }
    boundary
        .admits(candidate.abs(), max_offset_g)
        .then_some(candidate)
}

/// New offset after a settled shot.
///
/// Returns `current_g` untouched when `|current_g + (final_g - goal_g)|`
/// falls outside `max_offset_g` under `boundary`, or when any input is not
/// finite.
pub fn on_shot_settled(
    final_g: f32,
    goal_g: f32,
    current_g: f32,
    max_offset_g: f32,
    boundary: Boundary,
) -> f32 {
    correction(final_g, goal_g, current_g, max_offset_g, boundary).unwrap_or(current_g)
}

/// Session cache of the offset plus the settle gates.
#[derive(Debug, Clone)]
pub struct OffsetLearner {
    cfg: LearnCfg,
    offset_g: f32,
}

impl OffsetLearner {
    /// `loaded_g` comes from persistence and is clamped into `±max_offset_g`;
    /// a non-finite value starts from zero.
    pub fn new(cfg: LearnCfg, loaded_g: f32) -> Self {
        let offset_g = if loaded_g.is_finite() {
            loaded_g.clamp(-cfg.max_offset_g, cfg.max_offset_g)
        } else {
            0.0
        };
        Self { cfg, offset_g }
    }

    pub fn offset_g(&self) -> f32 {
        self.offset_g
    }

    pub fn cfg(&self) -> &LearnCfg {
        &self.cfg
    }

    /// Forget the learned bias.
    pub fn reset(&mut self) {
        self.offset_g = 0.0;
    }

    /// Drip delay elapsed and the cup has caught up to `goal - offset`.
    pub fn ready(&self, since_stop_ms: u64, weight_g: f32, goal_g: f32) -> bool {
        since_stop_ms >= self.cfg.drip_delay_ms && weight_g >= goal_g - self.offset_g
    }

    /// The weight never caught up; stop waiting.
    pub fn timed_out(&self, since_stop_ms: u64) -> bool {
        since_stop_ms >= self.cfg.settle_timeout_ms
    }

    /// Fold one settled shot into the offset.
    pub fn learn(&mut self, final_g: f32, goal_g: f32) -> Learned {
        let previous_g = self.offset_g;
        let error_g = final_g - goal_g;
        match correction(
            final_g,
            goal_g,
            previous_g,
            self.cfg.max_offset_g,
            self.cfg.boundary,
        ) {
            Some(offset_g) => {
                self.offset_g = offset_g;
                tracing::info!(
                    target: "shot::weight",
                    previous_g,
                    offset_g,
                    error_g,
                    "offset updated"
                );
                Learned::Updated {
                    previous_g,
                    offset_g,
                    error_g,
                }
            }
            None => {
                tracing::info!(
                    target: "shot::weight",
                    error_g,
                    offset_g = previous_g,
                    max_offset_g = self.cfg.max_offset_g,
                    "offset correction out of bounds; ignored"
                );
                Learned::Rejected {
                    error_g,
                    offset_g: previous_g,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn learner(boundary: Boundary, current: f32) -> OffsetLearner {
        OffsetLearner::new(
            LearnCfg {
                boundary,
                ..LearnCfg::default()
            },
            current,
        )
    }

    #[test]
    fn boundary_case_inclusive_learns() {
        let mut l = learner(Boundary::Inclusive, 1.0);
        let out = l.learn(40.0, 36.0);
        assert_eq!(
            out,
            Learned::Updated {
                previous_g: 1.0,
                offset_g: 5.0,
                error_g: 4.0
            }
        );
        assert_eq!(l.offset_g(), 5.0);
    }

    #[test]
    fn boundary_case_exclusive_rejects() {
        let mut l = learner(Boundary::Exclusive, 1.0);
        match l.learn(40.0, 36.0) {
            Learned::Rejected { error_g, offset_g } => {
                assert_eq!(error_g, 4.0);
                assert_eq!(offset_g, 1.0);
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert_eq!(l.offset_g(), 1.0);
    }

    #[test]
    fn loaded_offset_is_clamped() {
        assert_eq!(learner(Boundary::Inclusive, 9.0).offset_g(), 5.0);
        assert_eq!(learner(Boundary::Inclusive, -9.0).offset_g(), -5.0);
        assert_eq!(learner(Boundary::Inclusive, f32::NAN).offset_g(), 0.0);
    }

    #[test]
    fn double_gate_needs_time_and_weight() {
        let l = learner(Boundary::Inclusive, 2.0);
        // Goal 36 with offset 2 needs 34 g in the cup.
        assert!(!l.ready(2_999, 40.0, 36.0));
        assert!(!l.ready(3_000, 33.9, 36.0));
        assert!(l.ready(3_000, 34.0, 36.0));
        assert!(!l.timed_out(9_999));
        assert!(l.timed_out(10_000));
    }

    #[test]
    fn non_finite_weight_is_ignored() {
        assert_eq!(
            on_shot_settled(f32::NAN, 36.0, 1.5, 5.0, Boundary::Inclusive),
            1.5
        );
        assert_eq!(
            on_shot_settled(f32::INFINITY, 36.0, 1.5, 5.0, Boundary::Inclusive),
            1.5
        );
    }

    proptest! {
        #[test]
        fn outliers_leave_offset_untouched(
            current in -5.0f32..=5.0,
            goal in 18u32..=60,
            excess in 10.1f32..200.0,
            above in any::<bool>(),
        ) {
            let goal_g = goal as f32;
            let final_g = if above { goal_g + excess } else { goal_g - excess };
            let out = on_shot_settled(final_g, goal_g, current, 5.0, Boundary::Inclusive);
            prop_assert_eq!(out.to_bits(), current.to_bits());
        }

        #[test]
        fn in_bound_error_is_added_exactly(
            current in -2.0f32..=2.0,
            goal in 18u32..=60,
            error in -2.9f32..=2.9,
        ) {
            let goal_g = goal as f32;
            let final_g = goal_g + error;
            let out = on_shot_settled(final_g, goal_g, current, 5.0, Boundary::Inclusive);
            prop_assert_eq!(out, current + (final_g - goal_g));
        }
    }
}
