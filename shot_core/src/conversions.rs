//! `From` implementations bridging `shot_config` types to `shot_core` types.

use crate::buffer::Sample;
use crate::config::{
    Boundary, LearnCfg, SafetyCfg, SequenceCfg, ShotLimits, ShotParams, TrendCfg,
};
use crate::runner::SamplingMode;

// ── ShotLimits ───────────────────────────────────────────────────────────────

impl From<&shot_config::TimingCfg> for ShotLimits {
    fn from(c: &shot_config::TimingCfg) -> Self {
        Self {
            min_s: c.min_shot_s,
            max_s: c.max_shot_s,
        }
    }
}

// ── TrendCfg ─────────────────────────────────────────────────────────────────

impl From<&shot_config::TrendCfg> for TrendCfg {
    fn from(c: &shot_config::TrendCfg) -> Self {
        Self {
            window: c.window,
            flow_start_g: c.flow_start_g,
            slope_epsilon_gps: c.slope_epsilon_gps,
        }
    }
}

// ── Learning ─────────────────────────────────────────────────────────────────

impl From<shot_config::BoundaryMode> for Boundary {
    fn from(m: shot_config::BoundaryMode) -> Self {
        match m {
            shot_config::BoundaryMode::Inclusive => Boundary::Inclusive,
            shot_config::BoundaryMode::Exclusive => Boundary::Exclusive,
        }
    }
}

/// Learning settings plus the drip/settle timing that gates them.
impl From<&shot_config::Config> for LearnCfg {
    fn from(c: &shot_config::Config) -> Self {
        Self {
            enabled: c.learning.enabled,
            max_offset_g: c.learning.max_offset_g,
            boundary: c.learning.boundary.into(),
            drip_delay_ms: c.timing.drip_delay_ms,
            settle_timeout_ms: c.timing.settle_timeout_ms,
        }
    }
}

// ── SafetyCfg ────────────────────────────────────────────────────────────────

impl From<&shot_config::SafetyCfg> for SafetyCfg {
    fn from(c: &shot_config::SafetyCfg) -> Self {
        Self {
            sample_stall_ms: c.sample_stall_ms,
            max_samples_per_tick: c.max_samples_per_tick,
        }
    }
}

// ── Runner ───────────────────────────────────────────────────────────────────

impl From<&shot_config::RunnerCfg> for SamplingMode {
    fn from(c: &shot_config::RunnerCfg) -> Self {
        match c.mode {
            shot_config::RunMode::Direct => SamplingMode::Direct,
            shot_config::RunMode::Feed => SamplingMode::Feed(c.feed_hz),
        }
    }
}

// ── ShotParams ───────────────────────────────────────────────────────────────

impl From<&shot_config::Config> for ShotParams {
    fn from(c: &shot_config::Config) -> Self {
        Self {
            limits: (&c.timing).into(),
            trend: (&c.trend).into(),
            learning: c.into(),
            sequence: SequenceCfg {
                settle_ms: c.timing.command_settle_ms,
            },
            safety: (&c.safety).into(),
            buffer_capacity: c.trend.buffer_capacity,
            default_goal_g: c.shot.default_goal_g,
        }
    }
}

// ── Trace rows ───────────────────────────────────────────────────────────────

impl From<&shot_config::ShotRow> for Sample {
    fn from(r: &shot_config::ShotRow) -> Self {
        Sample::new(r.time_s, r.weight_g)
    }
}

impl From<&Sample> for shot_config::ShotRow {
    fn from(s: &Sample) -> Self {
        Self {
            time_s: s.time_s,
            weight_g: s.weight_g,
        }
    }
}
