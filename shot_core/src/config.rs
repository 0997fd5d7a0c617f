//! Configuration types for the shot controller.
//!
//! These are the runtime configuration structs used by `ShotController`.
//! They are separate from the TOML-deserialized config in `shot_config`.

/// Hard bounds on a shot's duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotLimits {
    /// No weight-based stop before this many seconds.
    pub min_s: f32,
    /// Timeout; also the prediction when there is nothing to extrapolate.
    pub max_s: f32,
}

impl Default for ShotLimits {
    fn default() -> Self {
        Self {
            min_s: 3.0,
            max_s: 50.0,
        }
    }
}

/// Regression settings for the end-time estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendCfg {
    /// Number of most recent samples in the least-squares fit.
    pub window: usize,
    /// Flow is considered started once the latest reading reaches this weight.
    pub flow_start_g: f32,
    /// Slopes at or below this are treated as flat (g/s).
    pub slope_epsilon_gps: f32,
}

impl Default for TrendCfg {
    fn default() -> Self {
        Self {
            window: 10,
            flow_start_g: 10.0,
            slope_epsilon_gps: 0.05,
        }
    }
}

/// How a correction landing exactly on the bound is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Boundary {
    /// `|current + error| <= max_offset_g` is learned.
    #[default]
    Inclusive,
    /// Only `|current + error| < max_offset_g` is learned.
    Exclusive,
}

impl Boundary {
    /// Whether `magnitude` is within `bound` under this policy.
    #[inline]
    pub fn admits(self, magnitude: f32, bound: f32) -> bool {
        match self {
            Boundary::Inclusive => magnitude <= bound,
            Boundary::Exclusive => magnitude < bound,
        }
    }
}

/// Post-shot offset learning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearnCfg {
    pub enabled: bool,
    /// Largest offset magnitude the learner will accept.
    pub max_offset_g: f32,
    pub boundary: Boundary,
    /// Wait after the stop before the cup weight is trusted.
    pub drip_delay_ms: u64,
    /// Give up on learning when the weight never catches up.
    pub settle_timeout_ms: u64,
}

impl Default for LearnCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            max_offset_g: 5.0,
            boundary: Boundary::Inclusive,
            drip_delay_ms: 3_000,
            settle_timeout_ms: 10_000,
        }
    }
}

/// Start command sequence timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCfg {
    /// Pause between consecutive transport commands.
    pub settle_ms: u64,
}

impl Default for SequenceCfg {
    fn default() -> Self {
        Self { settle_ms: 100 }
    }
}

/// Watchdogs and ingestion bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyCfg {
    /// Treat the scale as gone when no sample arrives for this long while brewing.
    /// 0 disables the watchdog.
    pub sample_stall_ms: u64,
    /// Upper bound on samples consumed per tick.
    pub max_samples_per_tick: usize,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            sample_stall_ms: 8_000,
            max_samples_per_tick: 64,
        }
    }
}

/// Everything the controller needs besides its collaborators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotParams {
    pub limits: ShotLimits,
    pub trend: TrendCfg,
    pub learning: LearnCfg,
    pub sequence: SequenceCfg,
    pub safety: SafetyCfg,
    /// Samples retained per shot.
    pub buffer_capacity: usize,
    /// Goal used when the settings store has none.
    pub default_goal_g: u32,
}

impl Default for ShotParams {
    fn default() -> Self {
        Self {
            limits: ShotLimits::default(),
            trend: TrendCfg::default(),
            learning: LearnCfg::default(),
            sequence: SequenceCfg::default(),
            safety: SafetyCfg::default(),
            buffer_capacity: 1000,
            default_goal_g: 36,
        }
    }
}

/// Accepted goal weights in grams.
pub const GOAL_RANGE_G: std::ops::RangeInclusive<u32> = 1..=200;
