#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas, persisted settings and shot-trace parsing for the shot stopper.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//!   Every section is optional; an empty document yields the defaults.
//! - `PersistedSettings` is the small TOML document rewritten whenever the
//!   goal weight or the learned offset changes.
//! - The trace CSV loader enforces headers and time ordering.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Shot trace CSV schema.
///
/// Expected headers:
/// time_s,weight_g
///
/// Example:
/// time_s,weight_g
/// 0.0,0.0
/// 0.1,0.4
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ShotRow {
    pub time_s: f32,
    pub weight_g: f32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingCfg {
    /// Earliest moment a weight-based stop may fire.
    pub min_shot_s: f32,
    /// Hard cap on a shot; also the "don't stop yet" prediction.
    pub max_shot_s: f32,
    /// Wait after the stop before the final weight is trusted.
    pub drip_delay_ms: u64,
    /// Give up on learning when the weight never catches up within this window.
    pub settle_timeout_ms: u64,
    /// Delay between reset-timer, tare and start-timer commands.
    pub command_settle_ms: u64,
    /// Control loop rate.
    pub tick_hz: u32,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            min_shot_s: 3.0,
            max_shot_s: 50.0,
            drip_delay_ms: 3_000,
            settle_timeout_ms: 10_000,
            command_settle_ms: 100,
            tick_hz: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrendCfg {
    /// Regression window (samples).
    pub window: usize,
    /// Below this weight the flow is treated as not started (bloom).
    pub flow_start_g: f32,
    /// Slopes at or below this are treated as flat.
    pub slope_epsilon_gps: f32,
    /// Samples retained per shot.
    pub buffer_capacity: usize,
}

impl Default for TrendCfg {
    fn default() -> Self {
        Self {
            window: 10,
            flow_start_g: 10.0,
            slope_epsilon_gps: 0.05,
            buffer_capacity: 1000,
        }
    }
}

/// How a correction landing exactly on `max_offset_g` is treated.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// `|offset| == max_offset_g` is still learned.
    #[default]
    Inclusive,
    /// `|offset| == max_offset_g` is rejected.
    Exclusive,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LearningCfg {
    pub enabled: bool,
    pub max_offset_g: f32,
    pub boundary: BoundaryMode,
}

impl Default for LearningCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            max_offset_g: 5.0,
            boundary: BoundaryMode::Inclusive,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SafetyCfg {
    /// Stop with "scale disconnected" when no sample arrives for this long (0 disables).
    pub sample_stall_ms: u64,
    /// Upper bound on samples consumed in one tick.
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShotCfg {
    /// Goal used when nothing is persisted yet.
    pub default_goal_g: u32,
}

impl Default for ShotCfg {
    fn default() -> Self {
        Self { default_goal_g: 36 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Controller polls the scale link inside the tick.
    #[default]
    Direct,
    /// Weights arrive from a notifier thread over a channel.
    Feed,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunnerCfg {
    pub mode: RunMode,
    /// Scale notification rate used by the simulator and the feed.
    pub feed_hz: u32,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            mode: RunMode::Direct,
            feed_hz: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Pins {
    /// BCM number of the brew relay output.
    pub relay: u8,
    /// Relay boards that energize on a low level.
    pub relay_active_low: bool,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            relay: 17,
            relay_active_low: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SettingsCfg {
    pub path: String,
}

impl Default for SettingsCfg {
    fn default() -> Self {
        Self {
            path: "shot_settings.toml".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
    /// Per-target overrides, e.g. `"shot::relay" = "debug"`.
    pub targets: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub timing: TimingCfg,
    pub trend: TrendCfg,
    pub learning: LearningCfg,
    pub safety: SafetyCfg,
    pub shot: ShotCfg,
    pub runner: RunnerCfg,
    pub pins: Pins,
    pub settings: SettingsCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

fn is_level(s: &str) -> bool {
    LEVELS.contains(&s.to_ascii_lowercase().as_str())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Timing
        let t = &self.timing;
        if !(t.min_shot_s.is_finite() && t.min_shot_s > 0.0) {
            eyre::bail!("timing.min_shot_s must be > 0");
        }
        if !(t.max_shot_s.is_finite() && t.max_shot_s > t.min_shot_s) {
            eyre::bail!("timing.max_shot_s must be greater than timing.min_shot_s");
        }
        if t.max_shot_s > 600.0 {
            eyre::bail!("timing.max_shot_s is unreasonably large (>10min)");
        }
        if t.drip_delay_ms > 60_000 {
            eyre::bail!("timing.drip_delay_ms must be <= 60000");
        }
        if t.settle_timeout_ms < t.drip_delay_ms {
            eyre::bail!("timing.settle_timeout_ms must be >= timing.drip_delay_ms");
        }
        if t.command_settle_ms > 5_000 {
            eyre::bail!("timing.command_settle_ms must be <= 5000");
        }
        if t.tick_hz == 0 || t.tick_hz > 1_000 {
            eyre::bail!("timing.tick_hz must be in [1, 1000]");
        }

        // Trend
        let tr = &self.trend;
        if tr.window < 2 {
            eyre::bail!("trend.window must be >= 2");
        }
        if !(2..=100_000).contains(&tr.buffer_capacity) {
            eyre::bail!("trend.buffer_capacity must be in [2, 100000]");
        }
        if tr.window > tr.buffer_capacity {
            eyre::bail!("trend.window must be <= trend.buffer_capacity");
        }
        if !(tr.flow_start_g.is_finite() && tr.flow_start_g >= 0.0) {
            eyre::bail!("trend.flow_start_g must be >= 0");
        }
        if !(tr.slope_epsilon_gps.is_finite() && tr.slope_epsilon_gps > 0.0) {
            eyre::bail!("trend.slope_epsilon_gps must be > 0");
        }

        // Learning
        let l = &self.learning;
        if !(l.max_offset_g.is_finite() && l.max_offset_g > 0.0 && l.max_offset_g <= 50.0) {
            eyre::bail!("learning.max_offset_g must be in (0.0, 50.0]");
        }

        // Safety
        if self.safety.sample_stall_ms != 0 && self.safety.sample_stall_ms < 100 {
            eyre::bail!("safety.sample_stall_ms must be 0 (disabled) or >= 100");
        }
        if self.safety.max_samples_per_tick == 0 {
            eyre::bail!("safety.max_samples_per_tick must be >= 1");
        }

        // Shot
        if !(1..=200).contains(&self.shot.default_goal_g) {
            eyre::bail!("shot.default_goal_g must be in [1, 200]");
        }

        // Runner
        if self.runner.feed_hz == 0 || self.runner.feed_hz > 1_000 {
            eyre::bail!("runner.feed_hz must be in [1, 1000]");
        }

        // Settings
        if self.settings.path.trim().is_empty() {
            eyre::bail!("settings.path must not be empty");
        }

        // Logging
        if let Some(level) = self.logging.level.as_deref() {
            if !is_level(level) {
                eyre::bail!("logging.level must be one of: off, error, warn, info, debug, trace");
            }
        }
        if let Some(rot) = self.logging.rotation.as_deref() {
            let r = rot.to_ascii_lowercase();
            if r != "never" && r != "daily" && r != "hourly" {
                eyre::bail!("logging.rotation must be one of: never, daily, hourly");
            }
        }
        for (target, level) in &self.logging.targets {
            if target.trim().is_empty() {
                eyre::bail!("logging.targets keys must not be empty");
            }
            if !is_level(level) {
                eyre::bail!("logging.targets.{target} has invalid level '{level}'");
            }
        }

        Ok(())
    }
}

/// Values that survive a power cycle.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PersistedSettings {
    pub goal_g: Option<u32>,
    pub offset_g: Option<f32>,
    /// Display brightness; kept for the presentation side.
    pub brightness: u8,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            goal_g: None,
            offset_g: None,
            brightness: 100,
        }
    }
}

impl PersistedSettings {
    pub fn from_toml(s: &str) -> eyre::Result<Self> {
        toml::from_str(s).map_err(|e| eyre::eyre!("parse settings: {e}"))
    }

    pub fn to_toml(&self) -> eyre::Result<String> {
        toml::to_string(self).map_err(|e| eyre::eyre!("serialize settings: {e}"))
    }

    /// Read settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(s) => Self::from_toml(&s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(eyre::eyre!("read settings {:?}: {}", path, e)),
        }
    }
}

/// Load a recorded shot trace. Times must never go backwards.
pub fn load_shot_csv(path: &Path) -> eyre::Result<Vec<ShotRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open shot CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["time_s", "weight_g"];
    let actual: Vec<String> = headers.iter().map(|s| s.trim().to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "shot CSV must have headers 'time_s,weight_g', got: {}",
            actual.join(",")
        );
    }

    let mut rows: Vec<ShotRow> = Vec::new();
    for (idx, rec) in rdr.deserialize::<ShotRow>().enumerate() {
        let row = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        if !(row.time_s.is_finite() && row.weight_g.is_finite()) {
            eyre::bail!("invalid CSV row {}: values must be finite", idx + 2);
        }
        if let Some(prev) = rows.last() {
            if row.time_s < prev.time_s {
                eyre::bail!(
                    "invalid CSV row {}: time_s {} goes backwards (previous {})",
                    idx + 2,
                    row.time_s,
                    prev.time_s
                );
            }
        }
        rows.push(row);
    }

    if rows.is_empty() {
        eyre::bail!("shot CSV {:?} contains no samples", path);
    }
    Ok(rows)
}

pub fn write_shot_csv(path: &Path, rows: &[ShotRow]) -> eyre::Result<()> {
    let mut wtr =
        csv::Writer::from_path(path).map_err(|e| eyre::eyre!("create {:?}: {}", path, e))?;
    for r in rows {
        wtr.serialize(r)
            .map_err(|e| eyre::eyre!("write {:?}: {}", path, e))?;
    }
    wtr.flush()
        .map_err(|e| eyre::eyre!("flush {:?}: {}", path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = load_toml("").expect("empty toml");
        cfg.validate().expect("defaults are valid");
        assert_eq!(cfg.trend.window, 10);
        assert_eq!(cfg.trend.buffer_capacity, 1000);
        assert_eq!(cfg.learning.boundary, BoundaryMode::Inclusive);
        assert_eq!(cfg.shot.default_goal_g, 36);
        assert_eq!(cfg.runner.mode, RunMode::Direct);
    }

    #[test]
    fn boundary_parses_lowercase() {
        let cfg = load_toml("[learning]\nboundary = \"exclusive\"\n").expect("parse");
        assert_eq!(cfg.learning.boundary, BoundaryMode::Exclusive);
    }

    #[test]
    fn persisted_settings_missing_keys_are_none() {
        let s = PersistedSettings::from_toml("brightness = 40\n").expect("parse");
        assert_eq!(s.goal_g, None);
        assert_eq!(s.offset_g, None);
        assert_eq!(s.brightness, 40);
    }
}
