//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Used when `--config` is not given and this file exists.
pub const DEFAULT_CONFIG: &str = "etc/shot_config.toml";

#[derive(Parser, Debug)]
#[command(name = "shot", version, about = "Predictive espresso shot stopper")]
pub struct Cli {
    /// Path to config TOML; defaults to etc/shot_config.toml when present
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print results and errors as JSON lines; logs go to stderr as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG takes precedence
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull one shot on the simulated machine
    Brew {
        /// Goal weight in grams for this shot only (not persisted)
        #[arg(long, value_name = "GRAMS")]
        goal: Option<u32>,
        /// Deliver weights through the notifier thread instead of direct polling
        #[arg(long, action = ArgAction::SetTrue)]
        feed: bool,
        /// Run against the wall clock instead of the simulated clock
        #[arg(long, action = ArgAction::SetTrue)]
        realtime: bool,
        /// Write the recorded samples to a CSV (time_s,weight_g)
        #[arg(long, value_name = "FILE")]
        export: Option<PathBuf>,
        /// Steady flow after pre-infusion (g/s)
        #[arg(long, value_name = "GPS")]
        flow_gps: Option<f32>,
        /// Pre-infusion duration (s)
        #[arg(long, value_name = "SECS")]
        bloom_s: Option<f32>,
        /// Drop the scale link this many seconds after the pump starts
        #[arg(long, value_name = "SECS")]
        disconnect_at_s: Option<f32>,
        /// Make the scale reject the tare command
        #[arg(long, action = ArgAction::SetTrue)]
        fail_tare: bool,
    },
    /// Evaluate a recorded shot trace offline
    Replay {
        /// Trace CSV with headers time_s,weight_g
        #[arg(long, value_name = "FILE")]
        csv: PathBuf,
        /// Goal weight in grams (default: persisted goal, then config)
        #[arg(long, value_name = "GRAMS")]
        goal: Option<u32>,
        /// Offset in grams (default: persisted offset)
        #[arg(long, value_name = "GRAMS", allow_hyphen_values = true)]
        offset: Option<f32>,
    },
    /// Inspect or change the persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Validate config and settings, exercise the relay and the start/stop sequence
    SelfCheck,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum SettingsAction {
    /// Print the persisted goal, offset and brightness
    Show,
    /// Persist a new goal weight (1..=200 g)
    SetGoal {
        #[arg(value_name = "GRAMS")]
        grams: u32,
    },
    /// Forget the learned offset
    ResetOffset,
}

#[inline]
pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}
