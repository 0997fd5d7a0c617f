//! One shot on the simulated machine: profile mapping, run and result output.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::WrapErr;
use shot_config::{Config, ShotRow};
use shot_core::util::millis;
use shot_core::{
    FileSettingsStore, Learned, Notification, SamplingMode, ShotParams, ShotReport, run,
};
use shot_hardware::sim::{SimCommand, SimMachine, SimProfile};
use shot_traits::{Clock, ManualClock, MonotonicClock};

use crate::error_fmt::end_reason_name;

#[derive(Debug, Clone, Default)]
pub struct BrewArgs {
    pub goal: Option<u32>,
    pub feed: bool,
    pub realtime: bool,
    pub export: Option<PathBuf>,
    pub flow_gps: Option<f32>,
    pub bloom_s: Option<f32>,
    pub disconnect_at_s: Option<f32>,
    pub fail_tare: bool,
}

/// Simulated machine shape: defaults, the configured report rate, then flags.
pub fn sim_profile(cfg: &Config, args: &BrewArgs) -> eyre::Result<SimProfile> {
    let mut p = SimProfile {
        report_hz: cfg.runner.feed_hz,
        ..SimProfile::default()
    };
    if let Some(f) = args.flow_gps {
        if !(f.is_finite() && f > 0.0) {
            eyre::bail!("--flow-gps must be > 0");
        }
        p.flow_gps = f;
    }
    if let Some(b) = args.bloom_s {
        if !(b.is_finite() && b >= 0.0) {
            eyre::bail!("--bloom-s must be >= 0");
        }
        p.bloom_s = b;
    }
    if let Some(d) = args.disconnect_at_s {
        if !(d.is_finite() && d >= 0.0) {
            eyre::bail!("--disconnect-at-s must be >= 0");
        }
        p.disconnect_after_ms = Some(millis(d));
    }
    if args.fail_tare {
        p.fail = Some(SimCommand::Tare);
    }
    Ok(p)
}

fn sampling_mode(cfg: &Config, args: &BrewArgs) -> SamplingMode {
    if args.feed {
        SamplingMode::Feed(cfg.runner.feed_hz)
    } else {
        SamplingMode::from(&cfg.runner)
    }
}

fn feed_source(m: &SimMachine) -> Box<dyn FnMut() -> Notification + Send> {
    let m = m.clone();
    Box::new(move || match m.poll_weight() {
        Some(w) => Notification::Weight(w),
        None if m.is_connected() => Notification::Quiet,
        None => Notification::Lost,
    })
}

pub fn run_brew(
    cfg: &Config,
    args: &BrewArgs,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<ShotReport> {
    let profile = sim_profile(cfg, args)?;
    let mode = sampling_mode(cfg, args);
    // The notifier thread sleeps on the clock, so feeds always run in real time.
    let realtime = args.realtime || matches!(mode, SamplingMode::Feed(_));
    let clock: Arc<dyn Clock + Send + Sync> = if realtime {
        Arc::new(MonotonicClock::new())
    } else {
        Arc::new(ManualClock::new())
    };

    let store = FileSettingsStore::open(&cfg.settings.path)?;
    let machine = SimMachine::new(profile, Arc::clone(&clock));
    let source = matches!(mode, SamplingMode::Feed(_)).then(|| feed_source(&machine));
    let stop: Box<dyn Fn() -> bool + Send + Sync> =
        Box::new(move || shutdown.load(Ordering::Relaxed));

    tracing::info!(
        target: "shot::system",
        realtime,
        ?mode,
        settings = %cfg.settings.path,
        "brew on simulated machine"
    );
    let report = run(
        machine.scale(),
        machine.relay_pin(),
        ShotParams::from(cfg),
        Some(Box::new(store)),
        clock,
        mode,
        cfg.timing.tick_hz,
        args.goal,
        source,
        Some(stop),
    )?;

    if let Some(path) = &args.export {
        let rows: Vec<ShotRow> = report.samples.iter().map(ShotRow::from).collect();
        shot_config::write_shot_csv(path, &rows)
            .wrap_err_with(|| format!("export shot CSV {}", path.display()))?;
        tracing::info!(target: "shot::system", path = %path.display(), rows = rows.len(), "trace exported");
    }
    Ok(report)
}

fn learned_json(l: Option<Learned>) -> serde_json::Value {
    use serde_json::json;
    match l {
        Some(Learned::Updated {
            previous_g,
            offset_g,
            error_g,
        }) => json!({ "status": "updated", "previous_g": previous_g, "offset_g": offset_g, "error_g": error_g }),
        Some(Learned::Rejected { error_g, offset_g }) => {
            json!({ "status": "rejected", "offset_g": offset_g, "error_g": error_g })
        }
        None => serde_json::Value::Null,
    }
}

pub fn format_report_json(r: &ShotReport) -> String {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    serde_json::json!({
        "timestamp": ts,
        "command": "brew",
        "end_reason": end_reason_name(r.end_reason),
        "goal_g": r.goal_g,
        "final_g": r.final_weight_g,
        "ended_at_s": r.ended_at_s,
        "predicted_end_s": r.predicted_end_s,
        "offset_g": r.offset_g,
        "learned": learned_json(r.learned),
        "samples": r.samples.len(),
        "relay_corrections": r.relay_corrections,
    })
    .to_string()
}

pub fn format_report_text(r: &ShotReport) -> String {
    let mut out = vec![
        format!("end reason: {}", end_reason_name(r.end_reason)),
        format!("goal: {} g", r.goal_g),
        format!(
            "stopped at: {:.2} s (predicted {:.2} s)",
            r.ended_at_s, r.predicted_end_s
        ),
        format!("final weight: {:.2} g", r.final_weight_g),
    ];
    match r.learned {
        Some(Learned::Updated {
            previous_g,
            offset_g,
            error_g,
        }) => out.push(format!(
            "offset: {previous_g:.2} g -> {offset_g:.2} g (error {error_g:+.2} g)"
        )),
        Some(Learned::Rejected { error_g, offset_g }) => out.push(format!(
            "offset: kept {offset_g:.2} g (error {error_g:+.2} g rejected as outlier)"
        )),
        None => out.push(format!("offset: {:.2} g (not learned)", r.offset_g)),
    }
    if r.relay_corrections > 0 {
        out.push(format!("relay corrections: {}", r.relay_corrections));
    }
    out.join("\n")
}
