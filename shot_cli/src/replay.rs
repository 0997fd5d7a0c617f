//! Offline evaluation of a recorded trace.

use std::path::Path;

use shot_config::{Config, PersistedSettings};
use shot_core::{ReplayReport, Sample, ShotError, ShotParams, replay_trace};

use crate::error_fmt::end_reason_name;

/// Goal and offset for a replay: flags, then the persisted settings, then config.
fn resolve(
    cfg: &Config,
    goal: Option<u32>,
    offset: Option<f32>,
) -> eyre::Result<(u32, f32)> {
    let stored = PersistedSettings::load(Path::new(&cfg.settings.path))?;
    let goal = goal
        .or(stored.goal_g.filter(|g| (1..=200).contains(g)))
        .unwrap_or(cfg.shot.default_goal_g);
    if !(1..=200).contains(&goal) {
        return Err(eyre::Report::new(ShotError::InvalidGoal(goal)));
    }
    let offset = offset.or(stored.offset_g).unwrap_or(0.0);
    if !offset.is_finite() {
        eyre::bail!("--offset must be a finite number");
    }
    Ok((goal, offset))
}

pub fn run_replay(
    cfg: &Config,
    csv: &Path,
    goal: Option<u32>,
    offset: Option<f32>,
) -> eyre::Result<(ReplayReport, u32, f32)> {
    let (goal, offset) = resolve(cfg, goal, offset)?;
    let rows = shot_config::load_shot_csv(csv)?;
    let samples: Vec<Sample> = rows.iter().map(Sample::from).collect();
    tracing::info!(
        target: "shot::system",
        path = %csv.display(),
        samples = samples.len(),
        goal_g = goal,
        offset_g = offset,
        "replaying trace"
    );
    let report = replay_trace(&samples, goal, offset, &ShotParams::from(cfg));
    Ok((report, goal, offset))
}

pub fn format_replay_json(r: &ReplayReport, goal_g: u32, offset_g: f32) -> String {
    serde_json::json!({
        "command": "replay",
        "end_reason": end_reason_name(r.reason),
        "goal_g": goal_g,
        "offset_g": offset_g,
        "stop_time_s": r.stop_time_s,
        "stop_weight_g": r.stop_weight_g,
        "predicted_end_s": r.predicted_end_s,
        "basis": r.basis.map(|b| format!("{b:?}")),
        "final_g": r.final_weight_g,
        "rejected": r.rejected,
    })
    .to_string()
}

pub fn format_replay_text(r: &ReplayReport, goal_g: u32, offset_g: f32) -> String {
    let mut out = vec![
        format!("end reason: {}", end_reason_name(r.reason)),
        format!("goal: {goal_g} g (offset {offset_g:.2} g)"),
    ];
    match (r.stop_time_s, r.stop_weight_g) {
        (Some(t), Some(w)) => out.push(format!("stop at: {t:.2} s with {w:.2} g in the cup")),
        _ => out.push("stop at: none (trace ended first)".to_string()),
    }
    out.push(format!("predicted end: {:.2} s", r.predicted_end_s));
    out.push(format!("final weight: {:.2} g", r.final_weight_g));
    if r.rejected > 0 {
        out.push(format!("rejected samples: {}", r.rejected));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_in(dir: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.settings.path = dir.join("settings.toml").display().to_string();
        cfg
    }

    #[test]
    fn flags_beat_stored_settings() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_in(dir.path());
        std::fs::write(&cfg.settings.path, "goal_g = 40\noffset_g = 1.5\n").unwrap();

        assert_eq!(resolve(&cfg, None, None).unwrap(), (40, 1.5));
        assert_eq!(resolve(&cfg, Some(18), Some(-0.5)).unwrap(), (18, -0.5));
    }

    #[test]
    fn missing_settings_fall_back_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_in(dir.path());
        assert_eq!(resolve(&cfg, None, None).unwrap(), (36, 0.0));
    }

    #[test]
    fn goal_out_of_range_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_in(dir.path());
        let err = resolve(&cfg, Some(0), None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ShotError>(),
            Some(&ShotError::InvalidGoal(0))
        );
    }
}
