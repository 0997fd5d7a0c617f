//! `shot settings`: show, set the goal, forget the learned offset.

use eyre::WrapErr;
use shot_config::Config;
use shot_core::{FileSettingsStore, ShotError};
use shot_traits::SettingsStore;

use crate::cli::SettingsAction;

pub fn run_settings(cfg: &Config, action: SettingsAction, json: bool) -> eyre::Result<String> {
    let mut store = FileSettingsStore::open(&cfg.settings.path)?;
    match action {
        SettingsAction::Show => {}
        SettingsAction::SetGoal { grams } => {
            if !(1..=200).contains(&grams) {
                return Err(eyre::Report::new(ShotError::InvalidGoal(grams)));
            }
            store
                .save_goal_g(grams)
                .map_err(|e| eyre::eyre!("{e}"))
                .wrap_err("save goal")?;
            tracing::info!(target: "shot::system", goal_g = grams, "goal saved");
        }
        SettingsAction::ResetOffset => {
            store
                .clear_offset()
                .map_err(|e| eyre::eyre!("{e}"))
                .wrap_err("reset offset")?;
            tracing::info!(target: "shot::system", "offset cleared");
        }
    }
    render(cfg, &store, json)
}

fn render(cfg: &Config, store: &FileSettingsStore, json: bool) -> eyre::Result<String> {
    let doc = store.document();
    if json {
        return Ok(serde_json::json!({
            "command": "settings",
            "path": store.path().display().to_string(),
            "goal_g": doc.goal_g,
            "effective_goal_g": doc.goal_g.unwrap_or(cfg.shot.default_goal_g),
            "offset_g": doc.offset_g,
            "brightness": doc.brightness,
        })
        .to_string());
    }
    let body = toml::to_string_pretty(doc).wrap_err("render settings")?;
    Ok(format!(
        "# {}\n# effective goal: {} g\n{}",
        store.path().display(),
        doc.goal_g.unwrap_or(cfg.shot.default_goal_g),
        body.trim_end()
    ))
}
