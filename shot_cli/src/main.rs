#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `shot`: command line front end for the predictive shot stopper.

mod brew;
mod cli;
mod error_fmt;
mod logging;
mod replay;
mod self_check;
mod settings_cmd;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;

use crate::brew::BrewArgs;
use crate::cli::{Cli, Commands, DEFAULT_CONFIG, JSON_MODE, json_mode};
use crate::error_fmt::{
    EXIT_ERROR, EXIT_OK, exit_code_for_error, exit_code_for_reason, format_error_json, humanize,
};

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("color-eyre install failed: {e}");
    }
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let code = match real_main(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            if json_mode() {
                println!("{}", format_error_json(&e));
            } else {
                eprintln!("{}", humanize(&e));
            }
            exit_code_for_error(&e)
        }
    };
    std::process::exit(code);
}

/// Explicit `--config` must exist; the default location is optional.
fn load_config(path: Option<&Path>) -> eyre::Result<shot_config::Config> {
    let path: PathBuf = match path {
        Some(p) => p.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG).exists() => PathBuf::from(DEFAULT_CONFIG),
        None => return Ok(shot_config::Config::default()),
    };
    let text = std::fs::read_to_string(&path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = shot_config::load_toml(&text)
        .map_err(|e| eyre::eyre!("parse config {}: {e}", path.display()))?;
    cfg.validate()
        .map_err(|e| eyre::eyre!("invalid configuration in {}: {e}", path.display()))?;
    Ok(cfg)
}

fn real_main(cli: Cli) -> eyre::Result<i32> {
    let cfg = load_config(cli.config.as_deref())?;
    logging::init_logging(cli.json, cli.log_level.as_deref(), &cfg.logging)?;

    match cli.cmd {
        Commands::Brew {
            goal,
            feed,
            realtime,
            export,
            flow_gps,
            bloom_s,
            disconnect_at_s,
            fail_tare,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
                tracing::warn!(error = %e, "failed to install Ctrl-C handler");
            }
            let args = BrewArgs {
                goal,
                feed,
                realtime,
                export,
                flow_gps,
                bloom_s,
                disconnect_at_s,
                fail_tare,
            };
            let report = brew::run_brew(&cfg, &args, shutdown)?;
            if cli.json {
                println!("{}", brew::format_report_json(&report));
            } else {
                println!("{}", brew::format_report_text(&report));
            }
            Ok(exit_code_for_reason(report.end_reason))
        }
        Commands::Replay { csv, goal, offset } => {
            let (report, goal_g, offset_g) = replay::run_replay(&cfg, &csv, goal, offset)?;
            if cli.json {
                println!("{}", replay::format_replay_json(&report, goal_g, offset_g));
            } else {
                println!("{}", replay::format_replay_text(&report, goal_g, offset_g));
            }
            Ok(EXIT_OK)
        }
        Commands::Settings { action } => {
            println!("{}", settings_cmd::run_settings(&cfg, action, cli.json)?);
            Ok(EXIT_OK)
        }
        Commands::SelfCheck => {
            let lines = self_check::run_self_check(&cfg);
            if cli.json {
                println!("{}", self_check::format_checks_json(&lines));
            } else {
                println!("{}", self_check::format_checks_text(&lines));
            }
            Ok(if lines.iter().all(|l| l.ok) {
                EXIT_OK
            } else {
                EXIT_ERROR
            })
        }
    }
}
