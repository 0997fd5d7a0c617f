//! Tracing subscriber setup: console layer, optional JSON file sink.

use std::path::Path;

use eyre::WrapErr;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::FILE_GUARD;

/// Filter directives: `RUST_LOG` wins; otherwise the base level (flag, then
/// config, then `info`) followed by the configured per-target overrides.
pub fn filter_directives(flag_level: Option<&str>, cfg: &shot_config::Logging) -> String {
    let base = flag_level
        .or(cfg.level.as_deref())
        .unwrap_or("info")
        .to_ascii_lowercase();
    let mut directives = vec![base];
    for (target, level) in &cfg.targets {
        directives.push(format!("{target}={}", level.to_ascii_lowercase()));
    }
    directives.join(",")
}

fn build_filter(flag_level: Option<&str>, cfg: &shot_config::Logging) -> eyre::Result<EnvFilter> {
    if std::env::var_os("RUST_LOG").is_some() {
        return EnvFilter::try_from_default_env().wrap_err("parse RUST_LOG");
    }
    let directives = filter_directives(flag_level, cfg);
    EnvFilter::try_new(&directives).wrap_err_with(|| format!("invalid log level '{directives}'"))
}

fn file_writer(
    path: &str,
    rotation: Option<&str>,
) -> eyre::Result<tracing_appender::non_blocking::NonBlocking> {
    let p = Path::new(path);
    let dir = p
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = p
        .file_name()
        .ok_or_else(|| eyre::eyre!("logging.file '{path}' has no file name"))?;
    std::fs::create_dir_all(dir).wrap_err_with(|| format!("create log dir {}", dir.display()))?;

    let appender = match rotation.map(str::to_ascii_lowercase).as_deref() {
        Some("daily") => tracing_appender::rolling::daily(dir, name),
        Some("hourly") => tracing_appender::rolling::hourly(dir, name),
        _ => tracing_appender::rolling::never(dir, name),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    Ok(writer)
}

/// Install the global subscriber. Console output goes to stderr so stdout
/// only carries command results.
pub fn init_logging(
    json: bool,
    flag_level: Option<&str>,
    cfg: &shot_config::Logging,
) -> eyre::Result<()> {
    let filter = build_filter(flag_level, cfg)?;

    let (pretty, json_console) = if json {
        (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        (
            Some(fmt::layer().with_target(true).with_writer(std::io::stderr)),
            None,
        )
    };

    let file_layer = match cfg.file.as_deref() {
        Some(path) => {
            let writer = file_writer(path, cfg.rotation.as_deref())?;
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json_console)
        .with(file_layer)
        .try_init()
        .map_err(|e| eyre::eyre!("install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::filter_directives;

    #[test]
    fn flag_beats_config_level() {
        let cfg = shot_config::Logging {
            level: Some("debug".into()),
            ..Default::default()
        };
        assert_eq!(filter_directives(Some("warn"), &cfg), "warn");
        assert_eq!(filter_directives(None, &cfg), "debug");
        assert_eq!(
            filter_directives(None, &shot_config::Logging::default()),
            "info"
        );
    }

    #[test]
    fn target_overrides_follow_the_base_level() {
        let mut cfg = shot_config::Logging::default();
        cfg.targets.insert("shot::relay".into(), "DEBUG".into());
        cfg.targets.insert("shot::scale".into(), "trace".into());
        assert_eq!(
            filter_directives(Some("info"), &cfg),
            "info,shot::relay=debug,shot::scale=trace"
        );
    }
}
