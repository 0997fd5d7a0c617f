//! Human-readable error descriptions, exit codes and structured JSON errors.

use shot_core::error::{BuildError, ShotError};
use shot_core::{EndReason, StartStep};

pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_START_FAILED: i32 = 2;
pub const EXIT_TIME_EXCEEDED: i32 = 3;
pub const EXIT_DISCONNECTED: i32 = 4;
pub const EXIT_STOPPED: i32 = 5;

pub fn end_reason_name(r: EndReason) -> &'static str {
    match r {
        EndReason::WeightAchieved => "WeightAchieved",
        EndReason::TimeExceeded => "TimeExceeded",
        EndReason::ButtonPressed => "ButtonPressed",
        EndReason::ScaleDisconnected => "ScaleDisconnected",
        EndReason::UserStopped => "UserStopped",
        EndReason::Undefined => "Undefined",
    }
}

/// Exit code for a shot that ran to a stop.
pub fn exit_code_for_reason(r: EndReason) -> i32 {
    match r {
        EndReason::WeightAchieved => EXIT_OK,
        EndReason::TimeExceeded => EXIT_TIME_EXCEEDED,
        EndReason::ScaleDisconnected => EXIT_DISCONNECTED,
        EndReason::UserStopped | EndReason::ButtonPressed => EXIT_STOPPED,
        EndReason::Undefined => EXIT_ERROR,
    }
}

fn start_hint(step: StartStep) -> &'static str {
    match step {
        StartStep::ResetTimer => {
            "Likely causes: The scale dropped the link or ignored the timer reset.\nHow to fix: Check the scale is on and paired, then start again."
        }
        StartStep::Tare => {
            "Likely causes: The scale refused to tare (unstable platform or low battery).\nHow to fix: Let the cup settle on the scale, check the battery, then start again."
        }
        StartStep::StartTimer => {
            "Likely causes: The scale refused to start its timer.\nHow to fix: Reset the scale timer by hand, then start again."
        }
        StartStep::EngageRelay => {
            "Likely causes: The relay output did not read back high (wiring, active-low setting or driver fault).\nHow to fix: Check [pins] relay and relay_active_low in the config and the relay board wiring."
        }
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingLink => {
                "What happened: No scale link was provided to the controller.\nLikely causes: The scale transport failed to initialize or was not wired into the builder.\nHow to fix: Ensure the scale link is created and passed via with_link(...).".to_string()
            }
            BuildError::MissingRelay => {
                "What happened: No relay output was provided to the controller.\nLikely causes: The relay pin failed to initialize or was not wired into the builder.\nHow to fix: Ensure the relay pin is created and passed via with_relay_pin(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<ShotError>() {
        return match se {
            ShotError::Start(f) => format!(
                "What happened: The start sequence was aborted at {} ({}).\n{}",
                f.step.name(),
                f.message,
                start_hint(f.step)
            ),
            ShotError::NotConnected => {
                "What happened: The scale is not connected.\nLikely causes: The scale is off, out of range or still pairing.\nHow to fix: Turn the scale on, wait for it to connect, then start again.".to_string()
            }
            ShotError::Busy(what) => format!(
                "What happened: The controller is busy ({what}).\nLikely causes: A shot is already running or settling.\nHow to fix: Wait for the current shot to finish."
            ),
            ShotError::InvalidGoal(g) => format!(
                "What happened: Goal weight {g} g is out of range.\nLikely causes: A typo in --goal or the settings command.\nHow to fix: Use a goal between 1 and 200 g."
            ),
            ShotError::Relay(msg) => format!(
                "What happened: Relay fault ({msg}).\nLikely causes: Relay wiring, GPIO permissions or a stuck driver.\nHow to fix: Check the relay board and [pins] in the config; the pump output was released."
            ),
            ShotError::Settings(msg) => format!(
                "What happened: The settings file could not be used ({msg}).\nLikely causes: Wrong [settings] path, missing permissions or a hand-edited file with bad TOML.\nHow to fix: Fix or delete the settings file; defaults are used when it is missing."
            ),
            ShotError::Timeout(ms) => format!(
                "What happened: The shot did not finish within {ms} ms.\nLikely causes: The controller never reached a stop (stalled clock or transport).\nHow to fix: Re-run with --log-level=debug and check the scale link."
            ),
            ShotError::Transport(msg) => format!(
                "What happened: Scale transport error ({msg}).\nLikely causes: Radio interference or the scale went to sleep.\nHow to fix: Move the scale closer, wake it up and try again."
            ),
        };
    }

    // String-based heuristics for errors coming from config or file loading
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("shot csv must have headers") {
        return "Invalid headers in shot CSV. Expected 'time_s,weight_g'.".to_string();
    }

    if lower.contains("shot csv") || lower.contains("invalid csv row") {
        return format!(
            "What happened: The shot trace could not be loaded ({msg}).\nLikely causes: Missing file, non-numeric values or times going backwards.\nHow to fix: Export the trace again with `shot brew --export FILE.csv` or fix the listed row."
        );
    }

    if lower.contains("parse config") || lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: A typo in the TOML or a value outside its allowed range.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read ({msg}).\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass an existing file with --config, or omit it to use the defaults."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Start failures map to 2; everything else that is not a stopped shot is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(ShotError::Start(_)) = err.downcast_ref::<ShotError>() {
        return EXIT_START_FAILED;
    }
    EXIT_ERROR
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    if let Some(ShotError::Start(f)) = err.downcast_ref::<ShotError>() {
        return json!({
            "reason": "StartFailed",
            "step": f.step.name(),
            "details": { "transport": f.message },
            "message": humanize(err),
        })
        .to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}
