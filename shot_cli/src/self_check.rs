//! `shot self-check`: config, settings, relay read-back and a dry start/stop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shot_config::{Config, PersistedSettings};
use shot_core::builder::validate_params;
use shot_core::util::period_ms;
use shot_core::{
    EndReason, MemorySettings, RelayDriver, ShotEvent, ShotParams, build_controller,
};
use shot_hardware::sim::{SimMachine, SimProfile};
use shot_traits::{Clock, ManualClock, OutputPin};

/// Ticks allowed for the simulated start sequence before the check fails.
const START_TICK_BUDGET: u32 = 500;

#[derive(Debug, Clone)]
pub struct CheckLine {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl CheckLine {
    fn from_result(name: &'static str, r: eyre::Result<String>) -> Self {
        match r {
            Ok(detail) => Self {
                name,
                ok: true,
                detail,
            },
            Err(e) => Self {
                name,
                ok: false,
                detail: format!("{e:#}"),
            },
        }
    }
}

fn check_params(cfg: &Config) -> eyre::Result<String> {
    let p = ShotParams::from(cfg);
    validate_params(&p)?;
    Ok(format!(
        "window {} samples, limits {:.1}..{:.1} s, drip delay {} ms",
        p.trend.window, p.limits.min_s, p.limits.max_s, p.learning.drip_delay_ms
    ))
}

fn check_settings(cfg: &Config) -> eyre::Result<String> {
    let path = Path::new(&cfg.settings.path);
    let doc = PersistedSettings::load(path)?;
    if let Some(g) = doc.goal_g
        && !(1..=200).contains(&g)
    {
        eyre::bail!("stored goal {g} g is outside 1..=200 g and will be ignored");
    }
    if let Some(o) = doc.offset_g
        && !(o.is_finite() && o.abs() <= cfg.learning.max_offset_g)
    {
        eyre::bail!(
            "stored offset {o} g is outside +/-{} g and will be clamped",
            cfg.learning.max_offset_g
        );
    }
    let state = if path.exists() { "found" } else { "absent, defaults" };
    Ok(format!("{} ({state})", path.display()))
}

/// Drive the relay on then off and confirm both through the read-back.
fn exercise_relay<P: OutputPin>(pin: P) -> eyre::Result<String> {
    let mut relay = RelayDriver::new(pin)?;
    relay.set_state(true)?;
    if !relay.read_back()? {
        eyre::bail!("relay did not read back high");
    }
    relay.set_state(false)?;
    if relay.read_back()? {
        eyre::bail!("relay did not read back low");
    }
    Ok("on/off confirmed by read-back".to_string())
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn check_gpio_relay(cfg: &Config) -> eyre::Result<String> {
    let pin = shot_hardware::GpioRelayPin::new(cfg.pins.relay, cfg.pins.relay_active_low)
        .map_err(|e| eyre::eyre!("open relay pin BCM {}: {e}", cfg.pins.relay))?;
    // Only the release is exercised on real hardware; energizing would run the pump.
    let relay = RelayDriver::new(pin)?;
    if relay.read_back()? {
        eyre::bail!("relay on BCM {} reads high after release", cfg.pins.relay);
    }
    Ok(format!(
        "BCM {} released (active_low = {})",
        cfg.pins.relay, cfg.pins.relay_active_low
    ))
}

/// Run the start sequence against the simulator, then stop before any flow.
fn check_sequence(cfg: &Config) -> eyre::Result<String> {
    let clock = ManualClock::new();
    let machine = SimMachine::new(SimProfile::default(), Arc::new(clock.clone()));
    let mut ctrl = build_controller(
        machine.scale(),
        machine.relay_pin(),
        ShotParams::from(cfg),
        Some(Box::new(MemorySettings::default())),
        Some(Arc::new(clock.clone()) as Arc<dyn Clock + Send + Sync>),
    )?;
    let tick = Duration::from_millis(period_ms(cfg.timing.tick_hz));

    ctrl.request_start()?;
    let mut started = false;
    for _ in 0..START_TICK_BUDGET {
        match ctrl.tick()? {
            ShotEvent::Started => {
                started = true;
                break;
            }
            ShotEvent::StartFailed(f) => eyre::bail!("{f}"),
            _ => clock.advance(tick),
        }
    }
    if !started {
        eyre::bail!("start sequence did not finish within {START_TICK_BUDGET} ticks");
    }
    if !machine.relay_is_on() {
        eyre::bail!("relay not engaged after start");
    }

    ctrl.request_stop(EndReason::UserStopped)?;
    if machine.relay_is_on() {
        eyre::bail!("relay still engaged after stop");
    }
    if machine.timer_running() {
        eyre::bail!("scale timer still running after stop");
    }
    Ok("reset, tare, start timer, relay on, stop".to_string())
}

pub fn run_self_check(cfg: &Config) -> Vec<CheckLine> {
    let machine = SimMachine::new(
        SimProfile::default(),
        Arc::new(ManualClock::new()) as Arc<dyn Clock + Send + Sync>,
    );
    let mut lines = vec![
        CheckLine::from_result("config", check_params(cfg)),
        CheckLine::from_result("settings", check_settings(cfg)),
        CheckLine::from_result("relay", exercise_relay(machine.relay_pin())),
    ];
    #[cfg(all(feature = "hardware", target_os = "linux"))]
    lines.push(CheckLine::from_result("gpio relay", check_gpio_relay(cfg)));
    lines.push(CheckLine::from_result("sequence", check_sequence(cfg)));

    for l in &lines {
        if l.ok {
            tracing::info!(target: "shot::system", check = l.name, detail = %l.detail, "self-check passed");
        } else {
            tracing::error!(target: "shot::system", check = l.name, detail = %l.detail, "self-check failed");
        }
    }
    lines
}

pub fn format_checks_json(lines: &[CheckLine]) -> String {
    let checks: Vec<serde_json::Value> = lines
        .iter()
        .map(|l| serde_json::json!({ "name": l.name, "ok": l.ok, "detail": l.detail }))
        .collect();
    serde_json::json!({
        "command": "self-check",
        "ok": lines.iter().all(|l| l.ok),
        "checks": checks,
    })
    .to_string()
}

pub fn format_checks_text(lines: &[CheckLine]) -> String {
    lines
        .iter()
        .map(|l| {
            format!(
                "[{}] {}: {}",
                if l.ok { "ok" } else { "FAIL" },
                l.name,
                l.detail
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
