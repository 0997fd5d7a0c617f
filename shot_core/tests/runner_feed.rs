//! Feed-mode runs: a notifier thread polls the simulated scale in real time.

use std::sync::Arc;

use shot_core::{
    EndReason, LearnCfg, Notification, SamplingMode, SequenceCfg, ShotLimits, ShotParams, run,
};
use shot_hardware::sim::{SimMachine, SimProfile};
use shot_traits::{Clock, MonotonicClock};

/// A shot that finishes in about two seconds of wall time.
fn fast_params() -> ShotParams {
    ShotParams {
        limits: ShotLimits {
            min_s: 0.5,
            max_s: 10.0,
        },
        learning: LearnCfg {
            drip_delay_ms: 200,
            settle_timeout_ms: 1_000,
            ..LearnCfg::default()
        },
        sequence: SequenceCfg { settle_ms: 20 },
        ..ShotParams::default()
    }
}

fn fast_profile() -> SimProfile {
    SimProfile {
        bloom_s: 0.0,
        flow_gps: 20.0,
        drip_g: 0.5,
        drip_tau_s: 0.05,
        report_hz: 50,
        require_heartbeat: false,
        ..SimProfile::default()
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

#[test]
fn feed_mode_shot_reaches_the_goal() {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let m = SimMachine::new(fast_profile(), Arc::clone(&clock));

    let report = run(
        m.scale(),
        m.relay_pin(),
        fast_params(),
        None,
        clock,
        SamplingMode::Feed(50),
        100,
        Some(30),
        Some(feed_source(&m)),
        None,
    )
    .unwrap();

    assert_eq!(report.end_reason, EndReason::WeightAchieved);
    assert_eq!(report.goal_g, 30);
    assert!(
        (25.0..40.0).contains(&report.final_weight_g),
        "final {}",
        report.final_weight_g
    );
    assert!(!report.samples.is_empty());
    assert!(!m.relay_is_on());
}

#[test]
fn feed_reports_the_lost_link() {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let m = SimMachine::new(
        SimProfile {
            disconnect_after_ms: Some(500),
            ..fast_profile()
        },
        Arc::clone(&clock),
    );

    let report = run(
        m.scale(),
        m.relay_pin(),
        fast_params(),
        None,
        clock,
        SamplingMode::Feed(50),
        100,
        Some(150),
        Some(feed_source(&m)),
        None,
    )
    .unwrap();

    assert_eq!(report.end_reason, EndReason::ScaleDisconnected);
    assert_eq!(report.learned, None);
    assert!(!m.relay_is_on());
}

#[test]
fn feed_mode_needs_a_source() {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let m = SimMachine::new(fast_profile(), Arc::clone(&clock));

    let err = run(
        m.scale(),
        m.relay_pin(),
        fast_params(),
        None,
        clock,
        SamplingMode::Feed(50),
        100,
        None,
        None,
        None,
    )
    .unwrap_err();
    assert!(err.to_string().contains("notification source"), "{err}");
}
