//! Whole shots against the simulated machine on a manual clock.

use std::sync::Arc;
use std::time::Duration;

use shot_config::PersistedSettings;
use shot_core::{
    EndReason, FileSettingsStore, Learned, Phase, ShotController, ShotError, ShotEvent,
    ShotParams, StartStep, build_controller, run_shot,
};
use shot_hardware::sim::{SimCommand, SimMachine, SimProfile, SimRelayPin, SimScale};
use shot_traits::{Clock, ManualClock, SettingsStore};

const TICK: Duration = Duration::from_millis(20);

fn machine(profile: SimProfile) -> (SimMachine, ManualClock) {
    let clock = ManualClock::new();
    let m = SimMachine::new(profile, Arc::new(clock.clone()));
    (m, clock)
}

fn controller(
    m: &SimMachine,
    clock: &ManualClock,
    settings: Option<Box<dyn SettingsStore + Send>>,
) -> ShotController<SimScale, SimRelayPin> {
    build_controller(
        m.scale(),
        m.relay_pin(),
        ShotParams::default(),
        settings,
        Some(Arc::new(clock.clone())),
    )
    .unwrap()
}

#[test]
fn shot_stops_on_prediction_and_learns_the_drip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    let (m, clock) = machine(SimProfile::default());
    let store = FileSettingsStore::open(&path).unwrap();
    let mut ctrl = controller(&m, &clock, Some(Box::new(store)));

    let report = run_shot(&mut ctrl, TICK, None).unwrap();

    // 3 g of bloom, then 2 g/s: 36 g at 21.5 s.
    assert_eq!(report.end_reason, EndReason::WeightAchieved);
    assert!(
        (21.4..21.6).contains(&report.ended_at_s),
        "stopped at {}",
        report.ended_at_s
    );
    assert!(!m.relay_is_on());
    assert!(!m.timer_running());

    // About 1.95 g of drip lands within the 3 s drip delay.
    assert!(
        (37.7..38.2).contains(&report.final_weight_g),
        "final {}",
        report.final_weight_g
    );
    let offset = match report.learned {
        Some(Learned::Updated {
            previous_g,
            offset_g,
            error_g,
        }) => {
            assert_eq!(previous_g, 0.0);
            assert_eq!(offset_g, error_g);
            offset_g
        }
        other => panic!("expected an offset update, got {other:?}"),
    };
    assert!((1.7..2.2).contains(&offset), "offset {offset}");
    assert_eq!(report.offset_g, offset);
    assert_eq!(report.relay_corrections, 0);
    assert!(report.samples.len() > 100);

    let saved = PersistedSettings::load(&path).unwrap();
    assert_eq!(saved.offset_g, Some(offset));
}

#[test]
fn learned_offset_brings_the_next_shot_onto_the_goal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");

    let (m, clock) = machine(SimProfile::default());
    let mut ctrl = controller(&m, &clock, Some(Box::new(FileSettingsStore::open(&path).unwrap())));
    let first = run_shot(&mut ctrl, TICK, None).unwrap();
    drop(ctrl);

    let (m, clock) = machine(SimProfile::default());
    let mut ctrl = controller(&m, &clock, Some(Box::new(FileSettingsStore::open(&path).unwrap())));
    assert_eq!(ctrl.offset_g(), first.offset_g);
    let second = run_shot(&mut ctrl, TICK, None).unwrap();

    assert_eq!(second.end_reason, EndReason::WeightAchieved);
    assert!(second.ended_at_s < first.ended_at_s);
    assert!(
        (second.final_weight_g - 36.0).abs() < 0.3,
        "final {}",
        second.final_weight_g
    );
}

#[test]
fn dropped_link_ends_the_shot_without_learning() {
    let (m, clock) = machine(SimProfile {
        disconnect_after_ms: Some(10_000),
        ..SimProfile::default()
    });
    let mut ctrl = controller(&m, &clock, None);

    let report = run_shot(&mut ctrl, TICK, None).unwrap();

    assert_eq!(report.end_reason, EndReason::ScaleDisconnected);
    assert!((9.9..10.1).contains(&report.ended_at_s), "{}", report.ended_at_s);
    assert_eq!(report.learned, None);
    assert_eq!(report.offset_g, 0.0);
    assert!(!m.relay_is_on());
}

#[test]
fn rejected_command_fails_the_run() {
    let (m, clock) = machine(SimProfile {
        fail: Some(SimCommand::StartTimer),
        ..SimProfile::default()
    });
    let mut ctrl = controller(&m, &clock, None);

    let err = run_shot(&mut ctrl, TICK, None).unwrap_err();
    match err.downcast_ref::<ShotError>() {
        Some(ShotError::Start(f)) => {
            assert_eq!(f.step, StartStep::StartTimer);
            assert!(f.message.contains("start_timer"), "{}", f.message);
        }
        other => panic!("expected a start failure, got {other:?}"),
    }
    assert!(!m.relay_is_on());
    assert!(!ctrl.is_brewing());
    assert_eq!(ctrl.phase(), Phase::Idle);
}

#[test]
fn stop_check_ends_the_shot_early() {
    let (m, clock) = machine(SimProfile::default());
    let mut ctrl = controller(&m, &clock, None);
    let watch = clock.clone();
    let epoch = watch.now();
    let stop = move || watch.ms_since(epoch) >= 10_000;

    let report = run_shot(&mut ctrl, TICK, Some(&stop)).unwrap();

    assert_eq!(report.end_reason, EndReason::UserStopped);
    assert!(report.ended_at_s < 10.0);
    assert_eq!(report.learned, None);
    assert!(!m.relay_is_on());
}

#[test]
fn stop_before_the_pump_starts_cancels() {
    let (m, clock) = machine(SimProfile::default());
    let mut ctrl = controller(&m, &clock, None);
    let stop = || true;

    let report = run_shot(&mut ctrl, TICK, Some(&stop)).unwrap();

    assert_eq!(report.end_reason, EndReason::UserStopped);
    assert_eq!(report.ended_at_s, 0.0);
    assert!(report.samples.is_empty());
    assert!(!m.relay_is_on());
    assert!(!m.timer_running());
}

#[test]
fn relay_glitch_on_the_machine_is_undone() {
    let (m, clock) = machine(SimProfile::default());
    let mut ctrl = controller(&m, &clock, None);
    ctrl.request_start().unwrap();
    while ctrl.tick().unwrap() != ShotEvent::Started {
        clock.advance(TICK);
    }
    for _ in 0..50 {
        clock.advance(TICK);
        ctrl.tick().unwrap();
    }

    m.glitch_relay(false);
    clock.advance(TICK);
    assert!(matches!(ctrl.tick().unwrap(), ShotEvent::Brewing { .. }));
    assert!(m.relay_is_on());
    assert_eq!(ctrl.relay_corrections(), 1);
}
