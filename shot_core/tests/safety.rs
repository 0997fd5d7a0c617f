use std::sync::Arc;

use rstest::rstest;
use shot_core::mocks::{LinkCommand, MockLink, MockPin};
use shot_core::{DynShotController, EndReason, Phase, ShotEvent, ShotParams};
use shot_traits::ManualClock;

struct Rig {
    ctrl: DynShotController,
    link: MockLink,
    pin: MockPin,
    clock: ManualClock,
}

/// A controller that has just committed a start (elapsed 0).
fn brewing(params: ShotParams, goal_g: u32) -> Rig {
    let clock = ManualClock::new();
    let link = MockLink::new();
    let pin = MockPin::new();
    let mut ctrl = DynShotController::builder()
        .with_link(link.clone())
        .with_relay_pin(pin.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_params(params)
        .with_goal_grams(goal_g)
        .build()
        .unwrap();
    ctrl.request_start().unwrap();
    loop {
        match ctrl.tick().unwrap() {
            ShotEvent::Started => break,
            ShotEvent::Starting(_) => clock.advance_ms(100),
            other => panic!("unexpected start event {other:?}"),
        }
    }
    Rig {
        ctrl,
        link,
        pin,
        clock,
    }
}

/// Advance `ms`, deliver `weight`, tick.
fn step(r: &mut Rig, ms: u64, weight: Option<f32>) -> ShotEvent {
    r.clock.advance_ms(ms);
    if let Some(w) = weight {
        r.link.push_weight(w);
    }
    r.ctrl.tick().unwrap()
}

fn elapsed(r: &Rig) -> f32 {
    r.ctrl.state().elapsed_s
}

#[rstest]
#[case::bloom(|_t: f32| 5.0, 36)]
#[case::flat(|_t: f32| 20.0, 36)]
#[case::falling(|t: f32| 60.0 - 0.5 * t, 36)]
#[case::far_goal(|t: f32| 10.0 + 0.2 * t, 200)]
fn timeout_stops_within_one_tick(#[case] weight: fn(f32) -> f32, #[case] goal: u32) {
    let mut r = brewing(ShotParams::default(), goal);
    for _ in 0..100 {
        let t = elapsed(&r) + 0.5;
        match step(&mut r, 500, Some(weight(t))) {
            ShotEvent::Brewing { predicted_end_s, .. } => assert_eq!(predicted_end_s, 50.0),
            other => panic!("expected Brewing at {t}s, got {other:?}"),
        }
    }
    assert_eq!(elapsed(&r), 50.0);
    assert!(r.pin.is_high());

    assert_eq!(
        step(&mut r, 1, Some(weight(50.0))),
        ShotEvent::Stopped(EndReason::TimeExceeded)
    );
    assert!(!r.ctrl.is_brewing());
    assert!(!r.pin.is_high());
    assert_eq!(r.ctrl.state().end_reason, EndReason::TimeExceeded);
    assert!(r.link.commands().contains(&LinkCommand::StopTimer));
}

#[test]
fn disconnect_stops_within_one_tick() {
    let mut r = brewing(ShotParams::default(), 36);
    for i in 0..5 {
        step(&mut r, 100, Some(i as f32));
    }
    assert!(r.ctrl.is_brewing());

    r.link.set_connected(false);
    assert_eq!(
        step(&mut r, 100, None),
        ShotEvent::Stopped(EndReason::ScaleDisconnected)
    );
    assert!(!r.ctrl.is_brewing());
    assert!(!r.pin.is_high());

    // No learning after a disconnect.
    match step(&mut r, 100, None) {
        ShotEvent::Settled { learned, .. } => assert_eq!(learned, None),
        other => panic!("expected Settled, got {other:?}"),
    }
    assert_eq!(r.ctrl.phase(), Phase::Idle);
}

#[test]
fn silent_scale_trips_the_stall_watchdog() {
    let mut r = brewing(ShotParams::default(), 36);
    for _ in 0..7 {
        assert!(matches!(step(&mut r, 1_000, None), ShotEvent::Brewing { .. }));
    }
    assert_eq!(
        step(&mut r, 1_000, None),
        ShotEvent::Stopped(EndReason::ScaleDisconnected)
    );
    assert!(!r.pin.is_high());
}

#[test]
fn disabled_watchdog_leaves_only_the_timeout() {
    let mut r = brewing(ShotParams::default(), 36);
    r.ctrl.set_stall_threshold_ms(0);
    let mut last = ShotEvent::Idle;
    for _ in 0..60 {
        last = step(&mut r, 1_000, None);
        if matches!(last, ShotEvent::Stopped(_)) {
            break;
        }
    }
    assert_eq!(last, ShotEvent::Stopped(EndReason::TimeExceeded));
    assert_eq!(r.ctrl.state().ended_at_s, 51.0);
}

#[test]
fn relay_glitches_are_corrected_every_tick() {
    let mut r = brewing(ShotParams::default(), 36);
    r.pin.corrupt(false);
    step(&mut r, 100, Some(1.0));
    assert!(r.pin.is_high());
    assert_eq!(r.ctrl.relay_corrections(), 1);

    r.ctrl.request_stop(EndReason::ButtonPressed).unwrap();
    assert!(!r.pin.is_high());
    r.pin.corrupt(true);
    assert_eq!(step(&mut r, 100, None), ShotEvent::Settling);
    assert!(!r.pin.is_high());
    assert_eq!(r.ctrl.relay_corrections(), 2);
}

#[test]
fn user_stop_settles_without_learning() {
    // 10 g/s towards 100 g: no weight stop before 10 s.
    let mut r = brewing(ShotParams::default(), 100);
    for i in 0..40 {
        step(&mut r, 100, Some(i as f32));
    }
    assert!(r.ctrl.control_handle().stop(EndReason::UserStopped));
    assert_eq!(
        step(&mut r, 100, Some(40.0)),
        ShotEvent::Stopped(EndReason::UserStopped)
    );
    assert!((r.ctrl.state().ended_at_s - 4.1).abs() < 1e-4);

    assert_eq!(step(&mut r, 2_900, None), ShotEvent::Settling);
    match step(&mut r, 100, None) {
        ShotEvent::Settled { final_g, learned } => {
            assert_eq!(final_g, 40.0);
            assert_eq!(learned, None);
        }
        other => panic!("expected Settled, got {other:?}"),
    }
    assert_eq!(r.ctrl.offset_g(), 0.0);
}

#[test]
fn ingestion_is_bounded_per_tick() {
    let mut r = brewing(ShotParams::default(), 36);
    r.link.push_weights((0..100).map(|i| i as f32 * 0.01));
    step(&mut r, 100, None);
    assert_eq!(r.ctrl.buffer().len(), 64);
    assert_eq!(r.link.pending(), 36);
    step(&mut r, 100, None);
    assert_eq!(r.ctrl.buffer().len(), 100);
}

#[test]
fn non_finite_readings_are_dropped() {
    let mut r = brewing(ShotParams::default(), 36);
    step(&mut r, 100, Some(1.0));
    step(&mut r, 100, Some(f32::NAN));
    step(&mut r, 100, Some(f32::INFINITY));
    assert_eq!(r.ctrl.buffer().len(), 1);
    assert_eq!(r.ctrl.last_weight_g(), 1.0);
}

#[test]
fn keep_alive_is_serviced_during_the_start_sequence() {
    let clock = ManualClock::new();
    let link = MockLink::new();
    let mut ctrl = DynShotController::builder()
        .with_link(link.clone())
        .with_relay_pin(MockPin::new())
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    ctrl.request_start().unwrap();
    link.set_heartbeat_due(true);
    ctrl.tick().unwrap();
    assert_eq!(
        link.commands(),
        vec![LinkCommand::Heartbeat, LinkCommand::ResetTimer]
    );
    clock.advance_ms(10);
    ctrl.tick().unwrap();
    assert_eq!(link.commands().len(), 2);
}

#[test]
fn relay_fault_mid_shot_ends_the_shot() {
    let mut r = brewing(ShotParams::default(), 36);
    step(&mut r, 100, Some(1.0));
    assert!(r.ctrl.is_brewing());

    r.pin.corrupt(false);
    r.pin.fail_writes(true);
    r.clock.advance_ms(100);
    assert!(r.ctrl.tick().is_err());

    assert!(!r.ctrl.is_brewing());
    assert_eq!(r.ctrl.state().end_reason, EndReason::Undefined);
    assert!(matches!(r.ctrl.phase(), Phase::Settling { .. }));
    assert!(r.link.commands().contains(&LinkCommand::StopTimer));

    // Once writes recover the next tick holds the relay off.
    r.pin.fail_writes(false);
    r.pin.corrupt(true);
    assert_eq!(step(&mut r, 100, None), ShotEvent::Settling);
    assert!(!r.pin.is_high());
}

#[test]
fn early_prediction_waits_past_min_duration() {
    // 20 g/s from the start: 36 g extrapolates to 1.8 s, clamped to 3.0 s.
    let mut r = brewing(ShotParams::default(), 36);
    for i in 1..=30 {
        let ev = step(&mut r, 100, Some(2.0 * i as f32));
        assert!(
            matches!(ev, ShotEvent::Brewing { .. }),
            "stopped early at {}s: {ev:?}",
            elapsed(&r)
        );
    }
    assert_eq!(elapsed(&r), 3.0);
    assert_eq!(r.ctrl.state().predicted_end_s, 3.0);
    assert!(r.pin.is_high());

    assert_eq!(
        step(&mut r, 100, Some(62.0)),
        ShotEvent::Stopped(EndReason::WeightAchieved)
    );
    assert!((r.ctrl.state().ended_at_s - 3.1).abs() < 1e-4);
    assert!(!r.pin.is_high());
}
