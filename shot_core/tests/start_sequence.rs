use std::sync::Arc;

use rstest::rstest;
use shot_core::mocks::{LinkCommand, MockLink, MockPin};
use shot_core::{DynShotController, EndReason, Phase, ShotError, ShotEvent, StartStep};
use shot_traits::ManualClock;

struct Rig {
    ctrl: DynShotController,
    link: MockLink,
    pin: MockPin,
    clock: ManualClock,
}

fn rig() -> Rig {
    let clock = ManualClock::new();
    let link = MockLink::new();
    let pin = MockPin::new();
    let ctrl = DynShotController::builder()
        .with_link(link.clone())
        .with_relay_pin(pin.clone())
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    Rig {
        ctrl,
        link,
        pin,
        clock,
    }
}

/// Tick every 10 ms until a terminal start outcome or `Started`.
fn drive_start(r: &mut Rig) -> ShotEvent {
    for _ in 0..100 {
        let ev = r.ctrl.tick().unwrap();
        if matches!(ev, ShotEvent::Started) || ev.is_terminal() {
            return ev;
        }
        r.clock.advance_ms(10);
    }
    panic!("start sequence did not finish");
}

#[test]
fn commands_are_spaced_without_blocking() {
    let mut r = rig();
    r.ctrl.request_start().unwrap();
    assert!(r.link.commands().is_empty());

    assert_eq!(r.ctrl.tick().unwrap(), ShotEvent::Starting(StartStep::Tare));
    assert_eq!(r.link.commands(), vec![LinkCommand::ResetTimer]);

    r.clock.advance_ms(50);
    assert_eq!(r.ctrl.tick().unwrap(), ShotEvent::Starting(StartStep::Tare));
    assert_eq!(r.link.commands(), vec![LinkCommand::ResetTimer]);

    r.clock.advance_ms(50);
    assert_eq!(
        r.ctrl.tick().unwrap(),
        ShotEvent::Starting(StartStep::StartTimer)
    );
    assert_eq!(
        r.link.commands(),
        vec![LinkCommand::ResetTimer, LinkCommand::Tare]
    );
    assert!(!r.pin.is_high());

    r.clock.advance_ms(99);
    assert_eq!(
        r.ctrl.tick().unwrap(),
        ShotEvent::Starting(StartStep::StartTimer)
    );
    r.clock.advance_ms(1);
    assert_eq!(r.ctrl.tick().unwrap(), ShotEvent::Started);
    assert_eq!(
        r.link.commands(),
        vec![
            LinkCommand::ResetTimer,
            LinkCommand::Tare,
            LinkCommand::StartTimer
        ]
    );
    assert!(r.pin.is_high());
    assert!(r.ctrl.is_brewing());
    assert_eq!(r.ctrl.phase(), Phase::Brewing);
    assert_eq!(r.ctrl.state().start_ms, Some(200));
    assert_eq!(r.ctrl.state().predicted_end_s, 50.0);
}

#[rstest]
#[case::reset(LinkCommand::ResetTimer, StartStep::ResetTimer)]
#[case::tare(LinkCommand::Tare, StartStep::Tare)]
#[case::start_timer(LinkCommand::StartTimer, StartStep::StartTimer)]
fn any_failed_step_leaves_relay_off(#[case] cmd: LinkCommand, #[case] step: StartStep) {
    let mut r = rig();
    r.link.fail_on(Some(cmd));
    r.ctrl.request_start().unwrap();
    match drive_start(&mut r) {
        ShotEvent::StartFailed(f) => assert_eq!(f.step, step),
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert!(!r.ctrl.is_brewing());
    assert!(!r.pin.is_high());
    assert_eq!(r.ctrl.phase(), Phase::Idle);
    assert_eq!(r.ctrl.last_failure().map(|f| f.step), Some(step));
}

#[test]
fn stuck_relay_fails_the_engage_step() {
    let mut r = rig();
    r.pin.stick(Some(false));
    r.ctrl.request_start().unwrap();
    match drive_start(&mut r) {
        ShotEvent::StartFailed(f) => assert_eq!(f.step, StartStep::EngageRelay),
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert!(!r.ctrl.is_brewing());
    assert!(!r.pin.is_high());
    // The timer started just before the engage attempt is stopped again.
    assert_eq!(
        r.link.commands(),
        vec![
            LinkCommand::ResetTimer,
            LinkCommand::Tare,
            LinkCommand::StartTimer,
            LinkCommand::StopTimer
        ]
    );
}

#[test]
fn disconnect_between_steps_aborts() {
    let mut r = rig();
    r.ctrl.request_start().unwrap();
    assert_eq!(r.ctrl.tick().unwrap(), ShotEvent::Starting(StartStep::Tare));
    r.link.set_connected(false);
    r.clock.advance_ms(100);
    match r.ctrl.tick().unwrap() {
        ShotEvent::StartFailed(f) => {
            assert_eq!(f.step, StartStep::Tare);
            assert!(f.message.contains("not connected"), "{}", f.message);
        }
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert!(!r.pin.is_high());
}

#[test]
fn stop_during_start_cancels() {
    let mut r = rig();
    r.ctrl.request_start().unwrap();
    r.ctrl.tick().unwrap();
    assert!(r.ctrl.control_handle().stop(EndReason::ButtonPressed));
    assert_eq!(
        r.ctrl.tick().unwrap(),
        ShotEvent::Cancelled(StartStep::Tare)
    );
    assert_eq!(r.ctrl.phase(), Phase::Idle);
    assert!(!r.pin.is_high());

    r.clock.advance_ms(500);
    assert_eq!(r.ctrl.tick().unwrap(), ShotEvent::Idle);
    assert_eq!(r.link.commands(), vec![LinkCommand::ResetTimer]);
}

#[test]
fn start_is_refused_while_busy_or_disconnected() {
    let mut r = rig();
    r.ctrl.request_start().unwrap();
    let err = r.ctrl.request_start().unwrap_err();
    assert!(matches!(err.downcast_ref::<ShotError>(), Some(ShotError::Busy(_))));

    let mut r = rig();
    r.link.set_connected(false);
    let err = r.ctrl.request_start().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ShotError>(),
        Some(ShotError::NotConnected)
    ));
    assert_eq!(r.ctrl.phase(), Phase::Idle);
}

#[test]
fn start_command_from_handle_runs_the_sequence() {
    let mut r = rig();
    assert!(r.ctrl.control_handle().start());
    assert_eq!(drive_start(&mut r), ShotEvent::Started);
    assert!(r.pin.is_high());
}

#[test]
fn start_command_while_disconnected_reports_failure() {
    let mut r = rig();
    r.link.set_connected(false);
    r.ctrl.control_handle().start();
    match r.ctrl.tick().unwrap() {
        ShotEvent::StartFailed(f) => assert_eq!(f.step, StartStep::ResetTimer),
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert!(r.link.commands().is_empty());
}

#[test]
fn a_failed_start_can_be_retried() {
    let mut r = rig();
    r.link.fail_on(Some(LinkCommand::Tare));
    r.ctrl.request_start().unwrap();
    assert!(matches!(drive_start(&mut r), ShotEvent::StartFailed(_)));

    r.link.fail_on(None);
    r.ctrl.request_start().unwrap();
    assert!(r.ctrl.last_failure().is_none());
    assert_eq!(drive_start(&mut r), ShotEvent::Started);
}
