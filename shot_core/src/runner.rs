use std::sync::Arc;
use std::time::Duration;

use shot_traits::{Clock, OutputPin, ScaleLink, SettingsStore};

use crate::buffer::Sample;
use crate::builder::build_controller;
use crate::config::ShotParams;
use crate::controller::ShotController;
use crate::error::{BuildError, Result as CoreResult, ShotError};
use crate::feed::{FeedLink, Notification, Notifier, notification_channel};
use crate::offset::Learned;
use crate::status::{EndReason, ShotEvent};
use crate::util::{millis, period_ms};

/// How weight readings reach the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// The controller polls the link on its own tick.
    Direct,
    /// A notifier thread polls the transport at the given rate and hands
    /// readings over through a channel.
    Feed(u32),
}

/// What happened during one shot.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotReport {
    pub end_reason: EndReason,
    /// Cup weight when the controller went idle.
    pub final_weight_g: f32,
    pub ended_at_s: f32,
    /// Prediction in effect at the stop.
    pub predicted_end_s: f32,
    pub goal_g: u32,
    pub learned: Option<Learned>,
    pub offset_g: f32,
    pub samples: Vec<Sample>,
    pub relay_corrections: u32,
}

/// Extra time allowed past the hard cap before the run loop gives up.
const GUARD_SLACK_MS: u64 = 5_000;

/// How long a feed may take to report the link before the start is attempted.
const FEED_CONNECT_TIMEOUT_MS: u64 = 2_000;

/// Ensure the stall threshold spans at least two periods to tolerate one miss.
#[inline]
fn two_periods_ms(period_ms: u64) -> u64 {
    period_ms.saturating_mul(2)
}

/// Cap a threshold to be strictly below `max_run_ms` and at least 1ms.
#[inline]
fn cap_below_max_run(threshold: u64, max_run_ms: u64) -> u64 {
    threshold.min(max_run_ms.saturating_sub(1)).max(1)
}

/// Stall watchdog threshold for a feed delivering every `period_ms`.
///
/// 0 keeps the watchdog disabled. Otherwise the configured value is raised
/// to at least two feed periods, so a single missed notification does not
/// trip it, and kept strictly below the hard cap so it can still fire first.
#[inline]
fn feed_stall_threshold_ms(configured_ms: u64, period_ms: u64, max_run_ms: u64) -> u64 {
    if configured_ms == 0 {
        return 0;
    }
    let safe = configured_ms.max(two_periods_ms(period_ms));
    cap_below_max_run(safe, max_run_ms)
}

/// Upper bound on a whole run, start sequence and settling included.
fn run_budget_ms(p: &ShotParams) -> u64 {
    millis(p.limits.max_s)
        .saturating_add(p.learning.settle_timeout_ms.max(p.learning.drip_delay_ms))
        .saturating_add(p.sequence.settle_ms.saturating_mul(4))
        .saturating_add(GUARD_SLACK_MS)
}

/// Wait on the controller's clock until its link reports connected.
fn await_link<L: ScaleLink, P: OutputPin>(
    ctrl: &ShotController<L, P>,
    poll: Duration,
    timeout_ms: u64,
) -> bool {
    let clock = Arc::clone(ctrl.clock());
    let since = clock.now();
    while !ctrl.is_connected() {
        if clock.ms_since(since) >= timeout_ms {
            return false;
        }
        clock.sleep(poll);
    }
    true
}

/// Drive an already-built controller through one shot.
///
/// Requests a start, then ticks every `tick_period` on the controller's clock
/// until the shot settles or the start fails. `stop_check` is polled each
/// tick; once it returns true a `UserStopped` stop is requested.
pub fn run_shot<L: ScaleLink, P: OutputPin>(
    ctrl: &mut ShotController<L, P>,
    tick_period: Duration,
    stop_check: Option<&(dyn Fn() -> bool + Send + Sync)>,
) -> CoreResult<ShotReport> {
    let clock = Arc::clone(ctrl.clock());
    let epoch = clock.now();
    let budget_ms = run_budget_ms(ctrl.params());
    let mut stop_requested = false;
    let mut stopped_at = None;

    ctrl.request_start()?;
    tracing::info!(
        target: "shot::shot",
        goal_g = ctrl.goal_g(),
        offset_g = ctrl.offset_g(),
        "shot run start"
    );

    loop {
        if !stop_requested && stop_check.is_some_and(|f| f()) {
            stop_requested = true;
            ctrl.control_handle().stop(EndReason::UserStopped);
        }

        match ctrl.tick()? {
            ShotEvent::StartFailed(f) => {
                tracing::error!(target: "shot::shot", error = %f, "shot run aborted");
                return Err(crate::error::Report::new(ShotError::Start(f)));
            }
            ShotEvent::Cancelled(step) => {
                tracing::info!(target: "shot::shot", step = step.name(), "shot run cancelled");
                return Ok(report(ctrl, EndReason::UserStopped, None, None));
            }
            ShotEvent::Stopped(reason) => {
                stopped_at = Some((reason, ctrl.state().predicted_end_s));
            }
            ShotEvent::Settled { learned, .. } => {
                let (reason, predicted) =
                    stopped_at.unwrap_or((ctrl.state().end_reason, ctrl.state().predicted_end_s));
                let r = report(ctrl, reason, learned, Some(predicted));
                tracing::info!(
                    target: "shot::shot",
                    reason = ?r.end_reason,
                    final_g = r.final_weight_g,
                    ended_at_s = r.ended_at_s,
                    "shot run complete"
                );
                return Ok(r);
            }
            ShotEvent::Idle
            | ShotEvent::Starting(_)
            | ShotEvent::Started
            | ShotEvent::Brewing { .. }
            | ShotEvent::Settling => {}
        }

        let elapsed = clock.ms_since(epoch);
        if elapsed > budget_ms {
            return Err(abandon_run(ctrl, elapsed, budget_ms));
        }
        clock.sleep(tick_period);
    }
}

/// Give up on a run that outlived its budget, stopping whatever is left.
fn abandon_run<L: ScaleLink, P: OutputPin>(
    ctrl: &mut ShotController<L, P>,
    elapsed_ms: u64,
    budget_ms: u64,
) -> crate::error::Report {
    if let Err(e) = ctrl.request_stop(EndReason::Undefined) {
        tracing::error!(target: "shot::relay", error = %format!("{e:#}"), "stop after run budget failed");
    }
    tracing::error!(target: "shot::shot", elapsed_ms, "shot run exceeded its budget");
    crate::error::Report::new(ShotError::Timeout(budget_ms))
}

fn report<L: ScaleLink, P: OutputPin>(
    ctrl: &ShotController<L, P>,
    end_reason: EndReason,
    learned: Option<Learned>,
    predicted_end_s: Option<f32>,
) -> ShotReport {
    let st = ctrl.state();
    ShotReport {
        end_reason,
        final_weight_g: ctrl.last_weight_g(),
        ended_at_s: st.ended_at_s,
        predicted_end_s: predicted_end_s.unwrap_or(st.predicted_end_s),
        goal_g: ctrl.goal_g(),
        learned,
        offset_g: ctrl.offset_g(),
        samples: ctrl.buffer().to_vec(),
        relay_corrections: ctrl.relay_corrections(),
    }
}

/// Build a controller for `mode` and run one shot with it.
///
/// In `Feed` mode `feed_source` is polled from a notifier thread that sleeps
/// on `clock`, so the clock must be a real-time one there.
#[allow(clippy::too_many_arguments)]
pub fn run<S, P>(
    link: S,
    pin: P,
    params: ShotParams,
    settings: Option<Box<dyn SettingsStore + Send>>,
    clock: Arc<dyn Clock + Send + Sync>,
    mode: SamplingMode,
    tick_hz: u32,
    goal_g: Option<u32>,
    feed_source: Option<Box<dyn FnMut() -> Notification + Send>>,
    stop_check: Option<Box<dyn Fn() -> bool + Send + Sync>>,
) -> CoreResult<ShotReport>
where
    S: ScaleLink,
    P: OutputPin,
{
    let tick_period = Duration::from_millis(period_ms(tick_hz));
    match mode {
        SamplingMode::Direct => {
            let mut ctrl = build_controller(link, pin, params, settings, Some(clock))?;
            if let Some(g) = goal_g {
                ctrl.use_goal(g)?;
            }
            tracing::info!(target: "shot::system", mode = "direct", tick_hz, "runner start");
            run_shot(&mut ctrl, tick_period, stop_check.as_deref())
        }
        SamplingMode::Feed(hz) => {
            let source = feed_source.ok_or_else(|| {
                eyre::Report::new(BuildError::InvalidConfig(
                    "feed mode needs a notification source",
                ))
            })?;
            let (sink, feed) = notification_channel(
                params.safety.max_samples_per_tick,
                Arc::clone(&clock),
            );
            let notifier = Notifier::spawn(source, hz, Arc::clone(&clock), sink);
            let mut ctrl = build_controller(
                FeedLink::new(link, feed),
                pin,
                params,
                settings,
                Some(clock),
            )?;
            if let Some(g) = goal_g {
                ctrl.use_goal(g)?;
            }
            let stall = feed_stall_threshold_ms(
                params.safety.sample_stall_ms,
                period_ms(hz),
                millis(params.limits.max_s),
            );
            ctrl.set_stall_threshold_ms(stall);
            if !await_link(&ctrl, Duration::from_millis(period_ms(hz)), FEED_CONNECT_TIMEOUT_MS) {
                tracing::warn!(target: "shot::scale", timeout_ms = FEED_CONNECT_TIMEOUT_MS, "feed never reported a connection");
            }
            tracing::info!(target: "shot::system", mode = "feed", hz, tick_hz, stall_ms = stall, "runner start");
            let out = run_shot(&mut ctrl, tick_period, stop_check.as_deref());
            drop(ctrl);
            drop(notifier);
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use shot_traits::ManualClock;

    use super::{
        abandon_run, cap_below_max_run, feed_stall_threshold_ms, run_budget_ms, two_periods_ms,
    };
    use crate::builder::build_controller;
    use crate::config::ShotParams;
    use crate::error::ShotError;
    use crate::mocks::{LinkCommand, MockLink, MockPin};
    use crate::status::ShotEvent;

    #[test]
    fn two_periods_is_double_period() {
        assert_eq!(two_periods_ms(1), 2);
        assert_eq!(two_periods_ms(100), 200);
    }

    #[test]
    fn cap_below_max_run_enforces_bounds() {
        assert_eq!(cap_below_max_run(50_000, 100), 99);
        assert_eq!(cap_below_max_run(10, 1), 1);
        assert_eq!(cap_below_max_run(5, 100), 5);
    }

    #[test]
    fn feed_threshold_respects_period_and_cap() {
        // Configured value already spans two periods.
        assert_eq!(feed_stall_threshold_ms(8_000, 100, 50_000), 8_000);
        // A 1 Hz feed needs at least 2 s.
        assert_eq!(feed_stall_threshold_ms(500, 1_000, 50_000), 2_000);
        // Never at or above the hard cap.
        assert_eq!(feed_stall_threshold_ms(60_000, 100, 50_000), 49_999);
        // Disabled stays disabled.
        assert_eq!(feed_stall_threshold_ms(0, 100, 50_000), 0);
    }

    #[test]
    fn budget_covers_shot_and_settling() {
        let p = ShotParams::default();
        assert_eq!(run_budget_ms(&p), 50_000 + 10_000 + 400 + 5_000);
    }

    #[test]
    fn overrun_stops_the_shot_even_when_release_fails() {
        let clock = ManualClock::new();
        let link = MockLink::new();
        let pin = MockPin::new();
        let mut ctrl = build_controller(
            link.clone(),
            pin.clone(),
            ShotParams::default(),
            None,
            Some(Arc::new(clock.clone())),
        )
        .unwrap();
        ctrl.request_start().unwrap();
        while ctrl.tick().unwrap() != ShotEvent::Started {
            clock.advance_ms(100);
        }

        pin.fail_writes(true);
        let err = abandon_run(&mut ctrl, 70_000, 65_400);
        assert!(matches!(
            err.downcast_ref::<ShotError>(),
            Some(ShotError::Timeout(65_400))
        ));
        assert!(!ctrl.is_brewing());
        assert!(link.commands().contains(&LinkCommand::StopTimer));
    }
}
