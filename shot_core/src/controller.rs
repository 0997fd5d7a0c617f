//! The shot state machine (`ShotController`).
//!
//! Idle -> Starting (reset timer, tare, start timer, engage relay) -> Brewing
//! -> Settling -> Idle. Every transition happens inside `tick`; nothing here
//! sleeps, so the start sequence's settling delays are per-phase timestamps
//! compared against the injected clock.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel as xch;
use eyre::WrapErr;
use shot_traits::{Clock, OutputPin, ScaleLink, SettingsStore};

use crate::buffer::{Sample, SampleBuffer};
use crate::config::{GOAL_RANGE_G, ShotParams};
use crate::control::{
    COMMAND_QUEUE_DEPTH, ControlCommand, ControlHandle, Phase, ShotSnapshot, SnapshotCell,
};
use crate::error::{Result, ShotError};
use crate::hw_error::map_hw_error;
use crate::offset::{Learned, OffsetLearner};
use crate::relay::RelayDriver;
use crate::status::{EndReason, ShotEvent, StartFailure, StartStep};
use crate::trend::TrendEstimator;
use crate::util::{grams, secs};

/// Session state of the current (or last) extraction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShotState {
    /// Controller time at which the brew was committed.
    pub start_ms: Option<u64>,
    pub elapsed_s: f32,
    /// Elapsed time at the stop; 0 until stopped.
    pub ended_at_s: f32,
    /// Always within the shot limits.
    pub predicted_end_s: f32,
    pub brewing: bool,
    pub end_reason: EndReason,
    pub(crate) last_sample_ms: u64,
}

pub struct ShotController<L: ScaleLink, P: OutputPin> {
    pub(crate) link: L,
    pub(crate) relay: RelayDriver<P>,
    pub(crate) settings: Box<dyn SettingsStore + Send>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) epoch: Instant,
    pub(crate) params: ShotParams,
    pub(crate) estimator: TrendEstimator,
    pub(crate) learner: OffsetLearner,
    pub(crate) buffer: SampleBuffer,
    pub(crate) phase: Phase,
    pub(crate) shot: ShotState,
    pub(crate) goal_g: u32,
    pub(crate) last_weight_g: f32,
    pub(crate) stall_ms: u64,
    pub(crate) last_failure: Option<StartFailure>,
    pub(crate) last_learned: Option<Learned>,
    pub(crate) tx: xch::Sender<ControlCommand>,
    pub(crate) rx: xch::Receiver<ControlCommand>,
    pub(crate) snapshot: SnapshotCell,
}

impl<L: ScaleLink, P: OutputPin> std::fmt::Debug for ShotController<L, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShotController")
            .field("phase", &self.phase)
            .field("goal_g", &self.goal_g)
            .field("offset_g", &self.learner.offset_g())
            .field("shot", &self.shot)
            .finish_non_exhaustive()
    }
}

impl<L: ScaleLink, P: OutputPin> ShotController<L, P> {
    pub(crate) fn assemble(
        link: L,
        relay: RelayDriver<P>,
        settings: Box<dyn SettingsStore + Send>,
        clock: Arc<dyn Clock + Send + Sync>,
        params: ShotParams,
        goal_g: u32,
        offset_g: f32,
    ) -> Self {
        let (tx, rx) = xch::bounded(COMMAND_QUEUE_DEPTH);
        let epoch = clock.now();
        let ctrl = Self {
            link,
            relay,
            settings,
            clock,
            epoch,
            params,
            estimator: TrendEstimator::new(params.trend, params.limits),
            learner: OffsetLearner::new(params.learning, offset_g),
            buffer: SampleBuffer::with_capacity(params.buffer_capacity),
            phase: Phase::Idle,
            shot: ShotState {
                predicted_end_s: params.limits.max_s,
                ..ShotState::default()
            },
            goal_g,
            last_weight_g: 0.0,
            stall_ms: params.safety.sample_stall_ms,
            last_failure: None,
            last_learned: None,
            tx,
            rx,
            snapshot: SnapshotCell::default(),
        };
        ctrl.publish();
        ctrl
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &ShotState {
        &self.shot
    }

    pub fn is_brewing(&self) -> bool {
        self.shot.brewing
    }

    /// Whether the scale link currently reports a connection.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Samples of the current or last shot.
    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn goal_g(&self) -> u32 {
        self.goal_g
    }

    pub fn offset_g(&self) -> f32 {
        self.learner.offset_g()
    }

    pub fn params(&self) -> &ShotParams {
        &self.params
    }

    pub fn estimator(&self) -> &TrendEstimator {
        &self.estimator
    }

    pub fn last_weight_g(&self) -> f32 {
        self.last_weight_g
    }

    pub fn last_failure(&self) -> Option<&StartFailure> {
        self.last_failure.as_ref()
    }

    pub fn last_learned(&self) -> Option<Learned> {
        self.last_learned
    }

    pub fn relay_corrections(&self) -> u32 {
        self.relay.corrections()
    }

    /// Stall watchdog threshold currently in effect (0 = disabled).
    pub fn stall_threshold_ms(&self) -> u64 {
        self.stall_ms
    }

    /// Override the stall watchdog threshold, e.g. to fit a slower feed.
    pub fn set_stall_threshold_ms(&mut self, ms: u64) {
        self.stall_ms = ms;
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    /// Sender for other execution contexts.
    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            tx: self.tx.clone(),
        }
    }

    /// Shared slot refreshed at the end of every tick.
    pub fn snapshot_cell(&self) -> SnapshotCell {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> ShotSnapshot {
        ShotSnapshot {
            phase: self.phase,
            connected: self.link.is_connected(),
            brewing: self.shot.brewing,
            weight_g: self.last_weight_g,
            elapsed_s: self.shot.elapsed_s,
            predicted_end_s: self.shot.predicted_end_s,
            ended_at_s: self.shot.ended_at_s,
            end_reason: self.shot.end_reason,
            goal_g: self.goal_g,
            offset_g: self.learner.offset_g(),
            samples: self.buffer.len(),
            last_failure: self.last_failure.clone(),
        }
    }

    fn publish(&self) {
        let snap = self.snapshot();
        self.snapshot.store(snap);
    }

    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    /// Begin the start sequence. The first command goes out on the next tick.
    pub fn request_start(&mut self) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(eyre::Report::new(ShotError::Busy("shot already in progress")));
        }
        if !self.link.is_connected() {
            return Err(eyre::Report::new(ShotError::NotConnected));
        }
        self.last_failure = None;
        self.phase = Phase::Starting {
            next: StartStep::ResetTimer,
            since_ms: self.now_ms(),
        };
        tracing::info!(target: "shot::shot", goal_g = self.goal_g, "start requested");
        Ok(())
    }

    /// Stop whatever is running. Returns the resulting event, or `None` when
    /// there was nothing to stop.
    pub fn request_stop(&mut self, reason: EndReason) -> Result<Option<ShotEvent>> {
        let now = self.now_ms();
        let ev = self.handle_stop(reason, now)?;
        self.publish();
        Ok(ev)
    }

    /// Use `goal_g` for this session without persisting it.
    pub fn use_goal(&mut self, goal_g: u32) -> Result<()> {
        if !GOAL_RANGE_G.contains(&goal_g) {
            return Err(eyre::Report::new(ShotError::InvalidGoal(goal_g)));
        }
        self.goal_g = goal_g;
        self.publish();
        Ok(())
    }

    /// Change the goal weight and persist it.
    pub fn set_goal(&mut self, goal_g: u32) -> Result<()> {
        self.use_goal(goal_g)?;
        self.settings
            .save_goal_g(goal_g)
            .map_err(|e| eyre::Report::new(ShotError::Settings(e.to_string())))
            .wrap_err("persisting goal weight")?;
        tracing::info!(target: "shot::system", goal_g, "goal weight set");
        Ok(())
    }

    /// Forget the learned offset and persist zero.
    pub fn reset_offset(&mut self) -> Result<()> {
        self.learner.reset();
        self.settings
            .save_offset_g(0.0)
            .map_err(|e| eyre::Report::new(ShotError::Settings(e.to_string())))
            .wrap_err("persisting offset")?;
        self.publish();
        Ok(())
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// Advance the state machine by one step.
    ///
    /// Order: drain control commands, service the keep-alive, run the phase,
    /// enforce the relay, publish a snapshot. Expected outcomes (failed start,
    /// disconnect, timeout) are events; `Err` means the relay could not be
    /// driven.
    pub fn tick(&mut self) -> Result<ShotEvent> {
        let now = self.now_ms();
        let early = self.drain_commands(now)?;
        self.keep_alive();
        let event = match early {
            Some(ev) => ev,
            None => match self.phase {
                Phase::Idle => {
                    self.observe_weight(None);
                    ShotEvent::Idle
                }
                Phase::Starting { next, since_ms } => self.advance_start(now, next, since_ms),
                Phase::Brewing => self.brew_step(now)?,
                Phase::Settling { since_ms, learn } => self.settle_step(now, since_ms, learn),
            },
        };
        let expected = self.phase == Phase::Brewing;
        if let Err(e) = self.relay.enforce(expected) {
            if expected {
                // Cannot hold the pump on reliably: end the shot before reporting.
                tracing::error!(target: "shot::relay", error = %format!("{e:#}"), "relay fault mid-shot; stopping");
                if let Err(stop_err) = self.stop(EndReason::Undefined, now) {
                    tracing::error!(target: "shot::relay", error = %format!("{stop_err:#}"), "relay release after fault failed");
                }
            }
            self.publish();
            return Err(e.wrap_err("relay enforce"));
        }
        self.publish();
        Ok(event)
    }

    fn drain_commands(&mut self, now: u64) -> Result<Option<ShotEvent>> {
        let mut event = None;
        while let Ok(cmd) = self.rx.try_recv() {
            match cmd {
                ControlCommand::Start => match self.request_start() {
                    Ok(()) => {}
                    Err(e) => match e.downcast_ref::<ShotError>() {
                        Some(ShotError::NotConnected) => {
                            let failure = StartFailure {
                                step: StartStep::ResetTimer,
                                message: ShotError::NotConnected.to_string(),
                            };
                            self.last_failure = Some(failure.clone());
                            event = Some(ShotEvent::StartFailed(failure));
                        }
                        _ => tracing::debug!(target: "shot::shot", error = %e, "start ignored"),
                    },
                },
                ControlCommand::Stop(reason) => {
                    if let Some(ev) = self.handle_stop(reason, now)? {
                        event = Some(ev);
                    }
                }
                ControlCommand::SetGoal(g) => {
                    if let Err(e) = self.set_goal(g) {
                        tracing::warn!(target: "shot::system", error = %e, goal_g = g, "goal change refused");
                    }
                }
            }
        }
        Ok(event)
    }

    fn keep_alive(&mut self) {
        if self.link.heartbeat_required()
            && let Err(e) = self.link.heartbeat()
        {
            tracing::warn!(target: "shot::scale", error = %map_hw_error(&*e), "heartbeat failed");
        }
    }

    fn handle_stop(&mut self, reason: EndReason, now: u64) -> Result<Option<ShotEvent>> {
        match self.phase {
            Phase::Starting { next, .. } => {
                self.phase = Phase::Idle;
                self.relay.force_off();
                tracing::info!(target: "shot::shot", ?reason, step = next.name(), "start cancelled");
                Ok(Some(ShotEvent::Cancelled(next)))
            }
            Phase::Brewing => self.stop(reason, now).map(Some),
            Phase::Idle | Phase::Settling { .. } => Ok(None),
        }
    }

    // ── Start sequence ───────────────────────────────────────────────────────

    fn advance_start(&mut self, now: u64, step: StartStep, since_ms: u64) -> ShotEvent {
        let settle = self.params.sequence.settle_ms;
        if step != StartStep::ResetTimer && now.saturating_sub(since_ms) < settle {
            return ShotEvent::Starting(step);
        }
        if !self.link.is_connected() {
            return self.abort_start(step, ShotError::NotConnected.to_string());
        }
        let res = match step {
            StartStep::ResetTimer => self.link.reset_timer(),
            StartStep::Tare => self.link.tare(),
            StartStep::StartTimer => self.link.start_timer(),
            StartStep::EngageRelay => Ok(()),
        };
        if let Err(e) = res {
            return self.abort_start(step, map_hw_error(&*e).to_string());
        }
        tracing::debug!(target: "shot::scale", step = step.name(), "start step ok");

        match step {
            StartStep::ResetTimer | StartStep::Tare => {
                let next = step.next().unwrap_or(StartStep::EngageRelay);
                self.phase = Phase::Starting {
                    next,
                    since_ms: now,
                };
                ShotEvent::Starting(next)
            }
            StartStep::StartTimer | StartStep::EngageRelay => self.commit_start(now),
        }
    }

    /// Timer is running: engage the relay and open a fresh shot.
    fn commit_start(&mut self, now: u64) -> ShotEvent {
        if let Err(e) = self.relay.set_state(true) {
            // The scale timer is already running.
            if let Err(te) = self.link.stop_timer() {
                tracing::warn!(target: "shot::scale", error = %map_hw_error(&*te), "stop_timer failed");
            }
            return self.abort_start(StartStep::EngageRelay, format!("{e:#}"));
        }
        self.buffer.clear();
        self.shot = ShotState {
            start_ms: Some(now),
            predicted_end_s: self.params.limits.max_s,
            brewing: true,
            last_sample_ms: now,
            ..ShotState::default()
        };
        self.last_learned = None;
        self.phase = Phase::Brewing;
        tracing::info!(
            target: "shot::shot",
            goal_g = self.goal_g,
            offset_g = self.learner.offset_g(),
            "shot started"
        );
        ShotEvent::Started
    }

    fn abort_start(&mut self, step: StartStep, message: String) -> ShotEvent {
        self.relay.force_off();
        self.phase = Phase::Idle;
        let failure = StartFailure { step, message };
        tracing::warn!(target: "shot::shot", step = step.name(), error = %failure.message, "start sequence aborted");
        self.last_failure = Some(failure.clone());
        ShotEvent::StartFailed(failure)
    }

    // ── Brewing ──────────────────────────────────────────────────────────────

    /// Read pending weights. While brewing they are also recorded at `at_s`.
    /// Returns how many arrived.
    fn observe_weight(&mut self, at_s: Option<f32>) -> usize {
        let mut n = 0;
        while n < self.params.safety.max_samples_per_tick && self.link.new_weight_available() {
            let w = self.link.weight();
            n += 1;
            if !w.is_finite() {
                tracing::debug!(target: "shot::weight", "non-finite reading dropped");
                continue;
            }
            self.last_weight_g = w;
            if let Some(t) = at_s
                && let Err(e) = self.buffer.push(Sample::new(t, w))
            {
                tracing::debug!(target: "shot::weight", error = %e, "sample dropped");
            }
        }
        n
    }

    fn brew_step(&mut self, now: u64) -> Result<ShotEvent> {
        let start = self.shot.start_ms.unwrap_or(now);
        let since_start = now.saturating_sub(start);
        let elapsed_s = secs(since_start);
        self.shot.elapsed_s = elapsed_s;

        if !self.link.is_connected() {
            tracing::warn!(target: "shot::scale", elapsed_s, "scale disconnected mid-shot");
            return self.stop(EndReason::ScaleDisconnected, now);
        }

        if self.observe_weight(Some(elapsed_s)) > 0 {
            self.shot.last_sample_ms = now;
            let est = self.estimator.estimate(
                &self.buffer,
                grams(self.goal_g),
                self.learner.offset_g(),
            );
            tracing::trace!(
                target: "shot::weight",
                elapsed_s,
                weight_g = self.last_weight_g,
                predicted_end_s = est.end_time_s,
                basis = ?est.basis,
                "sample"
            );
            self.shot.predicted_end_s = est.end_time_s;
        }

        let limits = self.params.limits;
        if elapsed_s > limits.max_s {
            return self.stop(EndReason::TimeExceeded, now);
        }
        // A prediction at the cap means "no estimate"; only the timeout ends that shot.
        if elapsed_s >= self.shot.predicted_end_s
            && self.shot.predicted_end_s < limits.max_s
            && elapsed_s > limits.min_s
        {
            return self.stop(EndReason::WeightAchieved, now);
        }
        if self.stall_ms > 0 && now.saturating_sub(self.shot.last_sample_ms) >= self.stall_ms {
            tracing::warn!(
                target: "shot::scale",
                stalled_ms = now.saturating_sub(self.shot.last_sample_ms),
                "no weight notifications; treating scale as gone"
            );
            return self.stop(EndReason::ScaleDisconnected, now);
        }

        Ok(ShotEvent::Brewing {
            elapsed_s,
            weight_g: self.last_weight_g,
            predicted_end_s: self.shot.predicted_end_s,
        })
    }

    /// Stop timer (best effort), release the relay, record the end.
    fn stop(&mut self, reason: EndReason, now: u64) -> Result<ShotEvent> {
        if let Err(e) = self.link.stop_timer() {
            tracing::warn!(target: "shot::scale", error = %map_hw_error(&*e), "stop_timer failed");
        }
        let elapsed_s = self
            .shot
            .start_ms
            .map_or(self.shot.elapsed_s, |s| secs(now.saturating_sub(s)));
        self.shot.brewing = false;
        self.shot.elapsed_s = elapsed_s;
        self.shot.ended_at_s = elapsed_s;
        self.shot.end_reason = reason;
        let learn = reason == EndReason::WeightAchieved && self.learner.cfg().enabled;
        self.phase = Phase::Settling {
            since_ms: now,
            learn,
        };
        tracing::info!(
            target: "shot::shot",
            ?reason,
            ended_at_s = elapsed_s,
            weight_g = self.last_weight_g,
            predicted_end_s = self.shot.predicted_end_s,
            "shot stopped"
        );
        if let Err(e) = self.relay.set_state(false) {
            self.relay.force_off();
            return Err(e.wrap_err("releasing relay at stop"));
        }
        Ok(ShotEvent::Stopped(reason))
    }

    // ── Settling ─────────────────────────────────────────────────────────────

    fn settle_step(&mut self, now: u64, since_ms: u64, learn: bool) -> ShotEvent {
        self.observe_weight(None);
        let since_stop = now.saturating_sub(since_ms);
        let goal = grams(self.goal_g);

        if self.shot.end_reason == EndReason::ScaleDisconnected || !self.link.is_connected() {
            return self.finish(None);
        }
        if !learn {
            if since_stop >= self.params.learning.drip_delay_ms {
                return self.finish(None);
            }
            return ShotEvent::Settling;
        }
        if self.learner.ready(since_stop, self.last_weight_g, goal) {
            let learned = self.learner.learn(self.last_weight_g, goal);
            if let Learned::Updated { offset_g, .. } = learned
                && let Err(e) = self.settings.save_offset_g(offset_g)
            {
                tracing::warn!(target: "shot::system", error = %e, "failed to persist offset");
            }
            return self.finish(Some(learned));
        }
        if self.learner.timed_out(since_stop) {
            tracing::warn!(
                target: "shot::weight",
                weight_g = self.last_weight_g,
                goal_g = self.goal_g,
                "weight never settled near goal; skipping offset update"
            );
            return self.finish(None);
        }
        ShotEvent::Settling
    }

    fn finish(&mut self, learned: Option<Learned>) -> ShotEvent {
        self.phase = Phase::Idle;
        self.last_learned = learned;
        tracing::info!(
            target: "shot::shot",
            final_g = self.last_weight_g,
            offset_g = self.learner.offset_g(),
            "shot settled"
        );
        ShotEvent::Settled {
            final_g: self.last_weight_g,
            learned,
        }
    }
}
