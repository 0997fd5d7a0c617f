//! Cross-context access to a running controller.
//!
//! Other execution contexts (buttons, a UI, a signal handler) never touch
//! controller state. They send [`ControlCommand`]s through a [`ControlHandle`]
//! and read a [`ShotSnapshot`] copied out of a [`SnapshotCell`].

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel as xch;

use crate::status::{EndReason, StartFailure, StartStep};

/// Commands drained at the top of every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop(EndReason),
    SetGoal(u32),
}

/// Queue depth for pending commands.
pub(crate) const COMMAND_QUEUE_DEPTH: usize = 16;

/// Cloneable sender side of the controller's command queue.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    pub(crate) tx: xch::Sender<ControlCommand>,
}

impl ControlHandle {
    /// Queue a command; false when the queue is full or the controller is gone.
    pub fn send(&self, cmd: ControlCommand) -> bool {
        match self.tx.try_send(cmd) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target: "shot::system", ?cmd, error = %e, "control command dropped");
                false
            }
        }
    }

    pub fn start(&self) -> bool {
        self.send(ControlCommand::Start)
    }

    pub fn stop(&self, reason: EndReason) -> bool {
        self.send(ControlCommand::Stop(reason))
    }

    pub fn set_goal(&self, goal_g: u32) -> bool {
        self.send(ControlCommand::SetGoal(goal_g))
    }
}

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// `next` is issued once `settle_ms` has passed since `since_ms`.
    Starting { next: StartStep, since_ms: u64 },
    Brewing,
    /// Relay is off; waiting for the drip before the final weight is taken.
    Settling { since_ms: u64, learn: bool },
}

/// Coherent copy of the controller state for read-only consumers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShotSnapshot {
    pub phase: Phase,
    pub connected: bool,
    pub brewing: bool,
    pub weight_g: f32,
    pub elapsed_s: f32,
    pub predicted_end_s: f32,
    pub ended_at_s: f32,
    pub end_reason: EndReason,
    pub goal_g: u32,
    pub offset_g: f32,
    pub samples: usize,
    pub last_failure: Option<StartFailure>,
}

/// Shared slot holding the latest snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCell {
    inner: Arc<Mutex<ShotSnapshot>>,
}

impl SnapshotCell {
    pub fn read(&self) -> ShotSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn store(&self, snap: ShotSnapshot) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = snap;
    }
}
