//! Events returned from each controller tick.

use crate::offset::Learned;

/// Why a shot stopped. Display text belongs to the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndReason {
    WeightAchieved,
    TimeExceeded,
    ButtonPressed,
    ScaleDisconnected,
    UserStopped,
    #[default]
    Undefined,
}

/// Steps of the start command sequence, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStep {
    ResetTimer,
    Tare,
    StartTimer,
    EngageRelay,
}

impl StartStep {
    pub fn name(self) -> &'static str {
        match self {
            StartStep::ResetTimer => "reset_timer",
            StartStep::Tare => "tare",
            StartStep::StartTimer => "start_timer",
            StartStep::EngageRelay => "engage_relay",
        }
    }

    /// The step after this one, `None` after the relay.
    pub fn next(self) -> Option<StartStep> {
        match self {
            StartStep::ResetTimer => Some(StartStep::Tare),
            StartStep::Tare => Some(StartStep::StartTimer),
            StartStep::StartTimer => Some(StartStep::EngageRelay),
            StartStep::EngageRelay => None,
        }
    }
}

/// An aborted start: which step failed and what the collaborator said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartFailure {
    pub step: StartStep,
    pub message: String,
}

impl std::fmt::Display for StartFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "start aborted at {}: {}", self.step.name(), self.message)
    }
}

/// Outcome of a single `tick`.
#[derive(Debug, Clone, PartialEq)]
pub enum ShotEvent {
    /// Nothing running.
    Idle,
    /// Start sequence in progress; the step is the next one to issue.
    Starting(StartStep),
    /// Start sequence aborted; relay is off and the controller is idle again.
    StartFailed(StartFailure),
    /// A stop request arrived before the start sequence finished; relay is off.
    Cancelled(StartStep),
    /// All start commands confirmed and the relay is engaged.
    Started,
    Brewing {
        elapsed_s: f32,
        weight_g: f32,
        predicted_end_s: f32,
    },
    /// The shot ended this tick; relay is already off.
    Stopped(EndReason),
    /// Waiting for the drip to settle before learning.
    Settling,
    /// Settling finished; the controller is idle again.
    Settled {
        final_g: f32,
        learned: Option<Learned>,
    },
}

impl ShotEvent {
    /// True for the events after which the controller is back in idle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShotEvent::StartFailed(_) | ShotEvent::Cancelled(_) | ShotEvent::Settled { .. }
        )
    }
}
