use thiserror::Error;

use crate::status::StartFailure;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShotError {
    #[error("scale transport error: {0}")]
    Transport(String),
    #[error("relay fault: {0}")]
    Relay(String),
    #[error("settings store error: {0}")]
    Settings(String),
    #[error("scale not connected")]
    NotConnected,
    #[error("controller busy: {0}")]
    Busy(&'static str),
    #[error("{0}")]
    Start(StartFailure),
    #[error("goal weight {0} g is outside 1..=200 g")]
    InvalidGoal(u32),
    #[error("shot did not finish within {0} ms")]
    Timeout(u64),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing scale link")]
    MissingLink,
    #[error("missing relay pin")]
    MissingRelay,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Why a sample was refused by the buffer.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum SampleRejected {
    #[error("sample is not finite")]
    NonFinite,
    #[error("sample time {got_s} s is before the previous sample at {last_s} s")]
    OutOfOrder { last_s: f32, got_s: f32 },
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
