use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("scale not connected")]
    NotConnected,
    #[error("scale rejected {0} command")]
    CommandRejected(&'static str),
    #[error("timed out waiting for hardware")]
    Timeout,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
