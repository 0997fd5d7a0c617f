//! Maps `Box<dyn Error>` from trait boundaries to typed `ShotError`.
//!
//! The collaborator traits return boxed errors; this module turns them into
//! our typed enum, with a feature-gated path for `shot_hardware::HwError`.

use crate::error::ShotError;

/// Map a trait-boundary error to a typed `ShotError`.
///
/// Known hardware error types are downcast first, then I/O errors by kind,
/// then a string heuristic.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> ShotError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<shot_hardware::HwError>() {
            return match hw {
                shot_hardware::HwError::NotConnected => ShotError::NotConnected,
                shot_hardware::HwError::Gpio(msg) => ShotError::Relay(msg.clone()),
                other => ShotError::Transport(other.to_string()),
            };
        }
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>()
        && io.kind() == std::io::ErrorKind::NotConnected
    {
        return ShotError::NotConnected;
    }

    let s = e.to_string();
    if s.to_lowercase().contains("not connected") {
        ShotError::NotConnected
    } else {
        ShotError::Transport(s)
    }
}
