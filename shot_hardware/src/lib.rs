//! Hardware backends for the shot controller.
//!
//! The simulator is always available; the Raspberry Pi relay output is
//! compiled with the `hardware` feature on Linux targets.

pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;
pub mod sim;
pub mod util;

pub use error::HwError;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use gpio::GpioRelayPin;
pub use sim::{SimCommand, SimMachine, SimProfile, SimRelayPin, SimScale};
