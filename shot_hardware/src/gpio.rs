//! Brew relay on a Raspberry Pi GPIO line.

use std::error::Error;

use rppal::gpio::Gpio;
use shot_traits::OutputPin;

use crate::error::HwError;

/// Relay output that understands active-low driver boards.
///
/// `set_high` always means "energize the relay", whatever level that takes.
pub struct GpioRelayPin {
    pin: rppal::gpio::OutputPin,
    active_low: bool,
}

impl GpioRelayPin {
    /// Claim `bcm` as an output with the relay de-energized.
    pub fn new(bcm: u8, active_low: bool) -> Result<Self, HwError> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(bcm)
            .map_err(|e| HwError::Gpio(format!("pin {bcm}: {e}")))?;
        let pin = if active_low {
            pin.into_output_high()
        } else {
            pin.into_output_low()
        };
        tracing::info!(target: "shot::relay", bcm, active_low, "relay gpio claimed");
        Ok(Self { pin, active_low })
    }
}

impl OutputPin for GpioRelayPin {
    fn set_high(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.active_low {
            self.pin.set_low();
        } else {
            self.pin.set_high();
        }
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }

    fn is_set_high(&self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        Ok(self.pin.is_set_high() != self.active_low)
    }
}
