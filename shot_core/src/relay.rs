//! Brew relay driver with read-back verification.
//!
//! `set_state` is the command path and `enforce` is the watchdog path. Both
//! trust the physical read-back over the cached state. Dropping the driver
//! releases the relay.

use eyre::WrapErr;
use shot_traits::OutputPin;

use crate::error::{Result, ShotError};

fn relay_error(e: &(dyn std::error::Error + Send + Sync + 'static)) -> eyre::Report {
    eyre::Report::new(ShotError::Relay(e.to_string()))
}

pub struct RelayDriver<P: OutputPin> {
    pin: P,
    cached: Option<bool>,
    corrections: u32,
}

impl<P: OutputPin> std::fmt::Debug for RelayDriver<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayDriver")
            .field("cached", &self.cached)
            .field("corrections", &self.corrections)
            .finish_non_exhaustive()
    }
}

impl<P: OutputPin> RelayDriver<P> {
    /// Take ownership of the pin and drive it low.
    pub fn new(pin: P) -> Result<Self> {
        let mut driver = Self {
            pin,
            cached: None,
            corrections: 0,
        };
        driver.write(false).wrap_err("initial relay release")?;
        Ok(driver)
    }

    fn read(&self) -> Result<bool> {
        self.pin
            .is_set_high()
            .map_err(|e| relay_error(&*e))
            .wrap_err("relay read-back")
    }

    fn write(&mut self, on: bool) -> Result<()> {
        let res = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        res.map_err(|e| relay_error(&*e))
            .wrap_err(if on { "relay set_high" } else { "relay set_low" })?;
        self.cached = Some(on);
        Ok(())
    }

    /// Drive the relay to `on`.
    ///
    /// The write is skipped only when the cached state and the pin both
    /// already agree. After a write the pin is read back and a mismatch is an
    /// error.
    pub fn set_state(&mut self, on: bool) -> Result<()> {
        let physical = self.read()?;
        if self.cached == Some(on) && physical == on {
            return Ok(());
        }
        self.write(on)?;
        if self.read()? != on {
            return Err(eyre::Report::new(ShotError::Relay(format!(
                "pin did not follow write (wanted {})",
                if on { "high" } else { "low" }
            ))));
        }
        tracing::debug!(target: "shot::relay", on, "relay set");
        Ok(())
    }

    /// Correct the pin if it disagrees with `expected`. Returns whether a
    /// correction was written.
    pub fn enforce(&mut self, expected: bool) -> Result<bool> {
        let physical = self.read()?;
        if physical == expected && self.cached == Some(expected) {
            return Ok(false);
        }
        if physical != expected {
            self.corrections = self.corrections.saturating_add(1);
            tracing::warn!(
                target: "shot::relay",
                expected,
                physical,
                corrections = self.corrections,
                "relay state mismatch; correcting"
            );
        }
        self.write(expected)?;
        Ok(physical != expected)
    }

    /// Best-effort release used on abort paths.
    pub fn force_off(&mut self) {
        if let Err(e) = self.write(false) {
            tracing::error!(target: "shot::relay", error = %e, "failed to release relay");
        }
    }

    /// Last state this driver wrote.
    pub fn is_on(&self) -> bool {
        self.cached == Some(true)
    }

    /// Physical state of the pin.
    pub fn read_back(&self) -> Result<bool> {
        self.read()
    }

    pub fn corrections(&self) -> u32 {
        self.corrections
    }
}

impl<P: OutputPin> Drop for RelayDriver<P> {
    fn drop(&mut self) {
        if let Err(e) = self.pin.set_low() {
            tracing::warn!(target: "shot::relay", error = %e, "relay release on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockPin;

    #[test]
    fn new_forces_pin_low() {
        let pin = MockPin::new();
        pin.corrupt(true);
        let _d = RelayDriver::new(pin.clone()).unwrap();
        assert!(!pin.is_high());
    }

    #[test]
    fn set_state_skips_redundant_writes() {
        let pin = MockPin::new();
        let mut d = RelayDriver::new(pin.clone()).unwrap();
        let base = pin.writes();
        d.set_state(true).unwrap();
        d.set_state(true).unwrap();
        assert_eq!(pin.writes(), base + 1);
        assert!(pin.is_high());
    }

    #[test]
    fn set_state_rewrites_when_pin_disagrees_with_cache() {
        let pin = MockPin::new();
        let mut d = RelayDriver::new(pin.clone()).unwrap();
        d.set_state(true).unwrap();
        pin.corrupt(false);
        let before = pin.writes();
        d.set_state(true).unwrap();
        assert_eq!(pin.writes(), before + 1);
        assert!(pin.is_high());
    }

    #[test]
    fn enforce_repairs_and_counts() {
        let pin = MockPin::new();
        let mut d = RelayDriver::new(pin.clone()).unwrap();
        assert!(!d.enforce(false).unwrap());
        pin.corrupt(true);
        assert!(d.enforce(false).unwrap());
        assert!(!pin.is_high());
        assert_eq!(d.corrections(), 1);
    }

    #[test]
    fn stuck_pin_fails_read_back() {
        let pin = MockPin::new();
        let mut d = RelayDriver::new(pin.clone()).unwrap();
        pin.stick(Some(false));
        let err = d.set_state(true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ShotError>(),
            Some(ShotError::Relay(_))
        ));
    }

    #[test]
    fn drop_releases_relay() {
        let pin = MockPin::new();
        {
            let mut d = RelayDriver::new(pin.clone()).unwrap();
            d.set_state(true).unwrap();
            assert!(pin.is_high());
        }
        assert!(!pin.is_high());
    }
}
