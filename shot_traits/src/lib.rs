//! Collaborator traits for the shot controller.
//!
//! The core never talks to a radio, a GPIO line or a flash page directly.
//! Everything it needs from the outside world goes through the three traits
//! below plus the [`Clock`] abstraction.

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::error::Error;

/// Connection to a weight scale that streams readings and accepts timer commands.
pub trait ScaleLink {
    fn is_connected(&self) -> bool;

    /// True when a reading arrived since the last call to [`ScaleLink::weight`].
    fn new_weight_available(&mut self) -> bool;

    /// Latest reading in grams.
    fn weight(&mut self) -> f32;

    fn tare(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn reset_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn start_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn stop_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Whether the link wants a keep-alive message now. Links without one never do.
    fn heartbeat_required(&self) -> bool {
        false
    }

    fn heartbeat(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// A single digital output line with read-back.
pub trait OutputPin {
    fn set_high(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn set_low(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;
    /// Physically read the current output level.
    fn is_set_high(&self) -> Result<bool, Box<dyn Error + Send + Sync>>;
}

/// Key/value persistence for the values that survive a power cycle.
///
/// Loads return `Ok(None)` when nothing has been stored yet.
pub trait SettingsStore {
    fn load_offset_g(&self) -> Result<Option<f32>, Box<dyn Error + Send + Sync>>;
    fn save_offset_g(&mut self, offset_g: f32) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn load_goal_g(&self) -> Result<Option<u32>, Box<dyn Error + Send + Sync>>;
    fn save_goal_g(&mut self, goal_g: u32) -> Result<(), Box<dyn Error + Send + Sync>>;
}

impl<T: ScaleLink + ?Sized> ScaleLink for Box<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
    fn new_weight_available(&mut self) -> bool {
        (**self).new_weight_available()
    }
    fn weight(&mut self) -> f32 {
        (**self).weight()
    }
    fn tare(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).tare()
    }
    fn reset_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).reset_timer()
    }
    fn start_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).start_timer()
    }
    fn stop_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).stop_timer()
    }
    fn heartbeat_required(&self) -> bool {
        (**self).heartbeat_required()
    }
    fn heartbeat(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).heartbeat()
    }
}

impl<T: OutputPin + ?Sized> OutputPin for Box<T> {
    fn set_high(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).set_high()
    }
    fn set_low(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).set_low()
    }
    fn is_set_high(&self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        (**self).is_set_high()
    }
}

impl<T: SettingsStore + ?Sized> SettingsStore for Box<T> {
    fn load_offset_g(&self) -> Result<Option<f32>, Box<dyn Error + Send + Sync>> {
        (**self).load_offset_g()
    }
    fn save_offset_g(&mut self, offset_g: f32) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).save_offset_g(offset_g)
    }
    fn load_goal_g(&self) -> Result<Option<u32>, Box<dyn Error + Send + Sync>> {
        (**self).load_goal_g()
    }
    fn save_goal_g(&mut self, goal_g: u32) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).save_goal_g(goal_g)
    }
}
