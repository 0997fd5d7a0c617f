//! Type-state builder for `ShotController` and generic `build_controller`.
//!
//! The builder enforces at compile time that a scale link and a relay pin are
//! provided before `build()` is available. `try_build()` is always available
//! for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use shot_traits::{Clock, MonotonicClock, OutputPin, ScaleLink, SettingsStore};

use crate::config::*;
use crate::controller::ShotController;
use crate::error::{BuildError, Result};
use crate::relay::RelayDriver;
use crate::settings::MemorySettings;

// ── Public dynamic-dispatch alias ────────────────────────────────────────────

/// Controller over boxed collaborators, as produced by the builder.
pub type DynShotController =
    ShotController<Box<dyn ScaleLink + Send>, Box<dyn OutputPin + Send>>;

impl DynShotController {
    /// Start building a controller.
    pub fn builder() -> ShotBuilder<Missing, Missing> {
        ShotBuilder::default()
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `DynShotController`. Everything is validated on `build()`.
pub struct ShotBuilder<L, R> {
    link: Option<Box<dyn ScaleLink + Send>>,
    relay: Option<Box<dyn OutputPin + Send>>,
    settings: Option<Box<dyn SettingsStore + Send>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    params: ShotParams,
    goal_g: Option<u32>,
    _l: PhantomData<L>,
    _r: PhantomData<R>,
}

impl Default for ShotBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            link: None,
            relay: None,
            settings: None,
            clock: None,
            params: ShotParams::default(),
            goal_g: None,
            _l: PhantomData,
            _r: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Reject parameter sets the controller cannot run with.
pub fn validate_params(p: &ShotParams) -> Result<()> {
    let l = p.limits;
    if !(l.min_s.is_finite() && l.min_s > 0.0) {
        return Err(invalid("limits.min_s must be > 0"));
    }
    if !(l.max_s.is_finite() && l.max_s > l.min_s) {
        return Err(invalid("limits.max_s must be greater than limits.min_s"));
    }
    if p.trend.window < 2 {
        return Err(invalid("trend.window must be >= 2"));
    }
    if p.trend.window > p.buffer_capacity {
        return Err(invalid("trend.window must be <= buffer_capacity"));
    }
    if !(p.trend.slope_epsilon_gps.is_finite() && p.trend.slope_epsilon_gps > 0.0) {
        return Err(invalid("trend.slope_epsilon_gps must be > 0"));
    }
    if !(p.trend.flow_start_g.is_finite() && p.trend.flow_start_g >= 0.0) {
        return Err(invalid("trend.flow_start_g must be >= 0"));
    }
    if !(p.learning.max_offset_g.is_finite() && p.learning.max_offset_g > 0.0) {
        return Err(invalid("learning.max_offset_g must be > 0"));
    }
    if p.learning.settle_timeout_ms < p.learning.drip_delay_ms {
        return Err(invalid(
            "learning.settle_timeout_ms must be >= learning.drip_delay_ms",
        ));
    }
    if p.safety.max_samples_per_tick == 0 {
        return Err(invalid("safety.max_samples_per_tick must be >= 1"));
    }
    if !GOAL_RANGE_G.contains(&p.default_goal_g) {
        return Err(invalid("default_goal_g out of range"));
    }
    Ok(())
}

/// Validate configuration and construct a controller.
///
/// Shared by `ShotBuilder::try_build()` and `build_controller()`.
fn validate_and_build<L: ScaleLink, P: OutputPin>(
    link: L,
    pin: P,
    params: ShotParams,
    settings: Option<Box<dyn SettingsStore + Send>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    goal_override: Option<u32>,
) -> Result<ShotController<L, P>> {
    // ── Validation ───────────────────────────────────────────────────────────
    validate_params(&params)?;
    if let Some(g) = goal_override
        && !GOAL_RANGE_G.contains(&g)
    {
        return Err(invalid("goal grams out of range"));
    }

    // ── Persisted values ─────────────────────────────────────────────────────
    let settings: Box<dyn SettingsStore + Send> =
        settings.unwrap_or_else(|| Box::new(MemorySettings::default()));
    let offset_g = match settings.load_offset_g() {
        Ok(v) => v.unwrap_or(0.0),
        Err(e) => {
            tracing::warn!(target: "shot::system", error = %e, "offset load failed; using 0");
            0.0
        }
    };
    let stored_goal = match settings.load_goal_g() {
        Ok(v) => v.filter(|g| {
            let ok = GOAL_RANGE_G.contains(g);
            if !ok {
                tracing::warn!(target: "shot::system", goal_g = *g, "stored goal out of range; ignored");
            }
            ok
        }),
        Err(e) => {
            tracing::warn!(target: "shot::system", error = %e, "goal load failed; using default");
            None
        }
    };
    let goal_g = goal_override
        .or(stored_goal)
        .unwrap_or(params.default_goal_g);

    let clock: Arc<dyn Clock + Send + Sync> =
        clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
    let relay = RelayDriver::new(pin)?;

    Ok(ShotController::assemble(
        link, relay, settings, clock, params, goal_g, offset_g,
    ))
}

impl<L, R> ShotBuilder<L, R> {
    /// Fallible build available in any type-state; reports missing pieces.
    pub fn try_build(self) -> Result<DynShotController> {
        let link = self
            .link
            .ok_or_else(|| eyre::Report::new(BuildError::MissingLink))?;
        let relay = self
            .relay
            .ok_or_else(|| eyre::Report::new(BuildError::MissingRelay))?;
        validate_and_build(
            link,
            relay,
            self.params,
            self.settings,
            self.clock,
            self.goal_g,
        )
    }
}

/// Chainable setters that do not affect type-state.
impl<L, R> ShotBuilder<L, R> {
    pub fn with_params(mut self, params: ShotParams) -> Self {
        self.params = params;
        self
    }
    pub fn with_limits(mut self, limits: ShotLimits) -> Self {
        self.params.limits = limits;
        self
    }
    pub fn with_trend(mut self, trend: TrendCfg) -> Self {
        self.params.trend = trend;
        self
    }
    pub fn with_learning(mut self, learning: LearnCfg) -> Self {
        self.params.learning = learning;
        self
    }
    pub fn with_sequence(mut self, sequence: SequenceCfg) -> Self {
        self.params.sequence = sequence;
        self
    }
    pub fn with_safety(mut self, safety: SafetyCfg) -> Self {
        self.params.safety = safety;
        self
    }
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.params.buffer_capacity = capacity;
        self
    }
    /// Goal for this controller; wins over the stored goal.
    pub fn with_goal_grams(mut self, goal_g: u32) -> Self {
        self.goal_g = Some(goal_g);
        self
    }
    pub fn with_settings(mut self, settings: impl SettingsStore + Send + 'static) -> Self {
        self.settings = Some(Box::new(settings));
        self
    }
    /// Provide a custom clock; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<R> ShotBuilder<Missing, R> {
    pub fn with_link(self, link: impl ScaleLink + Send + 'static) -> ShotBuilder<Set, R> {
        ShotBuilder {
            link: Some(Box::new(link)),
            relay: self.relay,
            settings: self.settings,
            clock: self.clock,
            params: self.params,
            goal_g: self.goal_g,
            _l: PhantomData,
            _r: PhantomData,
        }
    }
}

impl<L> ShotBuilder<L, Missing> {
    pub fn with_relay_pin(self, pin: impl OutputPin + Send + 'static) -> ShotBuilder<L, Set> {
        ShotBuilder {
            link: self.link,
            relay: Some(Box::new(pin)),
            settings: self.settings,
            clock: self.clock,
            params: self.params,
            goal_g: self.goal_g,
            _l: PhantomData,
            _r: PhantomData,
        }
    }
}

impl ShotBuilder<Set, Set> {
    /// Validate and build. Only available once link and relay are set.
    pub fn build(self) -> Result<DynShotController> {
        self.try_build()
    }
}

/// Build a statically-dispatched controller from concrete collaborators.
///
/// Delegates to the shared `validate_and_build`.
pub fn build_controller<L, P>(
    link: L,
    pin: P,
    params: ShotParams,
    settings: Option<Box<dyn SettingsStore + Send>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
) -> Result<ShotController<L, P>>
where
    L: ScaleLink,
    P: OutputPin,
{
    validate_and_build(link, pin, params, settings, clock, None)
}
