//! Simulated espresso machine: a pump behind the brew relay and a BLE-style scale.
//!
//! One `SimMachine` holds the shared physical state. `SimScale` and
//! `SimRelayPin` are views onto it, so closing the relay really does stop the
//! flow the scale sees. Time comes from the injected clock; with a
//! `ManualClock` a whole shot is simulated deterministically.

use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use shot_traits::{Clock, OutputPin, ScaleLink};

use crate::error::HwError;

/// Keep-alive cadence expected by the scale.
pub const HEARTBEAT_PERIOD_MS: u64 = 2_750;
/// The scale drops the link when no keep-alive arrives for this long.
pub const MAX_PACKET_PERIOD_MS: u64 = 8_000;

/// Commands whose failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCommand {
    Tare,
    ResetTimer,
    StartTimer,
    StopTimer,
}

impl SimCommand {
    fn name(self) -> &'static str {
        match self {
            SimCommand::Tare => "tare",
            SimCommand::ResetTimer => "reset_timer",
            SimCommand::StartTimer => "start_timer",
            SimCommand::StopTimer => "stop_timer",
        }
    }
}

/// Shape of the simulated extraction.
#[derive(Debug, Clone)]
pub struct SimProfile {
    /// Pre-infusion duration after the pump starts.
    pub bloom_s: f32,
    /// Flow into the cup during pre-infusion.
    pub bloom_flow_gps: f32,
    /// Steady flow after pre-infusion.
    pub flow_gps: f32,
    /// Weight that still drips into the cup after the pump stops.
    pub drip_g: f32,
    /// Time constant of the post-stop drip.
    pub drip_tau_s: f32,
    /// Scale notification rate.
    pub report_hz: u32,
    /// Peak amplitude of deterministic reading noise.
    pub noise_g: f32,
    /// The link comes up this long after the machine is created.
    pub connect_delay_ms: u64,
    /// Drop the link this long after the pump first starts.
    pub disconnect_after_ms: Option<u64>,
    /// Make one transport command fail every time.
    pub fail: Option<SimCommand>,
    /// Drop the link when keep-alives stop arriving.
    pub require_heartbeat: bool,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            bloom_s: 5.0,
            bloom_flow_gps: 0.6,
            flow_gps: 2.0,
            drip_g: 2.0,
            drip_tau_s: 0.8,
            report_hz: 10,
            noise_g: 0.0,
            connect_delay_ms: 0,
            disconnect_after_ms: None,
            fail: None,
            require_heartbeat: true,
        }
    }
}

#[derive(Debug)]
struct MachineState {
    created: Instant,
    last_update: Instant,
    relay_on: bool,
    pump_started: Option<Instant>,
    first_started: Option<Instant>,
    pumped_on_s: f32,
    cup_g: f32,
    tare_g: f32,
    drip_left_g: f32,
    timer_running: bool,
    dropped: bool,
    last_heartbeat: Instant,
    last_report: Option<Instant>,
    rng: u32,
    relay_writes: u32,
}

fn secs_between(later: Instant, earlier: Instant) -> f32 {
    later.saturating_duration_since(earlier).as_secs_f32()
}

fn ms_between(later: Instant, earlier: Instant) -> u64 {
    u64::try_from(later.saturating_duration_since(earlier).as_millis()).unwrap_or(u64::MAX)
}

impl MachineState {
    /// Cumulative weight pumped after `on_s` seconds of pump time.
    fn pumped_g(profile: &SimProfile, on_s: f32) -> f32 {
        let bloom = on_s.min(profile.bloom_s).max(0.0);
        let main = (on_s - profile.bloom_s).max(0.0);
        bloom * profile.bloom_flow_gps + main * profile.flow_gps
    }

    fn advance(&mut self, profile: &SimProfile, now: Instant) {
        let dt = secs_between(now, self.last_update);
        if dt <= 0.0 {
            return;
        }
        if let Some(started) = self.pump_started {
            let on_s = secs_between(now, started);
            let before = Self::pumped_g(profile, self.pumped_on_s);
            let after = Self::pumped_g(profile, on_s);
            self.cup_g += (after - before).max(0.0);
            self.pumped_on_s = on_s;
        } else if self.drip_left_g > 0.0 && profile.drip_tau_s > 0.0 {
            let fell = self.drip_left_g * (1.0 - (-dt / profile.drip_tau_s).exp());
            self.cup_g += fell;
            self.drip_left_g -= fell;
        }
        self.last_update = now;
    }

    fn refresh_link(&mut self, profile: &SimProfile, now: Instant) {
        if self.dropped {
            return;
        }
        if let (Some(limit), Some(first)) = (profile.disconnect_after_ms, self.first_started) {
            if ms_between(now, first) >= limit {
                tracing::warn!(target: "shot::scale", "simulated scale dropped the link");
                self.dropped = true;
            }
        }
        if profile.require_heartbeat
            && self.is_up(profile, now)
            && ms_between(now, self.last_heartbeat) > MAX_PACKET_PERIOD_MS
        {
            tracing::warn!(
                target: "shot::scale",
                max_packet_period_ms = MAX_PACKET_PERIOD_MS,
                "simulated scale stopped streaming: no keep-alive"
            );
            self.dropped = true;
        }
    }

    fn is_up(&self, profile: &SimProfile, now: Instant) -> bool {
        !self.dropped && ms_between(now, self.created) >= profile.connect_delay_ms
    }

    fn noise(&mut self, amp: f32) -> f32 {
        if amp <= 0.0 {
            return 0.0;
        }
        let mut x = self.rng.max(1);
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        let unit = (x as f32) / (u32::MAX as f32);
        (unit * 2.0 - 1.0) * amp
    }

    fn reading(&mut self, profile: &SimProfile) -> f32 {
        let n = self.noise(profile.noise_g);
        self.cup_g - self.tare_g + n
    }
}

/// Shared simulated machine. Clones refer to the same machine.
#[derive(Clone)]
pub struct SimMachine {
    state: Arc<Mutex<MachineState>>,
    profile: Arc<SimProfile>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl std::fmt::Debug for SimMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimMachine")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl SimMachine {
    pub fn new(profile: SimProfile, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let now = clock.now();
        let state = MachineState {
            created: now,
            last_update: now,
            relay_on: false,
            pump_started: None,
            first_started: None,
            pumped_on_s: 0.0,
            cup_g: 0.0,
            tare_g: 0.0,
            drip_left_g: 0.0,
            timer_running: false,
            dropped: false,
            last_heartbeat: now,
            last_report: None,
            rng: 0x9E37_79B9,
            relay_writes: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            profile: Arc::new(profile),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        // A panic while holding the lock leaves plain numbers behind; keep going.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Bring the model up to the clock's "now" and return the locked state.
    fn sync(&self) -> (MutexGuard<'_, MachineState>, Instant) {
        let now = self.clock.now();
        let mut st = self.lock();
        st.advance(&self.profile, now);
        st.refresh_link(&self.profile, now);
        (st, now)
    }

    pub fn scale(&self) -> SimScale {
        SimScale {
            machine: self.clone(),
        }
    }

    pub fn relay_pin(&self) -> SimRelayPin {
        SimRelayPin {
            machine: self.clone(),
        }
    }

    pub fn profile(&self) -> &SimProfile {
        &self.profile
    }

    pub fn is_connected(&self) -> bool {
        let (st, now) = self.sync();
        st.is_up(&self.profile, now)
    }

    pub fn relay_is_on(&self) -> bool {
        self.lock().relay_on
    }

    /// Grams physically in the cup, independent of tare.
    pub fn cup_weight_g(&self) -> f32 {
        self.sync().0.cup_g
    }

    pub fn timer_running(&self) -> bool {
        self.lock().timer_running
    }

    /// Number of writes that reached the relay line.
    pub fn relay_writes(&self) -> u32 {
        self.lock().relay_writes
    }

    fn set_relay(&self, on: bool) {
        let (mut st, now) = self.sync();
        st.relay_writes = st.relay_writes.saturating_add(1);
        if st.relay_on == on {
            return;
        }
        st.relay_on = on;
        if on {
            st.pump_started = Some(now);
            st.pumped_on_s = 0.0;
            st.drip_left_g = 0.0;
            if st.first_started.is_none() {
                st.first_started = Some(now);
            }
        } else {
            st.pump_started = None;
            st.drip_left_g = self.profile.drip_g;
        }
    }

    /// Flip the relay line behind the driver's back, as a glitch would.
    pub fn glitch_relay(&self, on: bool) {
        tracing::debug!(target: "shot::relay", on, "injecting relay glitch");
        let (mut st, now) = self.sync();
        st.relay_on = on;
        if on {
            st.pump_started = Some(now);
            st.pumped_on_s = 0.0;
        } else {
            st.pump_started = None;
        }
    }

    /// A reading when one is due at the scale's report rate, else `None`.
    pub fn poll_weight(&self) -> Option<f32> {
        let (mut st, now) = self.sync();
        if !st.is_up(&self.profile, now) {
            return None;
        }
        let period_ms = 1_000 / u64::from(self.profile.report_hz.max(1));
        let due = st
            .last_report
            .is_none_or(|last| ms_between(now, last) >= period_ms);
        if !due {
            return None;
        }
        st.last_report = Some(now);
        Some(st.reading(&self.profile))
    }

    fn command(
        &self,
        cmd: SimCommand,
        apply: impl FnOnce(&mut MachineState),
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let (mut st, now) = self.sync();
        if !st.is_up(&self.profile, now) {
            return Err(Box::new(HwError::NotConnected));
        }
        if self.profile.fail == Some(cmd) {
            tracing::debug!(target: "shot::scale", command = cmd.name(), "injected command failure");
            return Err(Box::new(HwError::CommandRejected(cmd.name())));
        }
        apply(&mut st);
        Ok(())
    }
}

/// Scale view of a [`SimMachine`].
#[derive(Debug, Clone)]
pub struct SimScale {
    machine: SimMachine,
}

impl ScaleLink for SimScale {
    fn is_connected(&self) -> bool {
        self.machine.is_connected()
    }

    fn new_weight_available(&mut self) -> bool {
        let (st, now) = self.machine.sync();
        if !st.is_up(&self.machine.profile, now) {
            return false;
        }
        let period_ms = 1_000 / u64::from(self.machine.profile.report_hz.max(1));
        st.last_report
            .is_none_or(|last| ms_between(now, last) >= period_ms)
    }

    fn weight(&mut self) -> f32 {
        let (mut st, now) = self.machine.sync();
        st.last_report = Some(now);
        st.reading(&self.machine.profile)
    }

    fn tare(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.machine.command(SimCommand::Tare, |st| st.tare_g = st.cup_g)
    }

    fn reset_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.machine
            .command(SimCommand::ResetTimer, |st| st.timer_running = false)
    }

    fn start_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.machine
            .command(SimCommand::StartTimer, |st| st.timer_running = true)
    }

    fn stop_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.machine
            .command(SimCommand::StopTimer, |st| st.timer_running = false)
    }

    fn heartbeat_required(&self) -> bool {
        if !self.machine.profile.require_heartbeat {
            return false;
        }
        let now = self.machine.clock.now();
        let st = self.machine.lock();
        !st.dropped && ms_between(now, st.last_heartbeat) >= HEARTBEAT_PERIOD_MS
    }

    fn heartbeat(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let (mut st, now) = self.machine.sync();
        if !st.is_up(&self.machine.profile, now) {
            return Err(Box::new(HwError::NotConnected));
        }
        st.last_heartbeat = now;
        Ok(())
    }
}

/// Brew relay view of a [`SimMachine`].
#[derive(Debug, Clone)]
pub struct SimRelayPin {
    machine: SimMachine,
}

impl OutputPin for SimRelayPin {
    fn set_high(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.machine.set_relay(true);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.machine.set_relay(false);
        Ok(())
    }

    fn is_set_high(&self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        Ok(self.machine.relay_is_on())
    }
}
