//! Scriptable collaborators for tests and the self-check.
//!
//! Both mocks are handles onto shared state: keep a clone outside the
//! controller to script it and inspect what happened.

use std::collections::VecDeque;
use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shot_traits::{OutputPin, ScaleLink};

type BoxError = Box<dyn Error + Send + Sync>;

/// Transport commands as recorded by [`MockLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    ResetTimer,
    Tare,
    StartTimer,
    StopTimer,
    Heartbeat,
}

#[derive(Debug)]
struct LinkState {
    connected: bool,
    pending: VecDeque<f32>,
    current_g: f32,
    fail: Option<LinkCommand>,
    heartbeat_due: bool,
    log: Vec<LinkCommand>,
}

/// Scale link fed from a queue of scripted readings.
#[derive(Debug, Clone)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    /// Connected, no readings queued.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                connected: true,
                pending: VecDeque::new(),
                current_g: 0.0,
                fail: None,
                heartbeat_due: false,
                log: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_weight(&self, g: f32) {
        self.lock().pending.push_back(g);
    }

    pub fn push_weights(&self, gs: impl IntoIterator<Item = f32>) {
        self.lock().pending.extend(gs);
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Make `cmd` fail from now on; `None` clears it.
    pub fn fail_on(&self, cmd: Option<LinkCommand>) {
        self.lock().fail = cmd;
    }

    pub fn set_heartbeat_due(&self, due: bool) {
        self.lock().heartbeat_due = due;
    }

    /// Every command issued so far, in order.
    pub fn commands(&self) -> Vec<LinkCommand> {
        self.lock().log.clone()
    }

    fn command(&self, cmd: LinkCommand) -> Result<(), BoxError> {
        let mut st = self.lock();
        st.log.push(cmd);
        if !st.connected {
            return Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "mock link not connected",
            )));
        }
        if st.fail == Some(cmd) {
            return Err(Box::new(std::io::Error::other(format!(
                "{cmd:?} rejected by mock link"
            ))));
        }
        Ok(())
    }
}

impl ScaleLink for MockLink {
    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn new_weight_available(&mut self) -> bool {
        let st = self.lock();
        st.connected && !st.pending.is_empty()
    }

    fn weight(&mut self) -> f32 {
        let mut st = self.lock();
        if let Some(g) = st.pending.pop_front() {
            st.current_g = g;
        }
        st.current_g
    }

    fn tare(&mut self) -> Result<(), BoxError> {
        self.command(LinkCommand::Tare)
    }

    fn reset_timer(&mut self) -> Result<(), BoxError> {
        self.command(LinkCommand::ResetTimer)
    }

    fn start_timer(&mut self) -> Result<(), BoxError> {
        self.command(LinkCommand::StartTimer)
    }

    fn stop_timer(&mut self) -> Result<(), BoxError> {
        self.command(LinkCommand::StopTimer)
    }

    fn heartbeat_required(&self) -> bool {
        self.lock().heartbeat_due
    }

    fn heartbeat(&mut self) -> Result<(), BoxError> {
        self.command(LinkCommand::Heartbeat)?;
        self.lock().heartbeat_due = false;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PinState {
    high: bool,
    writes: u32,
    stuck: Option<bool>,
    fail_writes: bool,
}

/// Output pin with a glitch hook and write counter.
#[derive(Debug, Clone, Default)]
pub struct MockPin {
    state: Arc<Mutex<PinState>>,
}

impl MockPin {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PinState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flip the level without going through the driver.
    pub fn corrupt(&self, high: bool) {
        self.lock().high = high;
    }

    /// Pin the level regardless of writes; `None` frees it.
    pub fn stick(&self, level: Option<bool>) {
        let mut st = self.lock();
        st.stuck = level;
        if let Some(l) = level {
            st.high = l;
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn is_high(&self) -> bool {
        self.lock().high
    }

    pub fn writes(&self) -> u32 {
        self.lock().writes
    }

    fn write(&self, high: bool) -> Result<(), BoxError> {
        let mut st = self.lock();
        if st.fail_writes {
            return Err(Box::new(std::io::Error::other("mock pin write failed")));
        }
        st.writes = st.writes.saturating_add(1);
        st.high = st.stuck.unwrap_or(high);
        Ok(())
    }
}

impl OutputPin for MockPin {
    fn set_high(&mut self) -> Result<(), BoxError> {
        self.write(true)
    }

    fn set_low(&mut self) -> Result<(), BoxError> {
        self.write(false)
    }

    fn is_set_high(&self) -> Result<bool, BoxError> {
        Ok(self.lock().high)
    }
}
