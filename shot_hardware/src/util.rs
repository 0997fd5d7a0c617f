use std::time::Duration;

use shot_traits::Clock;

use crate::error::{HwError, Result};

/// Poll `ready` until it returns true or `timeout` expires on `clock`.
/// Sleeps `poll_interval` between checks to avoid spinning.
pub fn wait_for(
    mut ready: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
    clock: &dyn Clock,
) -> Result<()> {
    let start = clock.now();
    let limit_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    while !ready() {
        if clock.ms_since(start) >= limit_ms {
            return Err(HwError::Timeout);
        }
        clock.sleep(poll_interval);
    }
    Ok(())
}
