//! Weight notifications delivered from another execution context.
//!
//! A scale transport usually pushes readings from its own thread. Those
//! readings must not touch controller state directly, so they travel through
//! a bounded single-producer/single-consumer channel: the [`Notifier`] thread
//! owns the [`NotificationSink`], and a [`FeedLink`] owned by the controller
//! drains the [`NotificationFeed`] on its tick.
//!
//! Safety: each `Notifier` spawns exactly one thread, which is shut down and
//! joined when the `Notifier` is dropped.

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use shot_traits::{Clock, ScaleLink};

/// What a transport poll produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notification {
    Weight(f32),
    /// Connected, nothing new.
    Quiet,
    /// Connection lost.
    Lost,
}

struct Shared {
    connected: AtomicBool,
    last_ok_ms: AtomicU64,
    epoch: Instant,
    clock: Arc<dyn Clock + Send + Sync>,
}

/// Producer half.
pub struct NotificationSink {
    tx: xch::Sender<f32>,
    shared: Arc<Shared>,
}

/// Consumer half.
pub struct NotificationFeed {
    rx: xch::Receiver<f32>,
    shared: Arc<Shared>,
}

/// Bounded notification channel holding at most `capacity` undelivered readings.
pub fn notification_channel(
    capacity: usize,
    clock: Arc<dyn Clock + Send + Sync>,
) -> (NotificationSink, NotificationFeed) {
    let (tx, rx) = xch::bounded(capacity.max(1));
    let shared = Arc::new(Shared {
        connected: AtomicBool::new(false),
        last_ok_ms: AtomicU64::new(0),
        epoch: clock.now(),
        clock,
    });
    (
        NotificationSink {
            tx,
            shared: Arc::clone(&shared),
        },
        NotificationFeed { rx, shared },
    )
}

/// Why a reading could not be handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverError {
    /// Consumer is behind; the reading was dropped.
    Full,
    /// Consumer is gone.
    Closed,
}

impl NotificationSink {
    pub fn deliver(&self, weight_g: f32) -> Result<(), DeliverError> {
        self.shared.connected.store(true, Ordering::Relaxed);
        match self.tx.try_send(weight_g) {
            Ok(()) => {
                let now = self.shared.clock.ms_since(self.shared.epoch);
                self.shared.last_ok_ms.store(now, Ordering::Relaxed);
                Ok(())
            }
            Err(xch::TrySendError::Full(_)) => Err(DeliverError::Full),
            Err(xch::TrySendError::Disconnected(_)) => Err(DeliverError::Closed),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::Relaxed);
    }
}

impl NotificationFeed {
    pub fn try_recv(&self) -> Option<f32> {
        self.rx.try_recv().ok()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Milliseconds since the last delivered reading.
    pub fn stalled_for_ms(&self) -> u64 {
        let now = self.shared.clock.ms_since(self.shared.epoch);
        now.saturating_sub(self.shared.last_ok_ms.load(Ordering::Relaxed))
    }
}

/// Background thread polling a transport source at a fixed rate.
pub struct Notifier {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Notifier {
    pub fn spawn<F>(
        mut source: F,
        hz: u32,
        clock: Arc<dyn Clock + Send + Sync>,
        sink: NotificationSink,
    ) -> Self
    where
        F: FnMut() -> Notification + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let period = Duration::from_millis(crate::util::period_ms(hz));

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!(target: "shot::scale", "notifier received shutdown signal");
                    break;
                }
                match source() {
                    Notification::Weight(w) => match sink.deliver(w) {
                        Ok(()) => {}
                        Err(DeliverError::Full) => {
                            tracing::trace!(target: "shot::scale", "feed full; reading dropped");
                        }
                        Err(DeliverError::Closed) => {
                            tracing::debug!(target: "shot::scale", "feed consumer gone; notifier exiting");
                            break;
                        }
                    },
                    Notification::Quiet => sink.set_connected(true),
                    Notification::Lost => sink.set_connected(false),
                }
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                clock.sleep(period);
            }
            tracing::trace!(target: "shot::scale", "notifier thread exiting cleanly");
        });

        Self {
            shutdown,
            join_handle: Some(join_handle),
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!(target: "shot::scale", "notifier thread joined"),
                Err(e) => tracing::warn!(?e, "notifier thread panicked during shutdown"),
            }
        }
    }
}

/// `ScaleLink` whose readings come from a notification feed. Commands and
/// keep-alives go to the wrapped link.
pub struct FeedLink<T: ScaleLink> {
    inner: T,
    feed: NotificationFeed,
    pending: Option<f32>,
    last_g: f32,
}

impl<T: ScaleLink> FeedLink<T> {
    pub fn new(inner: T, feed: NotificationFeed) -> Self {
        Self {
            inner,
            feed,
            pending: None,
            last_g: 0.0,
        }
    }

    pub fn stalled_for_ms(&self) -> u64 {
        self.feed.stalled_for_ms()
    }
}

impl<T: ScaleLink> ScaleLink for FeedLink<T> {
    fn is_connected(&self) -> bool {
        self.feed.is_connected() && self.inner.is_connected()
    }

    fn new_weight_available(&mut self) -> bool {
        if self.pending.is_none() {
            self.pending = self.feed.try_recv();
        }
        self.pending.is_some()
    }

    fn weight(&mut self) -> f32 {
        if let Some(w) = self.pending.take().or_else(|| self.feed.try_recv()) {
            self.last_g = w;
        }
        self.last_g
    }

    fn tare(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.inner.tare()
    }

    fn reset_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.inner.reset_timer()
    }

    fn start_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.inner.start_timer()
    }

    fn stop_timer(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.inner.stop_timer()
    }

    fn heartbeat_required(&self) -> bool {
        self.inner.heartbeat_required()
    }

    fn heartbeat(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.inner.heartbeat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockLink;
    use shot_traits::{ManualClock, MonotonicClock};

    #[test]
    fn feed_link_takes_weights_from_channel() {
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(ManualClock::new());
        let (sink, feed) = notification_channel(4, clock);
        let mut link = FeedLink::new(MockLink::new(), feed);
        assert!(!link.is_connected());
        assert!(!link.new_weight_available());

        sink.deliver(1.5).unwrap();
        sink.deliver(2.5).unwrap();
        assert!(link.is_connected());
        assert!(link.new_weight_available());
        assert_eq!(link.weight(), 1.5);
        assert_eq!(link.weight(), 2.5);
        assert!(!link.new_weight_available());
        // No new reading: the last one is repeated.
        assert_eq!(link.weight(), 2.5);
    }

    #[test]
    fn full_channel_drops_reading() {
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(ManualClock::new());
        let (sink, feed) = notification_channel(1, clock);
        sink.deliver(1.0).unwrap();
        assert_eq!(sink.deliver(2.0), Err(DeliverError::Full));
        drop(feed);
        assert_eq!(sink.deliver(3.0), Err(DeliverError::Closed));
    }

    #[test]
    fn stall_is_measured_from_last_delivery() {
        let manual = ManualClock::new();
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(manual.clone());
        let (sink, feed) = notification_channel(8, clock);
        manual.advance_ms(100);
        sink.deliver(1.0).unwrap();
        manual.advance_ms(250);
        assert_eq!(feed.stalled_for_ms(), 250);
    }

    #[test]
    fn notifier_thread_delivers_and_joins_on_drop() {
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
        let (sink, feed) = notification_channel(64, Arc::clone(&clock));
        let mut n = 0.0f32;
        let notifier = Notifier::spawn(
            move || {
                n += 1.0;
                Notification::Weight(n)
            },
            200,
            clock,
            sink,
        );
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut got = Vec::new();
        while got.len() < 3 && Instant::now() < deadline {
            if let Some(w) = feed.try_recv() {
                got.push(w);
            } else {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        drop(notifier);
        assert_eq!(got, vec![1.0, 2.0, 3.0]);
        assert!(feed.is_connected());
    }

    #[test]
    fn lost_notification_clears_connection() {
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
        let (sink, feed) = notification_channel(4, Arc::clone(&clock));
        sink.set_connected(true);
        let notifier = Notifier::spawn(|| Notification::Lost, 500, clock, sink);
        let deadline = Instant::now() + Duration::from_secs(2);
        while feed.is_connected() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        drop(notifier);
        assert!(!feed.is_connected());
    }
}
