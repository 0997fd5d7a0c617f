#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Predictive shot-ending control (hardware-agnostic).
//!
//! The controller watches a scale while an espresso shot runs, predicts when
//! the cup will reach the goal weight and releases the brew relay at that
//! moment. All hardware goes through `shot_traits::ScaleLink`,
//! `shot_traits::OutputPin` and `shot_traits::SettingsStore`.
//!
//! ## Architecture
//!
//! - **Samples**: bounded ring buffer of `(time, weight)` pairs (`buffer`)
//! - **Prediction**: least-squares trend over the latest window (`trend`)
//! - **Calibration**: post-shot offset learning with outlier rejection (`offset`)
//! - **Relay**: idempotent output with read-back enforcement (`relay`)
//! - **Control**: tick-driven state machine (`controller`), built via `builder`
//! - **Orchestration**: run loop and threaded notification feed (`runner`, `feed`)
//!
//! Expected edge cases (too little data, flat trend, outlier shot, failed
//! start) are outcomes, not errors; see `trend::Basis`, `offset::Learned`
//! and `status::ShotEvent`.

pub mod atomic;
pub mod buffer;
pub mod builder;
pub mod config;
pub mod control;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod feed;
pub mod hw_error;
pub mod mocks;
pub mod offset;
pub mod relay;
pub mod replay;
pub mod runner;
pub mod settings;
pub mod status;
pub mod trend;
pub mod util;

pub use buffer::{Sample, SampleBuffer};
pub use builder::{DynShotController, Missing, Set, ShotBuilder, build_controller};
pub use config::*;
pub use control::{ControlCommand, ControlHandle, Phase, ShotSnapshot, SnapshotCell};
pub use controller::{ShotController, ShotState};
pub use error::{BuildError, Result, SampleRejected, ShotError};
pub use feed::{FeedLink, Notification, NotificationFeed, NotificationSink, Notifier};
pub use hw_error::map_hw_error;
pub use offset::{Learned, OffsetLearner, on_shot_settled};
pub use relay::RelayDriver;
pub use replay::{ReplayReport, replay_trace};
pub use runner::{SamplingMode, ShotReport, run, run_shot};
pub use settings::{FileSettingsStore, MemorySettings};
pub use status::{EndReason, ShotEvent, StartFailure, StartStep};
pub use trend::{Basis, Estimate, LineFit, TrendEstimator};
