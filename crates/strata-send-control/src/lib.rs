//! # strata-send-control
//!
//! Send-side transport controller for Strata RTP sessions.
//!
//! Sits between the media pipeline and the socket and decides when and at
//! what rate packets may leave. A [`TransportController`] drives a pacer and
//! a bandwidth estimator on a background worker, resets the estimate when a
//! transport's network route changes, and merges SDP bitrate constraints with
//! client preferences into one estimator configuration.
//!
//! ## Crate structure
//!
//! - [`controller`]: The orchestrator and its public API
//! - [`bitrate`]: Constraint merging with change detection
//! - [`route`]: Per-transport route tracking
//! - [`worker`]: Periodic module worker thread
//! - [`pacer`]: Pacer contract and the interval-budget pacer
//! - [`estimator`]: Estimator contract and the loss-based estimator
//! - [`router`]: SSRC dispatch to RTP send modules
//! - [`observer`]: Observer traits and non-owning observer sets
//! - [`packet`]: Packet and feedback records
//! - [`event_log`]: Structured event sink
//! - [`config`]: TOML configuration
//! - [`error`]: Error types

pub mod bitrate;
pub mod config;
pub mod controller;
pub mod error;
pub mod estimator;
pub mod event_log;
pub mod observer;
pub mod pacer;
pub mod packet;
pub mod route;
pub mod router;
pub mod worker;

pub use bitrate::{BitrateConfigurator, BitrateConstraints, BitrateConstraintsMask, BitrateUpdate};
pub use config::{ControllerConfig, KeepAliveConfig};
pub use controller::TransportController;
pub use error::{ConfigError, ControllerError, WorkerError};
pub use estimator::{BandwidthEstimator, NetworkState, SendSideEstimator};
pub use event_log::{EventLog, JsonEventLog, NullEventLog, RtcEvent};
pub use pacer::{BudgetPacer, Pacer, PacerSettings, RtpPacketSender};
pub use route::{NetworkRoute, RouteObservation, RouteTable};
pub use router::{PacketRouter, RtpSendModule};
pub use worker::{Module, ProcessWorker, WorkerConfig};
