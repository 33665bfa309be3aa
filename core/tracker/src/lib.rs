//! # shift-tracker
//!
//! Background location-tracking coordinator for shift-bound GPS sessions.
//! Keeps a long-running sampler alive for exactly as long as an employee's
//! shift is open, and recovers when the OS kills or starves it.
//!
//! ## Design Principles
//!
//! - **Single writer**: one coordinator task owns the session and handles
//!   every input in arrival order. Nothing else mutates tracking state.
//! - **Never block ingestion**: remote calls and storage writes run beside
//!   the event loop and report back through its inbox.
//! - **Fail-open on the network**: only explicit local signals (clock-out,
//!   logout, a confirmed closed shift) stop tracking.
//! - **Injected collaborators**: the sampler, store, authority and OS hooks
//!   are traits in [`ports`], so the whole state machine runs under test.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shift_tracker::{runtime, Collaborators, TrackerConfig};
//!
//! let (handle, _task) = runtime::spawn(deps, TrackerConfig::default())?;
//! handle.start_tracking(shift, None).await?;
//! let mut view = handle.watch();
//! ```

pub mod config;
pub mod coordinator;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod gaps;
pub mod heartbeat;
pub mod midnight;
pub mod outbox;
pub mod ports;
pub mod replay;
pub mod runtime;
pub mod session;
pub mod shift_guard;
pub mod thermal;
pub mod types;
pub mod validation;
pub mod wake;
pub mod writer;

#[cfg(test)]
mod testing;

pub use config::{load_runtime_config, TrackerConfig};
pub use coordinator::{Collaborators, Coordinator, Inbound};
pub use error::{Result, TrackerError};
pub use runtime::CoordinatorHandle;
pub use session::{SessionView, TrackingSession, TrackingStatus};
pub use thermal::{ThermalLevel, ThermalMonitor};
pub use types::{GapReason, GpsGap, Shift, ShiftStatus, StopReason};
