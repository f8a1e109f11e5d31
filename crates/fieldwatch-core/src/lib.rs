//! # Fieldwatch Core Library
//!
//! Core business logic for worksite attendance monitoring. All operations
//! are available through this library and the standalone CLI binary; server
//! surfaces are thin layers over the same core.
//!
//! ## Architecture
//!
//! - **Attendance**: An append-only event log with a validated state machine;
//!   worker status is always a projection of the most recent event
//! - **Geo**: Great-circle distance and geofence containment with a jitter buffer
//! - **Alerts**: Violation deduplication with cooldown windows and supervisor
//!   escalation
//! - **Sampling**: Adaptive position-sampling policy derived from status,
//!   boundary proximity and device state, plus the background sampling task
//! - **Monitor**: The facade wiring the above together, including the
//!   periodic server-side sweeps
//! - **Storage**: SQLite event log and TOML configuration
//!
//! ## Key Components
//!
//! - [`Monitor`]: Facade for action/position submission, queries and sweeps
//! - [`AttendanceMachine`]: Validated attendance state machine
//! - [`AlertEngine`]: Alert deduplication and escalation
//! - [`Database`]: Event log persistence
//! - [`MonitorConfig`]: Site and policy configuration

pub mod alerts;
pub mod attendance;
pub mod error;
pub mod geo;
pub mod monitor;
pub mod ports;
pub mod sampling;
pub mod storage;

pub use alerts::{AlertEngine, AlertThresholds, ViolationKind, ViolationSignal};
pub use attendance::{
    AttendanceAction, AttendanceEvent, AttendanceMachine, AttendanceStatus, BreakKind, EventStore,
    MachineLimits,
};
pub use error::{AttendanceError, CoreError, GeoError, StorageError};
pub use geo::{Coordinate, Geofence, PositionSample};
pub use monitor::{Monitor, MonitorParts, MonitorSettings, SweepReport};
pub use sampling::{SamplerHandle, SamplerOptions, SamplingPolicy};
pub use storage::{Database, MonitorConfig};
