//! Core error types for fieldwatch-core.
//!
//! This module defines the error hierarchy using thiserror. Validation
//! errors are returned synchronously to the caller and never retried;
//! notification delivery errors are swallowed at the dispatch boundary.

use std::path::PathBuf;
use thiserror::Error;

use crate::attendance::{AttendanceAction, AttendanceStatus};

/// Core error type for fieldwatch-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Geometry validation errors
    #[error("Geometry error: {0}")]
    Geo(#[from] GeoError),

    /// Attendance transition and precondition errors
    #[error("Attendance error: {0}")]
    Attendance(#[from] AttendanceError),

    /// Event-log and configuration storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Notification delivery failure. Logged and swallowed at the
    /// dispatch boundary; never surfaced to the worker.
    #[error("Notification delivery failed via '{channel}': {message}")]
    Notification { channel: String, message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Geometry-specific errors.
#[derive(Error, Debug)]
pub enum GeoError {
    /// Latitude/longitude out of range or not finite.
    #[error("Invalid coordinate: lat {latitude_deg}, lon {longitude_deg}")]
    InvalidCoordinate {
        latitude_deg: f64,
        longitude_deg: f64,
    },

    /// Non-positive accuracy or radius.
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Attendance-specific errors. All of these are user-correctable and
/// surfaced verbatim to the caller.
#[derive(Error, Debug)]
pub enum AttendanceError {
    /// The attempted action is not valid from the current status.
    #[error("Invalid transition: cannot apply {action} while {from}")]
    InvalidTransition {
        from: AttendanceStatus,
        action: AttendanceAction,
    },

    /// Site credential did not match the organization.
    #[error("Invalid site credential")]
    InvalidCredential,

    /// Position accuracy exceeded the configured ceiling; the sample
    /// was rejected and the caller should retry acquisition.
    #[error("Position accuracy {accuracy_m}m exceeds ceiling {ceiling_m}m")]
    LowAccuracyPosition { accuracy_m: f64, ceiling_m: f64 },

    /// Clock-in attempted from outside the geofence.
    #[error("Position is {distance_m:.0}m from the site center, outside the geofence")]
    OutsideGeofence { distance_m: f64 },

    /// No geofence is configured for the organization.
    #[error("No geofence configured for company '{company_id}'")]
    MissingGeofence { company_id: String },
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Configuration load/save failed
    #[error("Configuration error at {path}: {message}")]
    Config { path: PathBuf, message: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::QueryFailed(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
