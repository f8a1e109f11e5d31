//! Attendance tracking.
//!
//! The attendance status of a worker is never stored: it is a projection of
//! the most recent event in an append-only log. This module defines the
//! event and action vocabulary plus the projection; the validated state
//! machine lives in [`machine`].

mod machine;

pub use machine::{AttendanceMachine, EventStore, MachineLimits, MemoryEventStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::PositionSample;

/// The kind of break a worker is taking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakKind {
    Meal,
    Personal,
}

impl std::fmt::Display for BreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakKind::Meal => write!(f, "meal"),
            BreakKind::Personal => write!(f, "personal"),
        }
    }
}

/// An action a worker (or an administrator, for trips) submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttendanceAction {
    ClockIn,
    ClockOut,
    BreakStart { kind: BreakKind },
    BreakEnd { kind: BreakKind },
    TripStart,
    TripEnd,
}

impl std::fmt::Display for AttendanceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttendanceAction::ClockIn => write!(f, "clock-in"),
            AttendanceAction::ClockOut => write!(f, "clock-out"),
            AttendanceAction::BreakStart { kind } => write!(f, "break-start({kind})"),
            AttendanceAction::BreakEnd { kind } => write!(f, "break-end({kind})"),
            AttendanceAction::TripStart => write!(f, "trip-start"),
            AttendanceAction::TripEnd => write!(f, "trip-end"),
        }
    }
}

/// The recorded form of a validated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttendanceEventKind {
    ClockIn,
    ClockOut,
    BreakStart { kind: BreakKind },
    BreakEnd { kind: BreakKind },
    TripStart,
    TripEnd,
}

/// An append-only attendance record. Created only by the state machine in
/// response to a validated action; never mutated afterwards (corrections are
/// separate amendment records handled by an external workflow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: Uuid,
    pub user_id: String,
    pub kind: AttendanceEventKind,
    pub occurred_at: DateTime<Utc>,
    pub position: PositionSample,
    /// Whether the site credential was presented and matched on creation.
    pub verified_by_site: bool,
}

/// Derived worker status. Always computed from the latest event, never
/// persisted, so it cannot drift from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttendanceStatus {
    ClockedOut,
    ClockedIn,
    OnBreak { kind: BreakKind },
    OnBusinessTrip,
}

impl AttendanceStatus {
    /// Project the status from the most recent event, if any.
    ///
    /// `ClockIn`, `BreakEnd` and `TripEnd` all resolve to the present state;
    /// `BreakStart`/`TripStart` resolve to their away state. A worker with no
    /// events yet is clocked out.
    pub fn project(latest: Option<&AttendanceEvent>) -> Self {
        match latest.map(|e| e.kind) {
            None => AttendanceStatus::ClockedOut,
            Some(AttendanceEventKind::ClockIn)
            | Some(AttendanceEventKind::BreakEnd { .. })
            | Some(AttendanceEventKind::TripEnd) => AttendanceStatus::ClockedIn,
            Some(AttendanceEventKind::ClockOut) => AttendanceStatus::ClockedOut,
            Some(AttendanceEventKind::BreakStart { kind }) => AttendanceStatus::OnBreak { kind },
            Some(AttendanceEventKind::TripStart) => AttendanceStatus::OnBusinessTrip,
        }
    }

    /// Whether this status implies the worker should be on site, i.e. the
    /// geofence is evaluated for incoming samples.
    pub fn expects_on_site(&self) -> bool {
        matches!(self, AttendanceStatus::ClockedIn)
    }

    /// Whether the worker is in any present-or-away working state, as opposed
    /// to clocked out entirely.
    pub fn is_working(&self) -> bool {
        !matches!(self, AttendanceStatus::ClockedOut)
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttendanceStatus::ClockedOut => write!(f, "clocked-out"),
            AttendanceStatus::ClockedIn => write!(f, "clocked-in"),
            AttendanceStatus::OnBreak { kind } => write!(f, "on-break({kind})"),
            AttendanceStatus::OnBusinessTrip => write!(f, "on-business-trip"),
        }
    }
}
