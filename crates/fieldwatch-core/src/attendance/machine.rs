//! Validated attendance state machine.
//!
//! Transitions are validated against the projection of the most recent
//! event and appended to the log; nothing is ever coerced silently. Two
//! near-simultaneous submissions for the same worker are serialized through
//! a per-worker lock, so the second one sees the first one's event and is
//! rejected with `InvalidTransition` rather than both applying.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::error::{AttendanceError, CoreError, Result, StorageError};
use crate::geo::{Geofence, PositionSample};

use super::{
    AttendanceAction, AttendanceEvent, AttendanceEventKind, AttendanceStatus,
};

/// Persistence contract for the append-only event log.
///
/// The status projection only ever needs the single most recent event per
/// worker; `last_clock_in` exists for the missing-clock-out sweep.
pub trait EventStore: Send + Sync {
    fn most_recent_event(&self, user_id: &str) -> Result<Option<AttendanceEvent>, StorageError>;
    fn append_event(&self, event: AttendanceEvent) -> Result<AttendanceEvent, StorageError>;
    fn last_clock_in(&self, user_id: &str) -> Result<Option<AttendanceEvent>, StorageError>;
}

/// In-memory event store used by tests and short-lived clients.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<HashMap<String, Vec<AttendanceEvent>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn most_recent_event(&self, user_id: &str) -> Result<Option<AttendanceEvent>, StorageError> {
        let events = self.events.lock().unwrap();
        Ok(events.get(user_id).and_then(|log| log.last().cloned()))
    }

    fn append_event(&self, event: AttendanceEvent) -> Result<AttendanceEvent, StorageError> {
        let mut events = self.events.lock().unwrap();
        events
            .entry(event.user_id.clone())
            .or_default()
            .push(event.clone());
        Ok(event)
    }

    fn last_clock_in(&self, user_id: &str) -> Result<Option<AttendanceEvent>, StorageError> {
        let events = self.events.lock().unwrap();
        Ok(events.get(user_id).and_then(|log| {
            log.iter()
                .rev()
                .find(|e| e.kind == AttendanceEventKind::ClockIn)
                .cloned()
        }))
    }
}

/// Validation limits for incoming actions.
#[derive(Debug, Clone)]
pub struct MachineLimits {
    /// Samples less accurate than this never change status.
    pub accuracy_ceiling_m: f64,
    /// Jitter buffer applied to the clock-in containment gate.
    pub fence_buffer_m: f64,
    /// Expected site credential (e.g. the QR payload posted at the site).
    pub site_code: String,
}

impl Default for MachineLimits {
    fn default() -> Self {
        Self {
            accuracy_ceiling_m: 50.0,
            fence_buffer_m: crate::geo::DEFAULT_BUFFER_M,
            site_code: String::new(),
        }
    }
}

/// Per-worker lock registry. No global lock across workers: each key gets
/// its own mutex, created on first use.
#[derive(Default)]
struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    fn for_user(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// The attendance state machine. Holds no status itself; every decision
/// starts from the most recent event in the store.
pub struct AttendanceMachine {
    store: Arc<dyn EventStore>,
    limits: MachineLimits,
    registry: LockRegistry,
}

impl AttendanceMachine {
    pub fn new(store: Arc<dyn EventStore>, limits: MachineLimits) -> Self {
        Self {
            store,
            limits,
            registry: LockRegistry::default(),
        }
    }

    pub fn limits(&self) -> &MachineLimits {
        &self.limits
    }

    /// Project the current status from the single most recent event.
    pub fn current_status(&self, user_id: &str) -> Result<AttendanceStatus> {
        let latest = self.store.most_recent_event(user_id)?;
        Ok(AttendanceStatus::project(latest.as_ref()))
    }

    /// Validate and apply an action, appending the resulting event.
    ///
    /// `fence` is the organization's geofence, used only to gate clock-in;
    /// clock-out is permitted from any location and the distance is recorded
    /// in the event position for audit, not enforced.
    pub fn submit(
        &self,
        user_id: &str,
        action: AttendanceAction,
        position: PositionSample,
        credential: Option<&str>,
        fence: Option<&Geofence>,
    ) -> Result<AttendanceEvent> {
        if position.accuracy_m > self.limits.accuracy_ceiling_m {
            return Err(AttendanceError::LowAccuracyPosition {
                accuracy_m: position.accuracy_m,
                ceiling_m: self.limits.accuracy_ceiling_m,
            }
            .into());
        }

        let lock = self.registry.for_user(user_id);
        let _serialized = lock.lock().unwrap();

        let latest = self.store.most_recent_event(user_id)?;
        let status = AttendanceStatus::project(latest.as_ref());

        let kind = Self::validate_transition(status, action)?;

        let mut verified_by_site = false;
        if action == AttendanceAction::ClockIn {
            verified_by_site = self.check_clock_in(position, credential, fence)?;
        }

        let event = AttendanceEvent {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            occurred_at: Utc::now(),
            position,
            verified_by_site,
        };
        let stored = self.store.append_event(event)?;
        Ok(stored)
    }

    /// The transition table. Anything not listed is rejected verbatim.
    fn validate_transition(
        status: AttendanceStatus,
        action: AttendanceAction,
    ) -> Result<AttendanceEventKind, CoreError> {
        let kind = match (status, action) {
            (AttendanceStatus::ClockedOut, AttendanceAction::ClockIn) => {
                AttendanceEventKind::ClockIn
            }
            (AttendanceStatus::ClockedIn, AttendanceAction::ClockOut) => {
                AttendanceEventKind::ClockOut
            }
            (AttendanceStatus::ClockedIn, AttendanceAction::BreakStart { kind }) => {
                AttendanceEventKind::BreakStart { kind }
            }
            (AttendanceStatus::OnBreak { kind: started }, AttendanceAction::BreakEnd { kind })
                if kind == started =>
            {
                AttendanceEventKind::BreakEnd { kind }
            }
            (
                AttendanceStatus::ClockedIn
                | AttendanceStatus::OnBreak { .. }
                | AttendanceStatus::ClockedOut,
                AttendanceAction::TripStart,
            ) => AttendanceEventKind::TripStart,
            (AttendanceStatus::OnBusinessTrip, AttendanceAction::TripEnd) => {
                AttendanceEventKind::TripEnd
            }
            (from, action) => {
                return Err(AttendanceError::InvalidTransition { from, action }.into());
            }
        };
        Ok(kind)
    }

    /// Clock-in preconditions: the site credential must match and the
    /// position must be contained in the fence (plus jitter buffer).
    fn check_clock_in(
        &self,
        position: PositionSample,
        credential: Option<&str>,
        fence: Option<&Geofence>,
    ) -> Result<bool, CoreError> {
        match credential {
            Some(code) if code == self.limits.site_code => {}
            _ => return Err(AttendanceError::InvalidCredential.into()),
        }
        if let Some(fence) = fence {
            if !fence.contains(&position.coordinate, self.limits.fence_buffer_m) {
                return Err(AttendanceError::OutsideGeofence {
                    distance_m: fence.distance_from_center_m(&position.coordinate),
                }
                .into());
            }
        }
        Ok(true)
    }
}
