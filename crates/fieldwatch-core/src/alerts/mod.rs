//! Violation tracking and alert deduplication.
//!
//! Open violation conditions and alert cooldowns are the only mutable
//! shared state in the system. Both live behind store traits keyed by
//! (user, kind) so tests can substitute in-memory fakes and deployments
//! can back them with a transactional row; the bundled implementations
//! are mutex-protected maps with check-and-set semantics.

mod engine;

pub use engine::{AlertEngine, AlertThresholds, SignalOutcome};

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The kinds of policy breach the system tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    OutsideGeofence,
    ExtendedBreak,
    MissingClockOut,
    PositioningDisabled,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::OutsideGeofence => write!(f, "outside-geofence"),
            ViolationKind::ExtendedBreak => write!(f, "extended-break"),
            ViolationKind::MissingClockOut => write!(f, "missing-clock-out"),
            ViolationKind::PositioningDisabled => write!(f, "positioning-disabled"),
        }
    }
}

/// One detection of a policy breach, as produced by the geofence check,
/// the sweeps, or the client permission report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationSignal {
    pub user_id: String,
    pub kind: ViolationKind,
    pub detected_at: DateTime<Utc>,
    /// Distance from the fence center, for geofence breaches.
    pub distance_m: Option<f64>,
    /// When the underlying episode began (break start, clock-in), used for
    /// elapsed-time escalation thresholds.
    pub onset_at: Option<DateTime<Utc>>,
}

/// An open, tracked instance of a policy breach, spanning first detection
/// to resolution. At most one open condition exists per (user, kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationCondition {
    pub user_id: String,
    pub kind: ViolationKind,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
    pub distance_m: Option<f64>,
}

/// Result of recording a signal against the condition store.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionUpdate {
    pub condition: ViolationCondition,
    /// True when no condition was open for this (user, kind) yet.
    pub newly_opened: bool,
}

/// Who an alert is addressed to. Worker-facing and manager-facing alerts
/// run on independent cooldown ladders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Worker,
    Manager,
}

/// Keyed store of open violation conditions.
pub trait ConditionStore: Send + Sync {
    /// Open a condition for (user, kind), or refresh `last_observed_at`
    /// (and distance) on the already-open one.
    fn open_or_refresh(&self, signal: &ViolationSignal) -> ConditionUpdate;

    /// Close the open condition, returning it if one existed.
    fn close(&self, user_id: &str, kind: ViolationKind) -> Option<ViolationCondition>;

    fn get(&self, user_id: &str, kind: ViolationKind) -> Option<ViolationCondition>;
}

/// Keyed store of alert suppression windows.
pub trait CooldownStore: Send + Sync {
    /// Atomically check and arm the cooldown for (user, kind, audience).
    /// Returns true when no unexpired entry existed -- the caller may emit
    /// exactly one alert. Returns false while suppressed.
    fn try_arm(
        &self,
        user_id: &str,
        kind: ViolationKind,
        audience: Audience,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> bool;

    /// Drop entries for (user, kind) across all audiences, so a future
    /// occurrence alerts immediately instead of waiting out a stale window.
    fn clear(&self, user_id: &str, kind: ViolationKind);

    /// Garbage-collect entries whose window elapsed.
    fn purge_expired(&self, now: DateTime<Utc>);
}

/// Mutex-protected map implementation of [`ConditionStore`].
#[derive(Default)]
pub struct MemoryConditionStore {
    open: Mutex<HashMap<(String, ViolationKind), ViolationCondition>>,
}

impl MemoryConditionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConditionStore for MemoryConditionStore {
    fn open_or_refresh(&self, signal: &ViolationSignal) -> ConditionUpdate {
        let mut open = self.open.lock().unwrap();
        let key = (signal.user_id.clone(), signal.kind);
        match open.get_mut(&key) {
            Some(existing) => {
                existing.last_observed_at = signal.detected_at;
                if signal.distance_m.is_some() {
                    existing.distance_m = signal.distance_m;
                }
                ConditionUpdate {
                    condition: existing.clone(),
                    newly_opened: false,
                }
            }
            None => {
                let condition = ViolationCondition {
                    user_id: signal.user_id.clone(),
                    kind: signal.kind,
                    first_observed_at: signal.onset_at.unwrap_or(signal.detected_at),
                    last_observed_at: signal.detected_at,
                    distance_m: signal.distance_m,
                };
                open.insert(key, condition.clone());
                ConditionUpdate {
                    condition,
                    newly_opened: true,
                }
            }
        }
    }

    fn close(&self, user_id: &str, kind: ViolationKind) -> Option<ViolationCondition> {
        let mut open = self.open.lock().unwrap();
        open.remove(&(user_id.to_string(), kind))
    }

    fn get(&self, user_id: &str, kind: ViolationKind) -> Option<ViolationCondition> {
        let open = self.open.lock().unwrap();
        open.get(&(user_id.to_string(), kind)).cloned()
    }
}

/// Mutex-protected map implementation of [`CooldownStore`].
#[derive(Default)]
pub struct MemoryCooldownStore {
    entries: Mutex<HashMap<(String, ViolationKind, Audience), DateTime<Utc>>>,
}

impl MemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CooldownStore for MemoryCooldownStore {
    fn try_arm(
        &self,
        user_id: &str,
        kind: ViolationKind,
        audience: Audience,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let key = (user_id.to_string(), kind, audience);
        if let Some(suppress_until) = entries.get(&key) {
            if *suppress_until > now {
                return false;
            }
        }
        entries.insert(key, now + cooldown);
        true
    }

    fn clear(&self, user_id: &str, kind: ViolationKind) {
        let mut entries = self.entries.lock().unwrap();
        for audience in [Audience::Worker, Audience::Manager] {
            entries.remove(&(user_id.to_string(), kind, audience));
        }
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, suppress_until| *suppress_until > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(user: &str, at: DateTime<Utc>) -> ViolationSignal {
        ViolationSignal {
            user_id: user.to_string(),
            kind: ViolationKind::OutsideGeofence,
            detected_at: at,
            distance_m: Some(250.0),
            onset_at: None,
        }
    }

    #[test]
    fn open_then_refresh_keeps_first_observed() {
        let store = MemoryConditionStore::new();
        let t0 = Utc::now();
        let first = store.open_or_refresh(&signal("w1", t0));
        assert!(first.newly_opened);

        let t1 = t0 + Duration::minutes(2);
        let second = store.open_or_refresh(&signal("w1", t1));
        assert!(!second.newly_opened);
        assert_eq!(second.condition.first_observed_at, t0);
        assert_eq!(second.condition.last_observed_at, t1);
    }

    #[test]
    fn close_removes_the_open_condition() {
        let store = MemoryConditionStore::new();
        store.open_or_refresh(&signal("w1", Utc::now()));
        assert!(store.close("w1", ViolationKind::OutsideGeofence).is_some());
        assert!(store.get("w1", ViolationKind::OutsideGeofence).is_none());
        assert!(store.close("w1", ViolationKind::OutsideGeofence).is_none());
    }

    #[test]
    fn cooldown_arms_once_per_window() {
        let store = MemoryCooldownStore::new();
        let now = Utc::now();
        let window = Duration::minutes(10);
        assert!(store.try_arm("w1", ViolationKind::OutsideGeofence, Audience::Worker, now, window));
        assert!(!store.try_arm(
            "w1",
            ViolationKind::OutsideGeofence,
            Audience::Worker,
            now + Duration::minutes(2),
            window
        ));
        // After the window elapses the next signal arms again.
        assert!(store.try_arm(
            "w1",
            ViolationKind::OutsideGeofence,
            Audience::Worker,
            now + Duration::minutes(11),
            window
        ));
    }

    #[test]
    fn audiences_are_keyed_separately() {
        let store = MemoryCooldownStore::new();
        let now = Utc::now();
        let window = Duration::minutes(10);
        assert!(store.try_arm("w1", ViolationKind::ExtendedBreak, Audience::Worker, now, window));
        assert!(store.try_arm("w1", ViolationKind::ExtendedBreak, Audience::Manager, now, window));
    }

    #[test]
    fn clear_drops_both_audiences() {
        let store = MemoryCooldownStore::new();
        let now = Utc::now();
        let window = Duration::minutes(10);
        store.try_arm("w1", ViolationKind::ExtendedBreak, Audience::Worker, now, window);
        store.try_arm("w1", ViolationKind::ExtendedBreak, Audience::Manager, now, window);
        store.clear("w1", ViolationKind::ExtendedBreak);
        assert!(store.try_arm("w1", ViolationKind::ExtendedBreak, Audience::Worker, now, window));
        assert!(store.try_arm("w1", ViolationKind::ExtendedBreak, Audience::Manager, now, window));
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let store = MemoryCooldownStore::new();
        let now = Utc::now();
        store.try_arm("w1", ViolationKind::OutsideGeofence, Audience::Worker, now, Duration::minutes(1));
        store.try_arm("w2", ViolationKind::OutsideGeofence, Audience::Worker, now, Duration::minutes(30));
        store.purge_expired(now + Duration::minutes(5));
        // w1 expired, w2 still suppressed.
        assert!(store.try_arm("w1", ViolationKind::OutsideGeofence, Audience::Worker, now + Duration::minutes(5), Duration::minutes(1)));
        assert!(!store.try_arm("w2", ViolationKind::OutsideGeofence, Audience::Worker, now + Duration::minutes(5), Duration::minutes(1)));
    }
}
