//! Alert deduplication and escalation.
//!
//! Consumes violation signals, suppresses repeats within a cooldown window,
//! and escalates unresolved conditions to supervisors past a secondary
//! threshold. Delivery is fire-and-forget: a failed notification is logged
//! and the condition tracking stays intact, so the next qualifying signal
//! re-enters through the normal path.

use std::sync::Arc;

use chrono::Duration;

use crate::ports::{ChannelHint, Notifier, WorkerDirectory};

use super::{
    Audience, ConditionStore, CooldownStore, ViolationCondition, ViolationKind, ViolationSignal,
};

/// Cooldown windows and escalation thresholds.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub outside_geofence_cooldown: Duration,
    pub extended_break_cooldown: Duration,
    pub missing_clock_out_cooldown: Duration,
    pub positioning_disabled_cooldown: Duration,
    /// Break duration past which supervisors are notified.
    pub extended_break_escalation: Duration,
    /// Distance past which an outside-geofence breach escalates.
    pub outside_distance_escalation_m: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            outside_geofence_cooldown: Duration::minutes(10),
            extended_break_cooldown: Duration::minutes(65),
            missing_clock_out_cooldown: Duration::hours(12),
            positioning_disabled_cooldown: Duration::minutes(30),
            extended_break_escalation: Duration::minutes(90),
            outside_distance_escalation_m: 500.0,
        }
    }
}

impl AlertThresholds {
    fn cooldown_for(&self, kind: ViolationKind) -> Duration {
        match kind {
            ViolationKind::OutsideGeofence => self.outside_geofence_cooldown,
            ViolationKind::ExtendedBreak => self.extended_break_cooldown,
            ViolationKind::MissingClockOut => self.missing_clock_out_cooldown,
            ViolationKind::PositioningDisabled => self.positioning_disabled_cooldown,
        }
    }
}

/// What a single signal produced, for callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalOutcome {
    /// No condition was open for this (user, kind) before the signal.
    pub newly_opened: bool,
    /// A worker-facing alert was emitted (not suppressed).
    pub worker_alerted: bool,
    /// A manager-facing escalation was emitted.
    pub escalated: bool,
}

/// The deduplication and escalation engine.
pub struct AlertEngine {
    conditions: Arc<dyn ConditionStore>,
    cooldowns: Arc<dyn CooldownStore>,
    notifier: Arc<dyn Notifier>,
    directory: Arc<dyn WorkerDirectory>,
    thresholds: AlertThresholds,
}

impl AlertEngine {
    pub fn new(
        conditions: Arc<dyn ConditionStore>,
        cooldowns: Arc<dyn CooldownStore>,
        notifier: Arc<dyn Notifier>,
        directory: Arc<dyn WorkerDirectory>,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            conditions,
            cooldowns,
            notifier,
            directory,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Record a violation signal: open or refresh the condition, emit at
    /// most one worker alert per cooldown window, and escalate to
    /// supervisors past the secondary threshold.
    pub fn signal(&self, sig: &ViolationSignal) -> SignalOutcome {
        let update = self.conditions.open_or_refresh(sig);
        let cooldown = self.thresholds.cooldown_for(sig.kind);

        let worker_alerted = self.cooldowns.try_arm(
            &sig.user_id,
            sig.kind,
            Audience::Worker,
            sig.detected_at,
            cooldown,
        );
        if worker_alerted {
            let (title, body) = worker_message(sig);
            self.dispatch(std::slice::from_ref(&sig.user_id), &title, &body);
        }

        let mut escalated = false;
        if self.qualifies_for_escalation(sig, &update.condition) {
            // Bypasses the worker window but obeys its own, so supervisors
            // are not paged once per sample either.
            escalated = self.cooldowns.try_arm(
                &sig.user_id,
                sig.kind,
                Audience::Manager,
                sig.detected_at,
                cooldown,
            );
            if escalated {
                let (title, body) = manager_message(sig, &update.condition);
                let supervisors = self.directory.supervisors();
                if supervisors.is_empty() {
                    tracing::warn!(user_id = %sig.user_id, kind = %sig.kind, "escalation qualified but no supervisors configured");
                } else {
                    self.dispatch(&supervisors, &title, &body);
                }
            }
        }

        SignalOutcome {
            newly_opened: update.newly_opened,
            worker_alerted,
            escalated,
        }
    }

    /// Close the open condition and clear its cooldowns, so a future
    /// occurrence of the same kind alerts immediately.
    pub fn resolve(&self, user_id: &str, kind: ViolationKind) -> Option<ViolationCondition> {
        let closed = self.conditions.close(user_id, kind);
        if closed.is_some() {
            self.cooldowns.clear(user_id, kind);
            tracing::debug!(user_id, kind = %kind, "violation condition resolved");
        }
        closed
    }

    /// Clock-out supersedes every open condition for the worker.
    pub fn resolve_all(&self, user_id: &str) {
        for kind in [
            ViolationKind::OutsideGeofence,
            ViolationKind::ExtendedBreak,
            ViolationKind::MissingClockOut,
            ViolationKind::PositioningDisabled,
        ] {
            self.resolve(user_id, kind);
        }
    }

    pub fn open_condition(&self, user_id: &str, kind: ViolationKind) -> Option<ViolationCondition> {
        self.conditions.get(user_id, kind)
    }

    /// Garbage-collect elapsed cooldown windows.
    pub fn gc(&self, now: chrono::DateTime<chrono::Utc>) {
        self.cooldowns.purge_expired(now);
    }

    fn qualifies_for_escalation(
        &self,
        sig: &ViolationSignal,
        condition: &ViolationCondition,
    ) -> bool {
        match sig.kind {
            ViolationKind::ExtendedBreak => {
                let onset = sig.onset_at.unwrap_or(condition.first_observed_at);
                sig.detected_at - onset >= self.thresholds.extended_break_escalation
            }
            ViolationKind::OutsideGeofence => sig
                .distance_m
                .is_some_and(|d| d > self.thresholds.outside_distance_escalation_m),
            ViolationKind::MissingClockOut | ViolationKind::PositioningDisabled => false,
        }
    }

    /// Fire-and-forget dispatch. A transport failure must not block
    /// condition tracking.
    fn dispatch(&self, targets: &[String], title: &str, body: &str) {
        if let Err(err) = self.notifier.notify(targets, title, body, ChannelHint::Push) {
            tracing::warn!(%err, title, "notification delivery failed");
        }
    }
}

fn worker_message(sig: &ViolationSignal) -> (String, String) {
    match sig.kind {
        ViolationKind::OutsideGeofence => (
            "Outside work area".to_string(),
            match sig.distance_m {
                Some(d) => format!("You appear to be {d:.0} m from the site center. Please return or clock out."),
                None => "You appear to have left the work area. Please return or clock out.".to_string(),
            },
        ),
        ViolationKind::ExtendedBreak => (
            "Break running long".to_string(),
            "Your break has exceeded the allowed duration. Please end it when you are back.".to_string(),
        ),
        ViolationKind::MissingClockOut => (
            "Still clocked in".to_string(),
            "You appear to still be clocked in long after your shift. Did you forget to clock out?".to_string(),
        ),
        ViolationKind::PositioningDisabled => (
            "Location unavailable".to_string(),
            "Location permission is off while you are on shift. Please re-enable it.".to_string(),
        ),
    }
}

fn manager_message(sig: &ViolationSignal, condition: &ViolationCondition) -> (String, String) {
    let since = condition.first_observed_at.format("%H:%M UTC");
    match sig.kind {
        ViolationKind::OutsideGeofence => (
            format!("Worker {} far outside site", sig.user_id),
            format!(
                "Worker {} is {:.0} m from the site center (since {since}).",
                sig.user_id,
                sig.distance_m.unwrap_or_default()
            ),
        ),
        _ => (
            format!("Unresolved {} for {}", sig.kind, sig.user_id),
            format!(
                "Condition {} for worker {} is unresolved since {since}.",
                sig.kind, sig.user_id
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{MemoryConditionStore, MemoryCooldownStore};
    use crate::error::CoreError;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Records every dispatched notification.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(Vec<String>, String)>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn notify(
            &self,
            targets: &[String],
            title: &str,
            _body: &str,
            _hint: ChannelHint,
        ) -> Result<(), CoreError> {
            self.sent
                .lock()
                .unwrap()
                .push((targets.to_vec(), title.to_string()));
            if self.fail {
                return Err(CoreError::Notification {
                    channel: "push".to_string(),
                    message: "gateway unreachable".to_string(),
                });
            }
            Ok(())
        }
    }

    struct StaticDirectory;

    impl WorkerDirectory for StaticDirectory {
        fn active_workers(&self) -> Vec<String> {
            vec!["w1".to_string()]
        }
        fn supervisors(&self) -> Vec<String> {
            vec!["mgr1".to_string(), "mgr2".to_string()]
        }
    }

    fn engine_with(notifier: Arc<RecordingNotifier>) -> AlertEngine {
        AlertEngine::new(
            Arc::new(MemoryConditionStore::new()),
            Arc::new(MemoryCooldownStore::new()),
            notifier,
            Arc::new(StaticDirectory),
            AlertThresholds::default(),
        )
    }

    fn outside(user: &str, at: chrono::DateTime<Utc>, distance_m: f64) -> ViolationSignal {
        ViolationSignal {
            user_id: user.to_string(),
            kind: ViolationKind::OutsideGeofence,
            detected_at: at,
            distance_m: Some(distance_m),
            onset_at: None,
        }
    }

    #[test]
    fn repeated_signals_in_window_emit_one_alert() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine_with(Arc::clone(&notifier));
        let t0 = Utc::now();

        for i in 0..5 {
            let out = engine.signal(&outside("w1", t0 + Duration::minutes(i), 250.0));
            assert_eq!(out.worker_alerted, i == 0);
            assert!(!out.escalated);
        }
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn alert_fires_again_after_window_elapses() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine_with(Arc::clone(&notifier));
        let t0 = Utc::now();

        assert!(engine.signal(&outside("w1", t0, 250.0)).worker_alerted);
        assert!(!engine
            .signal(&outside("w1", t0 + Duration::minutes(9), 250.0))
            .worker_alerted);
        assert!(engine
            .signal(&outside("w1", t0 + Duration::minutes(11), 250.0))
            .worker_alerted);
    }

    #[test]
    fn resolution_clears_suppression() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine_with(Arc::clone(&notifier));
        let t0 = Utc::now();

        engine.signal(&outside("w1", t0, 250.0));
        engine.resolve("w1", ViolationKind::OutsideGeofence);

        // A new occurrence two minutes later alerts immediately.
        let out = engine.signal(&outside("w1", t0 + Duration::minutes(2), 250.0));
        assert!(out.newly_opened);
        assert!(out.worker_alerted);
    }

    #[test]
    fn distance_escalation_notifies_supervisors_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine_with(Arc::clone(&notifier));
        let t0 = Utc::now();

        let out = engine.signal(&outside("w1", t0, 700.0));
        assert!(out.worker_alerted);
        assert!(out.escalated);

        // Subsequent far samples inside the window alert neither audience.
        let out = engine.signal(&outside("w1", t0 + Duration::minutes(3), 800.0));
        assert!(!out.worker_alerted);
        assert!(!out.escalated);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, vec!["w1".to_string()]);
        assert_eq!(sent[1].0, vec!["mgr1".to_string(), "mgr2".to_string()]);
    }

    #[test]
    fn extended_break_escalates_at_secondary_threshold() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine_with(Arc::clone(&notifier));
        let break_start = Utc::now();

        // Sweep detects at minute 70: worker alert, no escalation yet.
        let sig = ViolationSignal {
            user_id: "w1".to_string(),
            kind: ViolationKind::ExtendedBreak,
            detected_at: break_start + Duration::minutes(70),
            distance_m: None,
            onset_at: Some(break_start),
        };
        let out = engine.signal(&sig);
        assert!(out.worker_alerted);
        assert!(!out.escalated);

        // At minute 90 the manager escalation fires; the worker alert does
        // not repeat (65-minute window still open).
        let sig = ViolationSignal {
            detected_at: break_start + Duration::minutes(90),
            ..sig
        };
        let out = engine.signal(&sig);
        assert!(!out.worker_alerted);
        assert!(out.escalated);

        // Another sweep pass five minutes later emits nothing new.
        let sig = ViolationSignal {
            detected_at: break_start + Duration::minutes(95),
            ..sig
        };
        let out = engine.signal(&sig);
        assert!(!out.worker_alerted);
        assert!(!out.escalated);

        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn delivery_failure_does_not_block_tracking() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let engine = engine_with(Arc::clone(&notifier));
        let t0 = Utc::now();

        let out = engine.signal(&outside("w1", t0, 250.0));
        assert!(out.worker_alerted);
        assert!(engine
            .open_condition("w1", ViolationKind::OutsideGeofence)
            .is_some());
    }

    #[test]
    fn resolve_all_closes_everything() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine_with(Arc::clone(&notifier));
        let t0 = Utc::now();

        engine.signal(&outside("w1", t0, 250.0));
        engine.signal(&ViolationSignal {
            user_id: "w1".to_string(),
            kind: ViolationKind::MissingClockOut,
            detected_at: t0,
            distance_m: None,
            onset_at: None,
        });
        engine.resolve_all("w1");
        assert!(engine.open_condition("w1", ViolationKind::OutsideGeofence).is_none());
        assert!(engine.open_condition("w1", ViolationKind::MissingClockOut).is_none());
    }
}
