//! The monitoring facade.
//!
//! Wires the state machine, geofence evaluator, alert engine and sampling
//! policy together and exposes the operations the surrounding service
//! calls: action submission, position submission, status and policy
//! queries, and the periodic server-side sweeps.
//!
//! ## Sweeps
//!
//! The missing-clock-out and long-break checks run as independent passes
//! over the active-worker set. A pass of a given kind never overlaps with
//! itself (a second invocation while one is running skips), and each
//! worker is checked under a bounded timeout so one slow lookup cannot
//! stall the whole pass; a timed-out worker is logged and treated as "no
//! signal this cycle".

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::{AlertEngine, AlertThresholds, ConditionStore, CooldownStore, ViolationKind, ViolationSignal};
use crate::attendance::{
    AttendanceAction, AttendanceEvent, AttendanceEventKind, AttendanceMachine, AttendanceStatus,
    EventStore, MachineLimits,
};
use crate::error::{AttendanceError, CoreError, Result, StorageError};
use crate::geo::{Geofence, PositionSample};
use crate::ports::{DeviceStateProvider, GeofenceProvider, Notifier, PositionSource, WorkerDirectory};
use crate::sampling::{spawn_sampler, SamplerHandle, SamplerOptions, SamplingPolicy};

/// Monitor-level tunables not owned by the machine or the alert engine.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// The organization whose geofence applies to all monitored workers.
    pub company_id: String,
    /// Worker is flagged when clocked in longer than this without clocking out.
    pub missing_clock_out_after: Duration,
    /// Break duration that first qualifies as extended.
    pub extended_break_after: Duration,
    /// Per-worker budget inside a sweep pass.
    pub sweep_worker_timeout: std::time::Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            company_id: "default".to_string(),
            missing_clock_out_after: Duration::hours(12),
            extended_break_after: Duration::minutes(65),
            sweep_worker_timeout: std::time::Duration::from_secs(2),
        }
    }
}

/// Everything a [`Monitor`] is built from. Stores and collaborators are
/// injected so tests can substitute in-memory fakes.
pub struct MonitorParts {
    pub events: Arc<dyn EventStore>,
    pub conditions: Arc<dyn ConditionStore>,
    pub cooldowns: Arc<dyn CooldownStore>,
    pub fences: Arc<dyn GeofenceProvider>,
    pub directory: Arc<dyn WorkerDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub device: Arc<dyn DeviceStateProvider>,
    pub limits: MachineLimits,
    pub thresholds: AlertThresholds,
    pub settings: MonitorSettings,
}

/// Outcome counters for one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStats {
    pub checked: usize,
    pub signaled: usize,
    pub timed_out: usize,
    /// True when the pass was skipped because the previous one of the same
    /// kind had not finished.
    pub skipped: bool,
}

/// Combined result of one `run_periodic_sweeps` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub missing_clock_out: SweepStats,
    pub extended_break: SweepStats,
}

/// The monitoring facade.
pub struct Monitor {
    machine: AttendanceMachine,
    engine: AlertEngine,
    events: Arc<dyn EventStore>,
    fences: Arc<dyn GeofenceProvider>,
    directory: Arc<dyn WorkerDirectory>,
    device: Arc<dyn DeviceStateProvider>,
    settings: MonitorSettings,
    /// Signed distance to the fence boundary per worker, from the last
    /// accepted sample. Feeds the boundary-tightening policy rule.
    boundary_distance: Mutex<HashMap<String, f64>>,
    /// Running client-side sampling tasks, one per worker.
    samplers: Mutex<HashMap<String, SamplerHandle>>,
    missing_sweep_gate: tokio::sync::Mutex<()>,
    break_sweep_gate: tokio::sync::Mutex<()>,
}

impl Monitor {
    pub fn new(parts: MonitorParts) -> Self {
        let machine = AttendanceMachine::new(Arc::clone(&parts.events), parts.limits);
        let engine = AlertEngine::new(
            parts.conditions,
            parts.cooldowns,
            parts.notifier,
            Arc::clone(&parts.directory),
            parts.thresholds,
        );
        Self {
            machine,
            engine,
            events: parts.events,
            fences: parts.fences,
            directory: parts.directory,
            device: parts.device,
            settings: parts.settings,
            boundary_distance: Mutex::new(HashMap::new()),
            samplers: Mutex::new(HashMap::new()),
            missing_sweep_gate: tokio::sync::Mutex::new(()),
            break_sweep_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    fn fence(&self) -> Option<Geofence> {
        self.fences.geofence_for(&self.settings.company_id)
    }

    /// Validate and apply an attendance action for a worker.
    pub fn submit_action(
        &self,
        user_id: &str,
        action: AttendanceAction,
        position: PositionSample,
        credential: Option<&str>,
    ) -> Result<AttendanceEvent> {
        let fence = self.fence();
        if action == AttendanceAction::ClockIn && fence.is_none() {
            return Err(AttendanceError::MissingGeofence {
                company_id: self.settings.company_id.clone(),
            }
            .into());
        }

        let event = self
            .machine
            .submit(user_id, action, position, credential, fence.as_ref())?;

        if let Some(fence) = fence {
            self.remember_boundary_distance(user_id, &fence, &position);
        }

        match event.kind {
            AttendanceEventKind::ClockOut => {
                // Clock-out supersedes every open condition and stops
                // background tracking.
                self.engine.resolve_all(user_id);
                self.stop_sampling(user_id);
                self.boundary_distance.lock().unwrap().remove(user_id);
            }
            AttendanceEventKind::BreakEnd { .. } => {
                self.engine.resolve(user_id, ViolationKind::ExtendedBreak);
            }
            _ => {}
        }

        Ok(event)
    }

    /// Feed one position sample through the geofence pipeline.
    ///
    /// Returns nothing: effects are asynchronous (violation signals, policy
    /// changes). A sample above the accuracy ceiling affects neither status
    /// nor violation state.
    pub fn submit_position(&self, user_id: &str, sample: PositionSample) -> Result<()> {
        let ceiling = self.machine.limits().accuracy_ceiling_m;
        if sample.accuracy_m > ceiling {
            tracing::debug!(
                user_id,
                accuracy_m = sample.accuracy_m,
                ceiling_m = ceiling,
                "discarding low-confidence sample"
            );
            return Ok(());
        }

        let Some(fence) = self.fence() else {
            return Ok(());
        };
        self.remember_boundary_distance(user_id, &fence, &sample);

        let status = self.machine.current_status(user_id)?;
        if !status.expects_on_site() {
            return Ok(());
        }

        let buffer = self.machine.limits().fence_buffer_m;
        if fence.contains(&sample.coordinate, buffer) {
            self.engine.resolve(user_id, ViolationKind::OutsideGeofence);
        } else {
            let distance = fence.distance_from_center_m(&sample.coordinate);
            self.engine.signal(&ViolationSignal {
                user_id: user_id.to_string(),
                kind: ViolationKind::OutsideGeofence,
                detected_at: sample.captured_at,
                distance_m: Some(distance),
                onset_at: None,
            });
        }
        Ok(())
    }

    /// The client reports location permission gained or lost.
    pub fn report_positioning_state(&self, user_id: &str, enabled: bool) -> Result<()> {
        let status = self.machine.current_status(user_id)?;
        if enabled {
            self.engine
                .resolve(user_id, ViolationKind::PositioningDisabled);
            return Ok(());
        }
        if status.is_working() {
            self.engine.signal(&ViolationSignal {
                user_id: user_id.to_string(),
                kind: ViolationKind::PositioningDisabled,
                detected_at: Utc::now(),
                distance_m: None,
                onset_at: None,
            });
        }
        // Without permission the sampling task has nothing to poll.
        self.stop_sampling(user_id);
        Ok(())
    }

    pub fn current_status(&self, user_id: &str) -> Result<AttendanceStatus> {
        self.machine.current_status(user_id)
    }

    /// Re-derive the sampling policy from current inputs. Stateless: safe
    /// to call on every status or resource change.
    pub fn current_sampling_policy(&self, user_id: &str) -> Result<SamplingPolicy> {
        let status = self.machine.current_status(user_id)?;
        let boundary = self
            .boundary_distance
            .lock()
            .unwrap()
            .get(user_id)
            .copied();
        let device = self.device.device_state();
        Ok(SamplingPolicy::derive(status, boundary, &device))
    }

    /// Start (or restart) the background sampling task for a worker.
    pub fn start_sampling(
        self: &Arc<Self>,
        user_id: &str,
        source: Arc<dyn PositionSource>,
        options: SamplerOptions,
    ) {
        let handle = spawn_sampler(Arc::clone(self), user_id.to_string(), source, options);
        let mut samplers = self.samplers.lock().unwrap();
        if let Some(previous) = samplers.insert(user_id.to_string(), handle) {
            previous.cancel();
        }
    }

    /// Cancel the worker's sampling task, if one is running. An in-flight
    /// position request completing afterwards is discarded by the task.
    pub fn stop_sampling(&self, user_id: &str) {
        let mut samplers = self.samplers.lock().unwrap();
        if let Some(handle) = samplers.remove(user_id) {
            handle.cancel();
            tracing::debug!(user_id, "sampling task cancelled");
        }
    }

    /// Run the server-side sweeps once. Idempotent per invocation: repeat
    /// detections within a cooldown window emit nothing new.
    pub async fn run_periodic_sweeps(&self) -> SweepReport {
        self.engine.gc(Utc::now());
        let missing_clock_out = self.missing_clock_out_sweep().await;
        let extended_break = self.extended_break_sweep().await;
        SweepReport {
            missing_clock_out,
            extended_break,
        }
    }

    async fn missing_clock_out_sweep(&self) -> SweepStats {
        let Ok(_gate) = self.missing_sweep_gate.try_lock() else {
            tracing::debug!("missing-clock-out sweep already running, skipping");
            return SweepStats {
                skipped: true,
                ..SweepStats::default()
            };
        };

        let threshold = self.settings.missing_clock_out_after;
        let mut stats = SweepStats::default();
        for user_id in self.directory.active_workers() {
            stats.checked += 1;
            let events = Arc::clone(&self.events);
            let user = user_id.clone();
            let check = move || missing_clock_out_check(events.as_ref(), &user, threshold, Utc::now());
            match self.run_worker_check(&user_id, check).await {
                Some(Some(signal)) => {
                    self.engine.signal(&signal);
                    stats.signaled += 1;
                }
                Some(None) => {}
                None => stats.timed_out += 1,
            }
        }
        stats
    }

    async fn extended_break_sweep(&self) -> SweepStats {
        let Ok(_gate) = self.break_sweep_gate.try_lock() else {
            tracing::debug!("extended-break sweep already running, skipping");
            return SweepStats {
                skipped: true,
                ..SweepStats::default()
            };
        };

        let threshold = self.settings.extended_break_after;
        let mut stats = SweepStats::default();
        for user_id in self.directory.active_workers() {
            stats.checked += 1;
            let events = Arc::clone(&self.events);
            let user = user_id.clone();
            let check = move || extended_break_check(events.as_ref(), &user, threshold, Utc::now());
            match self.run_worker_check(&user_id, check).await {
                Some(Some(signal)) => {
                    self.engine.signal(&signal);
                    stats.signaled += 1;
                }
                Some(None) => {}
                None => stats.timed_out += 1,
            }
        }
        stats
    }

    /// Run one per-worker check off the async runtime under the sweep
    /// timeout. `None` means no signal this cycle (timeout or error); a
    /// single worker's bad data never aborts the pass.
    async fn run_worker_check<F>(&self, user_id: &str, check: F) -> Option<Option<ViolationSignal>>
    where
        F: FnOnce() -> Result<Option<ViolationSignal>, StorageError> + Send + 'static,
    {
        let outcome = tokio::time::timeout(
            self.settings.sweep_worker_timeout,
            tokio::task::spawn_blocking(check),
        )
        .await;
        match outcome {
            Ok(Ok(Ok(signal))) => Some(signal),
            Ok(Ok(Err(err))) => {
                tracing::warn!(user_id, %err, "sweep check failed for worker");
                Some(None)
            }
            Ok(Err(join_err)) => {
                tracing::warn!(user_id, %join_err, "sweep check panicked");
                Some(None)
            }
            Err(_) => {
                tracing::warn!(user_id, "sweep check timed out");
                None
            }
        }
    }

    fn remember_boundary_distance(
        &self,
        user_id: &str,
        fence: &Geofence,
        sample: &PositionSample,
    ) {
        let d = fence.distance_to_boundary_m(&sample.coordinate);
        self.boundary_distance
            .lock()
            .unwrap()
            .insert(user_id.to_string(), d);
    }
}

/// Flag workers who are still on shift past the threshold since clock-in.
/// Business trips are excluded: the absence is administratively approved.
fn missing_clock_out_check(
    events: &dyn EventStore,
    user_id: &str,
    threshold: Duration,
    now: DateTime<Utc>,
) -> Result<Option<ViolationSignal>, StorageError> {
    let latest = events.most_recent_event(user_id)?;
    let status = AttendanceStatus::project(latest.as_ref());
    if !matches!(
        status,
        AttendanceStatus::ClockedIn | AttendanceStatus::OnBreak { .. }
    ) {
        return Ok(None);
    }
    let Some(clock_in) = events.last_clock_in(user_id)? else {
        return Ok(None);
    };
    if now - clock_in.occurred_at < threshold {
        return Ok(None);
    }
    Ok(Some(ViolationSignal {
        user_id: user_id.to_string(),
        kind: ViolationKind::MissingClockOut,
        detected_at: now,
        distance_m: None,
        onset_at: Some(clock_in.occurred_at),
    }))
}

/// Flag workers whose current break exceeds the first threshold. The break
/// start is the most recent event while on break.
fn extended_break_check(
    events: &dyn EventStore,
    user_id: &str,
    threshold: Duration,
    now: DateTime<Utc>,
) -> Result<Option<ViolationSignal>, StorageError> {
    let Some(latest) = events.most_recent_event(user_id)? else {
        return Ok(None);
    };
    if !matches!(latest.kind, AttendanceEventKind::BreakStart { .. }) {
        return Ok(None);
    }
    if now - latest.occurred_at < threshold {
        return Ok(None);
    }
    Ok(Some(ViolationSignal {
        user_id: user_id.to_string(),
        kind: ViolationKind::ExtendedBreak,
        detected_at: now,
        distance_m: None,
        onset_at: Some(latest.occurred_at),
    }))
}
