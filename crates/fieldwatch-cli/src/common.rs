//! Shared wiring for CLI commands: monitor construction from the on-disk
//! config and database, plus the collaborator implementations the CLI uses.

use std::sync::Arc;

use fieldwatch_core::attendance::EventStore;
use fieldwatch_core::alerts::{MemoryConditionStore, MemoryCooldownStore};
use fieldwatch_core::error::CoreError;
use fieldwatch_core::geo::{Coordinate, Geofence, PositionSample};
use fieldwatch_core::monitor::{Monitor, MonitorParts};
use fieldwatch_core::ports::{
    ChannelHint, DeviceState, DeviceStateProvider, GeofenceProvider, Notifier, WorkerDirectory,
};
use fieldwatch_core::storage::{Database, MonitorConfig};

/// Serves the fence configured for the deployment's organization.
struct ConfigGeofence {
    company_id: String,
    fence: Geofence,
}

impl GeofenceProvider for ConfigGeofence {
    fn geofence_for(&self, company_id: &str) -> Option<Geofence> {
        (company_id == self.company_id).then_some(self.fence)
    }
}

/// Worker directory backed by the event log; supervisors come from config.
struct StoreDirectory {
    db: Arc<Database>,
    supervisors: Vec<String>,
}

impl WorkerDirectory for StoreDirectory {
    fn active_workers(&self) -> Vec<String> {
        self.db.known_user_ids().unwrap_or_default()
    }

    fn supervisors(&self) -> Vec<String> {
        self.supervisors.clone()
    }
}

/// Prints alerts to stdout. A deployment substitutes a push/email gateway.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(
        &self,
        targets: &[String],
        title: &str,
        body: &str,
        hint: ChannelHint,
    ) -> Result<(), CoreError> {
        for target in targets {
            println!("[alert:{hint:?}] {target}: {title}: {body}");
        }
        Ok(())
    }
}

struct StaticDevice {
    state: DeviceState,
}

impl DeviceStateProvider for StaticDevice {
    fn device_state(&self) -> DeviceState {
        self.state
    }
}

/// Build a monitor over the on-disk database and config.
///
/// Condition and cooldown stores are in-memory: CLI invocations are
/// short-lived, so dedup state only spans one process. The sweep command
/// is the long-lived caller and holds them for its whole run.
pub fn build_monitor(
    device: DeviceState,
) -> Result<(Arc<Monitor>, Arc<Database>), Box<dyn std::error::Error>> {
    let cfg = MonitorConfig::load()?;
    let db = Arc::new(Database::open()?);
    let fence = cfg.geofence()?;

    let monitor = Arc::new(Monitor::new(MonitorParts {
        events: Arc::clone(&db) as Arc<dyn EventStore>,
        conditions: Arc::new(MemoryConditionStore::new()),
        cooldowns: Arc::new(MemoryCooldownStore::new()),
        fences: Arc::new(ConfigGeofence {
            company_id: cfg.site.company_id.clone(),
            fence,
        }),
        directory: Arc::new(StoreDirectory {
            db: Arc::clone(&db),
            supervisors: cfg.site.supervisors.clone(),
        }),
        notifier: Arc::new(ConsoleNotifier),
        device: Arc::new(StaticDevice { state: device }),
        limits: cfg.machine_limits(),
        thresholds: cfg.alert_thresholds(),
        settings: cfg.monitor_settings(),
    }));

    Ok((monitor, db))
}

/// Build a position sample captured now from CLI coordinates.
pub fn sample(
    lat: f64,
    lon: f64,
    accuracy: f64,
) -> Result<PositionSample, Box<dyn std::error::Error>> {
    let coordinate = Coordinate::new(lat, lon)?;
    Ok(PositionSample::new(coordinate, accuracy, chrono::Utc::now())?)
}
