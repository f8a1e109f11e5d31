//! Collaborator contracts.
//!
//! Everything the core consumes from the surrounding service lives behind
//! these traits: persistence is in [`crate::attendance::EventStore`], the
//! rest is here. All of them are deliberately narrow so tests can substitute
//! in-memory fakes.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geo::{Geofence, PositionSample};

/// Preferred delivery channel for a notification. A hint, not a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelHint {
    Push,
    Email,
    Any,
}

/// One-way notification dispatch. The core never awaits or retries this;
/// a failure is logged and the next qualifying evaluation gets another
/// chance to alert.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        targets: &[String],
        title: &str,
        body: &str,
        hint: ChannelHint,
    ) -> Result<(), CoreError>;
}

/// Directory of workers to iterate during sweeps, plus the supervisory
/// recipients for manager-facing escalations.
pub trait WorkerDirectory: Send + Sync {
    fn active_workers(&self) -> Vec<String>;
    fn supervisors(&self) -> Vec<String>;
}

/// Read-only geofence lookup, one fence per organization.
pub trait GeofenceProvider: Send + Sync {
    fn geofence_for(&self, company_id: &str) -> Option<Geofence>;
}

/// Coarse device class buckets used by the sampling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Standard,
    LowEnd,
}

/// Battery and hardware state reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Battery percentage, 0-100.
    pub battery_pct: u8,
    pub device_class: DeviceClass,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            battery_pct: 100,
            device_class: DeviceClass::Standard,
        }
    }
}

/// Client-side resource state lookup.
pub trait DeviceStateProvider: Send + Sync {
    fn device_state(&self) -> DeviceState;
}

/// Blocking position acquisition from the platform location stack.
/// Invoked from the sampling task through `spawn_blocking` under a
/// bounded timeout.
pub trait PositionSource: Send + Sync {
    fn acquire(&self) -> Result<PositionSample, CoreError>;
}
