//! Adaptive sampling policy.
//!
//! The polling cadence trades battery life against positional accuracy.
//! [`SamplingPolicy::derive`] is a pure, stateless function of the current
//! attendance status, proximity to the fence boundary, and device resource
//! state; it is recomputed on every status or resource change and once per
//! sampling interval, never mutated in place. The cancellable background
//! task that acts on it lives in [`task`].

mod task;

pub use task::{spawn_sampler, SamplerHandle, SamplerOptions};

use serde::{Deserialize, Serialize};

use crate::attendance::AttendanceStatus;
use crate::ports::{DeviceClass, DeviceState};

/// Requested positioning accuracy class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyClass {
    High,
    Balanced,
    Low,
}

/// The parameters governing how often position is reacquired.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingPolicy {
    pub accuracy_class: AccuracyClass,
    pub min_interval_ms: u64,
    pub min_distance_m: f64,
    pub background_enabled: bool,
}

/// Boundary proximity below which the cadence tightens to catch crossings.
const BOUNDARY_TIGHTEN_M: f64 = 50.0;
/// Floors applied when tightening.
const MIN_INTERVAL_MS: u64 = 15_000;
const MIN_DISTANCE_M: f64 = 25.0;

/// The most relaxed tier; also the cap under resource pressure.
const RELAXED_INTERVAL_MS: u64 = 300_000;
const RELAXED_DISTANCE_M: f64 = 500.0;

impl SamplingPolicy {
    /// Base tier for a status, before tightening and resource relaxation.
    fn base(status: AttendanceStatus) -> Self {
        match status {
            AttendanceStatus::ClockedIn => Self {
                accuracy_class: AccuracyClass::High,
                min_interval_ms: 30_000,
                min_distance_m: 50.0,
                background_enabled: true,
            },
            AttendanceStatus::OnBreak { .. } => Self {
                accuracy_class: AccuracyClass::Balanced,
                min_interval_ms: 120_000,
                min_distance_m: 200.0,
                background_enabled: true,
            },
            AttendanceStatus::OnBusinessTrip => Self {
                accuracy_class: AccuracyClass::High,
                min_interval_ms: 60_000,
                min_distance_m: 100.0,
                background_enabled: true,
            },
            AttendanceStatus::ClockedOut => Self {
                accuracy_class: AccuracyClass::Low,
                min_interval_ms: RELAXED_INTERVAL_MS,
                min_distance_m: RELAXED_DISTANCE_M,
                background_enabled: false,
            },
        }
    }

    /// Derive the policy for the given inputs.
    ///
    /// `distance_to_boundary_m` is the signed distance from the last accepted
    /// position to the fence boundary (negative inside); `None` when no
    /// position has been accepted yet.
    pub fn derive(
        status: AttendanceStatus,
        distance_to_boundary_m: Option<f64>,
        device: &DeviceState,
    ) -> Self {
        // Critical battery wins over everything, including tightening.
        if device.battery_pct < 10 {
            return Self {
                accuracy_class: AccuracyClass::Low,
                min_interval_ms: RELAXED_INTERVAL_MS,
                min_distance_m: RELAXED_DISTANCE_M,
                background_enabled: false,
            };
        }

        let mut policy = Self::base(status);

        // Near the boundary, halve the cadence to catch crossings precisely.
        if status.is_working() {
            if let Some(d) = distance_to_boundary_m {
                if d.abs() <= BOUNDARY_TIGHTEN_M {
                    policy.min_interval_ms = (policy.min_interval_ms / 2).max(MIN_INTERVAL_MS);
                    policy.min_distance_m = (policy.min_distance_m / 2.0).max(MIN_DISTANCE_M);
                }
            }
        }

        if device.battery_pct < 20 {
            policy.min_interval_ms = (policy.min_interval_ms * 2).min(RELAXED_INTERVAL_MS);
            policy.min_distance_m = (policy.min_distance_m * 2.0).min(RELAXED_DISTANCE_M);
        }
        if device.device_class == DeviceClass::LowEnd {
            policy.min_interval_ms =
                ((policy.min_interval_ms as f64 * 1.5) as u64).min(RELAXED_INTERVAL_MS);
            policy.min_distance_m = (policy.min_distance_m * 1.5).min(RELAXED_DISTANCE_M);
        }

        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::BreakKind;

    fn device(battery_pct: u8) -> DeviceState {
        DeviceState {
            battery_pct,
            device_class: DeviceClass::Standard,
        }
    }

    #[test]
    fn base_tiers_by_status() {
        let p = SamplingPolicy::derive(AttendanceStatus::ClockedIn, None, &device(100));
        assert_eq!((p.min_interval_ms, p.min_distance_m), (30_000, 50.0));
        assert_eq!(p.accuracy_class, AccuracyClass::High);
        assert!(p.background_enabled);

        let p = SamplingPolicy::derive(
            AttendanceStatus::OnBreak {
                kind: BreakKind::Meal,
            },
            None,
            &device(100),
        );
        assert_eq!((p.min_interval_ms, p.min_distance_m), (120_000, 200.0));

        let p = SamplingPolicy::derive(AttendanceStatus::OnBusinessTrip, None, &device(100));
        assert_eq!((p.min_interval_ms, p.min_distance_m), (60_000, 100.0));
        assert_eq!(p.accuracy_class, AccuracyClass::High);

        let p = SamplingPolicy::derive(AttendanceStatus::ClockedOut, None, &device(100));
        assert_eq!((p.min_interval_ms, p.min_distance_m), (300_000, 500.0));
        assert!(!p.background_enabled);
    }

    #[test]
    fn boundary_proximity_halves_cadence() {
        let p = SamplingPolicy::derive(AttendanceStatus::ClockedIn, Some(-30.0), &device(100));
        assert_eq!((p.min_interval_ms, p.min_distance_m), (15_000, 25.0));

        // Far from the boundary nothing changes.
        let p = SamplingPolicy::derive(AttendanceStatus::ClockedIn, Some(-400.0), &device(100));
        assert_eq!((p.min_interval_ms, p.min_distance_m), (30_000, 50.0));
    }

    #[test]
    fn tightening_respects_floors() {
        // ClockedIn halves straight onto the floors; they never go lower.
        let p = SamplingPolicy::derive(AttendanceStatus::ClockedIn, Some(10.0), &device(100));
        assert!(p.min_interval_ms >= 15_000);
        assert!(p.min_distance_m >= 25.0);
    }

    #[test]
    fn critical_battery_forces_relaxed_tier() {
        // Regardless of status and boundary proximity.
        let p = SamplingPolicy::derive(AttendanceStatus::ClockedIn, Some(5.0), &device(9));
        assert_eq!((p.min_interval_ms, p.min_distance_m), (300_000, 500.0));
        assert_eq!(p.accuracy_class, AccuracyClass::Low);
        assert!(!p.background_enabled);
    }

    #[test]
    fn low_battery_doubles_with_relaxed_cap() {
        let p = SamplingPolicy::derive(AttendanceStatus::ClockedIn, None, &device(15));
        assert_eq!((p.min_interval_ms, p.min_distance_m), (60_000, 100.0));

        // Doubling an already relaxed tier stays capped.
        let p = SamplingPolicy::derive(
            AttendanceStatus::OnBreak {
                kind: BreakKind::Personal,
            },
            None,
            &device(15),
        );
        assert_eq!((p.min_interval_ms, p.min_distance_m), (240_000, 400.0));
    }

    #[test]
    fn low_end_device_applies_multiplier() {
        let d = DeviceState {
            battery_pct: 100,
            device_class: DeviceClass::LowEnd,
        };
        let p = SamplingPolicy::derive(AttendanceStatus::ClockedIn, None, &d);
        assert_eq!((p.min_interval_ms, p.min_distance_m), (45_000, 75.0));
    }

    #[test]
    fn derive_is_deterministic() {
        let d = device(42);
        let a = SamplingPolicy::derive(AttendanceStatus::ClockedIn, Some(-12.0), &d);
        let b = SamplingPolicy::derive(AttendanceStatus::ClockedIn, Some(-12.0), &d);
        assert_eq!(a, b);
    }
}
