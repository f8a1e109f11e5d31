//! Geofence evaluation.
//!
//! Pure geometry: great-circle distance between coordinates and circular
//! containment with a configurable jitter buffer. No side effects; the only
//! failure mode is input validation.

use serde::{Deserialize, Serialize};

use crate::error::GeoError;

/// Mean Earth radius in meters, as used by the haversine formula.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default containment buffer absorbing GPS jitter near the boundary.
pub const DEFAULT_BUFFER_M: f64 = 10.0;

/// A validated WGS-84 coordinate. Immutable value type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude_deg: f64,
    longitude_deg: f64,
}

impl Coordinate {
    /// Create a coordinate, rejecting NaN and out-of-range values.
    pub fn new(latitude_deg: f64, longitude_deg: f64) -> Result<Self, GeoError> {
        let lat_ok = latitude_deg.is_finite() && (-90.0..=90.0).contains(&latitude_deg);
        let lon_ok = longitude_deg.is_finite() && (-180.0..=180.0).contains(&longitude_deg);
        if !lat_ok || !lon_ok {
            return Err(GeoError::InvalidCoordinate {
                latitude_deg,
                longitude_deg,
            });
        }
        Ok(Self {
            latitude_deg,
            longitude_deg,
        })
    }

    pub fn latitude_deg(&self) -> f64 {
        self.latitude_deg
    }

    pub fn longitude_deg(&self) -> f64 {
        self.longitude_deg
    }

    /// Great-circle distance to `other` in meters (haversine).
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude_deg.to_radians();
        let lat2 = other.latitude_deg.to_radians();
        let dlat = (other.latitude_deg - self.latitude_deg).to_radians();
        let dlon = (other.longitude_deg - self.longitude_deg).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        // Rounding can push `a` past 1.0 near the antipode; clamp so asin
        // never sees an out-of-domain input.
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_M * c
    }
}

/// A position fix produced by the mobile client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub coordinate: Coordinate,
    /// Estimated horizontal accuracy in meters. Always positive.
    pub accuracy_m: f64,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl PositionSample {
    pub fn new(
        coordinate: Coordinate,
        accuracy_m: f64,
        captured_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Self, GeoError> {
        if !accuracy_m.is_finite() || accuracy_m <= 0.0 {
            return Err(GeoError::InvalidValue {
                field: "accuracy_m".to_string(),
                message: format!("must be positive, got {accuracy_m}"),
            });
        }
        Ok(Self {
            coordinate,
            accuracy_m,
            captured_at,
        })
    }
}

/// A circular authorized work area. One per organization; read-only here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub center: Coordinate,
    pub radius_m: f64,
}

impl Geofence {
    pub fn new(center: Coordinate, radius_m: f64) -> Result<Self, GeoError> {
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(GeoError::InvalidValue {
                field: "radius_m".to_string(),
                message: format!("must be positive, got {radius_m}"),
            });
        }
        Ok(Self { center, radius_m })
    }

    /// Distance from `point` to the fence center, in meters.
    pub fn distance_from_center_m(&self, point: &Coordinate) -> f64 {
        self.center.distance_m(point)
    }

    /// Signed distance from `point` to the fence boundary, in meters.
    /// Negative while inside the fence.
    pub fn distance_to_boundary_m(&self, point: &Coordinate) -> f64 {
        self.distance_from_center_m(point) - self.radius_m
    }

    /// Whether `point` lies within the fence plus `buffer_m`.
    ///
    /// The buffer absorbs GPS jitter near the boundary: a point exactly at
    /// `radius_m + buffer_m` from the center is still contained.
    pub fn contains(&self, point: &Coordinate, buffer_m: f64) -> bool {
        self.distance_from_center_m(point) <= self.radius_m + buffer_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(Coordinate::new(91.0, 0.0).is_err());
        assert!(Coordinate::new(-91.0, 0.0).is_err());
        assert!(Coordinate::new(0.0, 181.0).is_err());
        assert!(Coordinate::new(0.0, -181.0).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
        assert!(Coordinate::new(0.0, f64::NAN).is_err());
    }

    #[test]
    fn distance_to_self_is_zero() {
        let a = coord(48.1486, 17.1077);
        assert_eq!(a.distance_m(&a), 0.0);
    }

    #[test]
    fn known_distance_bratislava_vienna() {
        // Bratislava city center to Vienna city center, roughly 55 km.
        let ba = coord(48.1486, 17.1077);
        let vie = coord(48.2082, 16.3738);
        let d = ba.distance_m(&vie);
        assert!((54_000.0..57_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn antipodal_distance_is_finite() {
        // The haversine intermediate rounds past 1.0 here without clamping.
        let a = coord(0.0, 0.0);
        let b = coord(0.0, 180.0);
        let d = a.distance_m(&b);
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0, "got {d}");

        let near = coord(0.0000001, 179.9999999);
        assert!(a.distance_m(&near).is_finite());
    }

    #[test]
    fn containment_honors_buffer() {
        let center = coord(48.1486, 17.1077);
        let fence = Geofence::new(center, 100.0).unwrap();
        // ~0.00135 degrees of longitude at this latitude is ~100m.
        let near_edge = coord(48.1486, 17.10905);
        let d = fence.distance_from_center_m(&near_edge);
        assert!(d > 90.0 && d < 110.0, "calibration failed: {d}");
        assert!(fence.contains(&near_edge, 10.0));

        let far = coord(48.1486, 17.1177); // ~740m east
        assert!(!fence.contains(&far, 10.0));
    }

    #[test]
    fn point_at_radius_plus_buffer_is_contained() {
        let center = coord(0.0, 0.0);
        let fence = Geofence::new(center, 100.0).unwrap();
        // One degree of longitude at the equator is ~111.319 km.
        let meters_per_deg = 111_319.49;
        let at_limit = coord(0.0, 110.0 / meters_per_deg);
        let beyond = coord(0.0, 112.0 / meters_per_deg);
        assert!(fence.contains(&at_limit, 10.0));
        assert!(!fence.contains(&beyond, 10.0));
    }

    #[test]
    fn boundary_distance_is_negative_inside() {
        let fence = Geofence::new(coord(0.0, 0.0), 100.0).unwrap();
        assert!(fence.distance_to_boundary_m(&coord(0.0, 0.0)) < 0.0);
    }

    #[test]
    fn rejects_non_positive_radius_and_accuracy() {
        let c = coord(0.0, 0.0);
        assert!(Geofence::new(c, 0.0).is_err());
        assert!(Geofence::new(c, -5.0).is_err());
        assert!(PositionSample::new(c, 0.0, chrono::Utc::now()).is_err());
        assert!(PositionSample::new(c, -1.0, chrono::Utc::now()).is_err());
    }

    proptest! {
        #[test]
        fn distance_is_symmetric(
            lat1 in -89.0f64..89.0, lon1 in -179.0f64..179.0,
            lat2 in -89.0f64..89.0, lon2 in -179.0f64..179.0,
        ) {
            let a = coord(lat1, lon1);
            let b = coord(lat2, lon2);
            let ab = a.distance_m(&b);
            let ba = b.distance_m(&a);
            prop_assert!((ab - ba).abs() < 1e-6);
        }

        #[test]
        fn distance_is_non_negative_and_finite(
            lat1 in -90.0f64..=90.0, lon1 in -180.0f64..=180.0,
            lat2 in -90.0f64..=90.0, lon2 in -180.0f64..=180.0,
        ) {
            let a = coord(lat1, lon1);
            let b = coord(lat2, lon2);
            let d = a.distance_m(&b);
            prop_assert!(d.is_finite());
            prop_assert!(d >= 0.0);
        }
    }
}
