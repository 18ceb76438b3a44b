use serde::{Deserialize, Serialize};

use super::types::{LocationCheck, LocationProof};

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default accepted distance when a clinic enables GPS checks without a radius
pub const DEFAULT_RADIUS_M: f64 = 500.0;

/// Circle around a clinic inside which a check-in counts as on-site
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

impl Geofence {
    pub fn contains(&self, latitude: f64, longitude: f64) -> (bool, f64) {
        let distance = haversine_m(latitude, longitude, self.latitude, self.longitude);
        (distance <= self.radius_m, distance)
    }
}

/// Great-circle distance between two coordinates, in meters
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Soft location policy: an unverifiable or distant proof is recorded with
/// `verified = false`, it never blocks the check-in.
pub fn check_location(proof: Option<LocationProof>, fence: Option<&Geofence>) -> Option<LocationCheck> {
    let proof = proof?;
    let (verified, distance) = match fence {
        Some(fence) => {
            let (inside, distance) = fence.contains(proof.latitude, proof.longitude);
            (inside, Some(distance))
        }
        None => (false, None),
    };
    Some(LocationCheck {
        latitude: proof.latitude,
        longitude: proof.longitude,
        accuracy: proof.accuracy,
        verified,
        distance_from_clinic_m: distance,
    })
}
