use serde::{Deserialize, Serialize};

/// Flight-mode labels the simulator reacts to. Any other label is stored verbatim.
pub mod mode {
    pub const GUIDED: &str = "GUIDED";
    pub const RTL: &str = "RTL";
    pub const LAND: &str = "LAND";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleState {
    pub armed: bool,
    pub mode: String,

    // Position, altitude in meters above home
    pub altitude: f64,
    pub latitude: f64,
    pub longitude: f64,

    // Power
    pub battery_voltage: f64,
    pub battery_percent: i64,

    // Motion
    pub heading: f64,
    pub groundspeed: f64,
}

impl VehicleState {
    pub fn is_mode(&self, label: &str) -> bool {
        self.mode == label
    }
}

/// The RTL target. Fixed when the store is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomePosition {
    pub latitude: f64,
    pub longitude: f64,
}

/// Compass bearing in degrees [0, 360) from one point to another, computed in raw
/// degree space (0 = north, 90 = east).
pub fn bearing_deg(from_lat: f64, from_lon: f64, to_lat: f64, to_lon: f64) -> f64 {
    let dx = to_lon - from_lon;
    let dy = to_lat - from_lat;
    (dx.atan2(dy).to_degrees() + 360.0) % 360.0
}

/// Straight-line distance in degree space. Not meters.
pub fn planar_distance_deg(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    (lat_a - lat_b).hypot(lon_a - lon_b)
}
