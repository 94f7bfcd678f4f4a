use crate::config::RtlConfig;
use crate::vehicle::{bearing_deg, mode, planar_distance_deg, HomePosition, VehicleState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtlPhase {
    Approaching,
    Descending,
    Landed,
}

impl RtlPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Approaching => "approaching",
            Self::Descending => "descending",
            Self::Landed => "landed",
        }
    }
}

/// Advances return-to-launch by one tick. The caller only invokes this while the
/// vehicle is in RTL; landing switches the mode to LAND, which ends the sequence.
pub fn advance(state: &mut VehicleState, home: &HomePosition, config: &RtlConfig) -> RtlPhase {
    let distance = planar_distance_deg(
        state.latitude,
        state.longitude,
        home.latitude,
        home.longitude,
    );

    if distance > config.home_threshold_deg {
        state.latitude += (home.latitude - state.latitude) * config.approach_fraction;
        state.longitude += (home.longitude - state.longitude) * config.approach_fraction;
        state.heading = bearing_deg(
            state.latitude,
            state.longitude,
            home.latitude,
            home.longitude,
        );
        RtlPhase::Approaching
    } else if state.altitude > config.land_altitude_m {
        state.altitude -= config.descent_step_m;
        RtlPhase::Descending
    } else {
        state.altitude = 0.0;
        state.armed = false;
        state.mode = mode::LAND.to_string();
        RtlPhase::Landed
    }
}
