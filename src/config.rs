use anyhow::{bail, Result};
use config::{Environment, File};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::vehicle::{mode, HomePosition, VehicleState};

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub simulator: SimulatorConfig,
    pub command: CommandConfig,
    pub web: WebConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub vehicle_id: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            vehicle_id: "kestrel-sim".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub tick_interval_ms: u64,
    /// RNG seed for deterministic runs. None = seeded from entropy.
    pub seed: Option<u64>,
    /// Peak altitude perturbation per tick, in meters.
    pub altitude_noise_m: f64,
    /// Peak battery voltage drop per tick.
    pub battery_drain_v: f64,
    pub home: HomeConfig,
    pub initial: InitialStateConfig,
    pub battery: BatteryConfig,
    pub rtl: RtlConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            seed: None,
            altitude_noise_m: 0.1,
            battery_drain_v: 0.01,
            home: HomeConfig::default(),
            initial: InitialStateConfig::default(),
            battery: BatteryConfig::default(),
            rtl: RtlConfig::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn home_position(&self) -> HomePosition {
        HomePosition {
            latitude: self.home.latitude,
            longitude: self.home.longitude,
        }
    }

    /// Builds the starting state. The stored percent is always derived from voltage.
    pub fn initial_state(&self) -> VehicleState {
        let initial = &self.initial;
        VehicleState {
            armed: initial.armed,
            mode: initial.mode.clone(),
            altitude: initial.altitude,
            latitude: initial.latitude,
            longitude: initial.longitude,
            battery_voltage: initial.battery_voltage,
            battery_percent: self.battery.percent(initial.battery_voltage),
            heading: initial.heading,
            groundspeed: initial.groundspeed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HomeConfig {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            latitude: 47.6062,
            longitude: -122.3321,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InitialStateConfig {
    pub armed: bool,
    pub mode: String,
    pub altitude: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_voltage: f64,
    pub heading: f64,
    pub groundspeed: f64,
}

impl Default for InitialStateConfig {
    fn default() -> Self {
        Self {
            armed: true,
            mode: mode::GUIDED.to_string(),
            altitude: 45.2,
            latitude: 47.6062,
            longitude: -122.3321,
            battery_voltage: 12.6,
            heading: 90.0,
            groundspeed: 5.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub empty_voltage: f64,
    pub full_voltage: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            empty_voltage: 10.5,
            full_voltage: 12.6,
        }
    }
}

impl BatteryConfig {
    /// Linear map from voltage to percent, rounded but not clamped.
    pub fn percent(&self, voltage: f64) -> i64 {
        ((voltage - self.empty_voltage) / (self.full_voltage - self.empty_voltage) * 100.0).round()
            as i64
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RtlConfig {
    /// Planar distance to home, in raw degrees, below which the vehicle counts as home.
    pub home_threshold_deg: f64,
    /// Fraction of the remaining distance covered each tick while approaching.
    pub approach_fraction: f64,
    pub descent_step_m: f64,
    pub land_altitude_m: f64,
}

impl Default for RtlConfig {
    fn default() -> Self {
        Self {
            home_threshold_deg: 1e-4,
            approach_fraction: 0.1,
            descent_step_m: 0.5,
            land_altitude_m: 5.0,
        }
    }
}

/// What happens to an in-flight progression when a new conflicting command arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreemptPolicy {
    /// In-flight progressions keep writing until they finish.
    #[default]
    Concurrent,
    /// The newest progression wins; older ones stop at their next sample.
    Supersede,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub sample_interval_ms: u64,
    pub takeoff_duration_ms: u64,
    pub fly_to_duration_ms: u64,
    pub default_takeoff_altitude: f64,
    pub min_groundspeed: f64,
    pub max_groundspeed: f64,
    pub preempt: PreemptPolicy,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 100,
            takeoff_duration_ms: 5000,
            fly_to_duration_ms: 10000,
            default_takeoff_altitude: 10.0,
            min_groundspeed: 5.0,
            max_groundspeed: 7.0,
            preempt: PreemptPolicy::Concurrent,
        }
    }
}

impl CommandConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn takeoff_duration(&self) -> Duration {
        Duration::from_millis(self.takeoff_duration_ms)
    }

    pub fn fly_to_duration(&self) -> Duration {
        Duration::from_millis(self.fly_to_duration_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env = std::env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let config_path = format!("config/{}.toml", env);
        let fallback_path = format!("/etc/kestrel/{}.toml", env);

        let path = if Path::new(&config_path).exists() {
            config_path
        } else {
            fallback_path
        };
        Self::load_from(Path::new(&path))
    }

    /// Loads `path` if it exists, then applies `KESTREL__SECTION__KEY` overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("KESTREL").separator("__"))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulator;
        if sim.tick_interval_ms == 0 {
            bail!("simulator.tick_interval_ms must be greater than zero");
        }
        if self.command.sample_interval_ms == 0 {
            bail!("command.sample_interval_ms must be greater than zero");
        }
        if sim.battery.full_voltage <= sim.battery.empty_voltage {
            bail!(
                "simulator.battery.full_voltage ({}) must exceed empty_voltage ({})",
                sim.battery.full_voltage,
                sim.battery.empty_voltage
            );
        }
        if !(-90.0..=90.0).contains(&sim.home.latitude)
            || !(-180.0..=180.0).contains(&sim.home.longitude)
        {
            bail!(
                "simulator.home ({}, {}) is not a valid coordinate",
                sim.home.latitude,
                sim.home.longitude
            );
        }
        let rtl = &sim.rtl;
        if !(0.0..=1.0).contains(&rtl.approach_fraction) || rtl.approach_fraction == 0.0 {
            bail!(
                "simulator.rtl.approach_fraction ({}) must be in (0, 1]",
                rtl.approach_fraction
            );
        }
        if rtl.descent_step_m.is_nan() || rtl.descent_step_m <= 0.0 {
            bail!(
                "simulator.rtl.descent_step_m ({}) must be positive",
                rtl.descent_step_m
            );
        }
        let initial = &sim.initial;
        if !(-90.0..=90.0).contains(&initial.latitude)
            || !(-180.0..=180.0).contains(&initial.longitude)
        {
            bail!(
                "simulator.initial ({}, {}) is not a valid coordinate",
                initial.latitude,
                initial.longitude
            );
        }
        if !initial.altitude.is_finite() || initial.altitude < 0.0 {
            bail!(
                "simulator.initial.altitude ({}) must be a finite value at or above home",
                initial.altitude
            );
        }
        if self.command.max_groundspeed < self.command.min_groundspeed {
            bail!("command.max_groundspeed must not be below min_groundspeed");
        }
        Ok(())
    }
}
