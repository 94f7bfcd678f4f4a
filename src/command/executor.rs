use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{CommandConfig, PreemptPolicy};
use crate::error::CommandError;
use crate::sim::{lock, VehicleStore};
use crate::vehicle::{bearing_deg, mode, VehicleState};

/// Runs vehicle commands against a store.
///
/// Every command resolves to `Ok(true)` once done. Under [`PreemptPolicy::Supersede`] a
/// takeoff or fly-to interrupted by a newer command resolves to `Ok(false)`.
#[derive(Clone)]
pub struct CommandExecutor {
    store: VehicleStore,
    config: Arc<CommandConfig>,
    /// Bumped by every command that takes over the vehicle's motion.
    epoch: Arc<AtomicU64>,
    rng: Arc<Mutex<StdRng>>,
}

impl CommandExecutor {
    pub fn new(store: VehicleStore, config: CommandConfig) -> Self {
        let rng = match store.config().seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            config: Arc::new(config),
            epoch: Arc::new(AtomicU64::new(0)),
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn store(&self) -> &VehicleStore {
        &self.store
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    pub async fn arm(&self) -> Result<bool, CommandError> {
        info!("Arming");
        self.store.update(|state| state.armed = true);
        Ok(true)
    }

    pub async fn disarm(&self) -> Result<bool, CommandError> {
        info!("Disarming");
        self.store.update(|state| state.armed = false);
        Ok(true)
    }

    /// Stores `label` verbatim. Only GUIDED, RTL and LAND change simulator behavior.
    pub async fn set_mode(&self, label: &str) -> Result<bool, CommandError> {
        if label.trim().is_empty() {
            return Err(CommandError::invalid("setMode", "mode must not be empty"));
        }
        self.take_control();
        info!("Setting mode {}", label);
        self.store.update(|state| state.mode = label.to_string());
        Ok(true)
    }

    /// Climbs or descends to `altitude` meters over the takeoff duration, arming first
    /// when needed.
    pub async fn takeoff(&self, altitude: f64) -> Result<bool, CommandError> {
        check_altitude("takeoff", altitude)?;

        if !self.store.get_state().armed {
            self.arm().await?;
        }

        let epoch = self.take_control();
        let start = self
            .store
            .update(|state| state.mode = mode::GUIDED.to_string())
            .altitude;
        info!("Taking off from {:.1} m to {:.1} m", start, altitude);

        let completed = self
            .progress("takeoff", self.config.takeoff_duration(), epoch, |state, p| {
                state.altitude = start + (altitude - start) * p;
            })
            .await;
        if completed {
            info!("Takeoff complete at {:.1} m", altitude);
        }
        Ok(completed)
    }

    /// Flies in a straight line to the target over the fly-to duration, switching to
    /// GUIDED first when needed.
    pub async fn fly_to(
        &self,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> Result<bool, CommandError> {
        check_coordinate("flyTo", latitude, longitude)?;
        check_altitude("flyTo", altitude)?;

        if !self.store.get_state().is_mode(mode::GUIDED) {
            self.set_mode(mode::GUIDED).await?;
        }

        let epoch = self.take_control();
        let groundspeed = {
            let mut rng = lock(&self.rng);
            if self.config.max_groundspeed > self.config.min_groundspeed {
                rng.gen_range(self.config.min_groundspeed..self.config.max_groundspeed)
            } else {
                self.config.min_groundspeed
            }
        };

        let start = self.store.update(|state| {
            state.heading = bearing_deg(state.latitude, state.longitude, latitude, longitude);
            state.groundspeed = groundspeed;
        });
        let (start_lat, start_lon, start_alt) =
            (start.latitude, start.longitude, start.altitude);
        info!(
            "Flying from ({:.6}, {:.6}, {:.1}) to ({:.6}, {:.6}, {:.1}) at {:.1} m/s",
            start_lat, start_lon, start_alt, latitude, longitude, altitude, groundspeed
        );

        let completed = self
            .progress("flyTo", self.config.fly_to_duration(), epoch, |state, p| {
                state.latitude = start_lat + (latitude - start_lat) * p;
                state.longitude = start_lon + (longitude - start_lon) * p;
                state.altitude = start_alt + (altitude - start_alt) * p;
            })
            .await;
        if completed {
            info!("Arrived at ({:.6}, {:.6})", latitude, longitude);
        }
        Ok(completed)
    }

    /// Switches to RTL and returns; the store's tick flies the vehicle home.
    pub async fn return_to_launch(&self) -> Result<bool, CommandError> {
        self.set_mode(mode::RTL).await
    }

    /// Marks the start of a new motion command and returns its epoch.
    fn take_control(&self) -> u64 {
        match self.config.preempt {
            PreemptPolicy::Supersede => self.epoch.fetch_add(1, Ordering::SeqCst) + 1,
            PreemptPolicy::Concurrent => self.epoch.load(Ordering::SeqCst),
        }
    }

    fn is_superseded(&self, epoch: u64) -> bool {
        self.config.preempt == PreemptPolicy::Supersede
            && self.epoch.load(Ordering::SeqCst) != epoch
    }

    /// Samples `apply` with a progress fraction in (0, 1] every sample interval until
    /// `duration` has elapsed. Returns false if a newer command took over first.
    async fn progress<F>(
        &self,
        command: &'static str,
        duration: Duration,
        epoch: u64,
        mut apply: F,
    ) -> bool
    where
        F: FnMut(&mut VehicleState, f64),
    {
        let period = self.config.sample_interval();
        let started = Instant::now();
        let mut sampler = time::interval_at(started + period, period);
        sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            sampler.tick().await;
            if self.is_superseded(epoch) {
                warn!("{} superseded by a newer command", command);
                return false;
            }

            let progress = if duration.is_zero() {
                1.0
            } else {
                (started.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0)
            };
            self.store.update(|state| apply(state, progress));
            debug!("{} progress {:.2}", command, progress);

            if progress >= 1.0 {
                return true;
            }
        }
    }
}

fn check_altitude(command: &'static str, altitude: f64) -> Result<(), CommandError> {
    if !altitude.is_finite() {
        return Err(CommandError::invalid(
            command,
            format!("altitude {} is not finite", altitude),
        ));
    }
    if altitude < 0.0 {
        return Err(CommandError::invalid(
            command,
            format!("altitude {} is below home", altitude),
        ));
    }
    Ok(())
}

fn check_coordinate(
    command: &'static str,
    latitude: f64,
    longitude: f64,
) -> Result<(), CommandError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(CommandError::invalid(
            command,
            format!("latitude {} out of range", latitude),
        ));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(CommandError::invalid(
            command,
            format!("longitude {} out of range", longitude),
        ));
    }
    Ok(())
}
