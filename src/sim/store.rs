use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::observer::{ObserverRegistry, Subscription, SubscriptionId};
use super::rtl::{self, RtlPhase};
use super::{lock, read, write};
use crate::config::SimulatorConfig;
use crate::vehicle::{mode, HomePosition, VehicleState};

struct Shared {
    vehicle: VehicleState,
    /// Incremented on every mutation; orders observer deliveries.
    seq: u64,
}

struct Ticker {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

struct StoreInner {
    state: RwLock<Shared>,
    home: HomePosition,
    observers: Arc<ObserverRegistry>,
    rng: Mutex<StdRng>,
    config: SimulatorConfig,
    ticker: Mutex<Option<Ticker>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let ticker = self
            .ticker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ticker) = ticker {
            ticker.handle.abort();
        }
    }
}

/// Owner of the simulated vehicle state and the only place it is mutated.
///
/// Cloning yields another handle to the same store. The background tick runs only
/// between `start` and `stop`, and `tick` can be driven by hand.
#[derive(Clone)]
pub struct VehicleStore {
    inner: Arc<StoreInner>,
}

impl VehicleStore {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let vehicle = config.initial_state();
        let home = config.home_position();
        info!(
            "Vehicle store created, home at ({:.6}, {:.6})",
            home.latitude, home.longitude
        );

        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(Shared { vehicle, seq: 0 }),
                home,
                observers: Arc::new(ObserverRegistry::new()),
                rng: Mutex::new(rng),
                config,
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn home(&self) -> HomePosition {
        self.inner.home
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.inner.config
    }

    pub fn get_state(&self) -> VehicleState {
        read(&self.inner.state).vehicle.clone()
    }

    /// Registers `callback` and hands it the current snapshot before any later mutation.
    ///
    /// The initial snapshot is delivered before this returns, waiting for any delivery
    /// running on another thread. Called from inside a callback, it is delivered once that
    /// callback returns.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&VehicleState) + Send + Sync + 'static,
    {
        let id = {
            let shared = read(&self.inner.state);
            self.inner
                .observers
                .register(shared.seq, shared.vehicle.clone(), Arc::new(callback))
        };
        self.inner.observers.flush();
        Subscription::new(id, &self.inner.observers)
    }

    /// No-op for ids that are unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.observers.remove(id);
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Applies `mutate`, recomputes battery percent and notifies observers.
    pub(crate) fn update<F>(&self, mutate: F) -> VehicleState
    where
        F: FnOnce(&mut VehicleState),
    {
        let snapshot = {
            let mut shared = write(&self.inner.state);
            mutate(&mut shared.vehicle);
            shared.vehicle.battery_percent =
                self.inner.config.battery.percent(shared.vehicle.battery_voltage);
            shared.seq += 1;
            let snapshot = shared.vehicle.clone();
            self.inner.observers.enqueue(shared.seq, snapshot.clone());
            snapshot
        };
        self.inner.observers.flush();
        snapshot
    }

    /// One periodic update: altitude noise, battery drain and, in RTL, one homing step.
    /// Noise never takes a vehicle on the ground (disarmed or in LAND) below home altitude.
    pub fn tick(&self) -> VehicleState {
        let config = &self.inner.config;
        let (altitude_delta, voltage_drop) = {
            let mut rng = lock(&self.inner.rng);
            (
                rng.gen_range(-1.0..1.0) * config.altitude_noise_m,
                rng.gen::<f64>() * config.battery_drain_v,
            )
        };
        let home = self.inner.home;

        let mut phase = None;
        let snapshot = self.update(|state| {
            state.altitude += altitude_delta;
            if !state.armed || state.is_mode(mode::LAND) {
                state.altitude = state.altitude.max(0.0);
            }
            state.battery_voltage -= voltage_drop;
            if state.is_mode(mode::RTL) {
                phase = Some(rtl::advance(state, &home, &config.rtl));
            }
        });

        match phase {
            Some(RtlPhase::Landed) => info!("RTL complete, vehicle landed and disarmed"),
            Some(phase) => debug!(
                "RTL {}: ({:.6}, {:.6}) alt {:.1}",
                phase.label(),
                snapshot.latitude,
                snapshot.longitude,
                snapshot.altitude
            ),
            None => {}
        }
        snapshot
    }

    /// Spawns the periodic tick on the current tokio runtime.
    pub fn start(&self) {
        let mut ticker = lock(&self.inner.ticker);
        if ticker.is_some() {
            warn!("Tick loop already running");
            return;
        }

        let period = self.inner.config.tick_interval();
        let (shutdown, mut shutdown_rx) = broadcast::channel(1);
        let store = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Tick loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        // the store is gone once every handle is dropped
                        let Some(inner) = store.upgrade() else {
                            break;
                        };
                        VehicleStore { inner }.tick();
                    }
                }
            }
        });

        *ticker = Some(Ticker { shutdown, handle });
        info!("Tick loop started, period {:?}", period);
    }

    /// Stops the periodic tick and waits for it to exit. No-op when not running.
    pub async fn stop(&self) {
        let ticker = lock(&self.inner.ticker).take();
        let Some(ticker) = ticker else {
            return;
        };

        let _ = ticker.shutdown.send(());
        if let Err(e) = ticker.handle.await {
            if !e.is_cancelled() {
                error!("Tick loop join error: {}", e);
            }
        }
        info!("Tick loop stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.ticker).is_some()
    }
}
