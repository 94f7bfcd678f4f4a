#[cfg(test)]
mod store_tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::super::{Subscription, SubscriptionId, VehicleStore};
    use crate::config::{InitialStateConfig, SimulatorConfig};
    use crate::vehicle::{mode, VehicleState};

    type Log = Arc<Mutex<Vec<VehicleState>>>;

    fn quiet_config() -> SimulatorConfig {
        SimulatorConfig {
            seed: Some(42),
            altitude_noise_m: 0.0,
            ..SimulatorConfig::default()
        }
    }

    fn record(store: &VehicleStore) -> (Log, Subscription) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let subscription = store.subscribe(move |state| sink.lock().unwrap().push(state.clone()));
        (log, subscription)
    }

    fn run_until_landed(store: &VehicleStore, max_ticks: usize) -> usize {
        for n in 1..=max_ticks {
            if store.tick().mode == mode::LAND {
                return n;
            }
        }
        panic!("vehicle did not land within {} ticks", max_ticks);
    }

    #[test]
    fn test_snapshots_are_isolated() {
        let store = VehicleStore::new(quiet_config());
        let before = store.get_state();
        let copy = before.clone();

        store.update(|state| {
            state.armed = false;
            state.mode = "LOITER".to_string();
            state.altitude = 99.0;
        });
        store.tick();

        assert_eq!(before, copy);
        assert_eq!(store.get_state().mode, "LOITER");
    }

    #[test]
    fn test_subscribe_delivers_current_state_first() {
        let store = VehicleStore::new(quiet_config());
        store.update(|state| state.altitude = 12.0);

        let (log, _subscription) = record(&store);
        {
            let log = log.lock().unwrap();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0], store.get_state());
        }

        store.update(|state| state.altitude = 13.0);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].altitude, 13.0);
    }

    #[test]
    fn test_observers_notified_in_subscription_order() {
        let store = VehicleStore::new(quiet_config());
        let order = Arc::new(Mutex::new(Vec::new()));

        let sink = order.clone();
        let _a = store.subscribe(move |_| sink.lock().unwrap().push("a"));
        let sink = order.clone();
        let _b = store.subscribe(move |_| sink.lock().unwrap().push("b"));

        store.tick();
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let store = VehicleStore::new(quiet_config());
        let (log, subscription) = record(&store);
        let id: SubscriptionId = subscription.id();

        subscription.unsubscribe();
        subscription.unsubscribe();
        store.unsubscribe(id);
        drop(subscription);

        store.tick();
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let store = VehicleStore::new(quiet_config());
        let (log, subscription) = record(&store);
        assert_eq!(store.observer_count(), 1);

        drop(subscription);
        assert_eq!(store.observer_count(), 0);

        store.tick();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_panicking_observer_does_not_block_others() {
        let store = VehicleStore::new(quiet_config());
        let _faulty = store.subscribe(|state| {
            if state.altitude > 50.0 {
                panic!("observer failure");
            }
        });
        let (log, _subscription) = record(&store);

        let snapshot = store.update(|state| state.altitude = 60.0);

        assert_eq!(snapshot.altitude, 60.0);
        assert_eq!(store.get_state().altitude, 60.0);
        assert_eq!(log.lock().unwrap().last().unwrap().altitude, 60.0);

        // the store keeps working after the panic
        store.update(|state| state.altitude = 61.0);
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_subscribe_from_inside_callback() {
        let store = VehicleStore::new(quiet_config());
        let inner_log: Log = Arc::new(Mutex::new(Vec::new()));
        let inner_subscriptions = Arc::new(Mutex::new(Vec::new()));

        let handle = store.clone();
        let sink = inner_log.clone();
        let holder = inner_subscriptions.clone();
        let _outer = store.subscribe(move |_| {
            let mut holder = holder.lock().unwrap();
            if holder.is_empty() {
                let sink = sink.clone();
                holder.push(handle.subscribe(move |state| {
                    sink.lock().unwrap().push(state.clone());
                }));
            }
        });

        assert_eq!(store.observer_count(), 2);
        assert_eq!(inner_log.lock().unwrap().len(), 1);

        store.update(|state| state.heading = 45.0);
        let inner_log = inner_log.lock().unwrap();
        assert_eq!(inner_log.len(), 2);
        assert_eq!(inner_log[1].heading, 45.0);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let store = VehicleStore::new(quiet_config());
        let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let handle = store.clone();
        let id_slot = own_id.clone();
        let counter = calls.clone();
        let subscription = store.subscribe(move |_| {
            *counter.lock().unwrap() += 1;
            if let Some(id) = *id_slot.lock().unwrap() {
                handle.unsubscribe(id);
            }
        });
        *own_id.lock().unwrap() = Some(subscription.id());

        store.tick();
        store.tick();
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn test_mutation_from_inside_callback_keeps_order() {
        let store = VehicleStore::new(quiet_config());
        let fired = Arc::new(AtomicBool::new(false));

        let handle = store.clone();
        let once = fired.clone();
        let _nested = store.subscribe(move |state| {
            if state.altitude == 1.0 && !once.swap(true, Ordering::SeqCst) {
                handle.update(|state| state.altitude = 2.0);
            }
        });
        let (log, _subscription) = record(&store);

        store.update(|state| state.altitude = 1.0);

        let altitudes: Vec<f64> = log.lock().unwrap().iter().map(|s| s.altitude).collect();
        assert_eq!(altitudes, vec![45.2, 1.0, 2.0]);
    }

    #[test]
    fn test_battery_percent_follows_voltage() {
        let store = VehicleStore::new(quiet_config());
        assert_eq!(store.get_state().battery_percent, 100);

        let snapshot = store.update(|state| {
            state.battery_voltage = 11.55;
            state.battery_percent = 7;
        });
        assert_eq!(snapshot.battery_percent, 50);

        let snapshot = store.update(|state| state.battery_voltage = 10.0);
        assert!(snapshot.battery_percent < 0);
    }

    #[test]
    fn test_battery_voltage_never_increases() {
        let store = VehicleStore::new(SimulatorConfig {
            seed: Some(7),
            ..SimulatorConfig::default()
        });
        let mut previous = store.get_state().battery_voltage;
        for _ in 0..200 {
            let voltage = store.tick().battery_voltage;
            assert!(voltage <= previous);
            assert!(previous - voltage <= 0.01 + 1e-12);
            previous = voltage;
        }
        assert!(previous < 12.6);
    }

    #[test]
    fn test_altitude_noise_is_bounded() {
        let store = VehicleStore::new(SimulatorConfig {
            seed: Some(3),
            ..SimulatorConfig::default()
        });
        let mut previous = store.get_state().altitude;
        for _ in 0..100 {
            let altitude = store.tick().altitude;
            assert!((altitude - previous).abs() <= 0.1 + 1e-12);
            previous = altitude;
        }
    }

    #[test]
    fn test_tick_outside_rtl_keeps_position() {
        let store = VehicleStore::new(quiet_config());
        let before = store.get_state();
        for _ in 0..10 {
            store.tick();
        }
        let after = store.get_state();
        assert_eq!(after.latitude, before.latitude);
        assert_eq!(after.longitude, before.longitude);
        assert_eq!(after.heading, before.heading);
        assert_eq!(after.groundspeed, before.groundspeed);
        assert_eq!(after.mode, "GUIDED");
    }

    #[test]
    fn test_rtl_converges_then_holds() {
        let mut config = quiet_config();
        config.initial = InitialStateConfig {
            latitude: 47.62,
            longitude: -122.34,
            altitude: 30.0,
            ..InitialStateConfig::default()
        };
        let store = VehicleStore::new(config);
        let home = store.home();
        let (log, _subscription) = record(&store);

        store.update(|state| state.mode = mode::RTL.to_string());
        run_until_landed(&store, 500);

        let log = log.lock().unwrap();
        // the homing leg finishes before any descent starts
        let first_descent = log
            .iter()
            .position(|s| s.altitude < 30.0)
            .expect("vehicle never descended");
        let arrived = &log[first_descent - 1];
        let distance = (arrived.latitude - home.latitude).hypot(arrived.longitude - home.longitude);
        assert!(distance <= 1e-4);
        assert!(log[..first_descent].iter().all(|s| s.altitude == 30.0));

        let landed = log.last().unwrap().clone();
        assert_eq!(landed.altitude, 0.0);
        assert!(!landed.armed);
        assert_eq!(landed.mode, "LAND");
        drop(log);

        for _ in 0..20 {
            let state = store.tick();
            assert_eq!(state.latitude, landed.latitude);
            assert_eq!(state.longitude, landed.longitude);
            assert_eq!(state.altitude, 0.0);
            assert!(!state.armed);
            assert_eq!(state.mode, "LAND");
        }
    }

    #[test]
    fn test_rtl_from_home_descends_and_lands() {
        // default config: the vehicle starts over home at 45.2 m with altitude noise on
        let store = VehicleStore::new(SimulatorConfig {
            seed: Some(11),
            ..SimulatorConfig::default()
        });
        store.update(|state| state.mode = mode::RTL.to_string());

        let ticks = run_until_landed(&store, 500);
        assert!(ticks > 70);

        let state = store.get_state();
        assert_eq!(state.latitude, 47.6062);
        assert_eq!(state.longitude, -122.3321);
        assert_eq!(state.altitude, 0.0);
        assert!(!state.armed);
    }

    #[test]
    fn test_noise_never_sinks_a_grounded_vehicle() {
        let store = VehicleStore::new(SimulatorConfig {
            seed: Some(11),
            ..SimulatorConfig::default()
        });
        store.update(|state| state.mode = mode::RTL.to_string());
        run_until_landed(&store, 500);

        for _ in 0..200 {
            assert!(store.tick().altitude >= 0.0);
        }

        store.update(|state| state.mode = "STABILIZE".to_string());
        for _ in 0..200 {
            assert!(store.tick().altitude >= 0.0);
        }
    }

    #[test]
    fn test_subscribe_waits_for_delivery_on_another_thread() {
        let store = VehicleStore::new(quiet_config());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let gate = Mutex::new((entered_tx, release_rx));
        let _slow = store.subscribe(move |state| {
            if state.mode == "HOLD" {
                let gate = gate.lock().unwrap();
                gate.0.send(()).unwrap();
                let _ = gate.1.recv_timeout(Duration::from_secs(5));
            }
        });

        let mutator = {
            let store = store.clone();
            thread::spawn(move || store.update(|state| state.mode = "HOLD".to_string()))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let subscriber = {
            let store = store.clone();
            thread::spawn(move || {
                let (log, subscription) = record(&store);
                let delivered = log.lock().unwrap().clone();
                (delivered, subscription)
            })
        };
        thread::sleep(Duration::from_millis(50));
        drop(release_tx);

        mutator.join().unwrap();
        let (delivered, _subscription) = subscriber.join().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].mode, "HOLD");
    }

    #[test]
    fn test_update_waits_for_delivery_on_another_thread() {
        let store = VehicleStore::new(quiet_config());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let gate = Mutex::new((entered_tx, release_rx));
        let _slow = store.subscribe(move |state| {
            if state.mode == "HOLD" {
                let gate = gate.lock().unwrap();
                gate.0.send(()).unwrap();
                let _ = gate.1.recv_timeout(Duration::from_secs(5));
            }
        });
        let (log, _subscription) = record(&store);

        let mutator = {
            let store = store.clone();
            thread::spawn(move || store.update(|state| state.mode = "HOLD".to_string()))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let writer = {
            let store = store.clone();
            let log = log.clone();
            thread::spawn(move || {
                store.update(|state| state.altitude = 77.0);
                log.lock().unwrap().last().cloned()
            })
        };
        thread::sleep(Duration::from_millis(50));
        drop(release_tx);

        mutator.join().unwrap();
        let seen = writer.join().unwrap().expect("no snapshot delivered");
        assert_eq!(seen.altitude, 77.0);

        let log = log.lock().unwrap();
        let modes: Vec<&str> = log.iter().map(|s| s.mode.as_str()).collect();
        assert_eq!(modes, ["GUIDED", "HOLD", "HOLD"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_runs_until_stopped() {
        let store = VehicleStore::new(quiet_config());
        let (log, _subscription) = record(&store);

        store.start();
        store.start();
        assert!(store.is_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(log.lock().unwrap().len(), 4);

        store.stop().await;
        assert!(!store.is_running());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_honours_interval() {
        let store = VehicleStore::new(SimulatorConfig {
            tick_interval_ms: 250,
            ..quiet_config()
        });
        let (log, _subscription) = record(&store);

        store.start();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        store.stop().await;

        assert_eq!(log.lock().unwrap().len(), 5);
    }
}
