// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the device manager using an in-memory transport.
//!
//! All tests run with a paused clock, so timings are exact.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pollbind::codec::TextCodec;
use pollbind::config::{BackoffPolicy, DeviceConfig};
use pollbind::dispatch::DeviceEvent;
use pollbind::error::{ConnectError, RegisterError, SessionError, TransportError};
use pollbind::session::ConnectionState;
use pollbind::transport::{Transport, TransportFactory};
use pollbind::{Command, DeviceIdentity, DeviceManager, OnOff, StateValue};
use tokio::time::{Instant, sleep};

// ============================================================================
// In-memory device
// ============================================================================

/// Behavior shared by every transport created for one simulated device.
#[derive(Default)]
struct SimulatedDevice {
    fail_opens: Mutex<bool>,
    responses: Mutex<VecDeque<Vec<u8>>>,
    latency: Mutex<Duration>,
    written: Mutex<Vec<Vec<u8>>>,
    open_attempts: Mutex<Vec<Instant>>,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SimulatedDevice {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn respond(&self, responses: &[&str]) {
        self.responses
            .lock()
            .extend(responses.iter().map(|r| r.as_bytes().to_vec()));
    }

    fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn busy(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock();
        sleep(latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SimulatedTransport {
    device: Arc<SimulatedDevice>,
    open: bool,
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn open(&mut self) -> Result<(), ConnectError> {
        self.device.open_attempts.lock().push(Instant::now());
        if *self.device.fail_opens.lock() {
            return Err(ConnectError::Unreachable {
                address: "simulated".to_string(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            });
        }
        self.open = true;
        Ok(())
    }

    async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.device.busy().await;
        self.device.reads.fetch_add(1, Ordering::SeqCst);
        self.device
            .responses
            .lock()
            .pop_front()
            .ok_or(TransportError::Timeout(timeout))
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.device.busy().await;
        self.device.written.lock().push(bytes.to_vec());
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

struct SimulatedFactory(Arc<SimulatedDevice>);

impl TransportFactory for SimulatedFactory {
    fn create(&self, _config: &DeviceConfig) -> Result<Box<dyn Transport>, ConnectError> {
        Ok(Box::new(SimulatedTransport {
            device: Arc::clone(&self.0),
            open: false,
        }))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn device_id() -> DeviceIdentity {
    DeviceIdentity::new("simulated-1").unwrap()
}

fn config() -> DeviceConfig {
    DeviceConfig::tcp("simulated", 1)
        .with_poll_interval(Duration::from_secs(10))
        .with_backoff(
            BackoffPolicy::new()
                .with_max_delay(Duration::from_secs(60))
                .without_jitter(),
        )
}

fn manager(device: &Arc<SimulatedDevice>) -> DeviceManager {
    DeviceManager::new().with_transport_factory(SimulatedFactory(Arc::clone(device)))
}

fn record_events(manager: &DeviceManager) -> Arc<Mutex<Vec<DeviceEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    manager.add_listener(device_id(), move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    events
}

fn states(events: &Mutex<Vec<DeviceEvent>>) -> Vec<f64> {
    events
        .lock()
        .iter()
        .filter_map(DeviceEvent::state)
        .filter_map(|s| s.get("n").and_then(StateValue::as_f64))
        .collect()
}

// ============================================================================
// Polling
// ============================================================================

mod polling {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn states_arrive_in_poll_order() {
        let device = SimulatedDevice::new();
        device.respond(&["n=1", "n=2", "n=3"]);
        let manager = manager(&device);
        let events = record_events(&manager);

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        sleep(Duration::from_secs(25)).await;

        assert_eq!(states(&events), vec![1.0, 2.0, 3.0]);

        let events = events.lock();
        assert!(matches!(events[0], DeviceEvent::Registered { .. }));
        assert_eq!(
            events[1],
            DeviceEvent::connection_changed(
                device_id(),
                ConnectionState::Disconnected,
                ConnectionState::Connecting
            )
        );
        assert_eq!(
            events[2],
            DeviceEvent::connection_changed(
                device_id(),
                ConnectionState::Connecting,
                ConnectionState::Connected
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn last_state_and_watch_follow_polls() {
        let device = SimulatedDevice::new();
        device.respond(&["n=7"]);
        let manager = manager(&device);

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        let mut watch = manager.watch_state(&device_id()).unwrap();

        watch.changed().await.unwrap();
        let seen = watch.borrow().clone().unwrap();
        assert_eq!(seen.get("n"), Some(&StateValue::Number(7.0)));

        let last = manager.last_state(&device_id()).flatten().unwrap();
        assert!(last.same_values(&seen));
        assert_eq!(
            manager.connection_state(&device_id()),
            Some(ConnectionState::Connected)
        );
        assert_eq!(manager.stats(&device_id()).unwrap().polls_succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_packet_keeps_connection_and_emits_nothing() {
        let device = SimulatedDevice::new();
        device.respond(&["garbage", "n=2"]);
        let manager = manager(&device);
        let events = record_events(&manager);

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(
            manager.connection_state(&device_id()),
            Some(ConnectionState::Connected)
        );
        assert!(states(&events).is_empty());
        assert_eq!(manager.last_state(&device_id()), Some(None));
        assert_eq!(manager.stats(&device_id()).unwrap().polls_failed, 1);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(states(&events), vec![2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failures_back_off_exponentially() {
        let device = SimulatedDevice::new();
        *device.fail_opens.lock() = true;
        let manager = manager(&device);
        let events = record_events(&manager);
        let start = Instant::now();

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        sleep(Duration::from_secs(75)).await;

        let offsets: Vec<Duration> = device
            .open_attempts
            .lock()
            .iter()
            .map(|t| t.duration_since(start))
            .collect();
        assert_eq!(
            offsets,
            [0, 10, 30, 70].map(Duration::from_secs).to_vec()
        );

        assert!(
            manager
                .connection_state(&device_id())
                .is_some_and(|s| s.is_failed())
        );

        // Every retry leaves Failed through Connecting
        let retries = events
            .lock()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    DeviceEvent::ConnectionChanged {
                        from: ConnectionState::Failed(_),
                        to: ConnectionState::Connecting,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_interval_polls_once_and_stays_responsive() {
        let device = SimulatedDevice::new();
        device.respond(&["n=1", "n=2"]);
        let manager = manager(&device);

        manager
            .register_device(
                device_id(),
                config().with_poll_interval(Duration::MAX),
                Arc::new(TextCodec::new()),
            )
            .unwrap();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(device.reads.load(Ordering::SeqCst), 1);

        let state = manager.refresh(&device_id()).await.unwrap().unwrap();
        assert_eq!(state.get("n"), Some(&StateValue::Number(2.0)));

        sleep(Duration::from_secs(3600)).await;
        assert_eq!(device.reads.load(Ordering::SeqCst), 2);
        assert_eq!(
            manager.connection_state(&device_id()),
            Some(ConnectionState::Connected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_resets_after_success() {
        let device = SimulatedDevice::new();
        *device.fail_opens.lock() = true;
        let manager = manager(&device);
        let start = Instant::now();

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        // Attempts at 0s and 10s fail, the one at 30s succeeds
        sleep(Duration::from_secs(25)).await;
        *device.fail_opens.lock() = false;
        device.respond(&["n=1", "n=2"]);
        sleep(Duration::from_secs(6)).await;
        assert_eq!(device.reads.load(Ordering::SeqCst), 1);

        // Healthy again: the next poll follows the plain interval
        sleep(Duration::from_secs(10)).await;
        assert_eq!(device.reads.load(Ordering::SeqCst), 2);
        assert_eq!(
            Instant::now().duration_since(start),
            Duration::from_secs(41)
        );
    }
}

// ============================================================================
// Commands
// ============================================================================

mod commands {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn command_is_written_and_completed() {
        let device = SimulatedDevice::new();
        device.respond(&["power=OFF", "power=ON"]);
        let manager = manager(&device);
        let events = record_events(&manager);

        manager
            .register_device(
                device_id(),
                config().with_refresh_after_command(),
                Arc::new(TextCodec::new()),
            )
            .unwrap();
        sleep(Duration::from_millis(1)).await;

        let command = Command::switch("power", OnOff::On);
        let correlation_id = command.correlation_id();
        let state = manager
            .submit_command(&device_id(), command)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state.get("power"), Some(&StateValue::Switch(OnOff::On)));
        assert_eq!(*device.written.lock(), vec![b"power=ON".to_vec()]);
        assert!(events.lock().contains(&DeviceEvent::CommandCompleted {
            device: device_id(),
            correlation_id,
            result: Ok(()),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_operation_in_flight() {
        let device = SimulatedDevice::new();
        device.set_latency(Duration::from_millis(300));
        device.respond(&["n=1"; 16]);
        let manager = manager(&device);

        manager
            .register_device(
                device_id(),
                config().with_poll_interval(Duration::from_secs(1)),
                Arc::new(TextCodec::new()),
            )
            .unwrap();
        sleep(Duration::from_millis(1)).await;

        let futures: Vec<_> = (0..8)
            .map(|i| {
                manager.submit_command(&device_id(), Command::set_number("n", f64::from(i)))
            })
            .collect();
        for future in futures {
            future.await.unwrap();
        }
        sleep(Duration::from_secs(5)).await;

        assert_eq!(device.written.lock().len(), 8);
        assert!(device.reads.load(Ordering::SeqCst) > 1);
        assert_eq!(device.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_keep_running_under_command_load() {
        let device = SimulatedDevice::new();
        device.set_latency(Duration::from_millis(300));
        device.respond(&["n=1"; 64]);
        let manager = manager(&device);

        manager
            .register_device(
                device_id(),
                config()
                    .with_poll_interval(Duration::from_secs(1))
                    .with_command_queue_capacity(4),
                Arc::new(TextCodec::new()),
            )
            .unwrap();

        // A new command every 100ms keeps the queue busy for 10s
        for i in 0..100 {
            let command = Command::set_number("n", f64::from(i));
            let _ = manager.submit_command(&device_id(), command);
            sleep(Duration::from_millis(100)).await;
        }

        assert!(device.written.lock().len() > 10);
        assert!(device.reads.load(Ordering::SeqCst) >= 5);
        assert_eq!(device.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_apply_in_submission_order() {
        let device = SimulatedDevice::new();
        let manager = manager(&device);

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        device.respond(&["n=0"]);
        sleep(Duration::from_millis(1)).await;

        let futures: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|v| manager.submit_command(&device_id(), Command::set_text("input", v)))
            .collect();
        for future in futures {
            future.await.unwrap();
        }

        assert_eq!(
            *device.written.lock(),
            vec![
                b"input=a".to_vec(),
                b"input=b".to_vec(),
                b"input=c".to_vec()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_returns_backpressure() {
        let device = SimulatedDevice::new();
        device.set_latency(Duration::from_secs(5));
        device.respond(&["n=1"]);
        let manager = manager(&device);

        manager
            .register_device(
                device_id(),
                config().with_command_queue_capacity(1),
                Arc::new(TextCodec::new()),
            )
            .unwrap();
        // Let the worker start its first (slow) poll
        sleep(Duration::from_millis(1)).await;

        let queued = manager.submit_command(&device_id(), Command::switch("power", OnOff::On));
        let rejected = manager.submit_command(&device_id(), Command::switch("power", OnOff::Off));

        assert!(!queued.is_rejected());
        assert!(rejected.is_rejected());
        assert!(matches!(rejected.await, Err(SessionError::Backpressure)));
        assert!(queued.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn command_while_disconnected_fails() {
        let device = SimulatedDevice::new();
        *device.fail_opens.lock() = true;
        let manager = manager(&device);

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        sleep(Duration::from_millis(1)).await;

        let result = manager
            .submit_command(&device_id(), Command::switch("power", OnOff::On))
            .await;
        assert!(matches!(result, Err(SessionError::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_reconnects_and_polls() {
        let device = SimulatedDevice::new();
        *device.fail_opens.lock() = true;
        let manager = manager(&device);

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        sleep(Duration::from_millis(1)).await;

        *device.fail_opens.lock() = false;
        device.respond(&["n=5"]);
        let state = manager.refresh(&device_id()).await.unwrap().unwrap();

        assert_eq!(state.get("n"), Some(&StateValue::Number(5.0)));
        assert_eq!(
            manager.connection_state(&device_id()),
            Some(ConnectionState::Connected)
        );
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn unregister_discards_in_flight_poll() {
        let device = SimulatedDevice::new();
        device.set_latency(Duration::from_secs(5));
        device.respond(&["n=1"]);
        let manager = manager(&device);
        let mut bus = manager.subscribe();

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        sleep(Duration::from_secs(1)).await;

        assert!(manager.unregister_device(&device_id()));
        assert!(!manager.unregister_device(&device_id()));
        sleep(Duration::from_secs(30)).await;

        // The poll finished on the device, but nobody heard about it
        assert_eq!(device.reads.load(Ordering::SeqCst), 1);

        let mut events = Vec::new();
        while let Ok(event) = bus.try_recv() {
            events.push(event);
        }
        assert!(events.iter().all(|e| e.state().is_none()));
        assert_eq!(
            events.last(),
            Some(&DeviceEvent::Unregistered {
                device: device_id()
            })
        );
        assert_eq!(manager.device_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_commands_are_cancelled_on_unregister() {
        let device = SimulatedDevice::new();
        device.set_latency(Duration::from_secs(5));
        device.respond(&["n=1"]);
        let manager = manager(&device);

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        sleep(Duration::from_millis(1)).await;

        let pending = manager.refresh(&device_id());
        manager.unregister_device(&device_id());

        assert!(matches!(pending.await, Err(SessionError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn listener_can_unregister_its_device() {
        let device = SimulatedDevice::new();
        device.respond(&["n=1", "n=2"]);
        let manager = Arc::new(manager(&device));
        let seen = Arc::new(AtomicUsize::new(0));

        {
            let manager_ref = Arc::downgrade(&manager);
            let seen = Arc::clone(&seen);
            manager.add_listener(device_id(), move |event| {
                if event.state().is_some() {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if let Some(manager) = manager_ref.upgrade() {
                        manager.unregister_device(event.device());
                    }
                }
                Ok(())
            });
        }

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        sleep(Duration::from_secs(30)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(manager.device_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn listeners_can_unregister_each_others_devices() {
        let device = SimulatedDevice::new();
        device.respond(&["n=1"; 8]);
        let manager = Arc::new(manager(&device));
        let a = DeviceIdentity::new("simulated-a").unwrap();
        let b = DeviceIdentity::new("simulated-b").unwrap();
        let unregistered = Arc::new(AtomicUsize::new(0));

        for (own, other) in [(a.clone(), b.clone()), (b.clone(), a.clone())] {
            let manager_ref = Arc::downgrade(&manager);
            let unregistered = Arc::clone(&unregistered);
            manager.add_listener(own, move |event| {
                match event {
                    DeviceEvent::StateUpdated { .. } => {
                        // Keep this device's dispatch busy while the other one runs
                        std::thread::sleep(Duration::from_millis(100));
                        if let Some(manager) = manager_ref.upgrade() {
                            manager.unregister_device(&other);
                        }
                    }
                    DeviceEvent::Unregistered { .. } => {
                        unregistered.fetch_add(1, Ordering::SeqCst);
                    }
                    _ => {}
                }
                Ok(())
            });
        }

        for id in [&a, &b] {
            manager
                .register_device(id.clone(), config(), Arc::new(TextCodec::new()))
                .unwrap();
        }
        sleep(Duration::from_millis(500)).await;

        // Whichever device is left goes from async code
        manager.unregister_device(&a);
        manager.unregister_device(&b);

        tokio::time::timeout(Duration::from_secs(5), async {
            while unregistered.load(Ordering::SeqCst) < 2 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("both devices announce Unregistered");

        sleep(Duration::from_millis(100)).await;
        assert_eq!(unregistered.load(Ordering::SeqCst), 2);
        assert_eq!(manager.device_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_stuck_workers() {
        let device = SimulatedDevice::new();
        device.set_latency(Duration::from_secs(3600));
        let manager = manager(&device);

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        sleep(Duration::from_millis(1)).await;
        let pending = manager.refresh(&device_id());

        let start = Instant::now();
        manager.shutdown(Duration::from_secs(2)).await;
        assert_eq!(Instant::now().duration_since(start), Duration::from_secs(2));

        assert!(matches!(pending.await, Err(SessionError::Cancelled)));
        assert_eq!(manager.device_count(), 0);
        assert!(matches!(
            manager.register_device(device_id(), config(), Arc::new(TextCodec::new())),
            Err(RegisterError::ShuttingDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_idle_sessions() {
        let device = SimulatedDevice::new();
        device.respond(&["n=1"]);
        let manager = manager(&device);
        let mut bus = manager.subscribe();

        manager
            .register_device(device_id(), config(), Arc::new(TextCodec::new()))
            .unwrap();
        sleep(Duration::from_secs(1)).await;
        manager.shutdown(Duration::from_secs(2)).await;

        let mut last_connection = None;
        while let Ok(event) = bus.try_recv() {
            if let DeviceEvent::ConnectionChanged { to, .. } = event {
                last_connection = Some(to);
            }
        }
        assert_eq!(last_connection, Some(ConnectionState::Disconnected));
    }
}
