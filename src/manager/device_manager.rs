// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device manager coordinating the workers of many devices.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{Codec, CodecRegistry};
use crate::config::{DeviceConfig, ManagerConfig};
use crate::dispatch::{
    CommandFuture, CommandSender, DeviceEvent, Dispatcher, ListenerError, ListenerHandle,
    command_queue,
};
use crate::error::{Error, RegisterError, SessionError};
use crate::identity::DeviceIdentity;
use crate::session::{ConnectionState, SessionStats};
use crate::transport::{ConfiguredTransports, TransportFactory};
use crate::types::{Command, State};

use super::worker::{DeviceShared, FAR_FUTURE, StopSignal, Worker};

/// A registered device: its worker and the channels into it.
struct DeviceHandle {
    config: DeviceConfig,
    commands: CommandSender,
    stop: oneshot::Sender<StopSignal>,
    task: JoinHandle<()>,
    shared: Arc<DeviceShared>,
}

impl DeviceHandle {
    /// Signals the worker to stop after its current operation.
    fn stop(self) -> JoinHandle<()> {
        // The worker may already have exited
        let _ = self.stop.send(StopSignal::Shutdown);
        self.task
    }
}

/// Manager for polling and commanding many devices.
///
/// Every registered device gets its own worker task, which owns the device
/// session. Polls and commands for one device therefore never overlap, while
/// different devices run independently.
///
/// # Events
///
/// Listeners added with [`add_listener`](Self::add_listener) receive the
/// events of one device; [`subscribe`](Self::subscribe) returns a receiver
/// for the events of all devices. Per device, events are delivered in the
/// order the worker produced them, starting with
/// [`Registered`](DeviceEvent::Registered) and ending with
/// [`Unregistered`](DeviceEvent::Unregistered).
///
/// # Runtime
///
/// Registering a device spawns a task, so it must happen inside a tokio
/// runtime.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use pollbind::codec::JsonCodec;
/// use pollbind::config::DeviceConfig;
/// use pollbind::manager::DeviceManager;
/// use pollbind::types::{Command, OnOff};
/// use pollbind::DeviceIdentity;
///
/// #[tokio::main]
/// async fn main() -> pollbind::Result<()> {
///     let manager = DeviceManager::new();
///     let plug = DeviceIdentity::mac("60:01:94:aa:bb:cc")?;
///
///     manager.add_listener(plug.clone(), |event| {
///         println!("{event:?}");
///         Ok(())
///     });
///
///     let config = DeviceConfig::http("192.168.1.50")
///         .with_poll_interval(Duration::from_secs(30));
///     manager.register_device(plug.clone(), config, Arc::new(JsonCodec::new()))?;
///
///     manager
///         .submit_command(&plug, Command::switch("power", OnOff::On))
///         .await?;
///
///     manager.shutdown(Duration::from_secs(5)).await;
///     Ok(())
/// }
/// ```
pub struct DeviceManager {
    devices: RwLock<HashMap<DeviceIdentity, DeviceHandle>>,
    dispatcher: Arc<Dispatcher>,
    factory: Arc<dyn TransportFactory>,
    shutdown_grace: Duration,
    shutting_down: AtomicBool,
}

impl DeviceManager {
    /// Creates a manager using the built-in transports.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(ManagerConfig::DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a manager whose event bus buffers up to `event_capacity`
    /// events per subscriber.
    #[must_use]
    pub fn with_capacity(event_capacity: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            dispatcher: Arc::new(Dispatcher::with_capacity(event_capacity)),
            factory: Arc::new(ConfiguredTransports),
            shutdown_grace: ManagerConfig::DEFAULT_SHUTDOWN_GRACE,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Replaces the factory that builds a transport for each device.
    #[must_use]
    pub fn with_transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Creates a manager and registers every device of `config`.
    ///
    /// Each entry's `binding` selects its codec from `codecs`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Register`] for the first entry that cannot be
    /// registered; devices registered before it keep running until the
    /// returned manager is dropped.
    pub fn from_config(config: &ManagerConfig, codecs: &CodecRegistry) -> Result<Self, Error> {
        let mut manager = Self::with_capacity(config.event_capacity);
        manager.shutdown_grace = config.shutdown_grace;
        manager.register_from_config(config, codecs)?;
        Ok(manager)
    }

    /// Returns the grace period configured for [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a device and starts polling it.
    ///
    /// The first poll runs immediately; later polls follow the device's
    /// interval and backoff policy.
    ///
    /// # Errors
    ///
    /// - [`RegisterError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`RegisterError::InvalidConfig`] if the configuration is not usable
    /// - [`RegisterError::AlreadyRegistered`] if the identity is taken
    /// - [`RegisterError::Transport`] if no transport can be built
    pub fn register_device(
        &self,
        id: DeviceIdentity,
        config: DeviceConfig,
        codec: Arc<dyn Codec>,
    ) -> Result<(), RegisterError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(RegisterError::ShuttingDown);
        }
        config.validate().map_err(RegisterError::InvalidConfig)?;

        let mut devices = self.devices.write();
        if devices.contains_key(&id) {
            return Err(RegisterError::AlreadyRegistered(id));
        }

        let transport = self.factory.create(&config)?;
        let shared = Arc::new(DeviceShared::new(id.clone(), Arc::clone(&self.dispatcher)));
        let (commands, queue) = command_queue(config.command_queue_capacity);
        let (stop, stop_rx) = oneshot::channel();

        let worker = Worker::new(
            transport,
            codec,
            &config,
            Arc::clone(&shared),
            queue,
            stop_rx,
        );
        let task = tokio::spawn(worker.run());

        tracing::info!(
            device = %id,
            name = %config.display_name(),
            address = %config.connection.address(),
            "Registered device"
        );

        devices.insert(
            id,
            DeviceHandle {
                config,
                commands,
                stop,
                task,
                shared,
            },
        );
        Ok(())
    }

    /// Registers every device of `config`, selecting codecs by binding.
    ///
    /// Returns the number of devices registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Register`] for the first entry without a known
    /// binding or that fails registration. Earlier entries stay registered.
    pub fn register_from_config(
        &self,
        config: &ManagerConfig,
        codecs: &CodecRegistry,
    ) -> Result<usize, Error> {
        for entry in &config.devices {
            let binding = entry.config.binding.as_deref().ok_or_else(|| {
                RegisterError::InvalidConfig(format!("device {} has no binding", entry.id))
            })?;
            let codec = codecs.get(binding).ok_or_else(|| {
                RegisterError::InvalidConfig(format!("no codec registered for binding {binding}"))
            })?;
            self.register_device(entry.id.clone(), entry.config.clone(), codec)?;
        }
        Ok(config.devices.len())
    }

    /// Unregisters a device.
    ///
    /// Event delivery for the device stops immediately. A poll or command
    /// in flight completes on the device and its result is discarded; queued
    /// commands resolve with [`SessionError::Cancelled`]. The device's
    /// listeners are removed from the manager and receive
    /// [`Unregistered`](DeviceEvent::Unregistered) as their last event once
    /// the worker has stopped.
    ///
    /// Never blocks on a running listener, so it may be called from any
    /// listener or task.
    ///
    /// Returns `false` if the device was not registered.
    pub fn unregister_device(&self, id: &DeviceIdentity) -> bool {
        let Some(handle) = self.devices.write().remove(id) else {
            return false;
        };

        handle.shared.deactivate();
        let listeners = self.dispatcher.listeners().detach_device(id);
        let count = listeners.len();

        if let Err(StopSignal::Unregister(listeners)) =
            handle.stop.send(StopSignal::Unregister(listeners))
        {
            // The worker is gone, so announce it here
            handle.shared.announce_unregistered(&listeners);
        }

        tracing::info!(device = %id, listeners = count, "Unregistered device");
        true
    }

    /// Returns the identities of all registered devices, sorted.
    #[must_use]
    pub fn device_ids(&self) -> Vec<DeviceIdentity> {
        let mut ids: Vec<_> = self.devices.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns `true` if the device is registered.
    #[must_use]
    pub fn contains(&self, id: &DeviceIdentity) -> bool {
        self.devices.read().contains_key(id)
    }

    /// Returns the configuration a device was registered with.
    #[must_use]
    pub fn config(&self, id: &DeviceIdentity) -> Option<DeviceConfig> {
        self.devices.read().get(id).map(|d| d.config.clone())
    }

    // =========================================================================
    // Listeners and subscription
    // =========================================================================

    /// Adds a listener for one device's events.
    ///
    /// The device need not be registered yet. A listener may add or remove
    /// listeners, or unregister devices, from inside its callback; listener
    /// changes apply from the next event on.
    pub fn add_listener<F>(&self, id: DeviceIdentity, listener: F) -> ListenerHandle
    where
        F: Fn(&DeviceEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.dispatcher.listeners().add(id, listener)
    }

    /// Removes a listener. Returns `false` if it was already removed.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.dispatcher.listeners().remove(&handle)
    }

    /// Subscribes to the events of all devices.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.dispatcher.bus().subscribe()
    }

    /// Returns the number of active event subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.dispatcher.bus().subscriber_count()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Queues a command for a device.
    ///
    /// Never blocks. The returned future resolves once the device worker has
    /// applied the command, or immediately with
    /// [`SessionError::UnknownDevice`] or [`SessionError::Backpressure`] if
    /// the command could not be queued.
    pub fn submit_command(&self, id: &DeviceIdentity, command: Command) -> CommandFuture {
        match self.devices.read().get(id) {
            Some(device) => device.commands.submit(command),
            None => CommandFuture::rejected(
                command.correlation_id(),
                SessionError::UnknownDevice(id.clone()),
            ),
        }
    }

    /// Polls a device as soon as its worker is free, reconnecting if needed.
    pub fn refresh(&self, id: &DeviceIdentity) -> CommandFuture {
        self.submit_command(id, Command::refresh())
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Returns a device's connection state.
    #[must_use]
    pub fn connection_state(&self, id: &DeviceIdentity) -> Option<ConnectionState> {
        self.devices
            .read()
            .get(id)
            .map(|d| d.shared.connection_state())
    }

    /// Returns the most recent state a device reported.
    ///
    /// `Some(None)` means the device is registered but has not reported yet.
    #[must_use]
    pub fn last_state(&self, id: &DeviceIdentity) -> Option<Option<State>> {
        self.devices.read().get(id).map(|d| d.shared.last_state())
    }

    /// Creates a watch receiver for a device's state.
    #[must_use]
    pub fn watch_state(&self, id: &DeviceIdentity) -> Option<watch::Receiver<Option<State>>> {
        self.devices.read().get(id).map(|d| d.shared.watch_state())
    }

    /// Returns a device's session counters.
    #[must_use]
    pub fn stats(&self, id: &DeviceIdentity) -> Option<SessionStats> {
        self.devices.read().get(id).map(|d| d.shared.stats())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stops every device.
    ///
    /// Workers finish their current operation and close their transports.
    /// Workers still running after `grace` are aborted, which drops their
    /// transports. Further registrations fail with
    /// [`RegisterError::ShuttingDown`].
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, Ordering::Release);

        let tasks: Vec<(DeviceIdentity, JoinHandle<()>)> = self
            .devices
            .write()
            .drain()
            .map(|(id, handle)| (id, handle.stop()))
            .collect();

        tracing::info!(devices = tasks.len(), ?grace, "Shutting down");

        let now = tokio::time::Instant::now();
        let deadline = now.checked_add(grace).unwrap_or(now + FAR_FUTURE);
        for (id, mut task) in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!(device = %id, "Worker did not stop in time, aborting");
                task.abort();
            }
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceManager")
            .field("devices", &self.device_ids())
            .field("dispatcher", &self.dispatcher)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
