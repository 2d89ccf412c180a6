// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device worker task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::codec::Codec;
use crate::config::DeviceConfig;
use crate::dispatch::{CommandResult, DetachedListeners, DeviceEvent, Dispatcher, QueuedCommand};
use crate::error::SessionError;
use crate::identity::DeviceIdentity;
use crate::scheduler::PollSchedule;
use crate::session::{ConnectionState, DeviceSession, SessionStats};
use crate::transport::Transport;
use crate::types::{Command, State};

/// Deadline used when the next poll is too far away to represent.
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Why a worker stops.
pub(crate) enum StopSignal {
    /// Manager shutdown; no `Unregistered` event.
    Shutdown,
    /// The device was unregistered. Its listeners were detached from the
    /// registry and receive `Unregistered` as their last event.
    Unregister(DetachedListeners),
}

/// Device status shared between the worker and the manager.
pub(crate) struct DeviceShared {
    id: DeviceIdentity,
    dispatcher: Arc<Dispatcher>,
    /// Cleared on unregister; the worker dispatches nothing once it is
    /// cleared. No lock is held while listeners run.
    active: AtomicBool,
    connection: RwLock<ConnectionState>,
    stats: RwLock<SessionStats>,
    state: watch::Sender<Option<State>>,
}

impl DeviceShared {
    pub(crate) fn new(id: DeviceIdentity, dispatcher: Arc<Dispatcher>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            id,
            dispatcher,
            active: AtomicBool::new(true),
            connection: RwLock::new(ConnectionState::Disconnected),
            stats: RwLock::new(SessionStats::default()),
            state,
        }
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.connection.read().clone()
    }

    pub(crate) fn stats(&self) -> SessionStats {
        self.stats.read().clone()
    }

    pub(crate) fn last_state(&self) -> Option<State> {
        self.state.borrow().clone()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<Option<State>> {
        self.state.subscribe()
    }

    /// Stops event delivery.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Dispatches `Unregistered` to listeners detached on unregister.
    pub(crate) fn announce_unregistered(&self, listeners: &DetachedListeners) {
        self.dispatcher.dispatch_to(
            listeners,
            DeviceEvent::Unregistered {
                device: self.id.clone(),
            },
        );
    }

    fn emit(&self, event: DeviceEvent) {
        if self.is_active() {
            self.dispatcher.dispatch(event);
        }
    }

    fn publish_state(&self, state: State) {
        if !self.is_active() {
            tracing::debug!(device = %self.id, "Discarding state of unregistered device");
            return;
        }
        self.state.send_replace(Some(state.clone()));
        self.dispatcher
            .dispatch(DeviceEvent::state_updated(self.id.clone(), state));
    }

    fn transition(&self, from: &ConnectionState, to: &ConnectionState) {
        *self.connection.write() = to.clone();
        self.emit(DeviceEvent::connection_changed(
            self.id.clone(),
            from.clone(),
            to.clone(),
        ));
    }
}

/// Owns one device session and serializes its polls and commands.
///
/// The loop prefers, in order: the stop signal, a due poll, queued
/// commands. Commands run between polls, and a steady command load cannot
/// hold back a poll past its deadline. The first poll runs immediately.
pub(crate) struct Worker {
    session: DeviceSession,
    schedule: PollSchedule,
    commands: mpsc::Receiver<QueuedCommand>,
    stop: oneshot::Receiver<StopSignal>,
    shared: Arc<DeviceShared>,
    refresh_after_command: bool,
}

impl Worker {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        codec: Arc<dyn Codec>,
        config: &DeviceConfig,
        shared: Arc<DeviceShared>,
        commands: mpsc::Receiver<QueuedCommand>,
        stop: oneshot::Receiver<StopSignal>,
    ) -> Self {
        let observer = Arc::clone(&shared);
        let session = DeviceSession::new(shared.id.clone(), transport, codec, config)
            .with_observer(move |from, to| observer.transition(from, to));

        Self {
            session,
            schedule: PollSchedule::from_config(config),
            commands,
            stop,
            shared,
            refresh_after_command: config.refresh_after_command,
        }
    }

    pub(crate) async fn run(mut self) {
        let device = self.shared.id.clone();
        tracing::info!(%device, "Device worker started");
        self.shared.emit(DeviceEvent::Registered {
            device: device.clone(),
        });

        let mut next_poll = Instant::now();
        let signal = loop {
            tokio::select! {
                biased;

                signal = &mut self.stop => break signal.unwrap_or(StopSignal::Shutdown),

                () = tokio::time::sleep_until(next_poll) => {
                    self.poll_cycle().await;
                    next_poll = self.next_poll_deadline();
                }

                queued = self.commands.recv() => {
                    let Some(queued) = queued else { break StopSignal::Shutdown };
                    self.handle_command(queued).await;
                }
            }
        };

        self.session.disconnect().await;
        self.sync_stats();

        self.commands.close();
        while let Ok(queued) = self.commands.try_recv() {
            queued.complete(Err(SessionError::Cancelled));
        }

        if let StopSignal::Unregister(listeners) = &signal {
            self.shared.announce_unregistered(listeners);
        }
        tracing::info!(%device, "Device worker stopped");
    }

    fn next_poll_deadline(&self) -> Instant {
        let delay = self.schedule.next_delay();
        tracing::trace!(
            device = %self.shared.id,
            delay_ms = delay.as_millis(),
            "Next poll scheduled"
        );
        let now = Instant::now();
        now.checked_add(delay).unwrap_or(now + FAR_FUTURE)
    }

    async fn poll_cycle(&mut self) {
        match self.poll_once().await {
            Ok(state) => {
                self.schedule.record_success();
                self.shared.publish_state(state);
            }
            Err(e) => {
                self.schedule.record_failure();
                tracing::debug!(
                    device = %self.shared.id,
                    failures = self.schedule.failures(),
                    error = %e,
                    "Poll cycle failed"
                );
            }
        }
        self.sync_stats();
    }

    /// Connects if needed, then polls.
    async fn poll_once(&mut self) -> Result<State, SessionError> {
        if !self.session.is_connected() {
            self.session.connect().await?;
        }
        self.session.poll().await
    }

    async fn handle_command(&mut self, queued: QueuedCommand) {
        let result = self.execute(&queued.command).await;
        self.sync_stats();

        if let Err(e) = &result {
            tracing::warn!(
                device = %self.shared.id,
                command = queued.command.kind().name(),
                correlation_id = %queued.command.correlation_id(),
                error = %e,
                "Command failed"
            );
        }

        self.shared.emit(DeviceEvent::CommandCompleted {
            device: self.shared.id.clone(),
            correlation_id: queued.command.correlation_id(),
            result: result.as_ref().map(|_| ()).map_err(ToString::to_string),
        });
        queued.complete(result);
    }

    async fn execute(&mut self, command: &Command) -> CommandResult {
        if command.is_refresh() {
            let state = self.poll_once().await?;
            self.shared.publish_state(state.clone());
            return Ok(Some(state));
        }

        let reply = self.session.send_command(command).await?;
        if let Some(state) = &reply {
            self.shared.publish_state(state.clone());
        }

        if self.refresh_after_command {
            match self.session.poll().await {
                Ok(state) => {
                    self.shared.publish_state(state.clone());
                    return Ok(Some(state));
                }
                Err(e) => {
                    tracing::debug!(
                        device = %self.shared.id,
                        error = %e,
                        "Refresh after command failed"
                    );
                }
            }
        }
        Ok(reply)
    }

    fn sync_stats(&self) {
        *self.shared.stats.write() = self.session.stats().clone();
    }
}
