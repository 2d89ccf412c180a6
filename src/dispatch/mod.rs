// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event fan-out and command fan-in.
//!
//! Outbound, every [`DeviceEvent`] goes to the listeners registered for its
//! device and then to the [`EventBus`]. Inbound, commands pass through a
//! bounded per-device queue and resolve a [`CommandFuture`] once applied.

mod command_future;
mod command_queue;
mod event;
mod event_bus;
mod listeners;

pub use command_future::{CommandFuture, CommandResult};
pub(crate) use command_queue::{CommandSender, QueuedCommand, command_queue};
pub use event::DeviceEvent;
pub use event_bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub(crate) use listeners::DetachedListeners;
pub use listeners::{ListenerError, ListenerHandle, ListenerRegistry};

/// Delivers events to per-device listeners and bus subscribers.
#[derive(Debug, Default)]
pub struct Dispatcher {
    listeners: ListenerRegistry,
    bus: EventBus,
}

impl Dispatcher {
    /// Creates a dispatcher whose bus buffers up to `capacity` events per
    /// subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: ListenerRegistry::new(),
            bus: EventBus::with_capacity(capacity),
        }
    }

    /// Returns the listener registry.
    #[must_use]
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Returns the event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Notifies the device's listeners, then publishes on the bus.
    pub fn dispatch(&self, event: DeviceEvent) {
        let delivered = self.listeners.notify(&event);
        tracing::trace!(device = %event.device(), listeners = delivered, "Dispatched event");
        self.bus.publish(event);
    }

    /// Notifies listeners already detached from the registry, then publishes
    /// on the bus.
    pub(crate) fn dispatch_to(&self, listeners: &DetachedListeners, event: DeviceEvent) {
        let delivered = listeners::deliver(listeners, &event);
        tracing::trace!(device = %event.device(), listeners = delivered, "Dispatched event");
        self.bus.publish(event);
    }
}
