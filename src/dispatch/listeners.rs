// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device listener registry.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::identity::DeviceIdentity;

use super::DeviceEvent;

/// Error a listener may return; it is logged and otherwise ignored.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Shared listener callback.
type Listener = Arc<dyn Fn(&DeviceEvent) -> Result<(), ListenerError> + Send + Sync>;

/// Listeners taken out of the registry, still callable.
pub(crate) type DetachedListeners = Vec<(u64, Listener)>;

/// Handle returned by [`ListenerRegistry::add`], used to remove the listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    device: DeviceIdentity,
    id: u64,
}

impl ListenerHandle {
    /// Returns the device the listener is registered for.
    #[must_use]
    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({}#{})", self.device, self.id)
    }
}

/// Listeners by device.
///
/// Notification takes a snapshot of the device's listeners and releases the
/// lock before invoking them, so a listener may add or remove listeners
/// (itself included). Such changes apply from the next notification on.
///
/// A listener that returns an error or panics is logged and skipped; the
/// remaining listeners still receive the event.
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<DeviceIdentity, Vec<(u64, Listener)>>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a listener for one device's events.
    ///
    /// Listeners of a device are invoked in registration order.
    pub fn add<F>(&self, device: DeviceIdentity, listener: F) -> ListenerHandle
    where
        F: Fn(&DeviceEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(device.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        ListenerHandle { device, id }
    }

    /// Removes a listener. Returns `false` if it was already removed.
    pub fn remove(&self, handle: &ListenerHandle) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(&handle.device) else {
            return false;
        };

        let before = list.len();
        list.retain(|(id, _)| *id != handle.id);
        let removed = list.len() != before;

        if list.is_empty() {
            listeners.remove(&handle.device);
        }
        removed
    }

    /// Removes every listener of a device and returns how many there were.
    pub fn remove_device(&self, device: &DeviceIdentity) -> usize {
        self.listeners
            .write()
            .remove(device)
            .map_or(0, |list| list.len())
    }

    /// Removes every listener of a device and returns them.
    pub(crate) fn detach_device(&self, device: &DeviceIdentity) -> DetachedListeners {
        self.listeners.write().remove(device).unwrap_or_default()
    }

    /// Returns the number of listeners registered for a device.
    #[must_use]
    pub fn listener_count(&self, device: &DeviceIdentity) -> usize {
        self.listeners.read().get(device).map_or(0, Vec::len)
    }

    /// Delivers an event to the listeners of its device.
    ///
    /// Returns the number of listeners that handled it without error.
    pub fn notify(&self, event: &DeviceEvent) -> usize {
        let snapshot: DetachedListeners = match self.listeners.read().get(event.device()) {
            Some(list) => list.clone(),
            None => return 0,
        };
        deliver(&snapshot, event)
    }
}

/// Invokes each listener in order, isolating errors and panics.
pub(crate) fn deliver(listeners: &[(u64, Listener)], event: &DeviceEvent) -> usize {
    let mut delivered = 0;
    for (id, listener) in listeners {
        match catch_unwind(AssertUnwindSafe(|| listener(event))) {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(e)) => {
                tracing::warn!(
                    device = %event.device(),
                    listener = id,
                    error = %e,
                    "Listener returned an error"
                );
            }
            Err(payload) => {
                tracing::warn!(
                    device = %event.device(),
                    listener = id,
                    panic = panic_message(payload.as_ref()),
                    "Listener panicked"
                );
            }
        }
    }
    delivered
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<String, usize> = self
            .listeners
            .read()
            .iter()
            .map(|(device, list)| (device.to_string(), list.len()))
            .collect();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &counts)
            .finish_non_exhaustive()
    }
}
