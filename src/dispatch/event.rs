// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event types.

use serde::Serialize;

use crate::identity::DeviceIdentity;
use crate::session::ConnectionState;
use crate::types::{CorrelationId, State};

/// Events delivered to listeners and to event bus subscribers.
///
/// Every event names the device it concerns. Per device, events arrive in
/// the order the worker produced them.
///
/// # Examples
///
/// ```
/// use pollbind::DeviceIdentity;
/// use pollbind::dispatch::DeviceEvent;
/// use pollbind::session::ConnectionState;
///
/// let device = DeviceIdentity::new("pump")?;
/// let event = DeviceEvent::connection_changed(
///     device.clone(),
///     ConnectionState::Connecting,
///     ConnectionState::Connected,
/// );
///
/// assert_eq!(event.device(), &device);
/// assert!(event.is_connection());
/// # Ok::<(), pollbind::error::IdentityError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// A device was registered.
    Registered {
        /// The registered device.
        device: DeviceIdentity,
    },

    /// A device was unregistered. No further events follow for it.
    Unregistered {
        /// The removed device.
        device: DeviceIdentity,
    },

    /// The session's connection state changed.
    ConnectionChanged {
        /// The device.
        device: DeviceIdentity,
        /// The previous state.
        from: ConnectionState,
        /// The new state.
        to: ConnectionState,
    },

    /// A poll or command produced a new state snapshot.
    StateUpdated {
        /// The device.
        device: DeviceIdentity,
        /// The complete new snapshot.
        state: State,
    },

    /// A submitted command finished.
    CommandCompleted {
        /// The device.
        device: DeviceIdentity,
        /// The command's correlation id.
        correlation_id: CorrelationId,
        /// `Ok` if the device accepted the command, otherwise the error.
        result: Result<(), String>,
    },
}

impl DeviceEvent {
    /// Returns the device this event concerns.
    #[must_use]
    pub fn device(&self) -> &DeviceIdentity {
        match self {
            Self::Registered { device }
            | Self::Unregistered { device }
            | Self::ConnectionChanged { device, .. }
            | Self::StateUpdated { device, .. }
            | Self::CommandCompleted { device, .. } => device,
        }
    }

    /// Returns `true` if this is a registration event.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Registered { .. } | Self::Unregistered { .. })
    }

    /// Returns `true` if this is a connection event.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::ConnectionChanged { .. })
    }

    /// Returns the new state, if this is a state update.
    #[must_use]
    pub fn state(&self) -> Option<&State> {
        match self {
            Self::StateUpdated { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Creates a connection change event.
    #[must_use]
    pub fn connection_changed(
        device: DeviceIdentity,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Self {
        Self::ConnectionChanged { device, from, to }
    }

    /// Creates a state update event.
    #[must_use]
    pub fn state_updated(device: DeviceIdentity, state: State) -> Self {
        Self::StateUpdated { device, state }
    }
}
