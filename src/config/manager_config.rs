// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manager-level configuration loaded from JSON.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::identity::DeviceIdentity;

use super::DeviceConfig;

/// One device entry in a [`ManagerConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// The device identity.
    pub id: DeviceIdentity,
    /// The device configuration.
    #[serde(flatten)]
    pub config: DeviceConfig,
}

/// Configuration for a [`DeviceManager`](crate::manager::DeviceManager) and
/// the devices it should register at startup.
///
/// Loading only parses and validates; each entry's `binding` selects the
/// codec from a [`CodecRegistry`](crate::codec::CodecRegistry) when the
/// devices are registered.
///
/// # Examples
///
/// ```
/// use pollbind::config::ManagerConfig;
///
/// let config = ManagerConfig::from_json_str(r#"{
///     "devices": [
///         {
///             "id": "projector-1",
///             "binding": "sonyprojector",
///             "connection": { "type": "tcp", "host": "192.168.1.60", "port": 53484 }
///         }
///     ]
/// }"#)?;
///
/// assert_eq!(config.devices.len(), 1);
/// # Ok::<(), pollbind::error::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Capacity of the broadcast event bus.
    pub event_capacity: usize,
    /// How long [`shutdown`](crate::manager::DeviceManager::shutdown) waits
    /// for in-flight work before force-closing transports.
    #[serde(rename = "shutdown_grace_ms", with = "super::millis")]
    pub shutdown_grace: Duration,
    /// Devices to register.
    pub devices: Vec<DeviceEntry>,
}

impl ManagerConfig {
    /// Default event bus capacity.
    pub const DEFAULT_EVENT_CAPACITY: usize = 256;
    /// Default shutdown grace period.
    pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed input and
    /// [`ConfigError::Invalid`] for entries that fail validation.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// same errors as [`from_json_str`](Self::from_json_str).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            devices = config.devices.len(),
            "Loaded device configuration"
        );
        Ok(config)
    }

    /// Checks every entry and rejects duplicate identities.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending device.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for entry in &self.devices {
            if !seen.insert(&entry.id) {
                return Err(ConfigError::Invalid {
                    device: entry.id.to_string(),
                    reason: "duplicate device identity".to_string(),
                });
            }
            entry
                .config
                .validate()
                .map_err(|reason| ConfigError::Invalid {
                    device: entry.id.to_string(),
                    reason,
                })?;
        }
        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
            shutdown_grace: Self::DEFAULT_SHUTDOWN_GRACE,
            devices: Vec::new(),
        }
    }
}
