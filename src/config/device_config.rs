// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::BackoffPolicy;

/// Connection parameters and runtime policy for one device.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pollbind::config::DeviceConfig;
///
/// // Raw TCP device (serial-over-IP gateways, projectors, alarm panels)
/// let config = DeviceConfig::tcp("192.168.1.60", 4999);
///
/// // HTTP device polled on a status path
/// let config = DeviceConfig::http("192.168.1.100")
///     .with_port(8080)
///     .with_http_credentials("admin", "secret")
///     .with_poll_path("/api/status");
///
/// // MQTT device with tuned runtime policy
/// let config = DeviceConfig::mqtt("mqtt://broker:1883", "robonect")
///     .with_friendly_name("Garden mower")
///     .with_poll_interval(Duration::from_secs(30))
///     .with_command_queue_capacity(4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// How to reach the device.
    pub connection: ConnectionConfig,
    /// Binding (device family / thing type) this device belongs to.
    #[serde(default)]
    pub binding: Option<String>,
    /// Optional friendly name for logs and status displays.
    #[serde(default)]
    pub friendly_name: Option<String>,
    /// Interval between polls while the device is healthy.
    #[serde(
        rename = "poll_interval_ms",
        with = "super::millis",
        default = "default_poll_interval"
    )]
    pub poll_interval: Duration,
    /// Timeout for connecting and for each transport read.
    #[serde(
        rename = "timeout_ms",
        with = "super::millis",
        default = "default_timeout"
    )]
    pub timeout: Duration,
    /// Backoff applied after failed poll cycles.
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Capacity of the per-device command queue.
    #[serde(default = "default_queue_capacity")]
    pub command_queue_capacity: usize,
    /// Consecutive link failures tolerated before the device is `Failed`.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Poll immediately after each successful command.
    #[serde(default)]
    pub refresh_after_command: bool,
}

fn default_poll_interval() -> Duration {
    DeviceConfig::DEFAULT_POLL_INTERVAL
}

fn default_timeout() -> Duration {
    DeviceConfig::DEFAULT_TIMEOUT
}

fn default_queue_capacity() -> usize {
    DeviceConfig::DEFAULT_QUEUE_CAPACITY
}

fn default_failure_threshold() -> u32 {
    1
}

impl DeviceConfig {
    /// Default poll interval.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
    /// Default connect and read timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default command queue capacity.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

    /// Creates a configuration for any connection with default policy.
    #[must_use]
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            binding: None,
            friendly_name: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
            backoff: BackoffPolicy::default(),
            command_queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            failure_threshold: 1,
            refresh_after_command: false,
        }
    }

    /// Creates a configuration for a raw TCP device.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(ConnectionConfig::Tcp {
            host: host.into(),
            port,
            framing: Framing::Chunk,
        })
    }

    /// Creates a configuration for an HTTP device.
    #[must_use]
    pub fn http(host: impl Into<String>) -> Self {
        Self::new(ConnectionConfig::Http {
            host: host.into(),
            port: 80,
            use_https: false,
            credentials: None,
            poll_path: ConnectionConfig::DEFAULT_POLL_PATH.to_string(),
            command_path: ConnectionConfig::DEFAULT_COMMAND_PATH.to_string(),
        })
    }

    /// Creates a configuration for an MQTT device.
    #[must_use]
    pub fn mqtt(broker_url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::new(ConnectionConfig::Mqtt {
            broker_url: broker_url.into(),
            topic: topic.into(),
            credentials: None,
        })
    }

    /// Sets the binding (device family) label.
    #[must_use]
    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = Some(binding.into());
        self
    }

    /// Sets a friendly name for the device.
    #[must_use]
    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = Some(name.into());
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the connect and read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the command queue capacity.
    #[must_use]
    pub fn with_command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity;
        self
    }

    /// Sets how many consecutive link failures are tolerated before the
    /// device is reported `Failed`.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Polls the device right after each successful command.
    #[must_use]
    pub fn with_refresh_after_command(mut self) -> Self {
        self.refresh_after_command = true;
        self
    }

    /// Sets HTTP credentials.
    ///
    /// Only applicable for HTTP connections.
    #[must_use]
    pub fn with_http_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        if let ConnectionConfig::Http { credentials, .. } = &mut self.connection {
            *credentials = Some((username.into(), password.into()));
        }
        self
    }

    /// Sets MQTT credentials.
    ///
    /// Only applicable for MQTT connections.
    #[must_use]
    pub fn with_mqtt_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        if let ConnectionConfig::Mqtt { credentials, .. } = &mut self.connection {
            *credentials = Some((username.into(), password.into()));
        }
        self
    }

    /// Sets the port.
    ///
    /// Applicable for TCP and HTTP connections.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        match &mut self.connection {
            ConnectionConfig::Tcp { port: p, .. } | ConnectionConfig::Http { port: p, .. } => {
                *p = port;
            }
            ConnectionConfig::Mqtt { .. } => {}
        }
        self
    }

    /// Sets how responses are split out of the byte stream.
    ///
    /// Only applicable for TCP connections.
    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        if let ConnectionConfig::Tcp { framing: f, .. } = &mut self.connection {
            *f = framing;
        }
        self
    }

    /// Enables HTTPS.
    ///
    /// Only applicable for HTTP connections. Switches the default port 80
    /// to 443.
    #[must_use]
    pub fn with_https(mut self) -> Self {
        if let ConnectionConfig::Http {
            use_https, port, ..
        } = &mut self.connection
        {
            *use_https = true;
            if *port == 80 {
                *port = 443;
            }
        }
        self
    }

    /// Sets the HTTP path requested on each poll.
    #[must_use]
    pub fn with_poll_path(mut self, path: impl Into<String>) -> Self {
        if let ConnectionConfig::Http { poll_path, .. } = &mut self.connection {
            *poll_path = path.into();
        }
        self
    }

    /// Sets the HTTP path commands are sent to.
    #[must_use]
    pub fn with_command_path(mut self, path: impl Into<String>) -> Self {
        if let ConnectionConfig::Http { command_path, .. } = &mut self.connection {
            *command_path = path.into();
        }
        self
    }

    /// Returns the friendly name if set, otherwise the connection address.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.friendly_name {
            Some(name) => name.clone(),
            None => self.connection.address(),
        }
    }

    /// Checks that the configuration can drive a session.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("poll interval must be greater than zero".to_string());
        }
        if self.timeout.is_zero() {
            return Err("timeout must be greater than zero".to_string());
        }
        if self.command_queue_capacity == 0 {
            return Err("command queue capacity must be greater than zero".to_string());
        }
        if self.failure_threshold == 0 {
            return Err("failure threshold must be at least 1".to_string());
        }
        self.connection.validate()?;
        self.backoff.validate()
    }
}

/// How a TCP byte stream is split into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Each socket read is one response.
    #[default]
    Chunk,
    /// Responses end with the given byte, which is stripped.
    Delimited(u8),
}

/// How a device is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionConfig {
    /// Raw TCP stream.
    Tcp {
        /// Device host or IP address.
        host: String,
        /// TCP port.
        port: u16,
        /// How responses are delimited (default: one socket read each).
        #[serde(default)]
        framing: Framing,
    },
    /// HTTP request/response.
    Http {
        /// Device host or IP address.
        host: String,
        /// HTTP port (default 80).
        #[serde(default = "default_http_port")]
        port: u16,
        /// Whether to use HTTPS.
        #[serde(default)]
        use_https: bool,
        /// Optional (username, password) for device authentication.
        #[serde(default)]
        credentials: Option<(String, String)>,
        /// Path requested on each poll.
        #[serde(default = "default_poll_path")]
        poll_path: String,
        /// Path commands are sent to.
        #[serde(default = "default_command_path")]
        command_path: String,
    },
    /// MQTT publish/subscribe.
    Mqtt {
        /// The MQTT broker URL (e.g., `mqtt://192.168.1.50:1883`).
        broker_url: String,
        /// The device topic.
        topic: String,
        /// Optional (username, password) for broker authentication.
        #[serde(default)]
        credentials: Option<(String, String)>,
    },
}

fn default_http_port() -> u16 {
    80
}

fn default_poll_path() -> String {
    ConnectionConfig::DEFAULT_POLL_PATH.to_string()
}

fn default_command_path() -> String {
    ConnectionConfig::DEFAULT_COMMAND_PATH.to_string()
}

impl ConnectionConfig {
    /// Default HTTP poll path.
    pub const DEFAULT_POLL_PATH: &'static str = "/status";
    /// Default HTTP command path.
    pub const DEFAULT_COMMAND_PATH: &'static str = "/cm";

    /// Returns a printable address for logs.
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            Self::Tcp { host, port, .. } => format!("{host}:{port}"),
            Self::Http {
                host,
                port,
                use_https,
                ..
            } => {
                let scheme = if *use_https { "https" } else { "http" };
                format!("{scheme}://{host}:{port}")
            }
            Self::Mqtt {
                broker_url, topic, ..
            } => format!("{broker_url}#{topic}"),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::Tcp { host, port, .. } => {
                if host.trim().is_empty() {
                    return Err("TCP host is empty".to_string());
                }
                if *port == 0 {
                    return Err("TCP port must not be 0".to_string());
                }
            }
            Self::Http {
                host,
                poll_path,
                command_path,
                ..
            } => {
                if host.trim().is_empty() {
                    return Err("HTTP host is empty".to_string());
                }
                if !poll_path.starts_with('/') || !command_path.starts_with('/') {
                    return Err("HTTP paths must start with '/'".to_string());
                }
            }
            Self::Mqtt {
                broker_url, topic, ..
            } => {
                if broker_url.trim().is_empty() {
                    return Err("MQTT broker URL is empty".to_string());
                }
                if topic.trim().is_empty() || topic.contains(['+', '#']) {
                    return Err(format!("invalid MQTT topic: {topic:?}"));
                }
            }
        }
        Ok(())
    }
}
