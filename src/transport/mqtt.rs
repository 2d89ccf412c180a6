// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT publish/subscribe transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::{ConnectionConfig, DeviceConfig};
use crate::error::{ConnectError, TransportError};

use super::Transport;

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default MQTT port.
const DEFAULT_PORT: u16 = 1883;

/// Transport for devices reachable through an MQTT broker.
///
/// The device publishes its state on `<topic>/state` and accepts commands on
/// `<topic>/set`. Only the latest state publish is kept: each
/// [`read`](Transport::read) returns the newest publish not read yet, or
/// waits for the device to report one. Older unread publishes are
/// superseded.
#[derive(Debug)]
pub struct MqttTransport {
    host: String,
    port: u16,
    topic: String,
    credentials: Option<(String, String)>,
    connect_timeout: Duration,
    link: Option<Link>,
}

#[derive(Debug)]
struct Link {
    client: AsyncClient,
    messages: watch::Receiver<Vec<u8>>,
    event_task: JoinHandle<()>,
}

impl MqttTransport {
    /// Creates a closed transport from an MQTT device configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidAddress`] for an unparsable broker URL
    /// and [`ConnectError::Unsupported`] for a non-MQTT configuration.
    pub fn from_config(config: &DeviceConfig) -> Result<Self, ConnectError> {
        let ConnectionConfig::Mqtt {
            broker_url,
            topic,
            credentials,
        } = &config.connection
        else {
            return Err(ConnectError::Unsupported(config.connection.address()));
        };

        let (host, port) = parse_mqtt_url(broker_url)?;

        Ok(Self {
            host,
            port,
            topic: topic.trim_end_matches('/').to_string(),
            credentials: credentials.clone(),
            connect_timeout: config.timeout,
            link: None,
        })
    }

    /// Returns the topic the device publishes its state on.
    #[must_use]
    pub fn state_topic(&self) -> String {
        format!("{}/state", self.topic)
    }

    /// Returns the topic commands are published to.
    #[must_use]
    pub fn command_topic(&self) -> String {
        format!("{}/set", self.topic)
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn open(&mut self) -> Result<(), ConnectError> {
        if self.link.is_some() {
            return Ok(());
        }

        // Generate a unique client ID (PID + counter to avoid conflicts)
        let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("pollbind_{}_{}", std::process::id(), counter);

        let mut options = MqttOptions::new(&client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 10);
        let (message_tx, messages) = watch::channel(Vec::new());
        let (connected_tx, connected_rx) = oneshot::channel();

        let state_topic = self.state_topic();
        client
            .subscribe(&state_topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| ConnectError::Setup(e.to_string()))?;

        tracing::debug!(address = %self.address(), client_id = %client_id, "Opening MQTT connection");

        let event_task = tokio::spawn(handle_mqtt_events(
            event_loop,
            state_topic,
            message_tx,
            connected_tx,
        ));

        let outcome = tokio::time::timeout(self.connect_timeout, connected_rx).await;
        match outcome {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(reason))) => {
                event_task.abort();
                return Err(ConnectError::Unreachable {
                    address: self.address(),
                    source: std::io::Error::other(reason),
                });
            }
            Ok(Err(_)) => {
                event_task.abort();
                return Err(ConnectError::Unreachable {
                    address: self.address(),
                    source: std::io::Error::other("MQTT event loop stopped"),
                });
            }
            Err(_) => {
                event_task.abort();
                return Err(ConnectError::Timeout {
                    address: self.address(),
                    timeout: self.connect_timeout,
                });
            }
        }

        self.link = Some(Link {
            client,
            messages,
            event_task,
        });
        Ok(())
    }

    async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let link = self.link.as_mut().ok_or(TransportError::Closed)?;

        match tokio::time::timeout(timeout, link.messages.changed()).await {
            Ok(Ok(())) => Ok(link.messages.borrow_and_update().clone()),
            Ok(Err(_)) => {
                self.link = None;
                Err(TransportError::Closed)
            }
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let topic = self.command_topic();
        let link = self.link.as_ref().ok_or(TransportError::Closed)?;

        tracing::debug!(topic = %topic, bytes = bytes.len(), "Publishing MQTT command");

        link.client
            .publish(&topic, QoS::AtLeastOnce, false, bytes.to_vec())
            .await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(link) = self.link.take() {
            tracing::debug!(address = %self.address(), "Closing MQTT connection");
            if let Err(e) = link.client.disconnect().await {
                tracing::debug!(error = %e, "MQTT disconnect request failed");
            }
            link.event_task.abort();
        }
    }

    fn is_open(&self) -> bool {
        self.link.is_some()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

/// Parses an MQTT URL into host and port.
fn parse_mqtt_url(url: &str) -> Result<(String, u16), ConnectError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| ConnectError::InvalidAddress(format!("invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), DEFAULT_PORT)
    };

    if host.is_empty() {
        return Err(ConnectError::InvalidAddress("broker host is empty".to_string()));
    }

    Ok((host, port))
}

/// Drives the MQTT event loop until it fails or the transport is closed.
async fn handle_mqtt_events(
    mut event_loop: EventLoop,
    state_topic: String,
    message_tx: watch::Sender<Vec<u8>>,
    connected_tx: oneshot::Sender<Result<(), String>>,
) {
    let mut connected_tx = Some(connected_tx);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT connected");
                if let Some(tx) = connected_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.topic != state_topic {
                    continue;
                }
                tracing::debug!(
                    topic = %publish.topic,
                    bytes = publish.payload.len(),
                    "Received MQTT message"
                );
                if message_tx.is_closed() {
                    break;
                }
                message_tx.send_replace(publish.payload.to_vec());
            }
            Ok(_) => {}
            Err(e) => {
                match connected_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e.to_string()));
                    }
                    None => tracing::warn!(error = %e, "MQTT event loop error"),
                }
                break;
            }
        }
    }
}
