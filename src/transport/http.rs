// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP request/response transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::{ConnectionConfig, DeviceConfig};
use crate::error::{ConnectError, TransportError};

use super::Transport;

/// Transport for devices exposing an HTTP API.
///
/// HTTP is stateless, so "open" only builds the client. Each poll is a `GET`
/// on the poll path. A write sends the encoded command as the `cmnd` query
/// parameter on the command path and keeps the response body, which the
/// next [`read`](Transport::read) returns as the command reply.
#[derive(Debug)]
pub struct HttpTransport {
    base_url: String,
    poll_path: String,
    command_path: String,
    credentials: Option<(String, String)>,
    timeout: Duration,
    client: Option<Client>,
    reply: Option<Vec<u8>>,
}

impl HttpTransport {
    /// Creates a closed transport from an HTTP device configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Unsupported`] if the configuration is not an
    /// HTTP connection.
    pub fn from_config(config: &DeviceConfig) -> Result<Self, ConnectError> {
        let ConnectionConfig::Http {
            host,
            port,
            use_https,
            credentials,
            poll_path,
            command_path,
        } = &config.connection
        else {
            return Err(ConnectError::Unsupported(config.connection.address()));
        };

        Ok(Self {
            base_url: base_url(host, *port, *use_https),
            poll_path: poll_path.clone(),
            command_path: command_path.clone(),
            credentials: credentials.clone(),
            timeout: config.timeout,
            client: None,
            reply: None,
        })
    }

    /// Returns the base URL of the device.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the URL for a command.
    fn command_url(&self, command: &[u8]) -> String {
        let encoded_command = urlencoding::encode_binary(command);
        format!(
            "{}{}?{}cmnd={}",
            self.base_url,
            self.command_path,
            self.auth_query(),
            encoded_command
        )
    }

    /// Builds the URL polled for state.
    fn poll_url(&self) -> String {
        let auth = self.auth_query();
        if auth.is_empty() {
            format!("{}{}", self.base_url, self.poll_path)
        } else {
            let auth = auth.trim_end_matches('&');
            let separator = if self.poll_path.contains('?') { '&' } else { '?' };
            format!("{}{}{separator}{auth}", self.base_url, self.poll_path)
        }
    }

    fn auth_query(&self) -> String {
        match &self.credentials {
            Some((username, password)) => format!(
                "user={}&password={}&",
                urlencoding::encode(username),
                urlencoding::encode(password)
            ),
            None => String::new(),
        }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::Closed)?;

        tracing::debug!(base_url = %self.base_url, "Sending HTTP request");

        let response = client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Http(e)
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TransportError::AuthenticationFailed);
        }

        if !status.is_success() {
            return Err(TransportError::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response.bytes().await?;

        tracing::debug!(bytes = body.len(), "Received HTTP response");

        Ok(body.to_vec())
    }
}

fn base_url(host: &str, port: u16, use_https: bool) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        return host.trim_end_matches('/').to_string();
    }
    let scheme = if use_https { "https" } else { "http" };
    let port_suffix = if (use_https && port == 443) || (!use_https && port == 80) {
        String::new()
    } else {
        format!(":{port}")
    };
    format!("{scheme}://{host}{port_suffix}")
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&mut self) -> Result<(), ConnectError> {
        if self.client.is_some() {
            return Ok(());
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ConnectError::Setup(e.to_string()))?;

        self.client = Some(client);
        self.reply = None;
        Ok(())
    }

    async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.client.is_none() {
            return Err(TransportError::Closed);
        }
        if let Some(reply) = self.reply.take() {
            return Ok(reply);
        }

        let url = self.poll_url();
        tokio::time::timeout(timeout, self.get(&url))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let url = self.command_url(bytes);
        let body = self.get(&url).await?;
        self.reply = Some(body);
        Ok(())
    }

    fn discard_reply(&mut self) {
        self.reply = None;
    }

    async fn close(&mut self) {
        self.client = None;
        self.reply = None;
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }
}
