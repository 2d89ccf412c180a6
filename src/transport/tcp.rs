// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raw TCP transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::Framing;
use crate::error::{ConnectError, TransportError};

use super::Transport;

/// Size of a single socket read.
const READ_CHUNK: usize = 4096;

/// Longest delimited response buffered before the stream is given up on.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Transport over a plain TCP socket.
///
/// Serial-over-IP gateways, projectors and alarm panels speak raw byte
/// protocols on a single socket. The socket is shared by polls and commands,
/// which is why the session serializes access to it.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pollbind::transport::{Framing, TcpTransport};
///
/// let transport = TcpTransport::new("192.168.1.60:53484", Duration::from_secs(3))
///     .with_framing(Framing::Delimited(b'\r'));
/// assert_eq!(transport.address(), "192.168.1.60:53484");
/// ```
#[derive(Debug)]
pub struct TcpTransport {
    address: String,
    connect_timeout: Duration,
    framing: Framing,
    max_frame_len: usize,
    stream: Option<TcpStream>,
    pending: Vec<u8>,
}

impl TcpTransport {
    /// Creates a closed transport for `host:port`.
    #[must_use]
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            framing: Framing::Chunk,
            max_frame_len: MAX_FRAME_LEN,
            stream: None,
            pending: Vec::new(),
        }
    }

    /// Sets the response framing.
    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Sets the longest delimited response accepted (default 64 KiB).
    #[must_use]
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Returns the dialed address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Extracts one delimited frame from the pending buffer.
    fn take_frame(&mut self, delimiter: u8) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|b| *b == delimiter)?;
        let mut frame: Vec<u8> = self.pending.drain(..=end).collect();
        frame.pop();
        Some(frame)
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Framing::Delimited(delimiter) = self.framing {
                if let Some(frame) = self.take_frame(delimiter) {
                    return Ok(frame);
                }
                if self.pending.len() > self.max_frame_len {
                    self.pending.clear();
                    return Err(TransportError::FrameTooLong {
                        limit: self.max_frame_len,
                    });
                }
            }

            let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
            let mut chunk = vec![0u8; READ_CHUNK];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                self.stream = None;
                return Err(TransportError::Closed);
            }
            chunk.truncate(n);

            match self.framing {
                Framing::Chunk => return Ok(chunk),
                Framing::Delimited(_) => self.pending.extend_from_slice(&chunk),
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<(), ConnectError> {
        if self.stream.is_some() {
            return Ok(());
        }

        tracing::debug!(address = %self.address, "Opening TCP connection");

        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(&self.address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ConnectError::Unreachable {
                    address: self.address.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(ConnectError::Timeout {
                    address: self.address.clone(),
                    timeout: self.connect_timeout,
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(address = %self.address, error = %e, "Could not set TCP_NODELAY");
        }

        self.pending.clear();
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.stream.is_none() {
            return Err(TransportError::Closed);
        }

        tokio::time::timeout(timeout, self.read_frame())
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(address = %self.address, "Closing TCP connection");
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(address = %self.address, error = %e, "TCP shutdown failed");
            }
        }
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::transport::{ConfiguredTransports, TransportFactory};
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        (listener, address)
    }

    #[tokio::test]
    async fn write_then_read_chunk() {
        let (listener, address) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let mut transport = TcpTransport::new(address, Duration::from_secs(1));
        transport.open().await.unwrap();
        assert!(transport.is_open());

        transport.write(b"PING").await.unwrap();
        let reply = transport.read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply, b"PING");

        transport.close().await;
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn delimited_frames_are_split() {
        let (listener, address) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"power=ON\ndimmer=").await.unwrap();
            socket.write_all(b"40\n").await.unwrap();
            // Keep the socket open until the client is done
            let mut buf = [0u8; 1];
            let _ = socket.read(&mut buf).await;
        });

        let mut transport =
            TcpTransport::new(address, Duration::from_secs(1)).with_framing(Framing::Delimited(b'\n'));
        transport.open().await.unwrap();

        let first = transport.read(Duration::from_secs(1)).await.unwrap();
        let second = transport.read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first, b"power=ON");
        assert_eq!(second, b"dimmer=40");
    }

    #[tokio::test]
    async fn missing_delimiter_hits_frame_limit() {
        let (listener, address) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[b'x'; 300]).await.unwrap();
            let mut buf = [0u8; 1];
            let _ = socket.read(&mut buf).await;
        });

        let mut transport = TcpTransport::new(address, Duration::from_secs(1))
            .with_framing(Framing::Delimited(b'\n'))
            .with_max_frame_len(128);
        transport.open().await.unwrap();

        let err = transport.read(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLong { limit: 128 }));
    }

    #[tokio::test]
    async fn configured_framing_reaches_transport() {
        let (listener, _) = listener().await;
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"volume=20\rmute=OFF\r").await.unwrap();
            let mut buf = [0u8; 1];
            let _ = socket.read(&mut buf).await;
        });

        let config = DeviceConfig::tcp("127.0.0.1", port).with_framing(Framing::Delimited(b'\r'));
        let mut transport = ConfiguredTransports.create(&config).unwrap();
        transport.open().await.unwrap();

        assert_eq!(transport.read(Duration::from_secs(1)).await.unwrap(), b"volume=20");
        assert_eq!(transport.read(Duration::from_secs(1)).await.unwrap(), b"mute=OFF");
    }

    #[tokio::test]
    async fn read_times_out() {
        let (listener, address) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1];
            let _ = socket.read(&mut buf).await;
        });

        let mut transport = TcpTransport::new(address, Duration::from_secs(1));
        transport.open().await.unwrap();

        let err = transport.read(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (listener, address) = listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = TcpTransport::new(address, Duration::from_secs(1));
        transport.open().await.unwrap();

        let err = transport.read(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn connect_refused_is_unreachable() {
        let (listener, address) = listener().await;
        drop(listener);

        let mut transport = TcpTransport::new(address, Duration::from_secs(1));
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn io_on_closed_transport_fails() {
        let mut transport = TcpTransport::new("127.0.0.1:1", Duration::from_secs(1));
        assert!(matches!(
            transport.write(b"x").await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.read(Duration::from_millis(10)).await,
            Err(TransportError::Closed)
        ));
    }
}
