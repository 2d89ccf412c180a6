// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `pollbind` - polling and command-dispatch core for smart-home device
//! bindings.
//!
//! A binding describes how to reach a device ([`config::DeviceConfig`]) and
//! how to read its wire format ([`codec::Codec`]). This library does the
//! rest: connecting, polling on an interval with backoff on failure,
//! serializing commands, and notifying listeners.
//!
//! # Layers
//!
//! - [`transport`]: byte-level connections (TCP, HTTP, MQTT)
//! - [`codec`]: bytes to typed [`State`] and [`Command`] back to bytes
//! - [`session`]: one transport and one codec, with connection health
//! - [`scheduler`]: poll timing with jitter and exponential backoff
//! - [`dispatch`]: listener fan-out and the bounded command queue
//! - [`manager`]: the [`DeviceManager`] façade running one worker per device
//!
//! # Features
//!
//! - `http` (default): HTTP transport via `reqwest`
//! - `mqtt` (default): MQTT transport via `rumqttc`
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pollbind::codec::{BinaryCodec, EnumTable, FieldKind, FieldLayout};
//! use pollbind::config::DeviceConfig;
//! use pollbind::dispatch::DeviceEvent;
//! use pollbind::{Command, DeviceIdentity, DeviceManager, OnOff};
//!
//! #[tokio::main]
//! async fn main() -> pollbind::Result<()> {
//!     let layout = FieldLayout::new()
//!         .field("power", 0, FieldKind::Switch)
//!         .field("brightness", 1, FieldKind::Level)
//!         .field("mode", 2, FieldKind::Enum(EnumTable::new(["auto", "eco", "boost"])));
//!
//!     let manager = DeviceManager::new();
//!     let heater = DeviceIdentity::new("bathroom-heater")?;
//!
//!     manager.add_listener(heater.clone(), |event| {
//!         if let DeviceEvent::StateUpdated { state, .. } = event {
//!             println!("mode: {:?}", state.get("mode"));
//!         }
//!         Ok(())
//!     });
//!
//!     manager.register_device(
//!         heater.clone(),
//!         DeviceConfig::tcp("192.168.1.80", 8899).with_poll_interval(Duration::from_secs(5)),
//!         Arc::new(BinaryCodec::new(layout)),
//!     )?;
//!
//!     manager
//!         .submit_command(&heater, Command::switch("power", OnOff::On))
//!         .await?;
//!
//!     manager.shutdown(Duration::from_secs(2)).await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
mod identity;
pub mod manager;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use identity::DeviceIdentity;
pub use manager::DeviceManager;
pub use types::{Command, CommandKind, CorrelationId, OnOff, State, StateValue};
