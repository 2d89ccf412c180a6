// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device manager for polling and commanding many devices.
//!
//! The [`DeviceManager`] is the entry point for applications. It provides:
//!
//! - **Registration**: each registered device gets a worker task owning its
//!   session, polled on its own interval with backoff on failure
//! - **Commands**: a bounded per-device queue that rejects instead of
//!   blocking when full
//! - **Events**: per-device listeners and a broadcast channel for all devices
//! - **Status**: connection state, last state and session counters
//!
//! # Watching Device State
//!
//! ```no_run
//! use std::sync::Arc;
//! use pollbind::codec::TextCodec;
//! use pollbind::config::DeviceConfig;
//! use pollbind::manager::DeviceManager;
//! use pollbind::DeviceIdentity;
//!
//! # async fn example() -> pollbind::Result<()> {
//! let manager = DeviceManager::new();
//! let amp = DeviceIdentity::new("living-room-amp")?;
//! manager.register_device(
//!     amp.clone(),
//!     DeviceConfig::tcp("192.168.1.70", 23),
//!     Arc::new(TextCodec::new().with_poll_request(b"?\r".to_vec())),
//! )?;
//!
//! if let Some(mut state_rx) = manager.watch_state(&amp) {
//!     tokio::spawn(async move {
//!         while state_rx.changed().await.is_ok() {
//!             if let Some(state) = state_rx.borrow().as_ref() {
//!                 println!("volume: {:?}", state.get("volume"));
//!             }
//!         }
//!     });
//! }
//! # Ok(())
//! # }
//! ```

mod device_manager;
mod worker;

pub use device_manager::DeviceManager;
