// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device and manager configuration.
//!
//! Configuration values are built either in code with the `with_*` builder
//! methods or deserialized from JSON. A [`DeviceConfig`] is immutable for the
//! lifetime of its session: to change it, unregister the device and register
//! it again.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use pollbind::config::{BackoffPolicy, DeviceConfig};
//!
//! let config = DeviceConfig::tcp("192.168.1.60", 4999)
//!     .with_binding("sonyprojector")
//!     .with_poll_interval(Duration::from_secs(15))
//!     .with_backoff(BackoffPolicy::new().with_max_delay(Duration::from_secs(120)));
//!
//! assert_eq!(config.poll_interval, Duration::from_secs(15));
//! ```

mod backoff;
mod device_config;
mod manager_config;

pub use backoff::BackoffPolicy;
pub use device_config::{ConnectionConfig, DeviceConfig, Framing};
pub use manager_config::{DeviceEntry, ManagerConfig};

/// Serde helper storing a [`Duration`](std::time::Duration) as milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        s.serialize_u64(ms)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
