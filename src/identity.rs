// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identity type.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Opaque key identifying one physical device.
///
/// Bindings identify devices by whatever the hardware exposes: a network
/// address, a serial number, a UPnP UDN or a MAC address. The identity is
/// immutable once created and cheap to clone, so it is used as the map key
/// everywhere in the library.
///
/// # Examples
///
/// ```
/// use pollbind::DeviceIdentity;
///
/// let id = DeviceIdentity::new("192.168.1.40")?;
/// assert_eq!(id.as_str(), "192.168.1.40");
///
/// let mac = DeviceIdentity::mac("AA-BB-CC-00-11-22")?;
/// assert_eq!(mac.as_str(), "aa:bb:cc:00:11:22");
/// # Ok::<(), pollbind::error::IdentityError>(())
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceIdentity(Arc<str>);

impl DeviceIdentity {
    /// Creates an identity from any non-empty key.
    ///
    /// Leading and trailing whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] if the key is blank.
    pub fn new(key: impl AsRef<str>) -> Result<Self, IdentityError> {
        let key = key.as_ref().trim();
        if key.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(Arc::from(key)))
    }

    /// Creates an identity from a MAC address.
    ///
    /// Accepts `:` or `-` separated octets, or twelve bare hex digits, and
    /// normalizes to lowercase colon-separated form.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidMac`] carrying the rejected value.
    pub fn mac(mac: impl AsRef<str>) -> Result<Self, IdentityError> {
        let raw = mac.as_ref().trim();
        let digits: String = raw.chars().filter(|c| *c != ':' && *c != '-').collect();

        let grouped = if digits.len() == raw.len() {
            raw.len() == 12
        } else {
            let parts: Vec<&str> = raw.split([':', '-']).collect();
            parts.len() == 6 && parts.iter().all(|p| p.len() == 2)
        };
        if digits.len() != 12 || !grouped || !digits.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(IdentityError::InvalidMac {
                mac: raw.to_string(),
            });
        }

        let lower = digits.to_ascii_lowercase();
        let octets: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
        Ok(Self(Arc::from(octets.join(":"))))
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceIdentity({})", self.0)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for DeviceIdentity {
    type Error = IdentityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceIdentity> for String {
    fn from(id: DeviceIdentity) -> Self {
        id.0.to_string()
    }
}

impl AsRef<str> for DeviceIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
