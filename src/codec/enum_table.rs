// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounds-checked lookup of raw integer codes.

use std::sync::Arc;

use crate::error::DecodeError;

/// Names for the raw integer codes a device reports for one field.
///
/// Devices encode modes, zone states and error conditions as small
/// integers. A firmware update can add codes the binding does not know;
/// [`lookup`](Self::lookup) reports those as
/// [`DecodeError::UnknownFieldValue`] instead of indexing out of range.
///
/// # Examples
///
/// ```
/// use pollbind::codec::EnumTable;
///
/// let modes = EnumTable::new(["off", "heat", "cool", "auto"]);
/// assert_eq!(modes.lookup("mode", 2).unwrap(), "cool");
/// assert!(modes.lookup("mode", 9).is_err());
/// assert_eq!(modes.position("auto"), Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumTable {
    names: Arc<[String]>,
}

impl EnumTable {
    /// Creates a table where the code of each name is its index.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the name for a raw code.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownFieldValue`] naming `field` and the raw
    /// value when the code is negative or beyond the table.
    pub fn lookup(&self, field: &str, raw: i64) -> Result<&str, DecodeError> {
        usize::try_from(raw)
            .ok()
            .and_then(|index| self.names.get(index))
            .map(String::as_str)
            .ok_or_else(|| DecodeError::UnknownFieldValue {
                field: field.to_string(),
                value: raw,
            })
    }

    /// Returns the code for a name, ignoring ASCII case.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    /// Returns the number of known codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if the table has no codes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone_states() -> EnumTable {
        EnumTable::new(["secure", "not_ready", "trouble"])
    }

    #[test]
    fn lookup_known_codes() {
        let table = zone_states();
        assert_eq!(table.lookup("zone", 0).unwrap(), "secure");
        assert_eq!(table.lookup("zone", 2).unwrap(), "trouble");
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn lookup_out_of_range_reports_value() {
        let err = zone_states().lookup("zone_status", 3).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnknownFieldValue { ref field, value: 3 } if field == "zone_status"
        ));
    }

    #[test]
    fn lookup_negative_code() {
        let err = zone_states().lookup("zone", -1).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownFieldValue { value: -1, .. }));
    }

    #[test]
    fn empty_table_rejects_everything() {
        let table = EnumTable::new(Vec::<String>::new());
        assert!(table.is_empty());
        assert!(table.lookup("x", 0).is_err());
    }

    #[test]
    fn position_ignores_case() {
        assert_eq!(zone_states().position("TROUBLE"), Some(2));
        assert_eq!(zone_states().position("armed"), None);
    }
}
