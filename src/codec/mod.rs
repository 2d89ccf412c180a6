// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire formats: translating device bytes into typed values and back.
//!
//! A [`Codec`] is pure and stateless. It never touches the network; the
//! device session hands it whatever the transport read and writes whatever
//! it encodes.
//!
//! # Shipped codecs
//!
//! - [`JsonCodec`] - JSON object payloads (REST devices, MQTT JSON topics)
//! - [`BinaryCodec`] - Fixed-offset checksummed frames (alarm panels, RS-232)
//! - [`TextCodec`] - Delimited `channel=value` pairs (line protocols)
//!
//! Codecs are shared between devices of the same binding through a
//! [`CodecRegistry`].

mod binary;
mod enum_table;
mod json;
mod text;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DecodeError, EncodeError};
use crate::types::{Command, State};

pub use binary::{BinaryCodec, FieldKind, FieldLayout};
pub use enum_table::EnumTable;
pub use json::JsonCodec;
pub use text::TextCodec;

/// Translates between transport bytes and typed values.
pub trait Codec: Send + Sync {
    /// Decodes one device response into a state snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the bytes are not a valid response. A
    /// codec never returns a partial snapshot.
    fn decode(&self, bytes: &[u8]) -> Result<State, DecodeError>;

    /// Encodes a command into the bytes to write.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the command cannot be represented.
    fn encode(&self, command: &Command) -> Result<Vec<u8>, EncodeError>;

    /// Bytes to write before each poll read, for devices that only answer
    /// when queried. `None` means the device reports on its own.
    fn poll_request(&self) -> Option<Vec<u8>> {
        None
    }

    /// Returns `true` if the device answers this command with a reply that
    /// must be read and matched.
    fn reply_expected(&self, command: &Command) -> bool {
        let _ = command;
        false
    }

    /// Decodes the reply to `command`.
    ///
    /// Returns the state carried by the reply, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnexpectedReply`] when the reply belongs to a
    /// different command.
    fn decode_reply(&self, command: &Command, bytes: &[u8]) -> Result<Option<State>, DecodeError> {
        let _ = command;
        self.decode(bytes).map(Some)
    }
}

/// A codec that can also read back the commands it encodes.
///
/// For any command `c` the codec supports,
/// `decode_command(encode(c))` yields a command of the same kind.
pub trait SymmetricCodec: Codec {
    /// Decodes command bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the bytes are not a valid command.
    fn decode_command(&self, bytes: &[u8]) -> Result<Command, DecodeError>;
}

/// Codecs by binding name.
///
/// Used to register devices from a
/// [`ManagerConfig`](crate::config::ManagerConfig), where each entry names
/// its binding.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use pollbind::codec::{CodecRegistry, JsonCodec};
///
/// let mut codecs = CodecRegistry::new();
/// codecs.register("shelly", Arc::new(JsonCodec::new()));
///
/// assert!(codecs.get("shelly").is_some());
/// assert!(codecs.get("unknown").is_none());
/// ```
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a codec for a binding, replacing any previous one.
    pub fn register(&mut self, binding: impl Into<String>, codec: Arc<dyn Codec>) {
        self.codecs.insert(binding.into(), codec);
    }

    /// Adds a codec, builder style.
    #[must_use]
    pub fn with(mut self, binding: impl Into<String>, codec: Arc<dyn Codec>) -> Self {
        self.register(binding, codec);
        self
    }

    /// Returns the codec for a binding.
    #[must_use]
    pub fn get(&self, binding: &str) -> Option<Arc<dyn Codec>> {
        self.codecs.get(binding).cloned()
    }

    /// Returns the number of registered bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// Returns `true` if no codec is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bindings: Vec<_> = self.codecs.keys().collect();
        bindings.sort();
        f.debug_struct("CodecRegistry")
            .field("bindings", &bindings)
            .finish()
    }
}
