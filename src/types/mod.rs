// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types exchanged between codecs, sessions and listeners.
//!
//! # Types
//!
//! - [`State`] - Immutable snapshot of everything a device reported in one poll
//! - [`StateValue`] - A single typed channel value
//! - [`OnOff`] - Two-position switch value
//! - [`Command`] - Outbound instruction with a [`CorrelationId`]
//! - [`CommandKind`] - What the command does

mod command;
mod state;

pub use command::{Command, CommandKind, CorrelationId};
pub use state::{OnOff, State, StateBuilder, StateValue};
