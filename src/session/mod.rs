// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device sessions: one transport and one codec per device, with
//! connection health tracking.

mod connection_state;
mod device_session;
mod stats;

pub use connection_state::ConnectionState;
pub use device_session::{DeviceSession, TransitionObserver};
pub use stats::SessionStats;
