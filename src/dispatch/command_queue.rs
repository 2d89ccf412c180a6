// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded per-device command queue.

use tokio::sync::{mpsc, oneshot};

use crate::error::SessionError;
use crate::types::Command;

use super::{CommandFuture, CommandResult};

/// A command waiting for its device worker, with the channel its result goes to.
#[derive(Debug)]
pub(crate) struct QueuedCommand {
    pub(crate) command: Command,
    reply: oneshot::Sender<CommandResult>,
}

impl QueuedCommand {
    /// Hands the result to whoever holds the command future.
    pub(crate) fn complete(self, result: CommandResult) {
        // The caller may have dropped its future
        let _ = self.reply.send(result);
    }
}

/// Producer half of a device's command queue.
#[derive(Debug, Clone)]
pub(crate) struct CommandSender {
    sender: mpsc::Sender<QueuedCommand>,
}

/// Creates a queue holding at most `capacity` pending commands.
pub(crate) fn command_queue(capacity: usize) -> (CommandSender, mpsc::Receiver<QueuedCommand>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (CommandSender { sender }, receiver)
}

impl CommandSender {
    /// Enqueues a command without waiting.
    ///
    /// A full queue rejects the command with [`SessionError::Backpressure`];
    /// a stopped worker rejects it with [`SessionError::Cancelled`].
    pub(crate) fn submit(&self, command: Command) -> CommandFuture {
        let correlation_id = command.correlation_id();
        let (reply, receiver) = oneshot::channel();

        match self.sender.try_send(QueuedCommand { command, reply }) {
            Ok(()) => CommandFuture::pending(correlation_id, receiver),
            Err(mpsc::error::TrySendError::Full(_)) => {
                CommandFuture::rejected(correlation_id, SessionError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                CommandFuture::rejected(correlation_id, SessionError::Cancelled)
            }
        }
    }
}
