// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Completion handle for a submitted command.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::SessionError;
use crate::types::{CorrelationId, State};

/// Outcome of a command: the state the device reported in its reply, if any.
pub type CommandResult = Result<Option<State>, SessionError>;

/// Resolves once the device worker has applied a submitted command.
///
/// Submission never blocks. A command rejected at submission (unknown
/// device, full queue) resolves immediately with that error. If the device
/// is unregistered before the command runs, it resolves with
/// [`SessionError::Cancelled`].
///
/// Dropping the future does not withdraw the command.
#[derive(Debug)]
#[must_use = "a CommandFuture reports whether the device accepted the command"]
pub struct CommandFuture {
    correlation_id: CorrelationId,
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Rejected(Option<SessionError>),
    Pending(oneshot::Receiver<CommandResult>),
}

impl CommandFuture {
    pub(crate) fn pending(
        correlation_id: CorrelationId,
        receiver: oneshot::Receiver<CommandResult>,
    ) -> Self {
        Self {
            correlation_id,
            inner: Inner::Pending(receiver),
        }
    }

    pub(crate) fn rejected(correlation_id: CorrelationId, error: SessionError) -> Self {
        Self {
            correlation_id,
            inner: Inner::Rejected(Some(error)),
        }
    }

    /// Returns the correlation id of the submitted command.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns `true` if the command was rejected without being queued.
    pub fn is_rejected(&self) -> bool {
        matches!(self.inner, Inner::Rejected(_))
    }
}

impl Future for CommandFuture {
    type Output = CommandResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Rejected(error) => {
                Poll::Ready(Err(error.take().unwrap_or(SessionError::Cancelled)))
            }
            Inner::Pending(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(SessionError::Cancelled))),
        }
    }
}
