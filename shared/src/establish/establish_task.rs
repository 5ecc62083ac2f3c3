use std::time::Instant;

use crate::{
    channel::disconnect_cause::DisconnectCause,
    sendable::{
        error::SendableError, handle::SendableHandle, message_flags::MessageFlags,
        sendable::Sendable, sendable_queue::SendableQueue,
    },
    types::{ChannelId, EstablishToken},
};

use super::context_view_state::ContextViewState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EstablishTaskResult {
    /// Done, move on to the next task
    Ok,
    /// Not done yet, step again next tick
    Wait,
    /// Give up; the channel disconnects with `cause`
    Failed {
        cause: DisconnectCause,
        reason: String,
    },
}

impl EstablishTaskResult {
    pub fn failed(cause: DisconnectCause, reason: &str) -> Self {
        Self::Failed {
            cause,
            reason: reason.to_string(),
        }
    }
}

/// What a task sees while it is stepped
pub struct EstablishState<'a> {
    pub view_state: ContextViewState,
    /// `None` for the context-wide establisher
    pub channel: Option<ChannelId>,
    pub token: EstablishToken,
    pub now: Instant,
    /// Spawns sent to the channel and not yet acknowledged
    pub pending_spawns: usize,
    queue: Option<&'a mut SendableQueue>,
}

impl<'a> EstablishState<'a> {
    pub fn new(
        view_state: ContextViewState,
        channel: Option<ChannelId>,
        token: EstablishToken,
        now: Instant,
        pending_spawns: usize,
        queue: Option<&'a mut SendableQueue>,
    ) -> Self {
        Self {
            view_state,
            channel,
            token,
            now,
            pending_spawns,
            queue,
        }
    }

    pub fn has_queue(&self) -> bool {
        self.queue.is_some()
    }

    /// Queue a message to the channel being established. It carries
    /// `STATE_CHANGE` so it flows before the channel is in game.
    pub fn send_message(
        &mut self,
        sendable: Sendable,
    ) -> Result<Option<SendableHandle>, SendableError> {
        let Some(queue) = self.queue.as_deref_mut() else {
            return Ok(None);
        };
        let flags = sendable.flags() | MessageFlags::STATE_CHANGE;
        queue.add_sendable(sendable.with_flags(flags), &[]).map(Some)
    }

    pub fn queue(&mut self) -> Option<&mut SendableQueue> {
        self.queue.as_deref_mut()
    }
}

/// One pluggable step of context establishment
pub trait ContextEstablishTask: Send {
    fn name(&self) -> &str;

    fn on_step(&mut self, state: &mut EstablishState) -> EstablishTaskResult;

    /// Called once, on a task that already completed, when a later task of
    /// the same pass fails
    fn on_fail_loading(&mut self) {}
}
