use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    aspect::error::ConfigurationError,
    channel::channel::Channel,
    context::error::ReplicationError,
    sendable::{
        error::check_fatal,
        handle::SendableHandle,
        message_flags::MessageFlags,
        sendable::{OutgoingSendable, Sendable, SendableKind},
        sendable_queue::{RetiredSendable, SendableStateUpdate},
    },
    types::{ChannelId, ObjectId, RmiId},
};

use super::rmi_request::{AttachmentPoint, RmiListener, RmiRequest};

struct PendingRmi {
    request: RmiRequest,
    outstanding: HashSet<(ChannelId, SendableHandle)>,
    waiting: HashSet<ChannelId>,
}

impl PendingRmi {
    fn is_settled(&self) -> bool {
        self.outstanding.is_empty() && self.waiting.is_empty()
    }

    fn notify_ack(&self, channel: ChannelId, acked: bool) {
        if let Some(listener) = &self.request.listener {
            listener.on_ack(channel, self.request.user_id, acked);
        }
    }
}

struct WaitingRmi {
    rmi_id: RmiId,
    channel: ChannelId,
    required: Vec<ObjectId>,
    queued_at: Instant,
}

/// Turns RMI requests into one sendable per destination channel and tracks
/// them until every destination reached a terminal state
pub struct RmiDispatcher {
    next_id: RmiId,
    pending: HashMap<RmiId, PendingRmi>,
    waitlist: Vec<WaitingRmi>,
    waitlist_ttl: Duration,
}

impl RmiDispatcher {
    pub fn new(waitlist_ttl: Duration) -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            waitlist: Vec::new(),
            waitlist_ttl,
        }
    }

    /// Queues `request` on every given channel. A channel that does not know
    /// a required object yet gets the RMI once that object's spawn exists,
    /// unless the request is flagged `DISCARD_IF_NO_ENTITY`.
    ///
    /// Returns `None` if no channel received or is waiting for the RMI.
    pub fn dispatch(
        &mut self,
        request: RmiRequest,
        channels: Vec<&mut Channel>,
        now: Instant,
    ) -> Result<Option<RmiId>, ReplicationError> {
        if channels.is_empty() {
            debug!("{} has no destination", request.description);
            return Ok(None);
        }

        let rmi_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let required = request.required_objects();
        let discard = request.flags.contains(MessageFlags::DISCARD_IF_NO_ENTITY);
        let mut pending = PendingRmi {
            request,
            outstanding: HashSet::new(),
            waiting: HashSet::new(),
        };

        for channel in channels {
            let known = required.iter().all(|object| channel.has_seen_spawn(object));
            if known {
                match Self::enqueue(rmi_id, &pending.request, channel) {
                    Ok(handle) => {
                        pending.outstanding.insert((channel.id(), handle));
                    }
                    Err(error) => {
                        if !pending.is_settled() {
                            self.pending.insert(rmi_id, pending);
                        }
                        return Err(error);
                    }
                }
            } else if discard {
                debug!(
                    "{} discarded on {}, dependent object not spawned",
                    pending.request.description,
                    channel.id()
                );
            } else {
                pending.waiting.insert(channel.id());
                self.waitlist.push(WaitingRmi {
                    rmi_id,
                    channel: channel.id(),
                    required: required.clone(),
                    queued_at: now,
                });
            }
        }

        if pending.is_settled() {
            return Ok(None);
        }
        self.pending.insert(rmi_id, pending);
        Ok(Some(rmi_id))
    }

    /// Queues every waiting RMI whose required objects are now known to
    /// `channel`
    pub fn release_waiting(&mut self, channel: &mut Channel) -> Result<(), ReplicationError> {
        let channel_id = channel.id();
        let mut ready = Vec::new();
        self.waitlist.retain(|waiting| {
            if waiting.channel == channel_id
                && waiting
                    .required
                    .iter()
                    .all(|object| channel.has_seen_spawn(object))
            {
                ready.push(waiting.rmi_id);
                false
            } else {
                true
            }
        });

        for rmi_id in ready {
            let Some(pending) = self.pending.get_mut(&rmi_id) else {
                continue;
            };
            pending.waiting.remove(&channel_id);
            info!("{} released on {}", pending.request.description, channel_id);
            let handle = Self::enqueue(rmi_id, &pending.request, channel)?;
            pending.outstanding.insert((channel_id, handle));
        }
        Ok(())
    }

    pub fn on_sent(&self, channel: ChannelId, outgoing: &OutgoingSendable) {
        let SendableKind::Rmi { rmi_id, .. } = outgoing.kind else {
            return;
        };
        let Some(pending) = self.pending.get(&rmi_id) else {
            return;
        };
        if let Some(listener) = &pending.request.listener {
            listener.on_send(channel, pending.request.user_id, outgoing.order);
        }
    }

    /// Settles one destination sendable of an RMI
    pub fn on_retired(&mut self, channel: ChannelId, retired: &RetiredSendable) {
        let acked = retired.update == SendableStateUpdate::Ack && !retired.discarded;
        self.settle(channel, &retired.handle, retired.sendable.kind(), acked);
    }

    /// Settles a destination sendable that was cancelled before being sent
    pub fn on_removed(&mut self, channel: ChannelId, handle: &SendableHandle, kind: &SendableKind) {
        self.settle(channel, handle, kind, false);
    }

    /// Drops every waiting RMI that needs `object`
    pub fn drop_object(&mut self, object: &ObjectId) {
        let mut dropped = Vec::new();
        self.waitlist.retain(|waiting| {
            if waiting.required.contains(object) {
                dropped.push((waiting.rmi_id, waiting.channel));
                false
            } else {
                true
            }
        });
        for (rmi_id, channel) in dropped {
            self.drop_waiting(rmi_id, channel, "dependent object unbound");
        }
    }

    /// Forgets everything addressed to `channel`
    pub fn drop_channel(&mut self, channel: ChannelId) {
        let mut dropped = Vec::new();
        self.waitlist.retain(|waiting| {
            if waiting.channel == channel {
                dropped.push(waiting.rmi_id);
                false
            } else {
                true
            }
        });
        for rmi_id in dropped {
            self.drop_waiting(rmi_id, channel, "channel closed");
        }

        let mut settled = Vec::new();
        for (rmi_id, pending) in self.pending.iter_mut() {
            let before = pending.outstanding.len();
            pending.outstanding.retain(|(destination, _)| *destination != channel);
            if pending.outstanding.len() != before {
                pending.notify_ack(channel, false);
            }
            if pending.is_settled() {
                settled.push(*rmi_id);
            }
        }
        for rmi_id in settled {
            self.pending.remove(&rmi_id);
        }
    }

    /// Drops waiting RMIs older than the waitlist TTL
    pub fn expire(&mut self, now: Instant) {
        let ttl = self.waitlist_ttl;
        let mut expired = Vec::new();
        self.waitlist.retain(|waiting| {
            if now.saturating_duration_since(waiting.queued_at) >= ttl {
                expired.push((waiting.rmi_id, waiting.channel));
                false
            } else {
                true
            }
        });
        for (rmi_id, channel) in expired {
            self.drop_waiting(rmi_id, channel, "waited too long for dependent object");
        }
    }

    /// Detaches `listener` from every outstanding request. Returns true if
    /// any request held it.
    pub fn remove_listener(&mut self, listener: &Arc<dyn RmiListener>) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        let mut removed = false;
        for pending in self.pending.values_mut() {
            let holds = pending
                .request
                .listener
                .as_ref()
                .is_some_and(|held| Arc::as_ptr(held) as *const () == target);
            if holds {
                pending.request.listener = None;
                removed = true;
            }
        }
        removed
    }

    /// Drops everything, telling listeners their RMIs were not delivered
    pub fn clear(&mut self) {
        for pending in self.pending.values() {
            for (channel, _) in &pending.outstanding {
                pending.notify_ack(*channel, false);
            }
            for channel in &pending.waiting {
                pending.notify_ack(*channel, false);
            }
        }
        self.pending.clear();
        self.waitlist.clear();
    }

    pub fn is_pending(&self, rmi_id: &RmiId) -> bool {
        self.pending.contains_key(rmi_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waitlist.len()
    }

    // Private

    fn enqueue(
        rmi_id: RmiId,
        request: &RmiRequest,
        channel: &mut Channel,
    ) -> Result<SendableHandle, ReplicationError> {
        let mut after: Vec<SendableHandle> = request
            .required_objects()
            .iter()
            .filter_map(|object| channel.live_spawn(object))
            .collect();
        let updates = channel.queue().queued_aspect_updates(&request.object);
        if request.attachment == AttachmentPoint::PostAttach {
            after.extend(updates.iter().copied());
        }

        let sendable = Sendable::new(
            &request.description,
            request.reliability,
            SendableKind::Rmi {
                object: request.object,
                function: request.function,
                rmi_id,
            },
            request.payload.clone(),
        )
        .with_flags(request.flags)
        .with_priority_delta(request.priority_delta);

        let queue = channel.queue_mut();
        let handle = check_fatal(queue.add_sendable(sendable, &after))?;

        if request.attachment == AttachmentPoint::PreAttach {
            for update in updates {
                if let Err(error) = queue.add_dependency(&update, &handle) {
                    queue.remove_sendable(&handle);
                    return Err(ConfigurationError::RmiOrderingConflict {
                        object_id: request.object.to_string(),
                        function: request.function,
                        attachment: request.attachment.name(),
                        reason: error.to_string(),
                    }
                    .into());
                }
            }
            channel.record_pre_attach_rmi(request.object, handle);
        }

        Ok(handle)
    }

    fn settle(
        &mut self,
        channel: ChannelId,
        handle: &SendableHandle,
        kind: &SendableKind,
        acked: bool,
    ) {
        let SendableKind::Rmi { rmi_id, .. } = kind else {
            return;
        };
        let Some(pending) = self.pending.get_mut(rmi_id) else {
            return;
        };
        if !pending.outstanding.remove(&(channel, *handle)) {
            return;
        }
        pending.notify_ack(channel, acked);
        if pending.is_settled() {
            self.pending.remove(rmi_id);
        }
    }

    fn drop_waiting(&mut self, rmi_id: RmiId, channel: ChannelId, reason: &str) {
        let Some(pending) = self.pending.get_mut(&rmi_id) else {
            return;
        };
        if !pending.waiting.remove(&channel) {
            return;
        }
        warn!("{} dropped on {}: {}", pending.request.description, channel, reason);
        pending.notify_ack(channel, false);
        if pending.is_settled() {
            self.pending.remove(&rmi_id);
        }
    }
}
