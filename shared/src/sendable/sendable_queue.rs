use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use log::warn;

use crate::types::{GroupId, ObjectId, SendOrder};

use super::{
    error::SendableError,
    handle::{HandleGenerator, SendableHandle},
    message_flags::MessageFlags,
    priority::{PositionInfo, PriorityContext},
    reliability::Reliability,
    sendable::{OutgoingSendable, Sendable, SendableKind, SendableSlot},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendableState {
    Queued,
    Sent,
}

impl SendableState {
    pub fn name(&self) -> &'static str {
        match self {
            SendableState::Queued => "queued",
            SendableState::Sent => "sent",
        }
    }
}

/// Delivery feedback applied to a sent sendable
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendableStateUpdate {
    /// Delivered; retire
    Ack,
    /// Lost before delivery completed; back to pending
    Requeue,
    /// Remote refused it; retire, the producer re-derives from current state
    Nack,
    /// Permanent failure; retire without resend
    Rejected,
}

impl SendableStateUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            SendableStateUpdate::Ack => "ack",
            SendableStateUpdate::Requeue => "requeue",
            SendableStateUpdate::Nack => "nack",
            SendableStateUpdate::Rejected => "rejected",
        }
    }
}

/// A sendable that reached a terminal state and left the queue
pub struct RetiredSendable {
    pub handle: SendableHandle,
    pub sendable: Sendable,
    pub update: SendableStateUpdate,
    pub order: Option<SendOrder>,
    /// Its object was unbound while it was in flight
    pub discarded: bool,
}

struct QueueEntry {
    sendable: Sendable,
    state: SendableState,
    // queue position, kept across substitution and requeue
    seq: u64,
    after: Vec<SendableHandle>,
    order: Option<SendOrder>,
    sent_at: Option<Instant>,
    discard_on_ack: bool,
}

impl QueueEntry {
    fn is_reliable_ordered(&self) -> bool {
        self.sendable.reliability() == Reliability::ReliableOrdered
    }
}

/// Outbound work of one channel.
///
/// Sendables are held until drained, then tracked as sent until the
/// transport reports a terminal outcome. A slot maps to at most one queued
/// sendable; substituting into an occupied slot replaces the payload in
/// place.
pub struct SendableQueue {
    handle_generator: HandleGenerator,
    entries: HashMap<SendableHandle, QueueEntry>,
    slots: HashMap<SendableSlot, SendableHandle>,
    group_priorities: HashMap<GroupId, f32>,
    next_seq: u64,
    next_order: SendOrder,
    max_sendables: usize,
}

impl SendableQueue {
    pub fn new(max_sendables: usize) -> Self {
        Self {
            handle_generator: HandleGenerator::new(),
            entries: HashMap::new(),
            slots: HashMap::new(),
            group_priorities: HashMap::new(),
            next_seq: 0,
            next_order: 0,
            max_sendables,
        }
    }

    // Producers

    pub fn add_sendable(
        &mut self,
        sendable: Sendable,
        after: &[SendableHandle],
    ) -> Result<SendableHandle, SendableError> {
        if self.entries.len() >= self.max_sendables {
            return Err(SendableError::QueueOverflow {
                queued: self.entries.len(),
                limit: self.max_sendables,
            });
        }

        let handle = self.handle_generator.generate();
        if let Some(slot) = sendable.slot() {
            self.slots.insert(slot, handle);
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        self.entries.insert(
            handle,
            QueueEntry {
                sendable,
                state: SendableState::Queued,
                seq,
                after: Self::live_handles(after),
                order: None,
                sent_at: None,
                discard_on_ack: false,
            },
        );

        Ok(handle)
    }

    /// Replaces the queued sendable occupying the same slot, keeping its
    /// handle and queue position. Falls back to `add_sendable` when the slot
    /// is empty or its sendable has already been sent.
    pub fn substitute_sendable(
        &mut self,
        sendable: Sendable,
        after: &[SendableHandle],
    ) -> Result<SendableHandle, SendableError> {
        let Some(handle) = sendable
            .slot()
            .and_then(|slot| self.slots.get(&slot).copied())
        else {
            return self.add_sendable(sendable, after);
        };

        let Some(entry) = self.entries.get(&handle) else {
            panic!("SendableQueue: slot maps to missing sendable {}", handle);
        };
        if entry.state != SendableState::Queued {
            panic!("SendableQueue: slot maps to sent sendable {}", handle);
        }

        let mut merged = entry.after.clone();
        for after_handle in Self::live_handles(after) {
            if !merged.contains(&after_handle) {
                merged.push(after_handle);
            }
        }
        let reliable_ordered = sendable.reliability() == Reliability::ReliableOrdered;
        for after_handle in &merged {
            self.check_ordering(&handle, entry.seq, reliable_ordered, after_handle)?;
        }

        let Some(entry) = self.entries.get_mut(&handle) else {
            panic!("SendableQueue: slot maps to missing sendable {}", handle);
        };
        entry.sendable = sendable;
        entry.after = merged;

        Ok(handle)
    }

    /// Cancels a queued sendable. Returns false if it was already sent or is
    /// unknown.
    pub fn remove_sendable(&mut self, handle: &SendableHandle) -> bool {
        match self.entries.get(handle) {
            Some(entry) if entry.state == SendableState::Queued => {}
            _ => return false,
        }
        self.take_entry(handle);
        true
    }

    /// Constrain `handle` to be sent only after `after` has been sent
    pub fn add_dependency(
        &mut self,
        handle: &SendableHandle,
        after: &SendableHandle,
    ) -> Result<(), SendableError> {
        let Some(entry) = self.entries.get(handle) else {
            return Err(SendableError::HandleNotFound {
                handle: handle.to_string(),
            });
        };
        if entry.state != SendableState::Queued || entry.after.contains(after) {
            return Ok(());
        }
        self.check_ordering(handle, entry.seq, entry.is_reliable_ordered(), after)?;

        if let Some(entry) = self.entries.get_mut(handle) {
            entry.after.push(*after);
        }
        Ok(())
    }

    // Delivery feedback

    pub fn update_state(
        &mut self,
        handle: &SendableHandle,
        update: SendableStateUpdate,
    ) -> Result<Option<RetiredSendable>, SendableError> {
        let Some(entry) = self.entries.get_mut(handle) else {
            return Err(SendableError::HandleNotFound {
                handle: handle.to_string(),
            });
        };

        if entry.state == SendableState::Queued {
            if update == SendableStateUpdate::Requeue {
                return Ok(None);
            }
            return Err(SendableError::InvalidTransition {
                handle: handle.to_string(),
                state: entry.state.name(),
                update: update.name(),
            });
        }

        if update == SendableStateUpdate::Requeue && !entry.discard_on_ack {
            let slot = entry.sendable.slot();
            let superseded = slot.is_some_and(|slot| self.slots.contains_key(&slot));
            if !superseded {
                entry.state = SendableState::Queued;
                entry.order = None;
                entry.sent_at = None;
                if let Some(slot) = slot {
                    self.slots.insert(slot, *handle);
                }
                return Ok(None);
            }
        }

        let order = entry.order;
        let discarded = entry.discard_on_ack;
        let sendable = self.take_entry(handle);
        Ok(Some(RetiredSendable {
            handle: *handle,
            sendable,
            update,
            order,
            discarded,
        }))
    }

    /// Sent sendables whose outcome has not arrived within `timeout`
    pub fn timed_out(&self, now: Instant, timeout: Duration) -> Vec<SendableHandle> {
        let mut output: Vec<(SendOrder, SendableHandle)> = self
            .entries
            .iter()
            .filter_map(|(handle, entry)| {
                let sent_at = entry.sent_at?;
                if now.saturating_duration_since(sent_at) >= timeout {
                    Some((entry.order.unwrap_or_default(), *handle))
                } else {
                    None
                }
            })
            .collect();
        output.sort();
        output.into_iter().map(|(_, handle)| handle).collect()
    }

    // Drain

    /// Picks the sendables to hand to the transport this tick.
    ///
    /// An entry is eligible once none of its after-handles is still queued,
    /// and, if reliable-ordered, when no older reliable-ordered entry that is
    /// allowed to flow is still queued. Gameplay sendables are only eligible
    /// when `allow_gameplay` is set. `NO_SEND_DELAY` entries go first, then
    /// the highest effective priority, then queue position. An entry larger
    /// than the whole budget is taken alone at the start of a drain.
    pub fn drain(
        &mut self,
        budget: usize,
        priority: &PriorityContext,
        allow_gameplay: bool,
    ) -> Vec<OutgoingSendable> {
        let mut output = Vec::new();
        let mut remaining = budget;

        loop {
            let oldest_ordered = self
                .entries
                .values()
                .filter(|entry| {
                    entry.state == SendableState::Queued
                        && entry.is_reliable_ordered()
                        && (allow_gameplay || !Self::is_gameplay(&entry.sendable))
                })
                .map(|entry| entry.seq)
                .min();

            let mut best: Option<(bool, f32, u64, SendableHandle)> = None;
            for (handle, entry) in self.entries.iter() {
                if entry.state != SendableState::Queued {
                    continue;
                }
                if !allow_gameplay && Self::is_gameplay(&entry.sendable) {
                    continue;
                }
                if entry.is_reliable_ordered() && Some(entry.seq) != oldest_ordered {
                    continue;
                }
                if self.is_blocked(entry) {
                    continue;
                }
                let size = entry.sendable.size();
                if size > remaining && !(output.is_empty() && size > budget) {
                    continue;
                }

                let urgent = entry.sendable.flags().contains(MessageFlags::NO_SEND_DELAY);
                let base = self.base_priority(entry.sendable.group(), priority);
                let effective = priority.effective_priority(&entry.sendable, base);
                let better = match &best {
                    None => true,
                    Some((best_urgent, best_priority, best_seq, _)) => {
                        if urgent != *best_urgent {
                            urgent
                        } else if effective != *best_priority {
                            effective > *best_priority
                        } else {
                            entry.seq < *best_seq
                        }
                    }
                };
                if better {
                    best = Some((urgent, effective, entry.seq, *handle));
                }
            }

            let Some((_, _, _, handle)) = best else {
                break;
            };

            let order = self.next_order;
            self.next_order += 1;

            let Some(entry) = self.entries.get_mut(&handle) else {
                break;
            };
            entry.state = SendableState::Sent;
            entry.order = Some(order);
            entry.sent_at = Some(priority.now);
            if let Some(slot) = entry.sendable.slot() {
                if self.slots.get(&slot) == Some(&handle) {
                    self.slots.remove(&slot);
                }
            }

            let sendable = &entry.sendable;
            remaining = remaining.saturating_sub(sendable.size());
            output.push(OutgoingSendable {
                handle,
                order,
                description: sendable.description().to_string(),
                reliability: sendable.reliability(),
                flags: sendable.flags(),
                kind: sendable.kind().clone(),
                timestamp: sendable.timestamp(),
                payload: sendable.payload().to_vec(),
            });

            if remaining == 0 {
                break;
            }
        }

        output
    }

    // Bookkeeping

    pub fn set_group_priority(&mut self, group: GroupId, priority: f32) {
        self.group_priorities.insert(group, priority);
    }

    pub fn clear_group_priority(&mut self, group: &GroupId) {
        self.group_priorities.remove(group);
    }

    /// Marks a sent sendable to be retired without effect when its outcome
    /// arrives. Returns false if the handle is not in flight.
    pub fn mark_discard_on_ack(&mut self, handle: &SendableHandle) -> bool {
        match self.entries.get_mut(handle) {
            Some(entry) if entry.state == SendableState::Sent => {
                entry.discard_on_ack = true;
                true
            }
            _ => false,
        }
    }

    /// Updates the position hint of every queued sendable of `object`
    pub fn set_object_position(&mut self, object: &ObjectId, position: Option<PositionInfo>) {
        for entry in self.entries.values_mut() {
            if entry.state == SendableState::Queued
                && entry.sendable.kind().object() == Some(*object)
            {
                entry.sendable.set_position(position);
            }
        }
    }

    /// Handles of every live sendable of `object`, oldest first
    pub fn object_handles(&self, object: &ObjectId) -> Vec<(SendableHandle, SendableState)> {
        let mut output: Vec<(u64, SendableHandle, SendableState)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.sendable.kind().object() == Some(*object))
            .map(|(handle, entry)| (entry.seq, *handle, entry.state))
            .collect();
        output.sort_by_key(|(seq, _, _)| *seq);
        output
            .into_iter()
            .map(|(_, handle, state)| (handle, state))
            .collect()
    }

    /// Queued aspect updates of `object`, oldest first
    pub fn queued_aspect_updates(&self, object: &ObjectId) -> Vec<SendableHandle> {
        self.object_handles(object)
            .into_iter()
            .filter(|(handle, state)| {
                *state == SendableState::Queued
                    && self
                        .entries
                        .get(handle)
                        .is_some_and(|entry| entry.sendable.kind().is_aspect_update())
            })
            .map(|(handle, _)| handle)
            .collect()
    }

    pub fn slot_handle(&self, slot: &SendableSlot) -> Option<SendableHandle> {
        self.slots.get(slot).copied()
    }

    /// Live sendables, queued or sent, that were created for `slot`
    pub fn live_in_slot(&self, slot: &SendableSlot) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.sendable.slot() == Some(*slot))
            .count()
    }

    pub fn state(&self, handle: &SendableHandle) -> Option<SendableState> {
        self.entries.get(handle).map(|entry| entry.state)
    }

    pub fn sendable(&self, handle: &SendableHandle) -> Option<&Sendable> {
        self.entries.get(handle).map(|entry| &entry.sendable)
    }

    pub fn send_order(&self, handle: &SendableHandle) -> Option<SendOrder> {
        self.entries.get(handle).and_then(|entry| entry.order)
    }

    pub fn contains(&self, handle: &SendableHandle) -> bool {
        self.entries.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn queued_len(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state == SendableState::Queued)
            .count()
    }

    pub fn sent_len(&self) -> usize {
        self.len() - self.queued_len()
    }

    /// Drops everything, queued and in flight. Each dropped sendable is
    /// reported as `Rejected`.
    pub fn clear(&mut self) -> Vec<RetiredSendable> {
        let mut handles: Vec<(u64, SendableHandle)> = self
            .entries
            .iter()
            .map(|(handle, entry)| (entry.seq, *handle))
            .collect();
        handles.sort();

        let mut output = Vec::new();
        for (_, handle) in handles {
            let Some(entry) = self.entries.get(&handle) else {
                continue;
            };
            let order = entry.order;
            let discarded = entry.discard_on_ack;
            let sendable = self.take_entry(&handle);
            output.push(RetiredSendable {
                handle,
                sendable,
                update: SendableStateUpdate::Rejected,
                order,
                discarded,
            });
        }
        if !output.is_empty() {
            warn!("SendableQueue cleared with {} live sendables", output.len());
        }
        output
    }

    // Private

    fn is_gameplay(sendable: &Sendable) -> bool {
        if sendable.flags().contains(MessageFlags::STATE_CHANGE) {
            return false;
        }
        matches!(
            sendable.kind(),
            SendableKind::AspectUpdate { .. }
                | SendableKind::RemoteUpdateRequest { .. }
                | SendableKind::Rmi { .. }
                | SendableKind::Message
        )
    }

    fn is_blocked(&self, entry: &QueueEntry) -> bool {
        entry.after.iter().any(|after| {
            self.entries
                .get(after)
                .is_some_and(|after_entry| after_entry.state == SendableState::Queued)
        })
    }

    fn base_priority(&self, group: GroupId, priority: &PriorityContext) -> f32 {
        self.group_priorities
            .get(&group)
            .copied()
            .unwrap_or(priority.config.default_group_priority)
    }

    /// Rejects `handle` waiting on `after` if that closes a cycle, or if a
    /// reliable-ordered sendable would end up waiting, directly or through
    /// other queued sendables, on a newer reliable-ordered one. `drain` only
    /// ever offers the oldest reliable-ordered sendable, so such a wait never
    /// resolves.
    fn check_ordering(
        &self,
        handle: &SendableHandle,
        seq: u64,
        reliable_ordered: bool,
        after: &SendableHandle,
    ) -> Result<(), SendableError> {
        if after == handle || self.depends_on(after, handle) {
            return Err(SendableError::OrderingConflict {
                handle: handle.to_string(),
                after: after.to_string(),
                reason: "dependency cycle",
            });
        }

        let oldest_waiting = self
            .dependents(handle)
            .iter()
            .filter_map(|dependent| self.entries.get(dependent))
            .filter(|entry| entry.state == SendableState::Queued && entry.is_reliable_ordered())
            .map(|entry| entry.seq)
            .chain(reliable_ordered.then_some(seq))
            .min();
        let Some(oldest_waiting) = oldest_waiting else {
            return Ok(());
        };
        let newest_awaited = self
            .prerequisites(after)
            .iter()
            .filter_map(|prerequisite| self.entries.get(prerequisite))
            .filter(|entry| entry.is_reliable_ordered())
            .map(|entry| entry.seq)
            .max();
        if newest_awaited.is_some_and(|newest| newest > oldest_waiting) {
            return Err(SendableError::OrderingConflict {
                handle: handle.to_string(),
                after: after.to_string(),
                reason: "reliable-ordered sendable would wait on a newer reliable-ordered sendable",
            });
        }
        Ok(())
    }

    // queued sendables that transitively wait on `target`, excluding it
    fn dependents(&self, target: &SendableHandle) -> HashSet<SendableHandle> {
        let mut found = HashSet::new();
        let mut stack = vec![*target];
        while let Some(current) = stack.pop() {
            for (handle, entry) in self.entries.iter() {
                if entry.state == SendableState::Queued
                    && entry.after.contains(&current)
                    && *handle != *target
                    && found.insert(*handle)
                {
                    stack.push(*handle);
                }
            }
        }
        found
    }

    // `from` and every queued sendable it transitively waits on, as long as
    // the chain stays queued
    fn prerequisites(&self, from: &SendableHandle) -> HashSet<SendableHandle> {
        let mut found = HashSet::new();
        let mut stack = vec![*from];
        while let Some(current) = stack.pop() {
            let Some(entry) = self.entries.get(&current) else {
                continue;
            };
            if entry.state != SendableState::Queued || !found.insert(current) {
                continue;
            }
            stack.extend(entry.after.iter().copied());
        }
        found
    }

    // true if `from` transitively waits on `target`
    fn depends_on(&self, from: &SendableHandle, target: &SendableHandle) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![*from];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(entry) = self.entries.get(&current) else {
                continue;
            };
            for next in &entry.after {
                if next == target {
                    return true;
                }
                stack.push(*next);
            }
        }
        false
    }

    fn take_entry(&mut self, handle: &SendableHandle) -> Sendable {
        let Some(entry) = self.entries.remove(handle) else {
            panic!("SendableQueue: sendable {} does not exist", handle);
        };
        if let Some(slot) = entry.sendable.slot() {
            if self.slots.get(&slot) == Some(handle) {
                self.slots.remove(&slot);
            }
        }
        for other in self.entries.values_mut() {
            other.after.retain(|after| after != handle);
        }
        self.handle_generator.recycle(*handle);
        entry.sendable
    }

    fn live_handles(after: &[SendableHandle]) -> Vec<SendableHandle> {
        let mut output: Vec<SendableHandle> = Vec::with_capacity(after.len());
        for handle in after {
            if !handle.is_null() && !output.contains(handle) {
                output.push(*handle);
            }
        }
        output
    }
}
