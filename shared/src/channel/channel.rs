use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    config::ReplicationConfig,
    establish::{
        context_establisher::{ContextEstablisher, EstablishStep},
        context_view_state::{ChannelConnectionState, ContextViewState},
        establish_task::EstablishState,
    },
    sendable::{
        error::SendableError,
        handle::SendableHandle,
        priority::{DistancePriority, PriorityContext},
        sendable::OutgoingSendable,
        sendable_queue::{RetiredSendable, SendableQueue, SendableState, SendableStateUpdate},
    },
    types::{ChannelId, EstablishToken, ObjectId, Vec3},
};

use super::{
    ack_manager::AckManager,
    disconnect_cause::DisconnectCause,
    transport::{DeliveryHandle, DeliveryOutcome, Transport},
};

/// What became of a transport outcome
pub enum DeliveryResult {
    /// Not a delivery this channel is tracking
    Unknown,
    /// The sendable is queued again
    Requeued(SendableHandle),
    Retired(RetiredSendable),
}

/// What a channel's remote side knows about one object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjectView {
    /// Latest spawn sendable, live or retired
    pub spawn: Option<SendableHandle>,
    /// The remote acknowledged the spawn
    pub established: bool,
}

/// One logical peer connection: its send queue, its establishment state
/// machine and the bookkeeping needed to map transport outcomes back to
/// sendables
pub struct Channel {
    id: ChannelId,
    connection_state: ChannelConnectionState,
    state_entered_at: Instant,
    transport: Box<dyn Transport>,
    queue: SendableQueue,
    establisher: ContextEstablisher,
    ack_manager: AckManager,
    witness: Option<Vec3>,
    witness_object: Option<ObjectId>,
    views: HashMap<ObjectId, ObjectView>,
    // queued RMIs that later updates of their object must follow
    pre_attach_rmis: HashMap<ObjectId, Vec<SendableHandle>>,
    bandwidth_per_update: usize,
    disconnect: Option<(DisconnectCause, String)>,
}

impl Channel {
    pub fn new(
        id: ChannelId,
        transport: Box<dyn Transport>,
        config: &ReplicationConfig,
        now: Instant,
    ) -> Self {
        Self {
            id,
            connection_state: ChannelConnectionState::WaitingForResponse,
            state_entered_at: now,
            transport,
            queue: SendableQueue::new(config.max_queued_sendables),
            establisher: ContextEstablisher::new(),
            ack_manager: AckManager::new(),
            witness: None,
            witness_object: None,
            views: HashMap::new(),
            pre_attach_rmis: HashMap::new(),
            bandwidth_per_update: config.bandwidth_per_update,
            disconnect: None,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    // Connection state

    pub fn connection_state(&self) -> ChannelConnectionState {
        self.connection_state
    }

    /// Moves the connection forward. Backward moves are ignored, and nothing
    /// leaves `Disconnecting`.
    pub fn set_connection_state(&mut self, state: ChannelConnectionState, now: Instant) -> bool {
        if state <= self.connection_state {
            if state != self.connection_state {
                warn!(
                    "{} ignoring connection state change {} -> {}",
                    self.id, self.connection_state, state
                );
            }
            return false;
        }
        info!("{} connection state {} -> {}", self.id, self.connection_state, state);
        self.connection_state = state;
        self.state_entered_at = now;
        true
    }

    /// For an external watchdog deciding when to disconnect with `Timeout`
    pub fn time_in_connection_state(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state_entered_at)
    }

    pub fn is_in_game(&self) -> bool {
        self.connection_state == ChannelConnectionState::InGame
    }

    pub fn is_disconnecting(&self) -> bool {
        self.connection_state == ChannelConnectionState::Disconnecting
    }

    pub fn disconnect_cause(&self) -> Option<&(DisconnectCause, String)> {
        self.disconnect.as_ref()
    }

    /// Moves to `Disconnecting` and drops all outbound work. Returns what was
    /// still live so the caller can settle listeners and bindings.
    pub fn disconnect(
        &mut self,
        cause: DisconnectCause,
        reason: &str,
        now: Instant,
    ) -> Vec<RetiredSendable> {
        if self.is_disconnecting() {
            return Vec::new();
        }
        info!("{} disconnecting ({}): {}", self.id, cause, reason);
        self.set_connection_state(ChannelConnectionState::Disconnecting, now);
        self.disconnect = Some((cause, reason.to_string()));
        self.ack_manager.clear();
        self.views.clear();
        self.pre_attach_rmis.clear();
        self.queue.clear()
    }

    // Establishment

    pub fn establisher(&self) -> &ContextEstablisher {
        &self.establisher
    }

    pub fn establisher_mut(&mut self) -> &mut ContextEstablisher {
        &mut self.establisher
    }

    pub fn view_state(&self) -> ContextViewState {
        self.establisher.state()
    }

    pub fn step_establishment(&mut self, token: EstablishToken, now: Instant) -> EstablishStep {
        let pending_spawns = self.pending_spawns();
        let mut state = EstablishState::new(
            self.establisher.state(),
            Some(self.id),
            token,
            now,
            pending_spawns,
            Some(&mut self.queue),
        );
        self.establisher.step(&mut state)
    }

    /// Forget all replicated state for a fresh establishment pass. Returns
    /// what was still live in the queue.
    pub fn reset_context(&mut self, now: Instant) -> Vec<RetiredSendable> {
        self.ack_manager.clear();
        self.views.clear();
        self.pre_attach_rmis.clear();
        self.establisher.reset();
        if self.connection_state == ChannelConnectionState::InGame {
            // the only backward move a connection makes
            self.connection_state = ChannelConnectionState::InContextInitiation;
            self.state_entered_at = now;
        }
        self.queue.clear()
    }

    // Object views

    pub fn view(&self, object: &ObjectId) -> Option<&ObjectView> {
        self.views.get(object)
    }

    /// Whether the remote side has been, or is being, told about `object`
    pub fn has_seen_spawn(&self, object: &ObjectId) -> bool {
        self.views
            .get(object)
            .is_some_and(|view| view.spawn.is_some() || view.established)
    }

    pub fn is_established(&self, object: &ObjectId) -> bool {
        self.views.get(object).is_some_and(|view| view.established)
    }

    pub fn record_spawn(&mut self, object: ObjectId, handle: SendableHandle) {
        let view = self.views.entry(object).or_default();
        view.spawn = Some(handle);
        view.established = false;
    }

    pub fn mark_established(&mut self, object: &ObjectId) {
        if let Some(view) = self.views.get_mut(object) {
            view.established = true;
        }
    }

    pub fn remove_view(&mut self, object: &ObjectId) -> Option<ObjectView> {
        self.views.remove(object)
    }

    /// Spawns queued or in flight that the remote has not acknowledged yet
    pub fn pending_spawns(&self) -> usize {
        self.views
            .values()
            .filter(|view| view.spawn.is_some() && !view.established)
            .count()
    }

    /// The spawn sendable of `object` if it is still live in the queue
    pub fn live_spawn(&self, object: &ObjectId) -> Option<SendableHandle> {
        let handle = self.views.get(object)?.spawn?;
        if self.queue.contains(&handle) {
            Some(handle)
        } else {
            None
        }
    }

    pub fn record_pre_attach_rmi(&mut self, object: ObjectId, handle: SendableHandle) {
        self.pre_attach_rmis.entry(object).or_default().push(handle);
    }

    /// Pre-attach RMIs of `object` that are still queued, oldest first
    pub fn pre_attach_rmis(&mut self, object: &ObjectId) -> Vec<SendableHandle> {
        let Some(handles) = self.pre_attach_rmis.get_mut(object) else {
            return Vec::new();
        };
        let queue = &self.queue;
        handles.retain(|handle| queue.state(handle) == Some(SendableState::Queued));
        let output = handles.clone();
        if output.is_empty() {
            self.pre_attach_rmis.remove(object);
        }
        output
    }

    // Witness

    pub fn witness(&self) -> Option<Vec3> {
        self.witness
    }

    pub fn set_witness(&mut self, witness: Option<Vec3>) {
        self.witness = witness;
    }

    /// The object whose position is this channel's witness, e.g. the player
    pub fn witness_object(&self) -> Option<ObjectId> {
        self.witness_object
    }

    pub fn set_witness_object(&mut self, object: Option<ObjectId>) {
        self.witness_object = object;
        if object.is_none() {
            self.witness = None;
        }
    }

    // Queue

    pub fn queue(&self) -> &SendableQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut SendableQueue {
        &mut self.queue
    }

    pub fn bandwidth_per_update(&self) -> usize {
        self.bandwidth_per_update
    }

    pub fn set_bandwidth_per_update(&mut self, bandwidth: usize) {
        self.bandwidth_per_update = bandwidth;
    }

    /// Drains the queue within the bandwidth budget and hands every picked
    /// sendable to the transport
    pub fn send_sendables(
        &mut self,
        now: Instant,
        config: &ReplicationConfig,
        distance: &dyn DistancePriority,
    ) -> Vec<OutgoingSendable> {
        if self.is_disconnecting() || self.connection_state < ChannelConnectionState::StartingConnection {
            return Vec::new();
        }

        let priority = PriorityContext {
            now,
            witness: self.witness,
            config: &config.priority,
            distance,
        };
        let allow_gameplay = self.is_in_game();
        let outgoing = self
            .queue
            .drain(self.bandwidth_per_update, &priority, allow_gameplay);

        for sendable in &outgoing {
            let delivery = self.transport.send(sendable);
            self.ack_manager.record(delivery, sendable.handle);
        }

        outgoing
    }

    /// Applies a transport outcome. Unknown deliveries (late outcomes of
    /// requeued sendables, or anything from before a reset) are ignored.
    pub fn process_delivery(
        &mut self,
        delivery: &DeliveryHandle,
        outcome: DeliveryOutcome,
    ) -> Result<DeliveryResult, SendableError> {
        let Some(handle) = self.ack_manager.take(delivery) else {
            debug!("{} ignoring outcome of unknown delivery {:?}", self.id, delivery);
            return Ok(DeliveryResult::Unknown);
        };
        self.apply_update(handle, outcome.to_state_update())
    }

    /// Requeues sent sendables whose outcome never arrived
    pub fn requeue_timed_out(&mut self, now: Instant, timeout: Duration) -> Vec<DeliveryResult> {
        let mut output = Vec::new();
        for handle in self.queue.timed_out(now, timeout) {
            self.ack_manager.forget(&handle);
            debug!("{} requeueing sendable {} after timeout", self.id, handle);
            match self.apply_update(handle, SendableStateUpdate::Requeue) {
                Ok(result) => output.push(result),
                Err(error) => warn!("{} {}", self.id, error),
            }
        }
        output
    }

    fn apply_update(
        &mut self,
        handle: SendableHandle,
        update: SendableStateUpdate,
    ) -> Result<DeliveryResult, SendableError> {
        match self.queue.update_state(&handle, update)? {
            Some(retired) => Ok(DeliveryResult::Retired(retired)),
            None => Ok(DeliveryResult::Requeued(handle)),
        }
    }
}
