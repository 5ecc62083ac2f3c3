use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    aspect::{
        aspect_flags::{AspectFlags, AspectIndex, AspectMask},
        aspect_table::AspectTable,
        error::ConfigurationError,
    },
    channel::{
        channel::{Channel, DeliveryResult},
        disconnect_cause::DisconnectCause,
        transport::{DeliveryHandle, DeliveryOutcome, Transport},
    },
    config::ReplicationConfig,
    constants::MAX_PROFILES_PER_ASPECT,
    establish::{
        context_establisher::{ContextEstablisher, EstablishStep},
        context_view_state::{ChannelConnectionState, ContextViewState},
        error::EstablishmentError,
        establish_task::{ContextEstablishTask, EstablishState},
        handshake::Handshake,
    },
    rmi::{
        rmi_dispatcher::RmiDispatcher,
        rmi_request::{RmiListener, RmiRequest, RmiTarget},
    },
    sendable::{
        error::check_fatal,
        handle::SendableHandle,
        message_flags::MessageFlags,
        priority::{DistancePriority, DrawDistanceFalloff, PositionInfo},
        reliability::Reliability,
        sendable::{Sendable, SendableKind, SendableSlot},
        sendable_queue::{RetiredSendable, SendableState, SendableStateUpdate},
    },
    types::{ChannelId, EstablishToken, ObjectId, Profile, RmiId, Vec3},
};

use super::{
    error::{AuthorityError, ReplicationError, RuntimeBindingError},
    events::{ContextEvent, DeliveryFailure},
    game_context::{GameContext, SynchObjectResult},
    object_binding::{AspectChannelState, ObjectBinding, SchedulingParams},
};

/// Owns every bound object and every channel, and turns binding changes into
/// sendables on the right channels.
///
/// All operations are driven from one thread; delivery outcomes are fed back
/// through `process_delivery` and pending work is flushed by `update`.
pub struct ReplicationContext {
    config: ReplicationConfig,
    game_context: Box<dyn GameContext>,
    distance: Box<dyn DistancePriority>,
    aspects: AspectTable,
    bindings: HashMap<ObjectId, ObjectBinding>,
    // unbound objects with traffic still in flight, and how much
    retiring: HashMap<ObjectId, usize>,
    channels: HashMap<ChannelId, Channel>,
    next_channel_id: u32,
    global_establisher: ContextEstablisher,
    token: EstablishToken,
    dispatcher: RmiDispatcher,
    events: Vec<ContextEvent>,
    // latest time handed in by the caller
    clock: Instant,
}

impl ReplicationContext {
    pub fn new(config: ReplicationConfig, mut game_context: Box<dyn GameContext>) -> Self {
        let token = 1;
        let mut global_establisher = ContextEstablisher::new();
        game_context.init_global_establishment_tasks(&mut global_establisher, token);
        let dispatcher = RmiDispatcher::new(config.rmi_waitlist_ttl);

        Self {
            config,
            game_context,
            distance: Box::new(DrawDistanceFalloff),
            aspects: AspectTable::new(),
            bindings: HashMap::new(),
            retiring: HashMap::new(),
            channels: HashMap::new(),
            next_channel_id: 1,
            global_establisher,
            token,
            dispatcher,
            events: Vec::new(),
            clock: Instant::now(),
        }
    }

    /// Replaces the distance term of sendable priorities
    pub fn with_distance_priority(mut self, distance: Box<dyn DistancePriority>) -> Self {
        self.distance = distance;
        self
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn aspects(&self) -> &AspectTable {
        &self.aspects
    }

    pub fn dispatcher(&self) -> &RmiDispatcher {
        &self.dispatcher
    }

    /// Current establishment token, bumped by every `change_context`
    pub fn token(&self) -> EstablishToken {
        self.token
    }

    pub fn take_events(&mut self) -> Vec<ContextEvent> {
        std::mem::take(&mut self.events)
    }

    // Aspects

    pub fn declare_aspect(
        &mut self,
        name: &str,
        index: AspectIndex,
        flags: AspectFlags,
    ) -> Result<(), ReplicationError> {
        let result = self
            .aspects
            .declare(name, index, flags)
            .map_err(ReplicationError::from);
        self.reported(result)
    }

    // Binding

    /// Binds `object` with the aspects in `mask` and spawns it on every
    /// channel that is past context initiation
    pub fn bind_object(
        &mut self,
        object: ObjectId,
        mask: AspectMask,
        is_static: bool,
    ) -> Result<(), ReplicationError> {
        let result = self.try_bind_object(object, mask, is_static);
        self.reported(result)
    }

    /// Unbinds `object`. Queued traffic for it is dropped; traffic already in
    /// flight is discarded on acknowledgement. `complete_unbind` follows once
    /// nothing in flight references the object.
    pub fn unbind_object(&mut self, object: ObjectId) -> Result<(), ReplicationError> {
        let result = self.try_unbind_object(object);
        self.reported(result)
    }

    pub fn is_bound(&self, object: &ObjectId) -> bool {
        self.bindings.contains_key(object)
    }

    /// Unbound, but some channel still has traffic for it in flight
    pub fn is_retiring(&self, object: &ObjectId) -> bool {
        self.retiring.contains_key(object)
    }

    pub fn binding(&self, object: &ObjectId) -> Option<&ObjectBinding> {
        self.bindings.get(object)
    }

    // Aspect state

    pub fn enable_aspects(
        &mut self,
        object: ObjectId,
        mask: AspectMask,
        enabled: bool,
    ) -> Result<(), ReplicationError> {
        let result = self.try_enable_aspects(object, mask, enabled);
        self.reported(result)
    }

    /// Marks aspects dirty on every channel, or only on `channel`, and
    /// derives the updates that carry their new state
    pub fn notify_aspects_changed(
        &mut self,
        object: ObjectId,
        mask: AspectMask,
        channel: Option<ChannelId>,
    ) -> Result<(), ReplicationError> {
        let result = self.try_notify_aspects_changed(object, mask, channel);
        self.reported(result)
    }

    /// Changes the profile of one aspect. The next update of that aspect on
    /// every channel carries the profile change and is reliable-ordered.
    pub fn set_aspect_profile(
        &mut self,
        object: ObjectId,
        aspect: AspectIndex,
        profile: Profile,
    ) -> Result<(), ReplicationError> {
        let result = self.try_set_aspect_profile(object, aspect, profile);
        self.reported(result)
    }

    pub fn aspect_profile(
        &self,
        object: ObjectId,
        aspect: AspectIndex,
    ) -> Result<Profile, ReplicationError> {
        let result = self.bound_aspect(&object, aspect, "read aspect profile");
        self.reported(result.map(|(binding, aspect)| {
            binding
                .aspect(aspect)
                .map(|aspect| aspect.profile)
                .unwrap_or_default()
        }))
    }

    // Authority

    /// Hands write authority over the delegatable aspects of `object` to
    /// `controller`, or takes it back with `None`
    pub fn delegate_authority(
        &mut self,
        object: ObjectId,
        controller: Option<ChannelId>,
    ) -> Result<(), ReplicationError> {
        let result = self.try_delegate_authority(object, controller);
        self.reported(result)
    }

    pub fn remote_has_authority(&self, channel: &ChannelId, object: &ObjectId) -> bool {
        self.bindings
            .get(object)
            .is_some_and(|binding| binding.controller.as_ref() == Some(channel))
    }

    /// Checks whether `channel` may write the aspects in `mask` of `object`
    pub fn accept_remote_update(
        &self,
        channel: ChannelId,
        object: ObjectId,
        mask: AspectMask,
    ) -> Result<(), ReplicationError> {
        let result = self.try_accept_remote_update(channel, object, mask);
        self.reported(result)
    }

    /// Asks the remote holding authority over `object` to resend the
    /// aspects in `mask`. Requests not yet sent are merged.
    pub fn request_remote_update(
        &mut self,
        object: ObjectId,
        mask: AspectMask,
    ) -> Result<(), ReplicationError> {
        let result = self.try_request_remote_update(object, mask);
        self.reported(result)
    }

    // Object hints

    /// Makes `parent` spawn before `object` and unbind before it
    pub fn set_parent_object(
        &mut self,
        object: ObjectId,
        parent: Option<ObjectId>,
    ) -> Result<(), ReplicationError> {
        let result = self.try_set_parent_object(object, parent);
        self.reported(result)
    }

    pub fn set_scheduling_params(
        &mut self,
        object: ObjectId,
        params: Option<SchedulingParams>,
    ) -> Result<(), ReplicationError> {
        let result = self
            .bound_mut(&object, "set scheduling params")
            .map(|binding| binding.scheduling = params);
        self.reported(result)
    }

    /// Records a pulse on `object`, temporarily boosting its sendables
    pub fn pulse_object(
        &mut self,
        object: ObjectId,
        key: u32,
        now: Instant,
    ) -> Result<(), ReplicationError> {
        let result = self.bound_mut(&object, "pulse").map(|binding| {
            if !binding.pulses().pulse(key, now) {
                debug!("{} pulse {} dropped, pulse state full", object, key);
            }
        });
        self.reported(result)
    }

    pub fn changed_transform(
        &mut self,
        object: ObjectId,
        position: Vec3,
        draw_distance: Option<f32>,
    ) -> Result<(), ReplicationError> {
        let info = PositionInfo::new(position, draw_distance);
        let result = self
            .bound_mut(&object, "change transform")
            .map(|binding| binding.position = Some(info));
        if result.is_ok() {
            for channel in self.channels.values_mut() {
                channel.queue_mut().set_object_position(&object, Some(info));
            }
        }
        self.reported(result)
    }

    // RMIs

    pub fn dispatch_rmi(
        &mut self,
        request: RmiRequest,
        target: RmiTarget,
        now: Instant,
    ) -> Result<Option<RmiId>, ReplicationError> {
        self.set_clock(now);
        let result = self.try_dispatch_rmi(request, target, now);
        self.reported(result)
    }

    pub fn remove_rmi_listener(&mut self, listener: &Arc<dyn RmiListener>) -> bool {
        self.dispatcher.remove_listener(listener)
    }

    // Channels

    pub fn add_channel(&mut self, transport: Box<dyn Transport>, now: Instant) -> ChannelId {
        self.set_clock(now);
        let id = ChannelId::new(self.next_channel_id);
        self.next_channel_id = self.next_channel_id.wrapping_add(1).max(1);

        let mut channel = Channel::new(id, transport, &self.config, now);
        self.game_context
            .init_channel_establishment_tasks(channel.establisher_mut(), id, self.token);
        self.channels.insert(id, channel);
        info!("{} added", id);
        id
    }

    /// Validates the remote's handshake. A failed handshake disconnects the
    /// channel.
    pub fn accept_handshake(
        &mut self,
        channel: ChannelId,
        handshake: &Handshake,
        now: Instant,
    ) -> Result<(), ReplicationError> {
        let result = self.try_accept_handshake(channel, handshake, now);
        self.reported(result)
    }

    pub fn disconnect_channel(
        &mut self,
        channel: ChannelId,
        cause: DisconnectCause,
        reason: &str,
        now: Instant,
    ) -> Result<(), ReplicationError> {
        let result = self.try_disconnect_channel(channel, cause, reason, now);
        self.reported(result)
    }

    /// Disconnects `channel` if needed and forgets it
    pub fn remove_channel(&mut self, channel: ChannelId, now: Instant) -> Option<Channel> {
        if self.channels.contains_key(&channel) {
            if let Err(error) = self.try_disconnect_channel(
                channel,
                DisconnectCause::UserRequested,
                "channel removed",
                now,
            ) {
                warn!("{} failed to disconnect on removal: {}", channel, error);
            }
        }
        self.channels.remove(&channel)
    }

    /// Uses the position of `object` as the channel's witness
    pub fn set_channel_witness(
        &mut self,
        channel: ChannelId,
        object: Option<ObjectId>,
    ) -> Result<(), ReplicationError> {
        let result = self
            .channel_mut_or_err(&channel)
            .map(|channel| channel.set_witness_object(object));
        self.reported(result)
    }

    pub fn set_channel_bandwidth(
        &mut self,
        channel: ChannelId,
        bandwidth: usize,
    ) -> Result<(), ReplicationError> {
        let result = self
            .channel_mut_or_err(&channel)
            .map(|channel| channel.set_bandwidth_per_update(bandwidth));
        self.reported(result)
    }

    pub fn channel(&self, channel: &ChannelId) -> Option<&Channel> {
        self.channels.get(channel)
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.channels.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn time_in_connection_state(&self, channel: &ChannelId, now: Instant) -> Option<Duration> {
        self.channels
            .get(channel)
            .map(|channel| channel.time_in_connection_state(now))
    }

    pub fn global_view_state(&self) -> ContextViewState {
        self.global_establisher.state()
    }

    /// Adds a task to the global establisher, or to `channel`'s
    pub fn add_establish_task(
        &mut self,
        channel: Option<ChannelId>,
        state: ContextViewState,
        task: Box<dyn ContextEstablishTask>,
    ) -> Result<(), ReplicationError> {
        let result = match channel {
            None => {
                self.global_establisher.add_task(state, task);
                Ok(())
            }
            Some(channel) => self
                .channel_mut_or_err(&channel)
                .map(|channel| channel.establisher_mut().add_task(state, task)),
        };
        self.reported(result)
    }

    // Per-tick

    /// Requeues timed out sendables, advances establishment and hands each
    /// channel's sendables to its transport
    pub fn update(&mut self, now: Instant) {
        self.set_clock(now);
        self.dispatcher.expire(now);

        let ids = self.channel_ids();
        for id in &ids {
            let Some(channel) = self.channels.get_mut(id) else {
                continue;
            };
            let results = channel.requeue_timed_out(now, self.config.sent_timeout);
            for result in results {
                self.handle_delivery_result(*id, result);
            }
        }

        self.step_global_establishment(now);
        if self.global_establisher.is_in_game() {
            for id in &ids {
                self.step_channel_establishment(*id, now);
            }
        }

        for id in &ids {
            self.send_channel(*id, now);
        }
    }

    /// Applies a transport outcome for a delivery on `channel`
    pub fn process_delivery(
        &mut self,
        channel: ChannelId,
        delivery: DeliveryHandle,
        outcome: DeliveryOutcome,
    ) -> Result<(), ReplicationError> {
        let result = match self.channel_mut_or_err(&channel) {
            Ok(target) => target
                .process_delivery(&delivery, outcome)
                .map_err(ReplicationError::from),
            Err(error) => Err(error),
        };
        match result {
            Ok(result) => {
                self.handle_delivery_result(channel, result);
                Ok(())
            }
            Err(error) => self.reported(Err(error)),
        }
    }

    // Teardown

    /// Drops every binding and restarts establishment on every live channel.
    /// Listeners of outstanding RMIs hear that their RMIs were not delivered.
    pub fn change_context(&mut self, now: Instant) {
        self.set_clock(now);
        info!("Changing context, establish token {} -> {}", self.token, self.token + 1);
        self.dispatcher.clear();

        for id in self.channel_ids() {
            let Some(channel) = self.channels.get_mut(&id) else {
                continue;
            };
            if channel.is_disconnecting() {
                continue;
            }
            channel.reset_context(now);
        }

        let mut bound: Vec<ObjectId> = self.bindings.keys().copied().collect();
        bound.sort();
        for object in &bound {
            self.game_context.unbound_object(*object);
        }
        let mut released: Vec<ObjectId> = bound
            .into_iter()
            .chain(self.retiring.keys().copied())
            .collect();
        released.sort();
        self.bindings.clear();
        self.retiring.clear();
        for object in released {
            self.game_context.complete_unbind(object);
            self.events.push(ContextEvent::UnbindCompleted(object));
        }

        self.token = self.token.wrapping_add(1);
        self.global_establisher.reset();
        self.game_context
            .init_global_establishment_tasks(&mut self.global_establisher, self.token);
        for channel in self.channels.values_mut() {
            if channel.is_disconnecting() {
                continue;
            }
            let id = channel.id();
            self.game_context
                .init_channel_establishment_tasks(channel.establisher_mut(), id, self.token);
        }
    }

    fn set_clock(&mut self, now: Instant) {
        self.clock = now;
    }

    // Operation bodies

    fn try_bind_object(
        &mut self,
        object: ObjectId,
        mask: AspectMask,
        is_static: bool,
    ) -> Result<(), ReplicationError> {
        if self.bindings.contains_key(&object) {
            return Err(ConfigurationError::DuplicateBinding {
                object_id: object.to_string(),
            }
            .into());
        }
        if self.retiring.contains_key(&object) {
            return Err(ConfigurationError::ObjectIdInFlight {
                object_id: object.to_string(),
            }
            .into());
        }
        if let Some(index) = self.aspects.first_undeclared(mask) {
            return Err(ConfigurationError::AspectNotDeclared { index }.into());
        }

        let game_context = &self.game_context;
        let binding = ObjectBinding::new(object, mask, is_static, |index| {
            game_context.default_profile_for_aspect(object, index)
        });
        self.game_context.bound_object(object, mask);
        self.bindings.insert(object, binding);
        debug!("{} bound with aspects {:#04x}", object, mask.bits());

        for id in self.channel_ids() {
            let Some(channel) = self.channels.get_mut(&id) else {
                continue;
            };
            if !Self::spawns_objects(channel) {
                continue;
            }
            Self::spawn_object(
                self.game_context.as_mut(),
                &self.aspects,
                &self.config,
                &mut self.bindings,
                channel,
                object,
                self.clock,
            )?;
            self.dispatcher.release_waiting(channel)?;
        }
        Ok(())
    }

    fn try_unbind_object(&mut self, object: ObjectId) -> Result<(), ReplicationError> {
        let binding = self.bound(&object, "unbind")?;
        if binding.is_static() {
            return Err(ConfigurationError::StaticObjectUnbind {
                object_id: object.to_string(),
            }
            .into());
        }
        let parent = binding.parent;
        self.bindings.remove(&object);
        self.game_context.unbound_object(object);
        self.dispatcher.drop_object(&object);

        let mut in_flight = 0;
        for id in self.channel_ids() {
            let Some(channel) = self.channels.get_mut(&id) else {
                continue;
            };
            if channel.is_disconnecting() {
                continue;
            }
            let remote_knows = match channel.view(&object) {
                Some(view) => {
                    view.established
                        || view
                            .spawn
                            .is_some_and(|spawn| channel.queue().state(&spawn) == Some(SendableState::Sent))
                }
                None => false,
            };

            for (handle, state) in channel.queue().object_handles(&object) {
                match state {
                    SendableState::Queued => {
                        Self::cancel_queued(&mut self.dispatcher, channel, &handle);
                    }
                    SendableState::Sent => {
                        if channel.queue_mut().mark_discard_on_ack(&handle) {
                            in_flight += 1;
                        }
                    }
                }
            }
            channel.remove_view(&object);

            if remote_knows {
                Self::queue_unbind(channel, object, parent)?;
                in_flight += 1;
            }
        }

        if in_flight == 0 {
            self.complete_unbind(object);
        } else {
            debug!("{} unbinding, {} sendables in flight", object, in_flight);
            self.retiring.insert(object, in_flight);
        }
        Ok(())
    }

    fn try_enable_aspects(
        &mut self,
        object: ObjectId,
        mask: AspectMask,
        enabled: bool,
    ) -> Result<(), ReplicationError> {
        let mask = self.checked_mask(&object, mask, "enable aspects")?;
        let Some(binding) = self.bindings.get_mut(&object) else {
            return Err(not_bound(&object, "enable aspects"));
        };

        for index in mask.iter() {
            let Some(aspect) = binding.aspect_mut(index) else {
                continue;
            };
            if aspect.enabled == enabled {
                continue;
            }
            aspect.enabled = enabled;

            if !enabled {
                for channel in self.channels.values_mut() {
                    Self::cancel_live_update(aspect.channel_mut(channel.id()), channel);
                }
                aspect.clear_dirty();
            }
        }

        if enabled {
            for channel in self.channels.values_mut() {
                if channel.is_disconnecting() || !channel.has_seen_spawn(&object) {
                    continue;
                }
                for index in mask.iter() {
                    if let Some(aspect) = binding.aspect_mut(index) {
                        aspect.channel_mut(channel.id()).touch();
                    }
                    Self::derive_aspect_update(
                        self.game_context.as_mut(),
                        &self.aspects,
                        &self.config,
                        binding,
                        channel,
                        index,
                        self.clock,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn try_notify_aspects_changed(
        &mut self,
        object: ObjectId,
        mask: AspectMask,
        target: Option<ChannelId>,
    ) -> Result<(), ReplicationError> {
        let mask = self.checked_mask(&object, mask, "notify aspects changed")?;
        if let Some(target) = &target {
            self.channel_or_err(target)?;
        }
        let Some(binding) = self.bindings.get_mut(&object) else {
            return Err(not_bound(&object, "notify aspects changed"));
        };
        let mask = mask.intersection(binding.enabled_mask());

        for channel in self.channels.values_mut() {
            if channel.is_disconnecting() || target.is_some_and(|target| target != channel.id()) {
                continue;
            }
            for index in mask.iter() {
                if let Some(aspect) = binding.aspect_mut(index) {
                    aspect.channel_mut(channel.id()).touch();
                }
                Self::derive_aspect_update(
                    self.game_context.as_mut(),
                    &self.aspects,
                    &self.config,
                    binding,
                    channel,
                    index,
                    self.clock,
                )?;
            }
        }
        Ok(())
    }

    fn try_set_aspect_profile(
        &mut self,
        object: ObjectId,
        index: AspectIndex,
        profile: Profile,
    ) -> Result<(), ReplicationError> {
        self.bound_aspect(&object, index, "set aspect profile")?;
        if profile.to_u8() >= MAX_PROFILES_PER_ASPECT {
            return Err(ConfigurationError::ProfileOutOfRange {
                index,
                profile: profile.to_u8(),
                limit: MAX_PROFILES_PER_ASPECT,
            }
            .into());
        }
        let descriptor = self.aspects.try_descriptor(index)?;
        let Some(binding) = self.bindings.get_mut(&object) else {
            return Err(not_bound(&object, "set aspect profile"));
        };
        if binding.controller.is_some()
            && descriptor.is_delegatable()
            && !descriptor.has_server_managed_profile()
        {
            return Err(AuthorityError::ProfileNotServerManaged {
                object_id: object.to_string(),
                aspect: index,
            }
            .into());
        }
        let Some(aspect) = binding.aspect_mut(index) else {
            return Err(not_bound_aspect(&object, index));
        };
        if aspect.profile == profile {
            return Ok(());
        }
        if !self.game_context.set_aspect_profile(object, index, profile) {
            return Err(RuntimeBindingError::ProfileRejected {
                object_id: object.to_string(),
                aspect: index,
                profile: profile.to_u8(),
            }
            .into());
        }
        aspect.profile = profile;
        info!("{} aspect {} profile -> {}", object, index, profile.to_u8());

        for channel in self.channels.values_mut() {
            if channel.is_disconnecting() {
                continue;
            }
            if let Some(aspect) = binding.aspect_mut(index) {
                aspect.channel_mut(channel.id()).touch_profile();
            }
            Self::derive_aspect_update(
                self.game_context.as_mut(),
                &self.aspects,
                &self.config,
                binding,
                channel,
                index,
                self.clock,
            )?;
        }
        Ok(())
    }

    fn try_delegate_authority(
        &mut self,
        object: ObjectId,
        controller: Option<ChannelId>,
    ) -> Result<(), ReplicationError> {
        if let Some(controller) = &controller {
            let channel = self.channel_or_err(controller)?;
            if channel.is_disconnecting() {
                return Err(RuntimeBindingError::ChannelDisconnecting {
                    channel_id: controller.to_string(),
                }
                .into());
            }
        }
        let Some(binding) = self.bindings.get_mut(&object) else {
            return Err(not_bound(&object, "delegate authority"));
        };
        if binding.controller == controller {
            return Ok(());
        }
        if let Some(previous) = binding.controller {
            if let Some(channel) = self.channels.get_mut(&previous) {
                if let Some(handle) = channel
                    .queue()
                    .slot_handle(&SendableSlot::RemoteUpdate(object))
                {
                    channel.queue_mut().remove_sendable(&handle);
                }
            }
        }
        binding.controller = controller;
        self.game_context.control_object(object, controller);
        match controller {
            Some(channel) => info!("{} delegated to {}", object, channel),
            None => info!("{} authority returned", object),
        }

        let delegatable = self
            .aspects
            .filter(binding.bound_mask(), AspectFlags::DELEGATABLE);

        if controller.is_some() {
            for index in delegatable.iter() {
                let Some(aspect) = binding.aspect_mut(index) else {
                    continue;
                };
                for channel in self.channels.values_mut() {
                    Self::cancel_live_update(aspect.channel_mut(channel.id()), channel);
                }
                aspect.clear_dirty();
            }
            return Ok(());
        }

        let delegatable = delegatable.intersection(binding.enabled_mask());
        for channel in self.channels.values_mut() {
            if channel.is_disconnecting() || !channel.has_seen_spawn(&object) {
                continue;
            }
            for index in delegatable.iter() {
                if let Some(aspect) = binding.aspect_mut(index) {
                    aspect.channel_mut(channel.id()).touch();
                }
                Self::derive_aspect_update(
                    self.game_context.as_mut(),
                    &self.aspects,
                    &self.config,
                    binding,
                    channel,
                    index,
                    self.clock,
                )?;
            }
        }
        Ok(())
    }

    fn try_accept_remote_update(
        &self,
        channel: ChannelId,
        object: ObjectId,
        mask: AspectMask,
    ) -> Result<(), ReplicationError> {
        let binding = self.bound(&object, "accept remote update")?;
        if binding.controller != Some(channel) {
            return Err(AuthorityError::NotAuthoritative {
                object_id: object.to_string(),
                channel_id: channel.to_string(),
            }
            .into());
        }
        let delegatable = self.aspects.filter(mask, AspectFlags::DELEGATABLE);
        if let Some(aspect) = mask.difference(delegatable).iter().next() {
            return Err(AuthorityError::AspectNotDelegatable {
                object_id: object.to_string(),
                aspect,
            }
            .into());
        }
        Ok(())
    }

    fn try_request_remote_update(
        &mut self,
        object: ObjectId,
        mask: AspectMask,
    ) -> Result<(), ReplicationError> {
        let mask = self.checked_mask(&object, mask, "request remote update")?;
        let binding = self.bound(&object, "request remote update")?;
        let Some(controller) = binding.controller else {
            return Err(AuthorityError::NotDelegated {
                object_id: object.to_string(),
            }
            .into());
        };
        let delegatable = self.aspects.filter(mask, AspectFlags::DELEGATABLE);
        if let Some(aspect) = mask.difference(delegatable).iter().next() {
            return Err(AuthorityError::AspectNotDelegatable {
                object_id: object.to_string(),
                aspect,
            }
            .into());
        }
        if mask.is_empty() {
            return Ok(());
        }
        let channel = self.channel_mut_or_err(&controller)?;
        Self::queue_remote_update_request(channel, object, mask)
    }

    fn try_set_parent_object(
        &mut self,
        object: ObjectId,
        parent: Option<ObjectId>,
    ) -> Result<(), ReplicationError> {
        self.bound(&object, "set parent")?;
        if let Some(parent) = parent {
            if parent == object {
                return Err(ConfigurationError::SelfParent {
                    object_id: object.to_string(),
                }
                .into());
            }
            self.bound(&parent, "parent to")?;

            let mut ancestor = Some(parent);
            while let Some(current) = ancestor {
                if current == object {
                    return Err(ConfigurationError::ParentCycle {
                        object_id: object.to_string(),
                        parent_id: parent.to_string(),
                    }
                    .into());
                }
                ancestor = self.bindings.get(&current).and_then(|binding| binding.parent);
            }
        }
        if let Some(binding) = self.bindings.get_mut(&object) {
            binding.parent = parent;
        }
        Ok(())
    }

    fn try_dispatch_rmi(
        &mut self,
        request: RmiRequest,
        target: RmiTarget,
        now: Instant,
    ) -> Result<Option<RmiId>, ReplicationError> {
        if let RmiTarget::Channel(channel) = &target {
            self.channel_or_err(channel)?;
        }
        for object in request.required_objects() {
            self.bound(&object, "dispatch RMI")?;
        }

        let mut channels: Vec<&mut Channel> = self
            .channels
            .values_mut()
            .filter(|channel| target.includes(&channel.id()) && !channel.is_disconnecting())
            .collect();
        channels.sort_by_key(|channel| channel.id());
        self.dispatcher.dispatch(request, channels, now)
    }

    fn try_accept_handshake(
        &mut self,
        channel_id: ChannelId,
        handshake: &Handshake,
        now: Instant,
    ) -> Result<(), ReplicationError> {
        let channel = self.channel_or_err(&channel_id)?;
        if channel.connection_state() != ChannelConnectionState::WaitingForResponse {
            return Err(EstablishmentError::UnexpectedHandshake {
                channel: channel_id.to_string(),
                state: channel.connection_state().name(),
            }
            .into());
        }

        if let Err(error) = handshake.validate(&channel_id, &self.config) {
            self.try_disconnect_channel(channel_id, error.cause(), &error.to_string(), now)?;
            return Err(error.into());
        }

        if let Some(channel) = self.channels.get_mut(&channel_id) {
            channel.set_connection_state(ChannelConnectionState::StartingConnection, now);
        }
        Ok(())
    }

    fn try_disconnect_channel(
        &mut self,
        channel_id: ChannelId,
        cause: DisconnectCause,
        reason: &str,
        now: Instant,
    ) -> Result<(), ReplicationError> {
        let channel = self.channel_mut_or_err(&channel_id)?;
        if channel.is_disconnecting() {
            return Ok(());
        }
        let retired = channel.disconnect(cause, reason, now);

        for sendable in retired {
            self.settle_dropped(channel_id, &sendable);
        }
        self.dispatcher.drop_channel(channel_id);
        for binding in self.bindings.values_mut() {
            binding.remove_channel(&channel_id);
            if binding.controller == Some(channel_id) {
                binding.controller = None;
                self.game_context.control_object(binding.id(), None);
            }
        }
        self.events.push(ContextEvent::ChannelDisconnected {
            channel: channel_id,
            cause,
            reason: reason.to_string(),
        });
        Ok(())
    }

    // Establishment

    fn step_global_establishment(&mut self, now: Instant) {
        if self.global_establisher.failure().is_some() {
            return;
        }
        loop {
            let mut state = EstablishState::new(
                self.global_establisher.state(),
                None,
                self.token,
                now,
                0,
                None,
            );
            match self.global_establisher.step(&mut state) {
                EstablishStep::Advanced(next) => {
                    debug!("Global establishment advanced to {}", next);
                }
                EstablishStep::Wait | EstablishStep::InGame => return,
                EstablishStep::Failed(error) => {
                    warn!("Global establishment failed: {}", error);
                    for id in self.channel_ids() {
                        if let Err(disconnect_error) =
                            self.try_disconnect_channel(id, error.cause(), &error.to_string(), now)
                        {
                            warn!("{} failed to disconnect: {}", id, disconnect_error);
                        }
                    }
                    return;
                }
            }
        }
    }

    fn step_channel_establishment(&mut self, id: ChannelId, now: Instant) {
        loop {
            let step = {
                let Some(channel) = self.channels.get_mut(&id) else {
                    return;
                };
                if channel.is_disconnecting()
                    || channel.connection_state() < ChannelConnectionState::StartingConnection
                {
                    return;
                }
                if channel.connection_state() == ChannelConnectionState::StartingConnection {
                    channel.set_connection_state(ChannelConnectionState::InContextInitiation, now);
                }
                channel.step_establishment(self.token, now)
            };

            match step {
                EstablishStep::Advanced(ContextViewState::SpawnEntities) => {
                    if let Err(error) = self.spawn_all(id) {
                        warn!("{} failed to spawn objects: {}", id, error);
                    }
                }
                EstablishStep::Advanced(ContextViewState::PostSpawnEntities) => {
                    if let Err(error) = self.post_spawn_all(id) {
                        warn!("{} failed to queue post spawn data: {}", id, error);
                    }
                }
                EstablishStep::Advanced(ContextViewState::InGame) => {
                    if let Some(channel) = self.channels.get_mut(&id) {
                        channel.set_connection_state(ChannelConnectionState::InGame, now);
                    }
                    self.events.push(ContextEvent::ChannelEstablished(id));
                }
                EstablishStep::Advanced(_) => {}
                EstablishStep::Wait | EstablishStep::InGame => return,
                EstablishStep::Failed(error) => {
                    if let Err(disconnect_error) =
                        self.try_disconnect_channel(id, error.cause(), &error.to_string(), now)
                    {
                        warn!("{} failed to disconnect: {}", id, disconnect_error);
                    }
                    return;
                }
            }
        }
    }

    fn spawns_objects(channel: &Channel) -> bool {
        !channel.is_disconnecting() && channel.view_state() >= ContextViewState::SpawnEntities
    }

    fn spawn_all(&mut self, id: ChannelId) -> Result<(), ReplicationError> {
        let mut objects: Vec<ObjectId> = self.bindings.keys().copied().collect();
        objects.sort();
        let Some(channel) = self.channels.get_mut(&id) else {
            return Ok(());
        };
        for object in objects {
            Self::spawn_object(
                self.game_context.as_mut(),
                &self.aspects,
                &self.config,
                &mut self.bindings,
                channel,
                object,
                self.clock,
            )?;
        }
        self.dispatcher.release_waiting(channel)
    }

    fn post_spawn_all(&mut self, id: ChannelId) -> Result<(), ReplicationError> {
        let mut objects: Vec<ObjectId> = self.bindings.keys().copied().collect();
        objects.sort();
        let Some(channel) = self.channels.get_mut(&id) else {
            return Ok(());
        };
        for object in objects {
            if channel.is_established(&object) {
                Self::queue_post_spawn(self.game_context.as_mut(), channel, object)?;
            }
        }
        Ok(())
    }

    // Sending

    fn send_channel(&mut self, id: ChannelId, now: Instant) {
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };

        let witness_object = channel.witness_object();
        if let Some(witness_object) = witness_object {
            let witness = self
                .bindings
                .get(&witness_object)
                .and_then(|binding| binding.position)
                .map(|position| position.position);
            channel.set_witness(witness);
        }

        let default = self.config.priority.default_group_priority;
        for binding in self.bindings.values() {
            let group = binding.id().to_u32();
            if binding.scheduling.is_none() {
                channel.queue_mut().clear_group_priority(&group);
                continue;
            }
            let witnessed = witness_object == Some(binding.id());
            let priority = binding.base_priority(&id, witnessed, default);
            channel.queue_mut().set_group_priority(group, priority);
        }

        let outgoing = channel.send_sendables(now, &self.config, self.distance.as_ref());
        for sendable in &outgoing {
            self.dispatcher.on_sent(id, sendable);
        }
    }

    // Delivery feedback

    fn handle_delivery_result(&mut self, channel: ChannelId, result: DeliveryResult) {
        match result {
            DeliveryResult::Unknown => {}
            DeliveryResult::Requeued(handle) => self.refresh_requeued(channel, handle),
            DeliveryResult::Retired(retired) => self.handle_retired(channel, retired),
        }
    }

    /// A requeued aspect update may carry an older version than the binding
    /// holds; replace its payload before it goes out again
    fn refresh_requeued(&mut self, channel_id: ChannelId, handle: SendableHandle) {
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return;
        };
        let Some(SendableKind::AspectUpdate {
            object,
            aspect,
            version,
            ..
        }) = channel.queue().sendable(&handle).map(|sendable| sendable.kind().clone())
        else {
            return;
        };
        let Some(binding) = self.bindings.get_mut(&object) else {
            return;
        };
        let stale = binding
            .aspect(aspect)
            .and_then(|binding| binding.channel(&channel_id))
            .is_some_and(|state| state.dirty && state.version != version);
        if !stale {
            return;
        }
        if let Err(error) = Self::derive_aspect_update(
            self.game_context.as_mut(),
            &self.aspects,
            &self.config,
            binding,
            channel,
            aspect,
            self.clock,
        ) {
            warn!("{} failed to refresh requeued update: {}", channel_id, error);
        }
    }

    fn handle_retired(&mut self, channel_id: ChannelId, retired: RetiredSendable) {
        let kind = retired.sendable.kind().clone();
        let update = retired.update;

        if retired.discarded {
            if let SendableKind::Rmi { .. } = kind {
                self.dispatcher.on_retired(channel_id, &retired);
            }
            if let Some(object) = kind.object() {
                self.release_in_flight(object);
            }
            return;
        }

        let failed = matches!(update, SendableStateUpdate::Nack | SendableStateUpdate::Rejected);
        if failed {
            warn!(
                "{} {} {}: {}",
                channel_id,
                kind.name(),
                update.name(),
                retired.sendable.description()
            );
            self.events.push(ContextEvent::DeliveryFailed(DeliveryFailure {
                channel: channel_id,
                description: retired.sendable.description().to_string(),
                kind: kind.clone(),
                update,
            }));
        }

        let result = match kind {
            SendableKind::Spawn { object } => self.retired_spawn(channel_id, object, retired.handle, update),
            SendableKind::AspectUpdate {
                object,
                aspect,
                profile_changed,
                version,
                hash,
                ..
            } => self.retired_aspect_update(
                channel_id,
                object,
                aspect,
                retired.handle,
                update,
                (version, profile_changed, hash),
            ),
            SendableKind::PostSpawn { object } => self.retired_post_spawn(channel_id, object, update),
            SendableKind::Unbind { object } => self.retired_unbind(channel_id, object, update),
            SendableKind::RemoteUpdateRequest { object, aspects } => {
                self.retired_remote_update_request(channel_id, object, aspects, update)
            }
            SendableKind::Rmi { .. } => {
                self.dispatcher.on_retired(channel_id, &retired);
                Ok(())
            }
            SendableKind::Message => Ok(()),
        };
        if let Err(error) = result {
            warn!("{} failed to handle delivery feedback: {}", channel_id, error);
        }
    }

    fn retired_spawn(
        &mut self,
        channel_id: ChannelId,
        object: ObjectId,
        handle: SendableHandle,
        update: SendableStateUpdate,
    ) -> Result<(), ReplicationError> {
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return Ok(());
        };
        // a superseded spawn says nothing about the current one
        if channel.view(&object).and_then(|view| view.spawn) != Some(handle) {
            return Ok(());
        }
        match update {
            SendableStateUpdate::Ack => {
                channel.mark_established(&object);
                if channel.view_state() >= ContextViewState::PostSpawnEntities
                    && self.bindings.contains_key(&object)
                {
                    Self::queue_post_spawn(self.game_context.as_mut(), channel, object)?;
                }
                Ok(())
            }
            SendableStateUpdate::Requeue => Ok(()),
            SendableStateUpdate::Nack | SendableStateUpdate::Rejected => {
                // queued work for the object assumed the spawn would land
                for (queued, state) in channel.queue().object_handles(&object) {
                    if state == SendableState::Queued {
                        Self::cancel_queued(&mut self.dispatcher, channel, &queued);
                    }
                }
                channel.remove_view(&object);
                if update == SendableStateUpdate::Rejected || !self.bindings.contains_key(&object) {
                    return Ok(());
                }
                Self::spawn_object(
                    self.game_context.as_mut(),
                    &self.aspects,
                    &self.config,
                    &mut self.bindings,
                    channel,
                    object,
                    self.clock,
                )?;
                self.dispatcher.release_waiting(channel)
            }
        }
    }

    fn retired_aspect_update(
        &mut self,
        channel_id: ChannelId,
        object: ObjectId,
        index: AspectIndex,
        handle: SendableHandle,
        update: SendableStateUpdate,
        (version, profile_changed, hash): (u32, bool, Option<u32>),
    ) -> Result<(), ReplicationError> {
        let Some(binding) = self.bindings.get_mut(&object) else {
            return Ok(());
        };
        let Some(aspect) = binding.aspect_mut(index) else {
            return Ok(());
        };
        let state = aspect.channel_mut(channel_id);
        if state.live == Some(handle) {
            state.live = None;
        }
        match update {
            SendableStateUpdate::Ack => state.acknowledge(version, profile_changed, hash),
            SendableStateUpdate::Nack => state.dirty = true,
            SendableStateUpdate::Rejected => state.dirty = false,
            // superseded by a newer queued update
            SendableStateUpdate::Requeue => {}
        }
        if !state.dirty {
            return Ok(());
        }

        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return Ok(());
        };
        Self::derive_aspect_update(
            self.game_context.as_mut(),
            &self.aspects,
            &self.config,
            binding,
            channel,
            index,
            self.clock,
        )
    }

    fn retired_post_spawn(
        &mut self,
        channel_id: ChannelId,
        object: ObjectId,
        update: SendableStateUpdate,
    ) -> Result<(), ReplicationError> {
        if update != SendableStateUpdate::Nack || !self.bindings.contains_key(&object) {
            return Ok(());
        }
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return Ok(());
        };
        if channel.is_disconnecting() || !channel.is_established(&object) {
            return Ok(());
        }
        Self::queue_post_spawn(self.game_context.as_mut(), channel, object)
    }

    fn retired_remote_update_request(
        &mut self,
        channel_id: ChannelId,
        object: ObjectId,
        aspects: AspectMask,
        update: SendableStateUpdate,
    ) -> Result<(), ReplicationError> {
        if update != SendableStateUpdate::Nack || !self.remote_has_authority(&channel_id, &object) {
            return Ok(());
        }
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return Ok(());
        };
        if channel.is_disconnecting() {
            return Ok(());
        }
        Self::queue_remote_update_request(channel, object, aspects)
    }

    fn retired_unbind(
        &mut self,
        channel_id: ChannelId,
        object: ObjectId,
        update: SendableStateUpdate,
    ) -> Result<(), ReplicationError> {
        if update == SendableStateUpdate::Nack {
            if let Some(channel) = self.channels.get_mut(&channel_id) {
                if !channel.is_disconnecting() {
                    return Self::queue_unbind(channel, object, None);
                }
            }
        }
        self.release_in_flight(object);
        Ok(())
    }

    /// Accounts for a sendable dropped by a disconnect
    fn settle_dropped(&mut self, channel: ChannelId, retired: &RetiredSendable) {
        let kind = retired.sendable.kind();
        if let SendableKind::Rmi { .. } = kind {
            self.dispatcher.on_retired(channel, retired);
        }
        let counted = retired.discarded || matches!(kind, SendableKind::Unbind { .. });
        if counted {
            if let Some(object) = kind.object() {
                self.release_in_flight(object);
            }
        }
    }

    fn release_in_flight(&mut self, object: ObjectId) {
        let Some(count) = self.retiring.get_mut(&object) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.complete_unbind(object);
        }
    }

    fn complete_unbind(&mut self, object: ObjectId) {
        self.retiring.remove(&object);
        for binding in self.bindings.values_mut() {
            if binding.parent == Some(object) {
                binding.parent = None;
            }
        }
        self.game_context.complete_unbind(object);
        self.events.push(ContextEvent::UnbindCompleted(object));
        debug!("{} unbind completed", object);
    }

    // Sendable production

    /// Queues the spawn of `object` on `channel`, ancestors first, then the
    /// first update of each enabled aspect
    fn spawn_object(
        game_context: &mut dyn GameContext,
        aspects: &AspectTable,
        config: &ReplicationConfig,
        bindings: &mut HashMap<ObjectId, ObjectBinding>,
        channel: &mut Channel,
        object: ObjectId,
        now: Instant,
    ) -> Result<(), ReplicationError> {
        let mut chain = vec![object];
        let mut current = object;
        while let Some(parent) = bindings.get(&current).and_then(|binding| binding.parent) {
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }

        for object in chain.into_iter().rev() {
            if channel.has_seen_spawn(&object) {
                continue;
            }
            let Some(binding) = bindings.get_mut(&object) else {
                continue;
            };

            let after: Vec<SendableHandle> = binding
                .parent
                .and_then(|parent| channel.live_spawn(&parent))
                .into_iter()
                .collect();
            let payload = game_context.create_object_spawner(object, channel.id());
            let sendable = Sendable::new(
                &format!("spawn {}", object),
                Reliability::ReliableOrdered,
                SendableKind::Spawn { object },
                payload,
            )
            .with_slot(SendableSlot::Spawn(object))
            .with_position(binding.position)
            .with_pulses(binding.pulses().clone());
            let handle = check_fatal(channel.queue_mut().substitute_sendable(sendable, &after))?;
            channel.record_spawn(object, handle);
            debug!("{} spawning {}", channel.id(), object);

            for index in binding.enabled_mask().iter() {
                if let Some(aspect) = binding.aspect_mut(index) {
                    aspect.channel_mut(channel.id()).touch();
                }
                Self::derive_aspect_update(
                    game_context,
                    aspects,
                    config,
                    binding,
                    channel,
                    index,
                    now,
                )?;
            }
        }
        Ok(())
    }

    /// Brings the live update of one aspect on one channel in line with the
    /// binding. At most one update per aspect and channel is live: a queued
    /// one is substituted, a sent one is left alone and the aspect stays
    /// dirty until its outcome arrives.
    fn derive_aspect_update(
        game_context: &mut dyn GameContext,
        aspects: &AspectTable,
        config: &ReplicationConfig,
        binding: &mut ObjectBinding,
        channel: &mut Channel,
        index: AspectIndex,
        now: Instant,
    ) -> Result<(), ReplicationError> {
        let object = binding.id();
        let channel_id = channel.id();
        if channel.is_disconnecting() || !channel.has_seen_spawn(&object) {
            return Ok(());
        }
        let descriptor = aspects.try_descriptor(index)?;
        let delegated = binding.controller.is_some();
        let position = binding.position;
        let pulses = binding.pulses().clone();
        let Some(aspect) = binding.aspect_mut(index) else {
            return Ok(());
        };
        let profile = aspect.profile;
        let enabled = aspect.enabled;
        let state = aspect.channel_mut(channel_id);

        if !state.dirty {
            return Ok(());
        }
        if !enabled {
            state.dirty = false;
            return Ok(());
        }
        if delegated
            && descriptor.is_delegatable()
            && !(state.profile_pending && descriptor.has_server_managed_profile())
        {
            state.dirty = false;
            return Ok(());
        }
        if let Some(live) = state.live {
            match channel.queue().state(&live) {
                Some(SendableState::Sent) => return Ok(()),
                Some(SendableState::Queued) => {}
                None => state.live = None,
            }
        }

        let payload = match game_context.synch_object(object, index, profile) {
            SynchObjectResult::Ok(payload) => payload,
            SynchObjectResult::Skip => {
                state.dirty = false;
                return Ok(());
            }
            SynchObjectResult::Failed(reason) => {
                warn!("{} aspect {} failed to synch: {}", object, index, reason);
                return Ok(());
            }
        };

        let hash = if descriptor.hashes_state() {
            Some(
                game_context
                    .hash_aspect(object, index, profile, &payload)
                    .unwrap_or_else(|| hash_payload(&payload)),
            )
        } else {
            None
        };
        if hash.is_some() && hash == state.acked_hash && !state.profile_pending {
            debug!("{} aspect {} unchanged on {}", object, index, channel_id);
            state.dirty = false;
            if let Some(live) = state.live.take() {
                channel.queue_mut().remove_sendable(&live);
            }
            return Ok(());
        }

        let reliability = if state.profile_pending {
            Reliability::ReliableOrdered
        } else {
            config.aspect_update_reliability
        };
        let mut sendable = Sendable::new(
            &format!("{} aspect {} ({})", object, index, descriptor.name),
            reliability,
            SendableKind::AspectUpdate {
                object,
                aspect: index,
                profile,
                profile_changed: state.profile_pending,
                version: state.version,
                hash,
            },
            payload,
        )
        .with_slot(SendableSlot::Aspect(object, index))
        .with_position(position)
        .with_pulses(pulses);
        if descriptor.timestamps_state() {
            sendable = sendable.with_timestamp(now);
        }

        let mut after: Vec<SendableHandle> = channel.live_spawn(&object).into_iter().collect();
        if state.live.is_none() {
            // a queued update was ordered when those RMIs were dispatched
            after.extend(channel.pre_attach_rmis(&object));
        }
        let handle = check_fatal(channel.queue_mut().substitute_sendable(sendable, &after))?;
        state.live = Some(handle);
        Ok(())
    }

    /// Queues the game's post-spawn data for `object`, if it has any
    fn queue_post_spawn(
        game_context: &mut dyn GameContext,
        channel: &mut Channel,
        object: ObjectId,
    ) -> Result<(), ReplicationError> {
        let Some(payload) = game_context.send_post_spawn_object(object, channel.id()) else {
            return Ok(());
        };
        let sendable = Sendable::new(
            &format!("post spawn {}", object),
            Reliability::ReliableOrdered,
            SendableKind::PostSpawn { object },
            payload,
        )
        .with_slot(SendableSlot::PostSpawn(object));
        check_fatal(channel.queue_mut().substitute_sendable(sendable, &[]))?;
        debug!("{} post spawn data for {}", channel.id(), object);
        Ok(())
    }

    fn queue_remote_update_request(
        channel: &mut Channel,
        object: ObjectId,
        aspects: AspectMask,
    ) -> Result<(), ReplicationError> {
        let slot = SendableSlot::RemoteUpdate(object);
        let queued = channel
            .queue()
            .slot_handle(&slot)
            .and_then(|handle| channel.queue().sendable(&handle))
            .and_then(|sendable| match sendable.kind() {
                SendableKind::RemoteUpdateRequest { aspects, .. } => Some(*aspects),
                _ => None,
            })
            .unwrap_or(AspectMask::EMPTY);
        let aspects = queued.union(aspects);

        let after: Vec<SendableHandle> = channel.live_spawn(&object).into_iter().collect();
        let sendable = Sendable::new(
            &format!("remote update request {}", object),
            Reliability::ReliableUnordered,
            SendableKind::RemoteUpdateRequest { object, aspects },
            vec![aspects.bits()],
        )
        .with_slot(slot);
        check_fatal(channel.queue_mut().substitute_sendable(sendable, &after))?;
        debug!("{} asked for {} aspects {:#04x}", channel.id(), object, aspects.bits());
        Ok(())
    }

    fn queue_unbind(
        channel: &mut Channel,
        object: ObjectId,
        parent: Option<ObjectId>,
    ) -> Result<(), ReplicationError> {
        let after: Vec<SendableHandle> = parent
            .and_then(|parent| channel.queue().slot_handle(&SendableSlot::Unbind(parent)))
            .into_iter()
            .collect();
        let sendable = Sendable::new(
            &format!("unbind {}", object),
            Reliability::ReliableOrdered,
            SendableKind::Unbind { object },
            Vec::new(),
        )
        .with_slot(SendableSlot::Unbind(object))
        .with_flags(MessageFlags::STATE_CHANGE);
        check_fatal(channel.queue_mut().add_sendable(sendable, &after))?;
        Ok(())
    }

    /// Drops the live update if it has not been sent yet
    fn cancel_live_update(state: &mut AspectChannelState, channel: &mut Channel) {
        if let Some(live) = state.live {
            if channel.queue_mut().remove_sendable(&live) {
                state.live = None;
            }
        }
    }

    fn cancel_queued(dispatcher: &mut RmiDispatcher, channel: &mut Channel, handle: &SendableHandle) {
        let kind = channel
            .queue()
            .sendable(handle)
            .map(|sendable| sendable.kind().clone());
        if channel.queue_mut().remove_sendable(handle) {
            if let Some(kind) = kind {
                dispatcher.on_removed(channel.id(), handle, &kind);
            }
        }
    }

    // Lookups

    fn bound(&self, object: &ObjectId, operation: &'static str) -> Result<&ObjectBinding, ReplicationError> {
        self.bindings
            .get(object)
            .ok_or_else(|| not_bound(object, operation))
    }

    fn bound_mut(
        &mut self,
        object: &ObjectId,
        operation: &'static str,
    ) -> Result<&mut ObjectBinding, ReplicationError> {
        self.bindings
            .get_mut(object)
            .ok_or_else(|| not_bound(object, operation))
    }

    fn bound_aspect(
        &self,
        object: &ObjectId,
        aspect: AspectIndex,
        operation: &'static str,
    ) -> Result<(&ObjectBinding, AspectIndex), ReplicationError> {
        self.aspects.try_descriptor(aspect)?;
        let binding = self.bound(object, operation)?;
        if binding.aspect(aspect).is_none() {
            return Err(not_bound_aspect(object, aspect));
        }
        Ok((binding, aspect))
    }

    /// Validates `mask` against the aspect table and the object's binding
    fn checked_mask(
        &self,
        object: &ObjectId,
        mask: AspectMask,
        operation: &'static str,
    ) -> Result<AspectMask, ReplicationError> {
        if let Some(index) = self.aspects.first_undeclared(mask) {
            return Err(ConfigurationError::AspectNotDeclared { index }.into());
        }
        let binding = self.bound(object, operation)?;
        if let Some(index) = mask.difference(binding.bound_mask()).iter().next() {
            return Err(not_bound_aspect(object, index));
        }
        Ok(mask)
    }

    fn channel_or_err(&self, channel: &ChannelId) -> Result<&Channel, ReplicationError> {
        self.channels.get(channel).ok_or_else(|| {
            RuntimeBindingError::ChannelNotFound {
                channel_id: channel.to_string(),
            }
            .into()
        })
    }

    fn channel_mut_or_err(&mut self, channel: &ChannelId) -> Result<&mut Channel, ReplicationError> {
        self.channels.get_mut(channel).ok_or_else(|| {
            RuntimeBindingError::ChannelNotFound {
                channel_id: channel.to_string(),
            }
            .into()
        })
    }

    /// Configuration errors panic when configured fatal; everything is logged
    fn reported<T>(&self, result: Result<T, ReplicationError>) -> Result<T, ReplicationError> {
        if let Err(error) = &result {
            match error {
                ReplicationError::Configuration(inner) if self.config.fatal_configuration_errors => {
                    panic!("{}", inner);
                }
                _ => warn!("{}", error),
            }
        }
        result
    }
}

fn not_bound(object: &ObjectId, operation: &'static str) -> ReplicationError {
    RuntimeBindingError::ObjectNotBound {
        object_id: object.to_string(),
        operation,
    }
    .into()
}

fn not_bound_aspect(object: &ObjectId, aspect: AspectIndex) -> ReplicationError {
    RuntimeBindingError::AspectNotBound {
        object_id: object.to_string(),
        aspect,
    }
    .into()
}

fn hash_payload(payload: &[u8]) -> u32 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish() as u32
}
