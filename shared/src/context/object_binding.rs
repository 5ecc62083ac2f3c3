use std::collections::HashMap;

use crate::{
    aspect::aspect_flags::{AspectIndex, AspectMask},
    sendable::{handle::SendableHandle, priority::PositionInfo, pulse::PulseState},
    types::{ChannelId, ObjectId, Profile},
};

/// Base group priorities of an object's sendables
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SchedulingParams {
    pub normal: f32,
    /// Used on the channel that controls or witnesses the object
    pub owned: f32,
}

/// Sync progress of one aspect towards one channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AspectChannelState {
    /// The channel has not acknowledged the current version
    pub dirty: bool,
    /// A profile change still has to reach the channel
    pub profile_pending: bool,
    /// Bumped on every change notified for this channel
    pub version: u32,
    /// Version that carried the latest profile change
    pub profile_version: u32,
    /// The one live sendable for this aspect on this channel
    pub live: Option<SendableHandle>,
    /// Hash of the last acknowledged hash-state update
    pub acked_hash: Option<u32>,
}

impl AspectChannelState {
    pub fn touch(&mut self) {
        self.dirty = true;
        self.version = self.version.wrapping_add(1);
    }

    pub fn touch_profile(&mut self) {
        self.touch();
        self.profile_pending = true;
        self.profile_version = self.version;
    }

    /// Applies an acknowledged update of `version`. Any update at or after
    /// the latest profile change carries that profile.
    pub fn acknowledge(&mut self, version: u32, profile_changed: bool, hash: Option<u32>) {
        if hash.is_some() {
            self.acked_hash = hash;
        }
        if profile_changed && version >= self.profile_version {
            self.profile_pending = false;
        }
        if version == self.version {
            self.dirty = false;
        }
    }
}

pub struct AspectBinding {
    pub enabled: bool,
    pub profile: Profile,
    channels: HashMap<ChannelId, AspectChannelState>,
}

impl AspectBinding {
    pub fn new(profile: Profile) -> Self {
        Self {
            enabled: true,
            profile,
            channels: HashMap::new(),
        }
    }

    pub fn channel(&self, channel: &ChannelId) -> Option<&AspectChannelState> {
        self.channels.get(channel)
    }

    pub fn channel_mut(&mut self, channel: ChannelId) -> &mut AspectChannelState {
        self.channels.entry(channel).or_default()
    }

    pub fn remove_channel(&mut self, channel: &ChannelId) {
        self.channels.remove(channel);
    }

    /// Clears dirty state on every channel, e.g. when the aspect is disabled.
    /// Live handles are kept; an update already in flight still settles.
    pub fn clear_dirty(&mut self) {
        for state in self.channels.values_mut() {
            state.dirty = false;
        }
    }
}

/// Everything the context knows about one bound object
pub struct ObjectBinding {
    id: ObjectId,
    is_static: bool,
    aspects: HashMap<AspectIndex, AspectBinding>,
    pub parent: Option<ObjectId>,
    pub controller: Option<ChannelId>,
    pub scheduling: Option<SchedulingParams>,
    pub position: Option<PositionInfo>,
    pulses: PulseState,
}

impl ObjectBinding {
    pub fn new(
        id: ObjectId,
        mask: AspectMask,
        is_static: bool,
        default_profile: impl Fn(AspectIndex) -> Profile,
    ) -> Self {
        let aspects = mask
            .iter()
            .map(|index| (index, AspectBinding::new(default_profile(index))))
            .collect();
        Self {
            id,
            is_static,
            aspects,
            parent: None,
            controller: None,
            scheduling: None,
            position: None,
            pulses: PulseState::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn pulses(&self) -> &PulseState {
        &self.pulses
    }

    /// Aspects the object was bound with
    pub fn bound_mask(&self) -> AspectMask {
        self.mask_where(|_| true)
    }

    pub fn enabled_mask(&self) -> AspectMask {
        self.mask_where(|aspect| aspect.enabled)
    }

    pub fn aspect(&self, index: AspectIndex) -> Option<&AspectBinding> {
        self.aspects.get(&index)
    }

    pub fn aspect_mut(&mut self, index: AspectIndex) -> Option<&mut AspectBinding> {
        self.aspects.get_mut(&index)
    }

    pub fn remove_channel(&mut self, channel: &ChannelId) {
        for aspect in self.aspects.values_mut() {
            aspect.remove_channel(channel);
        }
    }

    /// Base group priority on `channel`; `default` without scheduling params
    pub fn base_priority(&self, channel: &ChannelId, witnessed: bool, default: f32) -> f32 {
        match self.scheduling {
            Some(params) if witnessed || self.controller.as_ref() == Some(channel) => params.owned,
            Some(params) => params.normal,
            None => default,
        }
    }

    fn mask_where(&self, predicate: impl Fn(&AspectBinding) -> bool) -> AspectMask {
        let mut mask = AspectMask::EMPTY;
        for (index, aspect) in &self.aspects {
            if predicate(aspect) {
                mask = mask.union(AspectMask::single(*index));
            }
        }
        mask
    }
}
