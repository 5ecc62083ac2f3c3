use crate::{
    aspect::aspect_flags::{AspectIndex, AspectMask},
    establish::context_establisher::ContextEstablisher,
    types::{ChannelId, EstablishToken, ObjectId, Profile},
};

/// Result of reading an aspect's current field values
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SynchObjectResult {
    /// Serialized field values
    Ok(Vec<u8>),
    /// Nothing to send right now
    Skip,
    Failed(String),
}

/// The simulation side of replication: owns field values and per-channel
/// establishment tasks
pub trait GameContext: Send {
    /// Serialize the current value of `aspect` under `profile`
    fn synch_object(
        &mut self,
        object: ObjectId,
        aspect: AspectIndex,
        profile: Profile,
    ) -> SynchObjectResult;

    /// Apply a profile change locally. Returning false refuses it.
    fn set_aspect_profile(&mut self, object: ObjectId, aspect: AspectIndex, profile: Profile) -> bool;

    fn init_global_establishment_tasks(
        &mut self,
        _establisher: &mut ContextEstablisher,
        _token: EstablishToken,
    ) {
    }

    fn init_channel_establishment_tasks(
        &mut self,
        _establisher: &mut ContextEstablisher,
        _channel: ChannelId,
        _token: EstablishToken,
    ) {
    }

    /// Payload of the spawn sendable that creates `object` on `channel`
    fn create_object_spawner(&mut self, _object: ObjectId, _channel: ChannelId) -> Vec<u8> {
        Vec::new()
    }

    /// Payload sent to `channel` once it acknowledged the spawn of `object`
    /// and reached post-spawn. `None` sends nothing.
    fn send_post_spawn_object(&mut self, _object: ObjectId, _channel: ChannelId) -> Option<Vec<u8>> {
        None
    }

    fn bound_object(&mut self, _object: ObjectId, _aspects: AspectMask) {}

    fn unbound_object(&mut self, _object: ObjectId) {}

    /// Nothing in flight references `object` any more
    fn complete_unbind(&mut self, _object: ObjectId) {}

    /// `controller` is the channel now holding authority, `None` for local
    fn control_object(&mut self, _object: ObjectId, _controller: Option<ChannelId>) {}

    fn default_profile_for_aspect(&self, _object: ObjectId, _aspect: AspectIndex) -> Profile {
        Profile::default()
    }

    /// Hash of the aspect's state for hash-state aspects. `None` hashes the
    /// serialized payload instead.
    fn hash_aspect(
        &mut self,
        _object: ObjectId,
        _aspect: AspectIndex,
        _profile: Profile,
        _payload: &[u8],
    ) -> Option<u32> {
        None
    }
}
