//! # Replica Shared
//! Object replication core: aspect declarations, per-channel sendable
//! queues, context establishment and RMI dispatch over abstract transports.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

mod aspect;
mod channel;
mod config;
mod constants;
mod context;
mod establish;
mod rmi;
mod sendable;
mod types;

pub use aspect::{
    aspect_flags::{AspectFlags, AspectIndex, AspectMask},
    aspect_table::{AspectDescriptor, AspectTable},
    error::ConfigurationError,
};
pub use channel::{
    ack_manager::AckManager,
    channel::{Channel, DeliveryResult, ObjectView},
    disconnect_cause::DisconnectCause,
    transport::{DeliveryHandle, DeliveryOutcome, Transport},
};
pub use config::{PriorityConfig, ReplicationConfig};
pub use constants::{MAX_ASPECTS, MAX_PROFILES_PER_ASPECT, MAX_PULSES_PER_STATE};
pub use context::{
    error::{AuthorityError, ReplicationError, RuntimeBindingError},
    events::{ContextEvent, DeliveryFailure},
    game_context::{GameContext, SynchObjectResult},
    object_binding::{AspectBinding, AspectChannelState, ObjectBinding, SchedulingParams},
    replication_context::ReplicationContext,
};
pub use establish::{
    context_establisher::{ContextEstablisher, EstablishStep},
    context_view_state::{ChannelConnectionState, ContextViewState},
    error::EstablishmentError,
    establish_task::{ContextEstablishTask, EstablishState, EstablishTaskResult},
    handshake::Handshake,
};
pub use rmi::{
    rmi_dispatcher::RmiDispatcher,
    rmi_request::{AttachmentPoint, RmiListener, RmiRequest, RmiTarget},
};
pub use sendable::{
    error::SendableError,
    handle::SendableHandle,
    message_flags::MessageFlags,
    priority::{DistancePriority, DrawDistanceFalloff, PositionInfo, PriorityContext},
    pulse::{Pulse, PulseState},
    reliability::Reliability,
    sendable::{OutgoingSendable, Sendable, SendableKind, SendableSlot},
    sendable_queue::{RetiredSendable, SendableQueue, SendableState, SendableStateUpdate},
};
pub use types::{
    ChannelId, EstablishToken, FunctionId, GroupId, ObjectId, Profile, RmiId, SendOrder, Vec3,
};
