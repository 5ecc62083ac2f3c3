use std::{default::Default, time::Duration};

use crate::sendable::reliability::Reliability;

cfg_if! {
    if #[cfg(debug_assertions)] {
        const FATAL_CONFIGURATION_ERRORS: bool = true;
    } else {
        const FATAL_CONFIGURATION_ERRORS: bool = false;
    }
}

/// Contains Config properties which will be used by a `ReplicationContext`
#[derive(Clone)]
pub struct ReplicationConfig {
    /// Version a remote handshake must present
    pub protocol_version: u32,
    /// Password a remote handshake must present, if any
    pub password: Option<String>,
    /// Panic on configuration errors instead of logging and returning them
    pub fatal_configuration_errors: bool,
    /// Reliability of plain aspect updates. Updates carrying a profile change
    /// are always reliable-ordered.
    pub aspect_update_reliability: Reliability,
    /// Bytes each channel may hand to its transport per update pass
    pub bandwidth_per_update: usize,
    /// Queue depth at which a channel's queue is considered corrupted
    pub max_queued_sendables: usize,
    /// Sent sendables with no delivery outcome after this long are requeued
    pub sent_timeout: Duration,
    /// RMIs waiting for a dependent object's spawn are dropped after this long
    pub rmi_waitlist_ttl: Duration,
    /// Used to configure sendable prioritization
    pub priority: PriorityConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            password: None,
            fatal_configuration_errors: FATAL_CONFIGURATION_ERRORS,
            aspect_update_reliability: Reliability::ReliableUnordered,
            bandwidth_per_update: 16 * 1024,
            max_queued_sendables: 8192,
            sent_timeout: Duration::from_secs(2),
            rmi_waitlist_ttl: Duration::from_secs(60),
            priority: PriorityConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct PriorityConfig {
    /// Base priority of groups without scheduling params
    pub default_group_priority: f32,
    /// Boost of a pulse at the instant it is recorded
    pub pulse_boost: f32,
    /// Time for a pulse's boost to decay to zero
    pub pulse_duration: Duration,
    /// Draw distance assumed for sendables whose position has none
    pub default_draw_distance: f32,
    /// Largest priority reduction applied to far away sendables
    pub distance_weight: f32,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            default_group_priority: 1.0,
            pulse_boost: 4.0,
            pulse_duration: Duration::from_millis(1500),
            default_draw_distance: 100.0,
            distance_weight: 2.0,
        }
    }
}
