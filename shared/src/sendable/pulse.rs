use std::{
    sync::{Arc, RwLock},
    time::Instant,
};

use log::debug;

use crate::{config::PriorityConfig, constants::MAX_PULSES_PER_STATE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pulse {
    pub key: u32,
    pub time: Instant,
}

// PulseData
struct PulseData {
    // sorted by key
    pulses: Vec<Pulse>,
}

impl PulseData {
    fn new() -> Self {
        Self {
            pulses: Vec::with_capacity(MAX_PULSES_PER_STATE),
        }
    }

    fn pulse(&mut self, key: u32, now: Instant) -> bool {
        match self.pulses.binary_search_by_key(&key, |pulse| pulse.key) {
            Ok(index) => {
                self.pulses[index].time = now;
                true
            }
            Err(index) => {
                if self.pulses.len() == MAX_PULSES_PER_STATE {
                    debug!(
                        "Pulse {} ignored, pulse state already holds {} keys",
                        key, MAX_PULSES_PER_STATE
                    );
                    return false;
                }
                self.pulses.insert(index, Pulse { key, time: now });
                true
            }
        }
    }
}

/// Transient priority boosts shared by every sendable of one group.
///
/// Only the most recent instant per key is kept; decay is computed by the
/// reader. The state lives as long as any binding or sendable holds a clone.
#[derive(Clone)]
pub struct PulseState {
    data: Arc<RwLock<PulseData>>,
}

impl PulseState {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(PulseData::new())),
        }
    }

    /// Record a pulse. Returns false if the key was new and the state is full.
    pub fn pulse(&self, key: u32, now: Instant) -> bool {
        let Ok(mut data) = self.data.as_ref().write() else {
            panic!("PulseState lock held on current thread");
        };
        data.pulse(key, now)
    }

    pub fn pulses(&self) -> Vec<Pulse> {
        let Ok(data) = self.data.as_ref().read() else {
            panic!("PulseState lock held on current thread");
        };
        data.pulses.clone()
    }

    pub fn len(&self) -> usize {
        self.pulses().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of every pulse's linearly decayed boost at `now`
    pub fn boost(&self, now: Instant, config: &PriorityConfig) -> f32 {
        let duration = config.pulse_duration.as_secs_f32();
        if duration <= 0.0 {
            return 0.0;
        }

        let mut boost = 0.0;
        for pulse in self.pulses() {
            let elapsed = now.saturating_duration_since(pulse.time).as_secs_f32();
            let remaining = 1.0 - elapsed / duration;
            if remaining > 0.0 {
                boost += config.pulse_boost * remaining;
            }
        }
        boost
    }

    /// Number of live references to this state
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    pub fn ptr_eq(&self, other: &PulseState) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl Default for PulseState {
    fn default() -> Self {
        Self::new()
    }
}
