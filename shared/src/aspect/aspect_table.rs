use crate::constants::MAX_ASPECTS;

use super::{
    aspect_flags::{AspectFlags, AspectIndex, AspectMask},
    error::ConfigurationError,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AspectDescriptor {
    pub name: String,
    pub flags: AspectFlags,
}

impl AspectDescriptor {
    pub fn is_delegatable(&self) -> bool {
        self.flags.contains(AspectFlags::DELEGATABLE)
    }

    pub fn has_server_managed_profile(&self) -> bool {
        self.flags.contains(AspectFlags::SERVER_MANAGED_PROFILE)
    }

    pub fn hashes_state(&self) -> bool {
        self.flags.contains(AspectFlags::HASH_STATE)
    }

    pub fn timestamps_state(&self) -> bool {
        self.flags.contains(AspectFlags::TIMESTAMP_STATE)
    }
}

/// Process-wide table of aspect declarations, keyed by aspect index.
/// Declarations are immutable once made.
pub struct AspectTable {
    descriptors: [Option<AspectDescriptor>; MAX_ASPECTS as usize],
}

impl AspectTable {
    pub fn new() -> Self {
        Self {
            descriptors: Default::default(),
        }
    }

    /// Declare an aspect. Redeclaring with identical flags is accepted.
    pub fn declare(
        &mut self,
        name: &str,
        index: AspectIndex,
        flags: AspectFlags,
    ) -> Result<(), ConfigurationError> {
        if index >= MAX_ASPECTS {
            return Err(ConfigurationError::AspectIndexOutOfRange { index });
        }

        let slot = &mut self.descriptors[index as usize];
        if let Some(existing) = slot {
            if existing.flags != flags {
                return Err(ConfigurationError::AspectRedeclared {
                    index,
                    name: existing.name.clone(),
                    existing: existing.flags.bits(),
                    requested: flags.bits(),
                });
            }
            return Ok(());
        }

        *slot = Some(AspectDescriptor {
            name: name.to_string(),
            flags,
        });
        Ok(())
    }

    pub fn is_declared(&self, index: AspectIndex) -> bool {
        self.try_descriptor(index).is_ok()
    }

    /// Get the descriptor of a declared aspect
    ///
    /// # Panics
    ///
    /// Panics if the aspect has not been declared.
    /// Consider using `try_descriptor` for non-panicking error handling.
    pub fn descriptor(&self, index: AspectIndex) -> &AspectDescriptor {
        self.try_descriptor(index)
            .expect("Aspect must be declared before it is used!")
    }

    pub fn try_descriptor(&self, index: AspectIndex) -> Result<&AspectDescriptor, ConfigurationError> {
        self.descriptors
            .get(index as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(ConfigurationError::AspectNotDeclared { index })
    }

    /// Mask of every declared aspect
    pub fn declared_mask(&self) -> AspectMask {
        let mut mask = AspectMask::EMPTY;
        for (index, slot) in self.descriptors.iter().enumerate() {
            if slot.is_some() {
                mask = mask.union(AspectMask::single(index as AspectIndex));
            }
        }
        mask
    }

    /// First aspect of `mask` that has not been declared
    pub fn first_undeclared(&self, mask: AspectMask) -> Option<AspectIndex> {
        mask.difference(self.declared_mask()).iter().next()
    }

    /// Subset of `mask` whose aspects are flagged with all of `flags`
    pub fn filter(&self, mask: AspectMask, flags: AspectFlags) -> AspectMask {
        let mut output = AspectMask::EMPTY;
        for index in mask.iter() {
            if let Ok(descriptor) = self.try_descriptor(index) {
                if descriptor.flags.contains(flags) {
                    output = output.union(AspectMask::single(index));
                }
            }
        }
        output
    }
}

impl Default for AspectTable {
    fn default() -> Self {
        Self::new()
    }
}
