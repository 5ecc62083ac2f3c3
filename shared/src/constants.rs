/// Hard ceiling on the number of aspects a single object may carry. Aspect
/// masks are stored in a `u8`.
pub const MAX_ASPECTS: u8 = 8;

/// Profiles are small integers in `0..MAX_PROFILES_PER_ASPECT`.
pub const MAX_PROFILES_PER_ASPECT: u8 = 8;

/// Capacity of a `PulseState`. Pulses with new keys beyond this are ignored.
pub const MAX_PULSES_PER_STATE: usize = 6;
