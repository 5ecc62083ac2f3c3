use std::fmt;

/// Why a channel was disconnected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisconnectCause {
    /// No packet or no progress for a policy-defined duration
    Timeout,
    ProtocolError,
    ResolveFailed,
    VersionMismatch,
    ServerFull,
    Kicked,
    Banned,
    /// Replicated state can no longer be trusted
    ContextCorruption,
    AuthenticationFailed,
    NotLoggedIn,
    KeyCheckFailed,
    GameError,
    IncompatibleHardware,
    NubDestroyed,
    IcmpError,
    NatNegotiationError,
    CheatDetected,
    DemoPlaybackFinished,
    DemoPlaybackFileNotFound,
    UserRequested,
    NoController,
    CantConnect,
    ModMismatch,
    MapNotFound,
    MapVersion,
    Unknown,
}

impl DisconnectCause {
    pub fn name(&self) -> &'static str {
        match self {
            DisconnectCause::Timeout => "timeout",
            DisconnectCause::ProtocolError => "protocol error",
            DisconnectCause::ResolveFailed => "resolve failed",
            DisconnectCause::VersionMismatch => "version mismatch",
            DisconnectCause::ServerFull => "server full",
            DisconnectCause::Kicked => "kicked",
            DisconnectCause::Banned => "banned",
            DisconnectCause::ContextCorruption => "context corruption",
            DisconnectCause::AuthenticationFailed => "authentication failed",
            DisconnectCause::NotLoggedIn => "not logged in",
            DisconnectCause::KeyCheckFailed => "key check failed",
            DisconnectCause::GameError => "game error",
            DisconnectCause::IncompatibleHardware => "incompatible hardware",
            DisconnectCause::NubDestroyed => "nub destroyed",
            DisconnectCause::IcmpError => "icmp error",
            DisconnectCause::NatNegotiationError => "nat negotiation error",
            DisconnectCause::CheatDetected => "cheat detected",
            DisconnectCause::DemoPlaybackFinished => "demo playback finished",
            DisconnectCause::DemoPlaybackFileNotFound => "demo playback file not found",
            DisconnectCause::UserRequested => "user requested",
            DisconnectCause::NoController => "no controller",
            DisconnectCause::CantConnect => "can't connect",
            DisconnectCause::ModMismatch => "mod mismatch",
            DisconnectCause::MapNotFound => "map not found",
            DisconnectCause::MapVersion => "map version",
            DisconnectCause::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
