use std::fmt;

/// Progress of one context establishment pass. Strictly monotonic; only a
/// reset returns to `Initial`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextViewState {
    Initial,
    Begin,
    EstablishContext,
    ConfigureContext,
    SpawnEntities,
    PostSpawnEntities,
    InGame,
}

impl ContextViewState {
    pub const ALL: [ContextViewState; 7] = [
        ContextViewState::Initial,
        ContextViewState::Begin,
        ContextViewState::EstablishContext,
        ContextViewState::ConfigureContext,
        ContextViewState::SpawnEntities,
        ContextViewState::PostSpawnEntities,
        ContextViewState::InGame,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn next(&self) -> Option<ContextViewState> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContextViewState::Initial => "Initial",
            ContextViewState::Begin => "Begin",
            ContextViewState::EstablishContext => "EstablishContext",
            ContextViewState::ConfigureContext => "ConfigureContext",
            ContextViewState::SpawnEntities => "SpawnEntities",
            ContextViewState::PostSpawnEntities => "PostSpawnEntities",
            ContextViewState::InGame => "InGame",
        }
    }
}

impl fmt::Display for ContextViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse, observable state of a channel. Handshake checks happen before
/// context initiation; `InGame` requires the establisher to be in game too.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelConnectionState {
    WaitingForResponse,
    StartingConnection,
    InContextInitiation,
    InGame,
    Disconnecting,
}

impl ChannelConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelConnectionState::WaitingForResponse => "WaitingForResponse",
            ChannelConnectionState::StartingConnection => "StartingConnection",
            ChannelConnectionState::InContextInitiation => "InContextInitiation",
            ChannelConnectionState::InGame => "InGame",
            ChannelConnectionState::Disconnecting => "Disconnecting",
        }
    }
}

impl fmt::Display for ChannelConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
