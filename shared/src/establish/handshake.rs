use crate::{config::ReplicationConfig, types::ChannelId};

use super::error::EstablishmentError;

/// What a remote presents before context establishment may begin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u32,
    pub password: Option<String>,
}

impl Handshake {
    pub fn new(protocol_version: u32, password: Option<&str>) -> Self {
        Self {
            protocol_version,
            password: password.map(str::to_string),
        }
    }

    pub fn validate(
        &self,
        channel: &ChannelId,
        config: &ReplicationConfig,
    ) -> Result<(), EstablishmentError> {
        if self.protocol_version != config.protocol_version {
            return Err(EstablishmentError::VersionMismatch {
                expected: config.protocol_version,
                received: self.protocol_version,
            });
        }
        if let Some(password) = &config.password {
            if self.password.as_ref() != Some(password) {
                return Err(EstablishmentError::AuthenticationFailed {
                    channel: channel.to_string(),
                });
            }
        }
        Ok(())
    }
}
