//! Peer identifiers issued by the relay.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Identifies one connected peer for the lifetime of its connection.
///
/// Backed by a random (version 4) UUID so identifiers cannot be enumerated
/// from a counter. On the wire it is the lowercase hyphenated UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generates a fresh random identifier.
    ///
    /// Draws from the operating system CSPRNG. If the OS cannot supply
    /// randomness this panics, which is treated as process-fatal.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `PeerId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Error returned when a string is not an identifier the relay issued.
#[derive(Debug, thiserror::Error)]
pub enum PeerIdError {
    /// Not a UUID at all.
    #[error("invalid peer id: {0}")]
    Invalid(#[from] uuid::Error),
    /// A UUID, but not spelled the way the relay issues it.
    #[error("peer id {0:?} is not lowercase hyphenated")]
    NonCanonical(String),
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    /// Accepts only the exact lowercase hyphenated form produced by
    /// [`Display`](std::fmt::Display).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s)?;
        let mut buf = Uuid::encode_buffer();
        if uuid.hyphenated().encode_lower(&mut buf) != s {
            return Err(PeerIdError::NonCanonical(s.to_string()));
        }
        Ok(Self(uuid))
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
