//! Session identifier type

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Marker character distinguishing session identifiers from protocol names
/// in the handshake argument
pub const SESSION_ID_PREFIX: char = '$';

/// Length of a session identifier in bytes: the marker plus the canonical
/// 36-character text form of a UUID
pub const SESSION_ID_LEN: usize = 37;

/// Public identifier of a session
///
/// Session identifiers are minted once per session and handed back to the
/// first user; any later connection presenting the identifier in its
/// handshake joins the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a new globally unique session identifier
    pub fn generate() -> Self {
        Self(format!("{}{}", SESSION_ID_PREFIX, Uuid::new_v4()))
    }

    /// Interpret a handshake argument as a session identifier
    ///
    /// Returns `None` if the argument does not carry the marker character,
    /// in which case it names a backend protocol instead. No further
    /// validation happens here: an identifier that was never issued simply
    /// will not be found in the registry.
    pub fn from_handshake_arg(arg: &str) -> Option<Self> {
        arg.starts_with(SESSION_ID_PREFIX)
            .then(|| Self(arg.to_string()))
    }

    /// Get the raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
