//! Instruction types for the postern protocol
//!
//! An instruction is an opcode plus a list of string arguments. The gateway
//! core depends only on this shape; the wire encoding lives in `codec.rs`.
//!
//! # Handshake
//!
//! The first instruction on any new connection must be `select` with exactly
//! one argument: either the name of a backend protocol to start a new session
//! with, or an existing session identifier (recognized by its leading `$`)
//! to join.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opcode of the handshake instruction
pub const OPCODE_SELECT: &str = "select";

/// Opcode of the terminal diagnostic instruction
pub const OPCODE_ERROR: &str = "error";

/// A single protocol instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Operation name
    pub opcode: String,
    /// String arguments, in order
    pub args: Vec<String>,
}

impl Instruction {
    /// Create a new instruction
    pub fn new(opcode: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args,
        }
    }

    /// Build the terminal `error` instruction sent when a session aborts
    pub fn error(message: &str, status: ProtocolStatus) -> Self {
        Self::new(
            OPCODE_ERROR,
            vec![message.to_string(), status.as_u16().to_string()],
        )
    }

    /// Get argument `n`, if present
    pub fn arg(&self, n: usize) -> Option<&str> {
        self.args.get(n).map(String::as_str)
    }

    /// Number of arguments
    pub fn argc(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.opcode, self.args.join(", "))
    }
}

/// Status codes carried by `error` instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ProtocolStatus {
    /// Operation succeeded
    Success = 0x0000,
    /// Operation is not supported
    Unsupported = 0x0100,
    /// Internal gateway failure
    ServerError = 0x0200,
    /// Gateway is temporarily unable to serve the request
    ServerBusy = 0x0201,
    /// Remote backend did not respond in time
    UpstreamTimeout = 0x0202,
    /// Requested resource (session, stream) does not exist
    ResourceNotFound = 0x0204,
    /// Client request was malformed
    ClientBadRequest = 0x0300,
    /// Client took too long
    ClientTimeout = 0x0308,
    /// Resource limit for this client was reached
    ClientTooMany = 0x031D,
}

impl ProtocolStatus {
    /// Convert to u16
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::Success),
            0x0100 => Some(Self::Unsupported),
            0x0200 => Some(Self::ServerError),
            0x0201 => Some(Self::ServerBusy),
            0x0202 => Some(Self::UpstreamTimeout),
            0x0204 => Some(Self::ResourceNotFound),
            0x0300 => Some(Self::ClientBadRequest),
            0x0308 => Some(Self::ClientTimeout),
            0x031D => Some(Self::ClientTooMany),
            _ => None,
        }
    }
}
