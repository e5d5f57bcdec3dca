//! Core error types for postern
//!
//! Every fallible operation returns one of these explicitly; there is no
//! process-wide last-error state.

use postern_protocol::{ProtocolError, SessionId};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the postern ecosystem
#[derive(Error, Debug)]
pub enum PosternError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Routing error
    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session-related errors
///
/// These are local, recoverable failures: the caller aborts the specific
/// operation, never the session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Stream pool is at its maximum
    #[error("Stream limit reached ({max} active streams)")]
    CapacityExceeded { max: usize },

    /// Instruction arrived without a required argument
    #[error("Missing argument {index} to \"{opcode}\"")]
    MissingArgument { opcode: String, index: usize },

    /// Instruction argument could not be parsed
    #[error("Bad argument to \"{opcode}\": {value:?}")]
    BadArgument { opcode: String, value: String },

    /// Stream index refers to a closed slot
    #[error("Stream {0} is closed")]
    StreamClosed(i32),

    /// Stream index is outside the table entirely
    #[error("Stream index {0} out of range")]
    InvalidStreamIndex(i32),

    /// The target user detached before the write could be delivered
    #[error("User is no longer attached")]
    UserDetached,

    /// A session callback reported failure
    #[error("Session handler failed: {0}")]
    Handler(String),

    /// Protocol error while encoding for the broadcast sink
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Connection-routing errors
///
/// Any of these rejects the offending connection; none of them mutate
/// session or registry state.
#[derive(Error, Debug)]
pub enum RouteError {
    /// Handshake was malformed, timed out, or never arrived
    #[error("Handshake failed: {0}")]
    Handshake(#[from] ProtocolError),

    /// Handshake carried the wrong number of arguments
    #[error("Bad number of arguments to \"select\" ({0})")]
    BadHandshakeArgs(usize),

    /// Join target is not present in the registry
    #[error("Session \"{0}\" does not exist")]
    UnknownSession(SessionId),

    /// A session with this identifier is already registered
    #[error("Session \"{0}\" already registered")]
    SessionExists(SessionId),

    /// The chosen worker was gone by the time the connection was handed off
    #[error("Unable to hand connection off to session \"{0}\"")]
    HandoffFailed(SessionId),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
