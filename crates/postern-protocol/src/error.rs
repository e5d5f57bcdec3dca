//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Element length prefix is missing or not a decimal number
    #[error("Invalid element length prefix")]
    InvalidLengthPrefix,

    /// Something other than ',' or ';' followed an element value
    #[error("Unexpected byte {byte:#04x} after element value")]
    UnexpectedByte { byte: u8 },

    /// Element value is not valid UTF-8
    #[error("Element value is not valid UTF-8")]
    InvalidUtf8,

    /// Instruction exceeds maximum size
    #[error("Instruction too large: {size} bytes exceeds maximum of {max} bytes")]
    InstructionTooLarge { size: usize, max: usize },

    /// Connection closed before a complete instruction arrived
    #[error("Connection closed before a complete instruction")]
    UnexpectedEof,

    /// No instruction arrived within the allowed time
    #[error("Timed out waiting for instruction")]
    Timeout,

    /// A specific opcode was required but something else arrived
    #[error("Expected \"{expected}\" instruction, got \"{actual}\"")]
    UnexpectedOpcode { expected: String, actual: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
