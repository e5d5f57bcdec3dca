//! postern-protocol: Wire protocol for the postern gateway
//!
//! This crate defines the text-based instruction protocol spoken between
//! remote clients and the gateway. An instruction is an opcode followed by
//! zero or more string arguments; on the wire each element is length-prefixed
//! and instructions are terminated with a semicolon.

pub mod codec;
pub mod error;
pub mod expect;
pub mod instruction;
pub mod session;

pub use codec::{InstructionCodec, MAX_INSTRUCTION_SIZE};
pub use error::ProtocolError;
pub use expect::{expect_instruction, read_instruction};
pub use instruction::{Instruction, ProtocolStatus, OPCODE_ERROR, OPCODE_SELECT};
pub use session::{SessionId, SESSION_ID_LEN, SESSION_ID_PREFIX};
