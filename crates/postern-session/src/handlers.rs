//! Static instruction dispatch table
//!
//! Maps instruction opcodes to their handlers. Opcodes not in this table are
//! deliberately not errors: a session dispatches them as no-ops so newer
//! clients keep working against older gateways.

use std::str::FromStr;

use postern_core::SessionError;
use postern_protocol::Instruction;

use crate::session::ClientSession;

/// Handler signature shared by all table entries
pub(crate) type OpcodeHandler = fn(&ClientSession, &Instruction) -> Result<(), SessionError>;

static HANDLER_MAP: &[(&str, OpcodeHandler)] = &[
    ("sync", handle_sync),
    ("key", handle_key),
    ("mouse", handle_mouse),
    ("clipboard", handle_clipboard),
    ("size", handle_size),
    ("disconnect", handle_disconnect),
];

/// Find the handler for an opcode, if one is defined
pub(crate) fn lookup(opcode: &str) -> Option<OpcodeHandler> {
    HANDLER_MAP
        .iter()
        .find(|(name, _)| *name == opcode)
        .map(|(_, handler)| *handler)
}

fn required_arg<'a>(instruction: &'a Instruction, index: usize) -> Result<&'a str, SessionError> {
    instruction
        .arg(index)
        .ok_or_else(|| SessionError::MissingArgument {
            opcode: instruction.opcode.clone(),
            index,
        })
}

fn parsed_arg<T: FromStr>(instruction: &Instruction, index: usize) -> Result<T, SessionError> {
    let raw = required_arg(instruction, index)?;
    raw.parse().map_err(|_| SessionError::BadArgument {
        opcode: instruction.opcode.clone(),
        value: raw.to_string(),
    })
}

/// Client's periodic timestamp echo; activity is stamped by dispatch, the
/// argument only needs to be well-formed
fn handle_sync(_session: &ClientSession, instruction: &Instruction) -> Result<(), SessionError> {
    let _timestamp: u64 = parsed_arg(instruction, 0)?;
    Ok(())
}

fn handle_key(session: &ClientSession, instruction: &Instruction) -> Result<(), SessionError> {
    let keysym: i32 = parsed_arg(instruction, 0)?;
    let pressed: i32 = parsed_arg(instruction, 1)?;
    session.fire_key(keysym, pressed != 0)
}

fn handle_mouse(session: &ClientSession, instruction: &Instruction) -> Result<(), SessionError> {
    let x: i32 = parsed_arg(instruction, 0)?;
    let y: i32 = parsed_arg(instruction, 1)?;
    let mask: i32 = parsed_arg(instruction, 2)?;
    session.fire_mouse(x, y, mask)
}

fn handle_clipboard(
    session: &ClientSession,
    instruction: &Instruction,
) -> Result<(), SessionError> {
    let data = required_arg(instruction, 0)?;
    session.fire_clipboard(data)
}

fn handle_size(session: &ClientSession, instruction: &Instruction) -> Result<(), SessionError> {
    let width: i32 = parsed_arg(instruction, 0)?;
    let height: i32 = parsed_arg(instruction, 1)?;
    session.fire_size(width, height)
}

fn handle_disconnect(
    session: &ClientSession,
    _instruction: &Instruction,
) -> Result<(), SessionError> {
    session.stop();
    Ok(())
}
