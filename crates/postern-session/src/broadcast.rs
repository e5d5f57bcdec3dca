//! Broadcast write sink
//!
//! A session's broadcast sink replicates written instructions to every
//! currently attached user's transport. It is deliberately write/flush-only:
//! reading or polling readiness on the aggregate of many users' transports
//! has no meaning, so those capabilities do not exist on this type at all.
//! A user's own transport keeps full read/write capability through its
//! reader/writer pair.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use tokio_util::codec::Encoder;

use postern_core::SessionError;
use postern_protocol::{Instruction, InstructionCodec};

use crate::user::Roster;

/// Write-only fan-out over a session's attached users
pub struct BroadcastWriter {
    roster: Arc<Roster>,
    buf: Mutex<BytesMut>,
}

impl BroadcastWriter {
    pub(crate) fn new(roster: Arc<Roster>) -> Self {
        Self {
            roster,
            buf: Mutex::new(BytesMut::new()),
        }
    }

    /// Encode an instruction into the pending broadcast buffer
    ///
    /// Nothing reaches any user until [`flush`](Self::flush) runs.
    pub fn write_instruction(&self, instruction: Instruction) -> Result<(), SessionError> {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        let mut codec = InstructionCodec::new();
        codec.encode(instruction, &mut buf)?;
        Ok(())
    }

    /// Deliver the pending buffer to every attached user, exactly once each
    ///
    /// The recipient set is the users attached at the instant the roster is
    /// snapshotted. A user whose transport is already gone is skipped.
    /// Returns the number of users the payload was queued for.
    pub async fn flush(&self) -> usize {
        let payload = {
            let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
            if buf.is_empty() {
                return 0;
            }
            buf.split().freeze()
        };

        let mut delivered = 0;
        for user in self.roster.snapshot() {
            match user.send_raw(payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::debug!("Skipping broadcast to detached {}", user.id());
                }
            }
        }
        delivered
    }
}
