//! Binary-transfer streams
//!
//! A stream is a bounded, session-scoped channel for moving binary data
//! between a user and the session, identified by a pool-issued integer.
//! Output streams originate in the session; input streams originate in a
//! user. Each direction has a fixed-size table of slots; a free slot carries
//! the closed sentinel index so stale handles can detect closure.

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

use postern_core::SessionError;
use postern_protocol::ProtocolStatus;

use crate::pool::IndexPool;

/// Maximum number of simultaneously active streams per direction
pub const MAX_STREAMS: usize = 64;

/// Index stored in a slot that holds no active stream
pub const CLOSED_STREAM_INDEX: i32 = -1;

/// Which direction's stream table an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Streams opened by a user toward the session
    Input,
    /// Streams opened by the session toward its users
    Output,
}

/// Invoked when the receiving end acknowledges stream data
pub type AckHandler =
    Arc<dyn Fn(&str, ProtocolStatus) -> Result<(), SessionError> + Send + Sync>;

/// Invoked for each received chunk of stream data
pub type BlobHandler = Arc<dyn Fn(&[u8]) -> Result<(), SessionError> + Send + Sync>;

/// Invoked when the stream ends
pub type EndHandler = Arc<dyn Fn() -> Result<(), SessionError> + Send + Sync>;

struct StreamSlot {
    /// Stream index, or [`CLOSED_STREAM_INDEX`] when the slot is free
    index: i32,
    /// Opaque reference supplied by whoever opened the stream
    data: Option<Box<dyn Any + Send>>,
    ack_handler: Option<AckHandler>,
    blob_handler: Option<BlobHandler>,
    end_handler: Option<EndHandler>,
}

impl StreamSlot {
    fn closed() -> Self {
        Self {
            index: CLOSED_STREAM_INDEX,
            data: None,
            ack_handler: None,
            blob_handler: None,
            end_handler: None,
        }
    }

    fn is_closed(&self) -> bool {
        self.index == CLOSED_STREAM_INDEX
    }

    /// Mark the slot active and clear anything left by a previous occupant
    fn reset(&mut self, index: i32) {
        self.index = index;
        self.data = None;
        self.ack_handler = None;
        self.blob_handler = None;
        self.end_handler = None;
    }
}

/// Both stream tables of one session plus their shared index pool
pub struct StreamTable {
    inner: Mutex<TableInner>,
}

struct TableInner {
    pool: IndexPool,
    input: Vec<StreamSlot>,
    output: Vec<StreamSlot>,
}

impl TableInner {
    fn slots_mut(&mut self, kind: StreamKind) -> &mut Vec<StreamSlot> {
        match kind {
            StreamKind::Input => &mut self.input,
            StreamKind::Output => &mut self.output,
        }
    }

    fn slot_mut(
        &mut self,
        kind: StreamKind,
        index: i32,
    ) -> Result<&mut StreamSlot, SessionError> {
        let slots = self.slots_mut(kind);
        usize::try_from(index)
            .ok()
            .and_then(|i| slots.get_mut(i))
            .ok_or(SessionError::InvalidStreamIndex(index))
    }
}

impl StreamTable {
    /// Create a table with all slots closed
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                pool: IndexPool::new(),
                input: (0..MAX_STREAMS).map(|_| StreamSlot::closed()).collect(),
                output: (0..MAX_STREAMS).map(|_| StreamSlot::closed()).collect(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new output stream
    ///
    /// Fails without any side effect once [`MAX_STREAMS`] streams are
    /// active.
    pub fn alloc(&self) -> Result<i32, SessionError> {
        let mut inner = self.lock();
        if inner.pool.active() == MAX_STREAMS {
            return Err(SessionError::CapacityExceeded { max: MAX_STREAMS });
        }

        let index = inner.pool.allocate();
        // The active bound keeps pool indices below MAX_STREAMS
        inner.output[index as usize].reset(index);
        Ok(index)
    }

    /// Close an output stream, releasing its index for reuse
    ///
    /// The slot keeps the closed sentinel afterwards, so a stale holder of
    /// the index can detect that its stream is gone. Closing an already
    /// closed stream has no effect.
    pub fn free(&self, index: i32) {
        let mut inner = self.lock();
        let in_range = usize::try_from(index)
            .map(|i| i < MAX_STREAMS)
            .unwrap_or(false);
        if !in_range || inner.output[index as usize].is_closed() {
            return;
        }

        inner.pool.release(index);
        inner.output[index as usize].index = CLOSED_STREAM_INDEX;
    }

    /// Mark an input slot active for a user-initiated stream
    pub fn open_input(&self, index: i32) -> Result<(), SessionError> {
        let mut inner = self.lock();
        inner.slot_mut(StreamKind::Input, index)?.reset(index);
        Ok(())
    }

    /// Close a user-initiated stream
    pub fn close_input(&self, index: i32) -> Result<(), SessionError> {
        let mut inner = self.lock();
        inner.slot_mut(StreamKind::Input, index)?.index = CLOSED_STREAM_INDEX;
        Ok(())
    }

    /// Attach the opaque data reference to an active stream
    pub fn set_data(
        &self,
        kind: StreamKind,
        index: i32,
        data: Box<dyn Any + Send>,
    ) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let slot = inner.slot_mut(kind, index)?;
        if slot.is_closed() {
            return Err(SessionError::StreamClosed(index));
        }
        slot.data = Some(data);
        Ok(())
    }

    /// Take the opaque data reference from a stream, if any
    pub fn take_data(&self, kind: StreamKind, index: i32) -> Option<Box<dyn Any + Send>> {
        let mut inner = self.lock();
        inner
            .slot_mut(kind, index)
            .ok()
            .and_then(|slot| slot.data.take())
    }

    /// Install the acknowledge callback on an active stream
    pub fn set_ack_handler(
        &self,
        kind: StreamKind,
        index: i32,
        handler: AckHandler,
    ) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let slot = inner.slot_mut(kind, index)?;
        if slot.is_closed() {
            return Err(SessionError::StreamClosed(index));
        }
        slot.ack_handler = Some(handler);
        Ok(())
    }

    /// Install the data-chunk callback on an active stream
    pub fn set_blob_handler(
        &self,
        kind: StreamKind,
        index: i32,
        handler: BlobHandler,
    ) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let slot = inner.slot_mut(kind, index)?;
        if slot.is_closed() {
            return Err(SessionError::StreamClosed(index));
        }
        slot.blob_handler = Some(handler);
        Ok(())
    }

    /// Install the end callback on an active stream
    pub fn set_end_handler(
        &self,
        kind: StreamKind,
        index: i32,
        handler: EndHandler,
    ) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let slot = inner.slot_mut(kind, index)?;
        if slot.is_closed() {
            return Err(SessionError::StreamClosed(index));
        }
        slot.end_handler = Some(handler);
        Ok(())
    }

    /// Fire the acknowledge callback of a stream
    ///
    /// Firing against a closed slot is a no-op, not an error: the stream may
    /// have been legitimately freed while the triggering instruction was in
    /// flight.
    pub fn fire_ack(
        &self,
        kind: StreamKind,
        index: i32,
        message: &str,
        status: ProtocolStatus,
    ) -> Result<(), SessionError> {
        let handler = {
            let mut inner = self.lock();
            match inner.slot_mut(kind, index) {
                Ok(slot) if !slot.is_closed() => slot.ack_handler.clone(),
                _ => return Ok(()),
            }
        };
        match handler {
            Some(handler) => handler(message, status),
            None => Ok(()),
        }
    }

    /// Fire the data-chunk callback of a stream
    pub fn fire_blob(
        &self,
        kind: StreamKind,
        index: i32,
        data: &[u8],
    ) -> Result<(), SessionError> {
        let handler = {
            let mut inner = self.lock();
            match inner.slot_mut(kind, index) {
                Ok(slot) if !slot.is_closed() => slot.blob_handler.clone(),
                _ => return Ok(()),
            }
        };
        match handler {
            Some(handler) => handler(data),
            None => Ok(()),
        }
    }

    /// Fire the end callback of a stream
    pub fn fire_end(&self, kind: StreamKind, index: i32) -> Result<(), SessionError> {
        let handler = {
            let mut inner = self.lock();
            match inner.slot_mut(kind, index) {
                Ok(slot) if !slot.is_closed() => slot.end_handler.clone(),
                _ => return Ok(()),
            }
        };
        match handler {
            Some(handler) => handler(),
            None => Ok(()),
        }
    }

    /// Number of active output streams
    pub fn active(&self) -> usize {
        self.lock().pool.active()
    }
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}
