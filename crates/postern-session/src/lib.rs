//! postern-session: Session lifecycle and resource management
//!
//! This crate implements the session entity of the postern gateway: the
//! reusable-integer pools behind all resource handles, drawable layer and
//! buffer allocation, bounded binary-transfer streams, the concurrent
//! multi-user membership list, and the broadcast write sink that fans
//! instructions out to every attached user.

pub mod broadcast;
mod handlers;
pub mod layer;
pub mod pool;
pub mod session;
pub mod stream;
pub mod user;

pub use broadcast::BroadcastWriter;
pub use layer::{Layer, DEFAULT_LAYER};
pub use pool::IndexPool;
pub use session::{
    ClientSession, ClipboardHook, FreeHook, KeyHook, MouseHook, SessionState, SizeHook, UserHook,
};
pub use stream::{StreamKind, StreamTable, CLOSED_STREAM_INDEX, MAX_STREAMS};
pub use user::{UserId, UserSession};
