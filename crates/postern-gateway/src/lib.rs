//! postern-gateway: The gateway daemon
//!
//! Accepts incoming protocol connections, routes each to a brand-new session
//! or an existing one, and runs one isolated worker task per session. The
//! worker owns the session's state and resource pools; users reach it via
//! descriptor hand-off over its inbound channel.

pub mod registry;
pub mod router;
pub mod server;
pub mod worker;

pub use registry::SessionRegistry;
pub use router::{ConnectionRouter, Routed};
pub use server::GatewayServer;
pub use worker::{UserHandoff, Worker};
