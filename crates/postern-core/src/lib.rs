//! postern-core: Core abstractions and configuration for the postern gateway
//!
//! This crate provides the shared error taxonomy, gateway configuration,
//! time utilities, and the transport abstraction used by the session library
//! and the gateway daemon.

pub mod config;
pub mod error;
pub mod time;
pub mod transport;

pub use config::GatewayConfig;
pub use error::{PosternError, RouteError, SessionError};
pub use transport::{BoxedTransport, Transport};
