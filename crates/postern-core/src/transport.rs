//! Transport abstraction
//!
//! A transport is any owned bidirectional byte stream. Reads, writes, flush,
//! and readiness all come from tokio's I/O traits; "descriptor transfer" is
//! moving the owned value itself. Handing a transport to a session's worker
//! transfers the connection, it does not proxy bytes through the router.

use tokio::io::{AsyncRead, AsyncWrite};

/// An owned bidirectional byte stream that can cross task boundaries
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased transport, as handed between the router and workers
pub type BoxedTransport = Box<dyn Transport>;
