//! Connection routing
//!
//! Turns a raw transport connection into either a brand-new session or a
//! join of an existing one. The handshake is a single `select` instruction,
//! read within a bounded timeout; its one argument either names a backend
//! protocol (create) or carries a `$`-prefixed session identifier (join).
//! Any deviation rejects the connection without touching session or
//! registry state.

use std::sync::Arc;

use tokio_util::codec::FramedRead;

use postern_core::{BoxedTransport, GatewayConfig, RouteError};
use postern_protocol::{expect_instruction, InstructionCodec, SessionId, OPCODE_SELECT};
use postern_session::ClientSession;

use crate::registry::SessionRegistry;
use crate::worker::{UserHandoff, Worker};

/// Where a successfully routed connection ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Connection became the first user of a newly created session
    Created(SessionId),
    /// Connection joined an existing session
    Joined(SessionId),
}

impl Routed {
    /// Identifier of the session the connection was routed to
    pub fn session_id(&self) -> &SessionId {
        match self {
            Routed::Created(id) | Routed::Joined(id) => id,
        }
    }
}

/// Routes inbound connections to session workers
pub struct ConnectionRouter {
    registry: Arc<SessionRegistry>,
    config: GatewayConfig,
}

impl ConnectionRouter {
    /// Create a router over the given registry
    pub fn new(registry: Arc<SessionRegistry>, config: GatewayConfig) -> Self {
        Self { registry, config }
    }

    /// The registry this router consults
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Route one connection: handshake, create-or-join, hand-off
    ///
    /// On error the caller just drops the transport; nothing shared has
    /// been mutated on any rejection path.
    pub async fn route(&self, transport: BoxedTransport) -> Result<Routed, RouteError> {
        // Exactly one instruction, which must be the handshake
        let mut framed = FramedRead::new(transport, InstructionCodec::new());
        let select =
            expect_instruction(&mut framed, self.config.handshake_timeout(), OPCODE_SELECT)
                .await?;

        if select.argc() != 1 {
            return Err(RouteError::BadHandshakeArgs(select.argc()));
        }
        let Some(arg) = select.arg(0) else {
            return Err(RouteError::BadHandshakeArgs(0));
        };

        // Whatever the client pipelined after the handshake must survive
        // the hand-off
        let leftover = framed.read_buffer_mut().split();

        match SessionId::from_handshake_arg(arg) {
            // Join: the identifier must already be registered
            Some(session_id) => {
                let Some(worker) = self.registry.lookup(&session_id) else {
                    tracing::info!("Session \"{}\" does not exist", session_id);
                    return Err(RouteError::UnknownSession(session_id));
                };

                tracing::info!("Joining existing session \"{}\"", session_id);
                worker
                    .hand_off(UserHandoff {
                        transport: framed.into_inner(),
                        leftover,
                    })
                    .await?;
                Ok(Routed::Joined(session_id))
            }

            // Create: spawn a worker around a fresh session. The worker
            // registers the session only after this first user attaches,
            // so no other connection can join it half-initialized.
            None => {
                tracing::info!("Creating new session for protocol \"{}\"", arg);
                let session = ClientSession::new(arg);
                let session_id = session.id().clone();
                let worker = Worker::spawn(Arc::clone(&self.registry), session, &self.config);

                if let Err(e) = worker
                    .hand_off(UserHandoff {
                        transport: framed.into_inner(),
                        leftover,
                    })
                    .await
                {
                    // Never published; discard the session outright
                    worker.shut_down();
                    return Err(e);
                }

                Ok(Routed::Created(session_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use postern_protocol::ProtocolError;

    fn test_router() -> ConnectionRouter {
        let mut config = GatewayConfig::default();
        config.handshake_timeout_ms = 1_000;
        ConnectionRouter::new(Arc::new(SessionRegistry::new()), config)
    }

    async fn wait_for_registration(router: &ConnectionRouter, id: &SessionId) {
        for _ in 0..100 {
            if router.registry().lookup(id).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session \"{}\" never registered", id);
    }

    #[tokio::test]
    async fn test_wrong_opcode_rejected_before_lookup() {
        let router = test_router();
        let (mut client, server) = tokio::io::duplex(1024);

        client.write_all(b"4.sync,1.0;").await.unwrap();
        let result = router.route(Box::new(server)).await;

        assert!(matches!(
            result,
            Err(RouteError::Handshake(ProtocolError::UnexpectedOpcode { .. }))
        ));
        assert!(router.registry().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_arg_count_rejected() {
        let router = test_router();
        let (mut client, server) = tokio::io::duplex(1024);

        client
            .write_all(b"6.select,3.vnc,5.extra;")
            .await
            .unwrap();
        let result = router.route(Box::new(server)).await;

        assert!(matches!(result, Err(RouteError::BadHandshakeArgs(2))));
        assert!(router.registry().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let router = test_router();
        let (mut client, server) = tokio::io::duplex(1024);

        let bogus = SessionId::generate();
        let handshake = format!("6.select,37.{};", bogus);
        client.write_all(handshake.as_bytes()).await.unwrap();
        let result = router.route(Box::new(server)).await;

        assert!(matches!(result, Err(RouteError::UnknownSession(_))));
        assert!(router.registry().is_empty());
    }

    #[tokio::test]
    async fn test_create_then_join() {
        let router = test_router();

        // First connection creates a session
        let (mut owner, server) = tokio::io::duplex(1024);
        owner.write_all(b"6.select,3.vnc;").await.unwrap();
        let routed = router.route(Box::new(server)).await.unwrap();

        let Routed::Created(id) = routed else {
            panic!("expected a created session");
        };
        assert_eq!(id.as_str().len(), 37);
        wait_for_registration(&router, &id).await;

        // Second connection joins it by identifier, minting nothing new
        let (mut guest, server) = tokio::io::duplex(1024);
        let handshake = format!("6.select,37.{};", id);
        guest.write_all(handshake.as_bytes()).await.unwrap();
        let routed = router.route(Box::new(server)).await.unwrap();

        assert_eq!(routed, Routed::Joined(id));
        assert_eq!(router.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_times_out() {
        let router = test_router();
        let (_client, server) = tokio::io::duplex(1024);

        let result = router.route(Box::new(server)).await;
        assert!(matches!(
            result,
            Err(RouteError::Handshake(ProtocolError::Timeout))
        ));
        assert!(router.registry().is_empty());
    }
}
