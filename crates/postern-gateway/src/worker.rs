//! Per-session worker
//!
//! Each session is owned by exactly one worker task: the isolation unit of
//! the gateway. Workers never share memory with each other; the only
//! cross-session structure is the registry. Newly routed user connections
//! reach their worker through its hand-off channel, which transfers the
//! owned transport rather than proxying bytes through the router. Inside a
//! worker, one reader/writer task pair per attached user moves bytes between
//! that user's transport and the session.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use postern_core::{BoxedTransport, GatewayConfig, RouteError};
use postern_protocol::{InstructionCodec, SessionId};
use postern_session::{ClientSession, UserSession};

use crate::registry::SessionRegistry;

/// A user connection in transfer to a worker
pub struct UserHandoff {
    /// The owned transport
    pub transport: BoxedTransport,
    /// Bytes the router had already read past the handshake; framing
    /// resumes from these
    pub leftover: BytesMut,
}

/// Handle to the worker task owning one session
pub struct Worker {
    session: Arc<ClientSession>,
    handoff_tx: mpsc::Sender<UserHandoff>,
    terminated: CancellationToken,
}

impl Worker {
    /// Start a worker for a freshly created session
    ///
    /// The worker publishes itself into the registry once its first user
    /// attach succeeds (until then the session is not joinable) and removes
    /// itself exactly once when it terminates. Keeping every registry
    /// mutation for one identifier inside the worker task makes publish and
    /// removal naturally ordered.
    pub fn spawn(
        registry: Arc<SessionRegistry>,
        session: Arc<ClientSession>,
        config: &GatewayConfig,
    ) -> Arc<Self> {
        let (handoff_tx, handoff_rx) = mpsc::channel(config.handoff_queue_depth);
        let worker = Arc::new(Self {
            session,
            handoff_tx,
            terminated: CancellationToken::new(),
        });

        tokio::spawn(run(
            registry,
            Arc::clone(&worker),
            handoff_rx,
            config.user_queue_depth,
        ));

        worker
    }

    /// The session this worker owns
    pub fn session(&self) -> &Arc<ClientSession> {
        &self.session
    }

    /// Identifier of the owned session
    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    /// Transfer a newly routed user connection to this worker
    pub async fn hand_off(&self, handoff: UserHandoff) -> Result<(), RouteError> {
        self.handoff_tx
            .send(handoff)
            .await
            .map_err(|_| RouteError::HandoffFailed(self.id().clone()))
    }

    /// Stop the owned session; the worker tears down in response
    pub fn shut_down(&self) {
        self.session.stop();
    }

    /// Completes once the worker has fully torn down
    pub async fn terminated(&self) {
        self.terminated.cancelled().await;
    }
}

/// Worker run loop: accept hand-offs until the session stops, then tear
/// down with one registry removal followed by full session teardown
async fn run(
    registry: Arc<SessionRegistry>,
    worker: Arc<Worker>,
    mut handoff_rx: mpsc::Receiver<UserHandoff>,
    user_queue_depth: usize,
) {
    let session = Arc::clone(worker.session());
    let stop = session.stop_token();
    let mut published = false;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,

            handoff = handoff_rx.recv() => match handoff {
                Some(handoff) => {
                    attach_user(&session, handoff, user_queue_depth);

                    if !published {
                        // First user attached: the session is now joinable
                        match registry.add(session.id().clone(), Arc::clone(&worker)) {
                            Ok(()) => {
                                published = true;
                                tracing::info!("Session ID is \"{}\"", session.id());
                            }
                            Err(e) => {
                                tracing::error!("Failed to register session: {}", e);
                                session.stop();
                            }
                        }
                    }
                }
                None => break,
            },
        }
    }

    if published {
        if registry.remove(session.id()).is_some() {
            tracing::info!("Session \"{}\" removed", session.id());
        } else {
            tracing::error!(
                "Session \"{}\" already missing from registry",
                session.id()
            );
        }
    }

    session.destroy();
    worker.terminated.cancel();
}

/// Attach one handed-off connection as a user: split the transport and
/// start its reader/writer pair
fn attach_user(session: &Arc<ClientSession>, handoff: UserHandoff, user_queue_depth: usize) {
    let (read_half, write_half) = tokio::io::split(handoff.transport);
    let (outbound_tx, outbound_rx) = mpsc::channel(user_queue_depth);
    let cancel = CancellationToken::new();

    let user = session.add_user(outbound_tx, cancel.clone());
    tracing::info!("{} joined session \"{}\"", user.id(), session.id());

    tokio::spawn(write_user(write_half, outbound_rx, cancel.clone()));
    tokio::spawn(read_user(
        Arc::clone(session),
        user,
        read_half,
        handoff.leftover,
        cancel,
    ));
}

/// Per-user reader: frame instructions off the user's transport and
/// dispatch them into the session until the transport closes or the user
/// is retired
async fn read_user(
    session: Arc<ClientSession>,
    user: Arc<UserSession>,
    read_half: ReadHalf<BoxedTransport>,
    leftover: BytesMut,
    cancel: CancellationToken,
) {
    let mut framed = FramedRead::new(read_half, InstructionCodec::new());
    framed.read_buffer_mut().extend_from_slice(&leftover);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            next = framed.next() => match next {
                Some(Ok(instruction)) => {
                    if let Err(e) = session.dispatch(&instruction) {
                        tracing::warn!(
                            "Instruction {} from {} failed: {}",
                            instruction,
                            user.id(),
                            e
                        );
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("Protocol error from {}: {}", user.id(), e);
                    break;
                }
                None => break,
            },
        }
    }

    if session.remove_user(&user) {
        tracing::info!("{} left session \"{}\"", user.id(), session.id());
    }

    // A session with nobody attached has nothing left to serve
    if session.user_count() == 0 {
        session.stop();
    }
}

/// Per-user writer: drain the user's outbound queue onto its transport,
/// flushing as it goes
async fn write_user(
    mut write_half: WriteHalf<BoxedTransport>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Deliver anything already queued, a terminal diagnostic in
                // particular, before the transport goes away
                while let Ok(bytes) = outbound_rx.try_recv() {
                    if write_half.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                let _ = write_half.flush().await;
                break;
            }

            maybe = outbound_rx.recv() => match maybe {
                Some(bytes) => {
                    if write_half.write_all(&bytes).await.is_err() {
                        break;
                    }
                    if write_half.flush().await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = write_half.shutdown().await;
}
