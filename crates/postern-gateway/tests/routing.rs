//! Connection routing integration tests
//!
//! Exercises the full path from raw transport to attached user over
//! in-memory duplex transports: handshake, create-vs-join, hand-off into a
//! worker, instruction dispatch, broadcast, and teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::FramedRead;

use postern_core::{GatewayConfig, RouteError};
use postern_gateway::{ConnectionRouter, Routed, SessionRegistry, Worker};
use postern_protocol::{Instruction, InstructionCodec, ProtocolStatus, SessionId};

fn test_router() -> ConnectionRouter {
    let mut config = GatewayConfig::default();
    config.handshake_timeout_ms = 1_000;
    ConnectionRouter::new(Arc::new(SessionRegistry::new()), config)
}

/// Open a connection, send a handshake, and run it through the router
async fn connect(
    router: &ConnectionRouter,
    handshake: &str,
) -> (DuplexStream, Result<Routed, RouteError>) {
    let (mut client, server) = tokio::io::duplex(4096);
    client.write_all(handshake.as_bytes()).await.unwrap();
    let result = router.route(Box::new(server)).await;
    (client, result)
}

/// Poll until a condition holds; sessions attach and publish on their
/// worker's task, slightly after the router returns
async fn wait_for(what: &str, predicate: impl Fn() -> bool) {
    for _ in 0..400 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn lookup_worker(router: &ConnectionRouter, id: &SessionId) -> Arc<Worker> {
    let registry = Arc::clone(router.registry());
    let key = id.clone();
    wait_for("session registration", move || {
        registry.lookup(&key).is_some()
    })
    .await;
    router.registry().lookup(id).unwrap()
}

#[tokio::test]
async fn test_create_registers_after_first_attach() {
    let router = test_router();
    assert!(router.registry().is_empty());

    let (_client, result) = connect(&router, "6.select,3.vnc;").await;
    let Ok(Routed::Created(id)) = result else {
        panic!("expected a created session, got {:?}", result);
    };

    // A freshly minted identifier: marker byte plus canonical UUID text
    assert_eq!(id.as_str().len(), 37);
    assert!(id.as_str().starts_with('$'));

    let worker = lookup_worker(&router, &id).await;
    assert_eq!(worker.session().protocol(), "vnc");

    let session = Arc::clone(worker.session());
    wait_for("first user attach", move || session.user_count() == 1).await;
}

#[tokio::test]
async fn test_join_attaches_to_existing_worker() {
    let router = test_router();

    let (_owner, result) = connect(&router, "6.select,3.rdp;").await;
    let id = result.unwrap().session_id().clone();
    let worker = lookup_worker(&router, &id).await;

    let (_guest, result) = connect(&router, &format!("6.select,37.{};", id)).await;
    assert_eq!(result.unwrap(), Routed::Joined(id));

    // No new session was minted; both users share the one worker
    assert_eq!(router.registry().len(), 1);
    let session = Arc::clone(worker.session());
    wait_for("second user attach", move || session.user_count() == 2).await;
}

#[tokio::test]
async fn test_unknown_identifier_rejected() {
    let router = test_router();

    let bogus = SessionId::generate();
    let (_client, result) = connect(&router, &format!("6.select,37.{};", bogus)).await;

    assert!(matches!(result, Err(RouteError::UnknownSession(_))));
    assert!(router.registry().is_empty());
}

#[tokio::test]
async fn test_malformed_handshake_rejected_before_routing() {
    let router = test_router();

    // Wrong opcode
    let (_client, result) = connect(&router, "5.mouse,1.0,1.0,1.0;").await;
    assert!(matches!(result, Err(RouteError::Handshake(_))));

    // Wrong argument count
    let (_client, result) = connect(&router, "6.select;").await;
    assert!(matches!(result, Err(RouteError::BadHandshakeArgs(0))));

    assert!(router.registry().is_empty());
}

#[tokio::test]
async fn test_abort_broadcasts_single_diagnostic() {
    let router = test_router();

    let (client, result) = connect(&router, "6.select,3.vnc;").await;
    let id = result.unwrap().session_id().clone();
    let worker = lookup_worker(&router, &id).await;

    let session = Arc::clone(worker.session());
    wait_for("user attach", move || worker.session().user_count() == 1).await;

    session
        .abort(ProtocolStatus::ServerError, "backend terminated abnormally")
        .await;
    session
        .abort(ProtocolStatus::ServerError, "second abort must be silent")
        .await;

    // The user receives exactly one terminal error instruction, then EOF
    let mut framed = FramedRead::new(client, InstructionCodec::new());
    let first = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("no diagnostic arrived")
        .unwrap()
        .unwrap();
    assert_eq!(first.opcode, "error");
    assert_eq!(first.arg(1), Some("512"));

    let second = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("connection never closed");
    assert!(second.is_none(), "unexpected extra instruction: {:?}", second);
}

#[tokio::test]
async fn test_instructions_reach_session_handlers() {
    let router = test_router();

    let (mut client, result) = connect(&router, "6.select,3.vnc;").await;
    let id = result.unwrap().session_id().clone();
    let worker = lookup_worker(&router, &id).await;

    let presses = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&presses);
    worker.session().set_key_handler(Arc::new(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    client.write_all(b"3.key,5.65307,1.1;").await.unwrap();

    wait_for("key press dispatch", move || {
        presses.load(Ordering::SeqCst) == 1
    })
    .await;
}

#[tokio::test]
async fn test_pipelined_instructions_survive_handoff() {
    let router = test_router();

    // Handshake and follow-up instructions in one burst: the bytes past
    // the handshake must reach the worker with the transport
    let (client, result) = connect(&router, "6.select,3.vnc;4.sync,3.123;10.disconnect;").await;
    assert!(matches!(result, Ok(Routed::Created(_))));

    // The pipelined disconnect stops the session, which closes the user's
    // transport; were the leftover bytes dropped in hand-off, the session
    // would idle forever and this read would time out
    let mut framed = FramedRead::new(client, InstructionCodec::new());
    let next = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("session never processed the pipelined disconnect");
    assert!(next.is_none(), "unexpected instruction: {:?}", next);
}

#[tokio::test]
async fn test_broadcast_reaches_all_users() {
    let router = test_router();

    let (owner, result) = connect(&router, "6.select,3.vnc;").await;
    let id = result.unwrap().session_id().clone();
    let worker = lookup_worker(&router, &id).await;

    let (guest, result) = connect(&router, &format!("6.select,37.{};", id)).await;
    assert!(result.is_ok());
    let session = Arc::clone(worker.session());
    wait_for("both users attached", move || session.user_count() == 2).await;

    let session = worker.session();
    session
        .broadcast()
        .write_instruction(Instruction::new("sync", vec!["777".to_string()]))
        .unwrap();
    assert_eq!(session.broadcast().flush().await, 2);

    for transport in [owner, guest] {
        let mut framed = FramedRead::new(transport, InstructionCodec::new());
        let instruction = tokio::time::timeout(Duration::from_secs(2), framed.next())
            .await
            .expect("broadcast never arrived")
            .unwrap()
            .unwrap();
        assert_eq!(instruction.opcode, "sync");
        assert_eq!(instruction.arg(0), Some("777"));
    }
}

#[tokio::test]
async fn test_last_departure_tears_down_worker() {
    let router = test_router();

    let (client, result) = connect(&router, "6.select,3.vnc;").await;
    let id = result.unwrap().session_id().clone();
    let _worker = lookup_worker(&router, &id).await;
    assert_eq!(router.registry().len(), 1);

    // The only user hangs up; the worker must remove its registry entry
    // exactly once and tear the session down
    drop(client);

    let registry = Arc::clone(router.registry());
    wait_for("worker teardown", move || registry.is_empty()).await;

    // The identifier is no longer joinable
    let (_late, result) = connect(&router, &format!("6.select,37.{};", id)).await;
    assert!(matches!(result, Err(RouteError::UnknownSession(_))));
}
