//! Request correlation through a session over a recording transport.

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fldist_core::error::DistError;
use fldist_core::request::{Completion, Request, ResultMode};
use fldist_core::session::{Identity, Session};
use fldist_core::transport::ParticleEvent;
use fldist_core::types::Node;
use serde_json::json;
use support::RecordingTransport;

const TTL: Duration = Duration::from_secs(60);

fn relay(peer: &str) -> Node {
    Node::new(peer, format!("/ip4/127.0.0.1/tcp/4310/ws/p2p/{peer}"))
}

fn session(transport: &RecordingTransport) -> Session {
    Session::new(Arc::new(transport.clone()), Identity::generate(), TTL)
}

#[tokio::test]
async fn fetch_returns_callback_arguments() {
    let transport = RecordingTransport::callback(|_| vec![json!(["a", "b"])]);
    let session = session(&transport);

    let args = session
        .fetch(&relay("relay-a"), Request::new("(call ...)"))
        .await
        .unwrap();

    assert_eq!(args, vec![json!(["a", "b"])]);
    assert_eq!(session.correlator().pending_count(), 0);
}

#[tokio::test]
async fn particle_carries_injected_bindings() {
    let transport = RecordingTransport::callback(|_| vec![json!(null)]);
    let session = session(&transport);

    let request = Request::new("(null)").with_variable("alias", "history").unwrap();
    session.fetch(&relay("relay-a"), request).await.unwrap();

    let particle = transport.last_sent();
    assert_eq!(particle.data["relay"], "relay-a");
    assert_eq!(particle.data["init_relay"], "relay-a");
    assert_eq!(particle.data["myPeerId"], session.identity().peer_id());
    assert_eq!(particle.data["returnService"], "returnService");
    assert_eq!(particle.data["alias"], "history");
    assert_eq!(particle.init_peer_id, session.identity().peer_id());
    assert_eq!(particle.ttl_ms, 60_000);
}

#[tokio::test]
async fn fetch_one_decodes_first_argument() {
    let transport = RecordingTransport::callback(|_| vec![json!("svc-1"), json!("ignored")]);
    let session = session(&transport);

    let id: String = session
        .fetch_one(&relay("relay-a"), Request::new("(null)"))
        .await
        .unwrap();
    assert_eq!(id, "svc-1");
}

#[tokio::test]
async fn fetch_one_without_arguments_is_unexpected() {
    let transport = RecordingTransport::callback(|_| Vec::new());
    let session = session(&transport);

    let err = session
        .fetch_one::<String>(&relay("relay-a"), Request::new("(null)"))
        .await
        .unwrap_err();
    assert!(matches!(err, DistError::UnexpectedResult { .. }));
}

#[tokio::test]
async fn error_event_fails_the_request() {
    let transport = RecordingTransport::responding(|p| {
        vec![ParticleEvent::new(
            p.id.clone(),
            "__errors",
            "error",
            vec![json!({"message": "service not found"})],
        )]
    });
    let session = session(&transport);

    let err = session
        .fetch(&relay("relay-a"), Request::new("(null)"))
        .await
        .unwrap_err();
    match err {
        DistError::RemoteScript { payload, .. } => {
            assert_eq!(payload["message"], "service not found");
        }
        other => panic!("expected remote script error, got {other:?}"),
    }
    assert_eq!(session.correlator().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn single_result_times_out() {
    let transport = RecordingTransport::new();
    let session = session(&transport);

    let handle = session
        .submit(
            &relay("relay-a"),
            Request::new("(null)")
                .expect_event("callback", "callback")
                .with_ttl(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    let particle_id = handle.particle_id().to_string();

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, DistError::Timeout { ttl, .. } if ttl == Duration::from_secs(1)));
    assert!(!session.correlator().is_pending(&particle_id));

    // A late result is dropped without effect.
    transport.inject(ParticleEvent::new(particle_id, "callback", "callback", vec![]));
    assert_eq!(session.correlator().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn multi_result_streams_until_ttl() {
    let transport = RecordingTransport::new();
    let session = session(&transport);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let handle = session
        .submit(
            &relay("relay-a"),
            Request::new("(null)")
                .on_event("returnService", "run", move |e| {
                    sink.lock().unwrap().push(e.args.clone());
                })
                .multi_result()
                .with_ttl(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(handle.mode(), ResultMode::Multi);
    let id = handle.particle_id().to_string();

    for n in 0..3 {
        transport.inject(ParticleEvent::new(id.clone(), "returnService", "run", vec![json!(n)]));
    }
    // Unregistered event names are ignored.
    transport.inject(ParticleEvent::new(id.clone(), "other", "fn", vec![json!("x")]));

    assert_eq!(handle.wait().await.unwrap(), Completion::Expired);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec![json!(0)], vec![json!(1)], vec![json!(2)]]
    );
    assert!(!session.correlator().is_pending(&id));
}

#[tokio::test(start_paused = true)]
async fn events_after_deadline_are_not_delivered() {
    let transport = RecordingTransport::new();
    let session = session(&transport);
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);

    let handle = session
        .submit(
            &relay("relay-a"),
            Request::new("(null)")
                .on_event("returnService", "run", move |_| *counter.lock().unwrap() += 1)
                .multi_result()
                .with_ttl(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    transport.inject(ParticleEvent::new(
        handle.particle_id(),
        "returnService",
        "run",
        vec![json!(1)],
    ));

    assert_eq!(handle.wait().await.unwrap(), Completion::Expired);
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn interleaved_results_reach_their_own_requests() {
    let transport = RecordingTransport::new();
    let session = session(&transport);
    let node = relay("relay-a");

    let first = session
        .submit(&node, Request::new("(first)").expect_event("callback", "callback"))
        .await
        .unwrap();
    let second = session
        .submit(&node, Request::new("(second)").expect_event("callback", "callback"))
        .await
        .unwrap();
    assert_ne!(first.particle_id(), second.particle_id());

    transport.inject(ParticleEvent::new(second.particle_id(), "callback", "callback", vec![json!(2)]));
    transport.inject(ParticleEvent::new(first.particle_id(), "callback", "callback", vec![json!(1)]));

    assert_eq!(first.wait().await.unwrap(), Completion::Result(vec![json!(1)]));
    assert_eq!(second.wait().await.unwrap(), Completion::Result(vec![json!(2)]));
}

#[tokio::test]
async fn first_matching_event_settles_single_request() {
    let transport = RecordingTransport::responding(|p| {
        vec![
            ParticleEvent::new(p.id.clone(), "callback", "callback", vec![json!("first")]),
            ParticleEvent::new(p.id.clone(), "callback", "callback", vec![json!("second")]),
        ]
    });
    let session = session(&transport);

    let args = session
        .fetch(&relay("relay-a"), Request::new("(null)"))
        .await
        .unwrap();
    assert_eq!(args, vec![json!("first")]);
}

#[tokio::test]
async fn dropped_handle_unregisters() {
    let transport = RecordingTransport::new();
    let session = session(&transport);

    let handle = session
        .submit(&relay("relay-a"), Request::new("(null)").expect_event("callback", "callback"))
        .await
        .unwrap();
    let id = handle.particle_id().to_string();
    assert!(session.correlator().is_pending(&id));

    drop(handle);
    assert!(!session.correlator().is_pending(&id));
}

#[tokio::test]
async fn cancel_abandons_request() {
    let transport = RecordingTransport::new();
    let session = session(&transport);

    let handle = session
        .submit(&relay("relay-a"), Request::new("(null)").expect_event("callback", "callback"))
        .await
        .unwrap();
    let id = handle.particle_id().to_string();
    handle.cancel();

    assert_eq!(session.correlator().pending_count(), 0);
    transport.inject(ParticleEvent::new(id, "callback", "callback", vec![]));
}

#[tokio::test]
async fn failed_send_leaves_no_pending_entry() {
    let transport = RecordingTransport::new();
    transport.fail_next_sends(1);
    let session = session(&transport);

    let err = session
        .submit(&relay("relay-a"), Request::new("(null)").expect_event("callback", "callback"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(session.correlator().pending_count(), 0);
}

#[tokio::test]
async fn connection_to_same_relay_is_reused() {
    let transport = RecordingTransport::callback(|_| vec![json!(null)]);
    let session = session(&transport);
    let node = relay("relay-a");

    session.fetch(&node, Request::new("(one)")).await.unwrap();
    session.fetch(&node, Request::new("(two)")).await.unwrap();

    assert_eq!(transport.connects(), vec!["relay-a"]);
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn switching_relay_replaces_connection() {
    let transport = RecordingTransport::new();
    let session = session(&transport);

    session.connect(&relay("relay-a")).await.unwrap();
    session.connect(&relay("relay-b")).await.unwrap();

    assert_eq!(transport.connects(), vec!["relay-a", "relay-b"]);
    assert_eq!(transport.disconnects(), vec!["relay-a"]);
    assert_eq!(session.relay_peer_id().await.as_deref(), Some("relay-b"));
}

#[tokio::test]
async fn failed_swap_keeps_previous_connection() {
    let transport = RecordingTransport::new();
    transport.set_unreachable("relay-b");
    let session = session(&transport);

    session.connect(&relay("relay-a")).await.unwrap();
    let err = session.connect(&relay("relay-b")).await.err().unwrap();

    match err {
        DistError::ConnectionSwap { from, to, .. } => {
            assert_eq!(from, "relay-a");
            assert_eq!(to, "relay-b");
        }
        other => panic!("expected swap failure, got {other:?}"),
    }
    assert_eq!(session.relay_peer_id().await.as_deref(), Some("relay-a"));
    assert!(transport.disconnects().is_empty());
}

#[tokio::test]
async fn initial_connect_failure_is_reported() {
    let transport = RecordingTransport::new();
    transport.set_unreachable("relay-a");
    let session = session(&transport);

    let err = session.connect(&relay("relay-a")).await.err().unwrap();
    assert!(matches!(err, DistError::Connection { ref relay, .. } if relay == "relay-a"));
    assert!(err.is_transient());
}

#[tokio::test]
async fn close_without_connection_is_noop() {
    let transport = RecordingTransport::new();
    let session = session(&transport);

    session.close().await.unwrap();
    assert!(transport.disconnects().is_empty());
}

#[tokio::test]
async fn close_abandons_pending_requests() {
    let transport = RecordingTransport::new();
    let session = session(&transport);

    let handle = session
        .submit(&relay("relay-a"), Request::new("(null)").expect_event("callback", "callback"))
        .await
        .unwrap();
    session.close().await.unwrap();

    assert_eq!(transport.disconnects(), vec!["relay-a"]);
    assert!(matches!(handle.wait().await, Err(DistError::Cancelled { .. })));
}
