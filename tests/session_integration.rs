//! Integration tests for the full bridge session.
//!
//! These drive `session::run` end-to-end over in-memory duplex streams with
//! the in-memory `StubClient`: frames go in on the "UI" side, frames come
//! back out, and chat events are injected underneath. No daemon and no
//! network are involved.
//!
//! # Running
//!
//! ```bash
//! cargo test --test session_integration
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use tgram_bridge::client::{ChatClient, ChatEvent};
use tgram_bridge::dispatch::HandlerRegistry;
use tgram_bridge::models::{PeerRef, UserInfo};
use tgram_bridge::rpc::framing::{read_frame, write_frame};
use tgram_bridge::session;
use tgram_bridge::testing::StubClient;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A running bridge session with handles on both ends.
struct Harness {
    /// Write framed requests here, as the UI would.
    ui_out: DuplexStream,
    /// Read the bridge's outbound frames here.
    ui_in: BufReader<DuplexStream>,
    /// The shared stub client, for injecting events and inspecting state.
    client: Arc<StubClient>,
    /// Resolves the session's shutdown future when fired.
    shutdown: oneshot::Sender<()>,
    session: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start() -> Self {
        let client = Arc::new(StubClient::default());
        client.add_user(ada());
        Self::start_with(client)
    }

    fn start_with(client: Arc<StubClient>) -> Self {
        let (ui_out, bridge_in) = tokio::io::duplex(64 * 1024);
        let (bridge_out, ui_in) = tokio::io::duplex(64 * 1024);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let session = tokio::spawn(session::run(
            Arc::clone(&client) as Arc<dyn ChatClient>,
            Arc::new(HandlerRegistry::standard()),
            bridge_in,
            bridge_out,
            async move {
                let _ = shutdown_rx.await;
            },
        ));

        Self {
            ui_out,
            ui_in: BufReader::new(ui_in),
            client,
            shutdown: shutdown_tx,
            session,
        }
    }

    async fn send(&mut self, payload: Value) {
        write_frame(&mut self.ui_out, &payload)
            .await
            .expect("send failed");
    }

    /// Send raw bytes, bypassing the encoder.
    async fn send_raw(&mut self, bytes: &[u8]) {
        self.ui_out.write_all(bytes).await.expect("send_raw failed");
    }

    async fn recv(&mut self) -> Value {
        timeout(TEST_TIMEOUT, read_frame(&mut self.ui_in))
            .await
            .expect("timed out waiting for a frame")
            .expect("read failed")
    }

    /// Wait until the event bridge has subscribed, so injected events are
    /// not lost to startup timing.
    async fn wait_for_subscription(&self) {
        timeout(TEST_TIMEOUT, async {
            while self.client.subscriber_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("event bridge never subscribed");
    }

    /// Shut the session down and wait for a clean exit.
    async fn finish(self) {
        let _ = self.shutdown.send(());
        timeout(TEST_TIMEOUT, self.session)
            .await
            .expect("session did not terminate")
            .expect("session task panicked")
            .expect("session returned an error");
    }
}

fn ada() -> UserInfo {
    UserInfo {
        id: 123,
        first_name: Some("Ada".to_string()),
        last_name: None,
        username: Some("ada".to_string()),
        phone: None,
        is_online: None,
        is_typing: None,
        last_seen: None,
    }
}

fn request(id: i64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

/// A getUserInfo request against a stub entity produces a success frame
/// carrying the user and the original id.
#[tokio::test]
async fn test_get_user_info_roundtrip() {
    let mut harness = Harness::start();

    harness
        .send(request(1, "getUserInfo", json!(["123"])))
        .await;

    let reply = harness.recv().await;
    assert_eq!(reply["jsonrpc"], json!("2.0"));
    assert_eq!(reply["id"], json!(1));
    assert_eq!(reply["result"]["firstName"], json!("Ada"));
    assert!(reply.get("error").is_none());

    harness.finish().await;
}

/// A body that is not JSON produces a parse-error frame with a null id,
/// and the loop keeps servicing subsequent requests.
#[tokio::test]
async fn test_malformed_body_reports_parse_error_and_continues() {
    let mut harness = Harness::start();

    let body = "not-json";
    harness
        .send_raw(format!("Content-Length: {}\r\n\r\n{}", body.len(), body).as_bytes())
        .await;

    let error = harness.recv().await;
    assert_eq!(error["id"], json!(null));
    assert_eq!(error["error"]["code"], json!(-32700));

    // One failed message must not stop the next one.
    harness
        .send(request(2, "getUserInfo", json!([123])))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], json!(2));
    assert_eq!(reply["result"]["id"], json!(123));

    harness.finish().await;
}

/// A typing event becomes exactly one userTyping notification with no id
/// field.
#[tokio::test]
async fn test_typing_event_emits_one_notification() {
    let mut harness = Harness::start();

    // Let the event bridge subscribe before emitting.
    harness.wait_for_subscription().await;
    harness.client.emit(ChatEvent::Typing {
        user_id: 123,
        peer: PeerRef::user(123),
    });

    let notification = harness.recv().await;
    assert_eq!(notification["method"], json!("userTyping"));
    assert!(notification.get("id").is_none());
    let user = &notification["params"]["user"];
    assert_eq!(user["id"], json!(123));
    assert_eq!(user["isOnline"], json!(true));
    assert_eq!(user["isTyping"], json!(true));

    // Exactly one: the next outbound frame is the reply to a probe
    // request, not a duplicate notification.
    harness
        .send(request(50, "getUserInfo", json!([123])))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], json!(50));

    harness.finish().await;
}

/// An unknown method in a Request answers -32601 with the original id; the
/// same method as a Notification produces no outbound frame at all.
#[tokio::test]
async fn test_unknown_method_request_vs_notification() {
    let mut harness = Harness::start();

    harness
        .send(request(7, "doesNotExist", json!([])))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], json!(7));
    assert_eq!(reply["error"]["code"], json!(-32601));

    // Unknown notification: swallowed. The next frame on the wire must be
    // the probe's reply.
    harness
        .send(json!({"jsonrpc": "2.0", "method": "doesNotExist", "params": []}))
        .await;
    harness
        .send(request(8, "getUserInfo", json!([123])))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], json!(8));

    harness.finish().await;
}

/// A message without a string method is a protocol error (-32600),
/// addressed by whatever id was present.
#[tokio::test]
async fn test_message_without_method_is_invalid_request() {
    let mut harness = Harness::start();

    harness.send(json!({"jsonrpc": "2.0", "id": 13})).await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], json!(13));
    assert_eq!(reply["error"]["code"], json!(-32600));

    // Non-object payloads get a null id.
    harness.send(json!(["jsonrpc", "2.0"])).await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], json!(null));
    assert_eq!(reply["error"]["code"], json!(-32600));

    harness.finish().await;
}

/// Handler failures reply with the original id; chat-native codes pass
/// through on the error path exactly as results do on the success path.
#[tokio::test]
async fn test_error_reply_preserves_request_id() {
    let mut harness = Harness::start();

    // User 404 is not in the stub: the handler fails with a chat error.
    harness
        .send(request(21, "getUserInfo", json!([404])))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], json!(21));
    assert_eq!(reply["error"]["code"], json!(-32000));

    harness.finish().await;
}

/// Dispatcher replies and event notifications race onto one output stream;
/// every frame must still decode cleanly and the full set must arrive.
/// Byte-level interleaving of two frames would break the framing parser.
#[tokio::test]
async fn test_concurrent_replies_and_events_never_interleave() {
    let mut harness = Harness::start();
    harness.wait_for_subscription().await;

    const REQUESTS: i64 = 20;
    const EVENTS: usize = 20;

    for id in 1..=REQUESTS {
        harness
            .send(request(id, "getUserInfo", json!([123])))
            .await;
        if id % 2 == 0 {
            harness.client.emit(ChatEvent::StatusUpdate {
                user_id: 123,
                online: id % 4 == 0,
            });
        }
    }
    for _ in 0..EVENTS - (REQUESTS / 2) as usize {
        harness.client.emit(ChatEvent::Typing {
            user_id: 123,
            peer: PeerRef::user(123),
        });
    }

    let mut reply_ids = Vec::new();
    let mut notifications = 0usize;
    for _ in 0..(REQUESTS as usize + EVENTS) {
        let frame = harness.recv().await;
        if let Some(id) = frame.get("id").and_then(Value::as_i64) {
            assert!(frame["result"]["id"].is_i64(), "reply {id} malformed");
            reply_ids.push(id);
        } else {
            assert!(frame["method"].is_string(), "notification malformed");
            notifications += 1;
        }
    }

    reply_ids.sort_unstable();
    assert_eq!(reply_ids, (1..=REQUESTS).collect::<Vec<_>>());
    assert_eq!(notifications, EVENTS);

    harness.finish().await;
}

/// Requests are not head-of-line blocked: response order across requests is
/// unspecified, but every id comes back exactly once.
#[tokio::test]
async fn test_many_concurrent_requests_all_answered() {
    let mut harness = Harness::start();

    const N: i64 = 32;
    for id in 1..=N {
        let method = if id % 3 == 0 { "getUserChats" } else { "getUserInfo" };
        let params = if id % 3 == 0 { json!([]) } else { json!([123]) };
        harness.send(request(id, method, params)).await;
    }

    let mut seen = Vec::new();
    for _ in 0..N {
        let frame = harness.recv().await;
        seen.push(frame["id"].as_i64().expect("reply without id"));
    }
    seen.sort_unstable();
    assert_eq!(seen, (1..=N).collect::<Vec<_>>());

    harness.finish().await;
}

/// sendMessage → deleteMessage over the wire, exercising positional params
/// of more than one arity.
#[tokio::test]
async fn test_send_then_delete_message_flow() {
    let mut harness = Harness::start();

    harness
        .send(request(1, "sendMessage", json!([123, "hello there"])))
        .await;
    let sent = harness.recv().await;
    assert_eq!(sent["id"], json!(1));
    assert_eq!(sent["result"]["text"], json!("hello there"));
    let message_id = sent["result"]["id"].clone();

    harness
        .send(request(2, "deleteMessage", json!([123, message_id])))
        .await;
    let deleted = harness.recv().await;
    assert_eq!(deleted["result"], json!({"deleted": 1}));

    harness.finish().await;
}

/// The shutdown signal disposes the event subscription and severs the
/// client connection, in that order, then the process would exit 0.
#[tokio::test]
async fn test_shutdown_sequencing() {
    let harness = Harness::start();
    harness.wait_for_subscription().await;

    let client = Arc::clone(&harness.client);
    assert_eq!(client.subscriber_count(), 1);
    assert!(client.connected());

    harness.finish().await;

    assert_eq!(client.disposed_count(), 1);
    assert_eq!(client.subscriber_count(), 0);
    assert!(!client.connected());
}

/// Closing the UI pipe ends the session cleanly without a signal.
#[tokio::test]
async fn test_ui_eof_ends_session() {
    let harness = Harness::start();
    harness.wait_for_subscription().await;

    let client = Arc::clone(&harness.client);
    drop(harness.ui_out);

    timeout(TEST_TIMEOUT, harness.session)
        .await
        .expect("session did not terminate on EOF")
        .expect("session task panicked")
        .expect("session returned an error");
    assert!(!client.connected());
}

/// Startup failure: one error frame with a null id, then a non-zero exit
/// (an Err from the session loop).
#[tokio::test]
async fn test_startup_failure_is_machine_readable() {
    let client = Arc::new(StubClient::default());
    client.fail_get_me();
    let mut harness = Harness::start_with(client);

    let frame = harness.recv().await;
    assert_eq!(frame["id"], json!(null));
    assert_eq!(frame["error"]["code"], json!(401));

    let result = timeout(TEST_TIMEOUT, harness.session)
        .await
        .expect("session did not terminate")
        .expect("session task panicked");
    assert!(result.is_err());
}
