//! Ingestion wiring against a fake JSON-RPC target: idempotence of the
//! subscription and claim release after a failed enable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cdp_bridge::{ensure_ingestion, CdpClient};
use deckhand_core_types::{LogEntry, LogSink};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;

#[derive(Default)]
struct VecSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl VecSink {
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl LogSink for VecSink {
    fn append(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

type MethodCounts = Arc<Mutex<HashMap<String, u32>>>;

/// Fake target. Counts methods; `Emit.one` pushes a console event before
/// replying; enables fail with a protocol error when `fail_enables` is set.
async fn spawn_target(counts: MethodCounts, fail_enables: bool) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let counts = Arc::clone(&counts);
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    let id = frame["id"].clone();
                    let method = frame["method"].as_str().unwrap_or_default().to_string();
                    *counts.lock().unwrap().entry(method.clone()).or_insert(0) += 1;

                    let reply = if method.ends_with(".enable") && fail_enables {
                        json!({"id": id, "error": {"code": -32601, "message": "not enabled"}})
                    } else if method == "Emit.one" {
                        let event = json!({
                            "method": "Runtime.consoleAPICalled",
                            "params": {"type": "info", "args": [{"type": "string", "value": "once"}]},
                        });
                        ws.send(Message::Text(event.to_string())).await.unwrap();
                        json!({"id": id, "result": {}})
                    } else {
                        json!({"id": id, "result": {}})
                    };

                    ws.send(Message::Text(reply.to_string())).await.unwrap();
                }
            });
        }
    });

    (format!("ws://{addr}/devtools/page/TEST"), task)
}

#[tokio::test]
async fn double_subscription_yields_single_entries() {
    let counts: MethodCounts = Arc::new(Mutex::new(HashMap::new()));
    let (url, server) = spawn_target(Arc::clone(&counts), false).await;

    let client = CdpClient::connect("TEST", &url).await.unwrap();
    let sink = Arc::new(VecSink::default());
    let deadline = Duration::from_secs(2);

    ensure_ingestion(&client, sink.clone() as Arc<dyn LogSink>, deadline)
        .await
        .unwrap();
    ensure_ingestion(&client, sink.clone() as Arc<dyn LogSink>, deadline)
        .await
        .unwrap();

    client
        .send("Emit.one", json!({}), deadline)
        .await
        .unwrap();

    let wait_deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while sink.len() < 1 {
        assert!(
            tokio::time::Instant::now() < wait_deadline,
            "event never reached the sink"
        );
        sleep(Duration::from_millis(20)).await;
    }

    // Exactly one entry for one remote event, and each facility enabled once.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.len(), 1);
    {
        let counts = counts.lock().unwrap();
        for method in ["Runtime.enable", "Network.enable", "Security.enable"] {
            assert_eq!(counts.get(method), Some(&1), "{method} sent once");
        }
    }

    server.abort();
}

#[tokio::test]
async fn failed_enable_releases_the_claim() {
    let counts: MethodCounts = Arc::new(Mutex::new(HashMap::new()));
    let (url, server) = spawn_target(Arc::clone(&counts), true).await;

    let client = CdpClient::connect("TEST", &url).await.unwrap();
    let sink = Arc::new(VecSink::default());
    let deadline = Duration::from_secs(2);

    assert!(
        ensure_ingestion(&client, sink.clone() as Arc<dyn LogSink>, deadline)
            .await
            .is_err()
    );
    // The claim was released, so the retry reaches the wire again.
    assert!(
        ensure_ingestion(&client, sink.clone() as Arc<dyn LogSink>, deadline)
            .await
            .is_err()
    );

    assert_eq!(counts.lock().unwrap().get("Runtime.enable"), Some(&2));
    assert_eq!(sink.len(), 0);

    server.abort();
}
