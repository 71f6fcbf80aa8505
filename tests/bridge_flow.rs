//! End-to-end flow against a fake debugging endpoint: target discovery over
//! HTTP, command execution over the persistent channel, event ingestion into
//! the log buffer, and the facade operations on top.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deckhand_cli::ops::{self, ManageAction, ManageRequest};
use deckhand_cli::{
    CdpError, LogCategory, LogLevel, Supervisor, SupervisorConfig, SupervisorError,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;

type MethodCounts = Arc<Mutex<HashMap<String, u32>>>;

fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        discovery_timeout: Duration::from_millis(500),
        command_deadline: Duration::from_secs(2),
        ..SupervisorConfig::default()
    }
}

/// HTTP responder for `/json/list` answering every request with `body`.
async fn spawn_http_endpoint(body: String) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let task = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (port, task)
}

/// JSON-RPC WebSocket peer playing the debuggable target. Counts every method
/// it sees; `Emit.console` pushes one console and one 404 network event
/// before answering.
async fn spawn_ws_target(counts: MethodCounts) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let counts = Arc::clone(&counts);
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(msg)) = ws.next().await {
                    let tokio_tungstenite::tungstenite::Message::Text(text) = msg else {
                        continue;
                    };
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    let id = frame["id"].clone();
                    let method = frame["method"].as_str().unwrap_or_default().to_string();
                    *counts.lock().unwrap().entry(method.clone()).or_insert(0) += 1;

                    let reply = match method.as_str() {
                        "Runtime.evaluate" => json!({
                            "id": id,
                            "result": {"result": {"type": "number", "value": 2, "description": "2"}},
                        }),
                        "Emit.console" => {
                            let console = json!({
                                "method": "Runtime.consoleAPICalled",
                                "params": {"type": "log", "args": [{"type": "string", "value": "hello from app"}]},
                            });
                            let network = json!({
                                "method": "Network.responseReceived",
                                "params": {"response": {"status": 404, "url": "http://localhost/missing"}},
                            });
                            for event in [console, network] {
                                ws.send(tokio_tungstenite::tungstenite::Message::Text(
                                    event.to_string(),
                                ))
                                .await
                                .unwrap();
                            }
                            json!({"id": id, "result": {}})
                        }
                        "Boom.fail" => json!({
                            "id": id,
                            "error": {"code": -32000, "message": "boom"},
                        }),
                        _ => json!({"id": id, "result": {}}),
                    };

                    ws.send(tokio_tungstenite::tungstenite::Message::Text(
                        reply.to_string(),
                    ))
                    .await
                    .unwrap();
                }
            });
        }
    });

    (port, task)
}

fn target_list(ws_port: u16) -> String {
    json!([{
        "id": "A",
        "type": "page",
        "title": "Demo",
        "url": "file:///x",
        "webSocketDebuggerUrl": format!("ws://127.0.0.1:{ws_port}/devtools/page/A"),
    }])
    .to_string()
}

#[tokio::test]
async fn adopt_execute_ingest_and_read_logs() {
    let counts: MethodCounts = Arc::new(Mutex::new(HashMap::new()));
    let (ws_port, ws_task) = spawn_ws_target(Arc::clone(&counts)).await;
    let (http_port, http_task) = spawn_http_endpoint(target_list(ws_port)).await;

    let supervisor = Supervisor::new(test_config());

    // Adopt through the facade, as the dispatch shell would.
    let response = ops::manage_app(
        &supervisor,
        ManageRequest {
            action: ManageAction::Connect,
            app_path: None,
            port: Some(http_port),
            app_id: None,
            reconnect: None,
        },
    )
    .await
    .unwrap();
    let app = response.app.unwrap();
    assert!(app.adopted);

    // First command lazily connects and wires ingestion.
    let result = ops::execute_command(
        &supervisor,
        &app.id,
        "A",
        "Runtime",
        "evaluate",
        json!({"expression": "1+1"}),
    )
    .await
    .unwrap();
    assert_eq!(result["result"]["value"], 2);

    // Trigger remote events, then read them back as normalized entries.
    ops::execute_command(&supervisor, &app.id, "A", "Emit", "console", json!({}))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let logs = ops::get_logs(&supervisor, &app.id, false).unwrap();
        if logs.entries.len() >= 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "ingested entries never arrived"
        );
        sleep(Duration::from_millis(25)).await;
    }

    let logs = ops::get_logs(&supervisor, &app.id, false).unwrap();
    assert_eq!(logs.dropped, 0);

    let console: Vec<_> = logs
        .entries
        .iter()
        .filter(|e| e.category == LogCategory::Console)
        .collect();
    assert_eq!(console.len(), 1);
    assert_eq!(console[0].message, "hello from app");
    assert_eq!(console[0].level, LogLevel::Log);

    let network: Vec<_> = logs
        .entries
        .iter()
        .filter(|e| e.category == LogCategory::Network)
        .collect();
    assert_eq!(network.len(), 1);
    assert_eq!(network[0].level, LogLevel::Error);
    assert!(network[0].message.contains("404"));

    // Ingestion is wired exactly once no matter how many commands ran.
    {
        let counts = counts.lock().unwrap();
        for method in ["Runtime.enable", "Network.enable", "Security.enable"] {
            assert_eq!(counts.get(method), Some(&1), "{method} enabled once");
        }
    }

    // clearBuffer empties the record's buffer.
    let cleared = ops::get_logs(&supervisor, &app.id, true).unwrap();
    assert!(!cleared.entries.is_empty());
    assert!(ops::get_logs(&supervisor, &app.id, false)
        .unwrap()
        .entries
        .is_empty());

    ws_task.abort();
    http_task.abort();
}

#[tokio::test]
async fn protocol_error_tears_the_connection_down() {
    let counts: MethodCounts = Arc::new(Mutex::new(HashMap::new()));
    let (ws_port, ws_task) = spawn_ws_target(Arc::clone(&counts)).await;
    let (http_port, http_task) = spawn_http_endpoint(target_list(ws_port)).await;

    let supervisor = Supervisor::new(test_config());
    let record = supervisor.adopt(http_port).await.unwrap();

    let err = supervisor
        .execute(record.id.as_str(), "A", "Boom", "fail", json!({}))
        .await
        .unwrap_err();
    match err {
        SupervisorError::Cdp(CdpError::Protocol { code, message, .. }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "boom");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }

    // Failure discards the cached connection so the next call reconnects.
    assert!(record.current_client().await.is_none());

    let result = supervisor
        .execute(record.id.as_str(), "A", "Runtime", "evaluate", json!({}))
        .await
        .unwrap();
    assert_eq!(result["result"]["value"], 2);
    assert!(record.current_client().await.is_some());

    ws_task.abort();
    http_task.abort();
}

#[tokio::test]
async fn unknown_target_fails_without_a_blind_connect() {
    let counts: MethodCounts = Arc::new(Mutex::new(HashMap::new()));
    let (ws_port, ws_task) = spawn_ws_target(Arc::clone(&counts)).await;
    let (http_port, http_task) = spawn_http_endpoint(target_list(ws_port)).await;

    let supervisor = Supervisor::new(test_config());
    let record = supervisor.adopt(http_port).await.unwrap();

    let err = supervisor
        .execute(record.id.as_str(), "Z", "Runtime", "evaluate", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::TargetNotFound(_)));
    assert!(record.current_client().await.is_none());

    ws_task.abort();
    http_task.abort();
}

#[tokio::test]
async fn dead_connection_address_surfaces_connection_error() {
    // Target list advertises a websocket nobody listens on.
    let body = json!([{
        "id": "A",
        "type": "page",
        "title": "Demo",
        "url": "file:///x",
        "webSocketDebuggerUrl": "ws://127.0.0.1:1/devtools/page/A",
    }])
    .to_string();
    let (http_port, http_task) = spawn_http_endpoint(body).await;

    let supervisor = Supervisor::new(test_config());
    let record = supervisor.adopt(http_port).await.unwrap();

    let err = supervisor
        .execute(record.id.as_str(), "A", "Runtime", "evaluate", json!({"expression": "1+1"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::Cdp(CdpError::Connection(_))
    ));
    assert!(record.current_client().await.is_none());

    http_task.abort();
}
