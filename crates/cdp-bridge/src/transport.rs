//! Persistent duplex channel to a single debuggable target.
//!
//! Commands are paired to responses through an inflight map keyed by call id;
//! server-pushed events fan out on a broadcast channel. One select loop owns
//! the socket; everything else talks to it through message passing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::CdpError;

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 512;

/// Server-pushed event decoded off the wire.
#[derive(Clone, Debug)]
pub struct ProtocolEvent {
    pub method: String,
    pub params: Value,
}

pub(crate) struct ControlMessage {
    pub method: String,
    pub params: Value,
    pub responder: oneshot::Sender<Result<Value, CdpError>>,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Inflight = HashMap<u64, oneshot::Sender<Result<Value, CdpError>>>;

/// Live channel state shared by every clone of a client handle.
pub(crate) struct Channel {
    pub command_tx: mpsc::Sender<ControlMessage>,
    pub events: broadcast::Sender<ProtocolEvent>,
    pub alive: Arc<AtomicBool>,
    loop_task: JoinHandle<()>,
}

impl Channel {
    pub async fn open(url: &str) -> Result<Self, CdpError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|err| CdpError::connection(format!("open {url}: {err}")))?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (events, _) = broadcast::channel(EVENT_QUEUE);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let loop_events = events.clone();
        let loop_task = tokio::spawn(async move {
            if let Err(err) = run_loop(socket, command_rx, loop_events).await {
                debug!(target: "cdp-transport", %err, "channel loop terminated");
            }
            loop_alive.store(false, Ordering::Relaxed);
        });

        debug!(target: "cdp-transport", url, "channel established");
        Ok(Self {
            command_tx,
            events,
            alive,
            loop_task,
        })
    }

    pub fn close(&self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_loop(
    mut socket: Socket,
    mut command_rx: mpsc::Receiver<ControlMessage>,
    events: broadcast::Sender<ProtocolEvent>,
) -> Result<(), CdpError> {
    let mut inflight: Inflight = HashMap::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                let Some(cmd) = cmd else {
                    // Every handle dropped; close out cleanly.
                    let _ = socket.close(None).await;
                    fail_inflight(&mut inflight, CdpError::connection("channel released"));
                    return Ok(());
                };

                next_id += 1;
                let frame = json!({
                    "id": next_id,
                    "method": cmd.method,
                    "params": cmd.params,
                });

                match socket.send(Message::Text(frame.to_string())).await {
                    Ok(()) => {
                        inflight.insert(next_id, cmd.responder);
                    }
                    Err(err) => {
                        let err = CdpError::connection(err.to_string());
                        let _ = cmd.responder.send(Err(err.clone()));
                        fail_inflight(&mut inflight, err.clone());
                        return Err(err);
                    }
                }
            }
            message = socket.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(&text, &mut inflight, &events);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        fail_inflight(&mut inflight, CdpError::connection("connection closed by peer"));
                        return Ok(());
                    }
                    Some(Ok(_)) => {
                        // Ping/pong and binary frames carry nothing for us.
                    }
                    Some(Err(err)) => {
                        let err = CdpError::connection(err.to_string());
                        fail_inflight(&mut inflight, err.clone());
                        return Err(err);
                    }
                }
            }
        }
    }
}

fn dispatch_frame(text: &str, inflight: &mut Inflight, events: &broadcast::Sender<ProtocolEvent>) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(target: "cdp-transport", %err, "undecodable frame dropped");
            return;
        }
    };

    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        let Some(responder) = inflight.remove(&id) else {
            debug!(target: "cdp-transport", id, "response for unknown call id");
            return;
        };

        let result = if let Some(error) = frame.get("error") {
            Err(CdpError::Protocol {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified protocol error")
                    .to_string(),
                data: error.get("data").cloned(),
            })
        } else {
            Ok(frame.get("result").cloned().unwrap_or(Value::Null))
        };

        let _ = responder.send(result);
    } else if let Some(method) = frame.get("method").and_then(Value::as_str) {
        let event = ProtocolEvent {
            method: method.to_string(),
            params: frame.get("params").cloned().unwrap_or(Value::Null),
        };
        // Nobody listening is fine; ingestion may not be wired yet.
        let _ = events.send(event);
    } else {
        debug!(target: "cdp-transport", "frame with neither id nor method dropped");
    }
}

fn fail_inflight(inflight: &mut Inflight, err: CdpError) {
    for (_, responder) in inflight.drain() {
        let _ = responder.send(Err(err.clone()));
    }
}
