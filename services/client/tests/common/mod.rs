//! In-process mock tutoring service for integration tests.
//!
//! Speaks just enough of the session protocol to drive the real engine:
//! acknowledges authentication, records every frame it receives per
//! connection, optionally auto-acknowledges switches, and can drop a
//! connection abruptly to simulate network failure.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};
use tutor_client::{EngineConfig, SessionDeps, SessionEvent};
use tutor_core::activity::{ActivityContext, ActivityRef, Objective, PriorResult};
use tutor_core::curriculum::{LessonPlan, StaticCurriculumService};
use tutor_core::evaluation::StaticEvaluationService;

#[derive(Debug, Clone, Copy)]
pub struct MockOptions {
    pub reject_auth: bool,
    pub auto_ack_switch: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            reject_auth: false,
            auto_ack_switch: true,
        }
    }
}

struct ConnRecord {
    frames: Arc<Mutex<Vec<String>>>,
    out_tx: mpsc::UnboundedSender<String>,
    abort: AbortHandle,
}

struct ServiceState {
    accepts: AtomicUsize,
    connections: Mutex<Vec<ConnRecord>>,
}

pub struct MockService {
    pub url: String,
    state: Arc<ServiceState>,
    listener_task: JoinHandle<()>,
}

impl MockService {
    pub async fn spawn(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}", listener.local_addr().expect("local addr"));
        let state = Arc::new(ServiceState {
            accepts: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
        });

        let accept_state = state.clone();
        let listener_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                accept_state.accepts.fetch_add(1, Ordering::SeqCst);
                let frames = Arc::new(Mutex::new(Vec::new()));
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let conn_task = tokio::spawn(run_connection(ws, frames.clone(), out_rx, options));
                accept_state.connections.lock().unwrap().push(ConnRecord {
                    frames,
                    out_tx,
                    abort: conn_task.abort_handle(),
                });
            }
        });

        Self {
            url,
            state,
            listener_task,
        }
    }

    /// Total connections accepted since the service started.
    pub fn accept_count(&self) -> usize {
        self.state.accepts.load(Ordering::SeqCst)
    }

    /// All text frames received on connection `index`, in arrival order.
    pub fn frames(&self, index: usize) -> Vec<String> {
        let conns = self.state.connections.lock().unwrap();
        conns
            .get(index)
            .map(|c| c.frames.lock().unwrap().clone())
            .unwrap_or_default()
    }

    /// Pushes a frame to the client on connection `index`.
    pub fn send(&self, index: usize, frame: serde_json::Value) {
        let conns = self.state.connections.lock().unwrap();
        if let Some(conn) = conns.get(index) {
            let _ = conn.out_tx.send(frame.to_string());
        }
    }

    /// Drops connection `index` without a close handshake, as a network
    /// failure would.
    pub fn kill(&self, index: usize) {
        let conns = self.state.connections.lock().unwrap();
        if let Some(conn) = conns.get(index) {
            conn.abort.abort();
        }
    }

    /// Stops accepting and drops every connection.
    pub fn shutdown(&self) {
        self.listener_task.abort();
        let conns = self.state.connections.lock().unwrap();
        for conn in conns.iter() {
            conn.abort.abort();
        }
    }
}

async fn run_connection(
    mut ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    frames: Arc<Mutex<Vec<String>>>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    options: MockOptions,
) {
    loop {
        tokio::select! {
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let raw = text.to_string();
                    frames.lock().unwrap().push(raw.clone());
                    let value: serde_json::Value =
                        serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null);
                    match value.get("type").and_then(|t| t.as_str()) {
                        Some("authenticate") => {
                            if options.reject_auth {
                                let error = serde_json::json!({
                                    "type": "error",
                                    "message": "invalid token",
                                });
                                let _ = ws.send(Message::Text(error.to_string().into())).await;
                                let _ = ws.close(None).await;
                                return;
                            }
                            let _ = ws
                                .send(Message::Text(r#"{"type":"auth_success"}"#.into()))
                                .await;
                            let _ = ws
                                .send(Message::Text(r#"{"type":"session_ready"}"#.into()))
                                .await;
                        }
                        Some("switch_primitive") if options.auto_ack_switch => {
                            if let Some(id) = value
                                .pointer("/activity/instance_id")
                                .and_then(|v| v.as_str())
                            {
                                let ack = serde_json::json!({
                                    "type": "primitive_switched",
                                    "instance_id": id,
                                });
                                let _ = ws.send(Message::Text(ack.to_string().into())).await;
                            }
                        }
                        _ => {}
                    }
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(_)) => return,
            },
            Some(frame) = out_rx.recv() => {
                let _ = ws.send(Message::Text(frame.into())).await;
            }
        }
    }
}

/// Engine configuration with short timeouts suitable for tests.
pub fn test_config(url: &str) -> EngineConfig {
    EngineConfig {
        service_url: url.to_string(),
        connect_timeout: Duration::from_secs(2),
        auth_timeout: Duration::from_secs(2),
        reconnect_delay: Duration::from_millis(150),
        ..EngineConfig::default()
    }
}

/// Static collaborators with one lesson: activities a, b, c.
pub fn test_deps() -> SessionDeps {
    let plan = LessonPlan {
        lesson_id: "algebra-basics".to_string(),
        topic: "Algebra".to_string(),
        grade_level: "6".to_string(),
        objectives: vec![Objective {
            id: "obj-1".to_string(),
            text: "Solve one-step equations".to_string(),
            verb: "solve".to_string(),
        }],
        ordered_activities: ["a", "b", "c"]
            .into_iter()
            .map(|id| ActivityRef {
                activity_type: "quiz".to_string(),
                instance_id: id.to_string(),
                title: format!("Activity {id}"),
                objective_ids: vec!["obj-1".to_string()],
            })
            .collect(),
    };
    let prior = vec![PriorResult {
        instance_id: "a".to_string(),
        activity_type: "quiz".to_string(),
        completed: true,
        score: Some(0.9),
    }];
    SessionDeps {
        tokens: Arc::new(tutor_client::auth::StaticTokenProvider::new("test-token")),
        curriculum: Arc::new(StaticCurriculumService::new([plan])),
        evaluation: Arc::new(StaticEvaluationService::new([(
            "algebra-basics".to_string(),
            prior,
        )])),
    }
}

/// A standalone activity context for tests.
pub fn quiz_activity(instance_id: &str) -> ActivityContext {
    ActivityContext {
        activity_type: "quiz".to_string(),
        instance_id: instance_id.to_string(),
        payload: serde_json::Value::Null,
        lesson_id: None,
        topic: None,
        grade_level: None,
    }
}

/// Polls `cond` until it holds or a 3 s budget runs out.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Reads events until `pred` matches one, panicking after 3 s.
pub async fn expect_event(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    what: &str,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed while waiting for {what}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// The `type` discriminator of a recorded frame.
pub fn frame_type(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or_default()
}
