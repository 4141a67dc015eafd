//! # Scripted Mock Management Server
//!
//! A WebSocket server on an ephemeral localhost port. Every text frame the
//! client sends is recorded and handed to a script, which decides what to
//! send back. Tests can also inject frames, drop every connection, or make
//! the server go silent (stop reading, so pings go unanswered).

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::debug;

/// What the server does in response to one request
#[derive(Debug, Clone)]
pub enum Action {
    /// Send this JSON value as a text frame
    Reply(Value),
    /// Send raw text, which need not be valid JSON
    Raw(String),
    /// Send this JSON value as a binary frame
    Binary(Value),
    /// Drop the connection without a close handshake
    Disconnect,
}

/// Decides the server's answer to each request
pub type Script = Box<dyn FnMut(&Value) -> Vec<Action> + Send>;

#[derive(Debug, Clone)]
enum Control {
    Inject(String),
    Ping(Vec<u8>),
    DropAll,
}

struct State {
    script: Mutex<Script>,
    received: Mutex<Vec<Value>>,
    pongs: Mutex<Vec<Vec<u8>>>,
    connections: AtomicUsize,
    silent: AtomicBool,
    control: broadcast::Sender<Control>,
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    /// Start a server driven by `script`.
    pub async fn start<F>(script: F) -> Self
    where
        F: FnMut(&Value) -> Vec<Action> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let (control, _) = broadcast::channel(64);
        let state = Arc::new(State {
            script: Mutex::new(Box::new(script)),
            received: Mutex::new(Vec::new()),
            pongs: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            silent: AtomicBool::new(false),
            control,
        });
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// Server answering every request with [`echo_reply`] and accepting
    /// the login `alice`/`secret`.
    pub async fn echo() -> Self {
        Self::start(echo_script).await
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Every request received so far, in arrival order
    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().clone()
    }

    /// Connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Push a raw text frame to every open connection.
    pub fn inject(&self, text: impl Into<String>) {
        let _ = self.state.control.send(Control::Inject(text.into()));
    }

    /// Send a ping carrying `payload` to every open connection.
    pub fn ping(&self, payload: &[u8]) {
        let _ = self.state.control.send(Control::Ping(payload.to_vec()));
    }

    /// Payloads of every pong received so far
    pub fn pongs(&self) -> Vec<Vec<u8>> {
        self.state.pongs.lock().clone()
    }

    /// Drop every open connection. New connections are still accepted.
    pub fn drop_connections(&self) {
        let _ = self.state.control.send(Control::DropAll);
    }

    /// Stop reading from connections (and so stop answering pings).
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Poll until at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = self.received();
            if received.len() >= count {
                return received;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} requests, got {}",
                received.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.state.control.send(Control::DropAll);
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<State>) {
    while let Ok((stream, peer)) = listener.accept().await {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            match accept_async(stream).await {
                Ok(ws) => {
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    debug!(%peer, "Mock server accepted connection");
                    serve(ws, state).await;
                }
                Err(e) => debug!(%peer, error = %e, "Mock server handshake failed"),
            }
        });
    }
}

async fn serve(ws: tokio_tungstenite::WebSocketStream<TcpStream>, state: Arc<State>) {
    let (mut sink, mut stream) = ws.split();
    let mut control = state.control.subscribe();

    loop {
        if state.silent.load(Ordering::SeqCst) {
            tokio::select! {
                ctl = control.recv() => match ctl {
                    Ok(Control::DropAll) | Err(broadcast::error::RecvError::Closed) => return,
                    _ => {}
                },
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            continue;
        }

        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    state.received.lock().push(request.clone());
                    let actions = {
                        let mut script = state.script.lock();
                        (*script)(&request)
                    };
                    for action in actions {
                        let message = match action {
                            Action::Reply(value) => Message::Text(value.to_string().into()),
                            Action::Raw(text) => Message::Text(text.into()),
                            Action::Binary(value) => {
                                Message::Binary(value.to_string().into_bytes().into())
                            }
                            Action::Disconnect => return,
                        };
                        if sink.send(message).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Pong(payload))) => {
                    state.pongs.lock().push(payload.to_vec());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            ctl = control.recv() => match ctl {
                Ok(Control::Inject(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Control::Ping(payload)) => {
                    if sink.send(Message::Ping(payload.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Control::DropAll) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

/// `{"id": <request id>, "success": true, "data": {"action": ..., "params": {...}}}`
pub fn echo_reply(request: &Value) -> Value {
    let mut params = request.as_object().cloned().unwrap_or_default();
    let id = params.remove("id");
    let action = params.remove("action");
    let mut reply = json!({
        "success": true,
        "data": {"action": action, "params": params},
    });
    if let Some(id) = id {
        reply["id"] = id;
    }
    reply
}

/// Reply for `request` carrying `data`, with the request's id.
pub fn ok_reply(request: &Value, data: Value) -> Value {
    json!({"id": request["id"], "success": true, "data": data})
}

/// Failure reply for `request`, with the request's id.
pub fn error_reply(request: &Value, message: &str) -> Value {
    json!({"id": request["id"], "success": false, "error": message})
}

/// Answer to an `auth_login` request: accepts only `alice` with `secret`.
pub fn login_reply(request: &Value) -> Value {
    let expected = console_link::hash_password("secret");
    if request["login"] == "alice" && request["password_hash"] == expected.as_str() {
        json!({"success": true, "user": {"name": "alice", "role": "admin"}})
    } else {
        json!({"success": false, "error": "invalid login or password"})
    }
}

/// The default script: login handling plus [`echo_reply`] for the rest.
pub fn echo_script(request: &Value) -> Vec<Action> {
    if request["action"] == "auth_login" {
        vec![Action::Reply(login_reply(request))]
    } else {
        vec![Action::Reply(echo_reply(request))]
    }
}
