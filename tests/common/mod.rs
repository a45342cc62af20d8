// Common test utilities for integration tests
// Local websocket and axum HTTP fixtures standing in for the ChatBook backend.
#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use log::{debug, LevelFilter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use chatbook::config::ClientConfig;
use chatbook::models::Message;
use chatbook::session::SessionEvent;

static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Server side of one accepted websocket.
pub struct ServerConn {
    pub path: String,
    /// Text frames to push to the client. Dropping it closes the socket.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Text frames the client wrote.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

pub struct WsFixture {
    pub config: ClientConfig,
    connections: mpsc::UnboundedReceiver<ServerConn>,
}

impl WsFixture {
    pub async fn next_connection(&mut self) -> ServerConn {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a websocket connection")
            .expect("fixture stopped")
    }

    /// True when no further connection shows up within `wait`.
    pub async fn no_connection_within(&mut self, wait: Duration) -> bool {
        timeout(wait, self.connections.recv()).await.is_err()
    }
}

pub async fn spawn_ws_server() -> WsFixture {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, connections) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let conn_tx = conn_tx.clone();
            tokio::spawn(serve_socket(stream, conn_tx));
        }
    });

    WsFixture {
        config: ClientConfig::from_server_url(&format!("http://{}", addr)).unwrap(),
        connections,
    }
}

async fn serve_socket(stream: TcpStream, conn_tx: mpsc::UnboundedSender<ServerConn>) {
    let path = Arc::new(Mutex::new(String::new()));
    let path_slot = path.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        *path_slot.lock().unwrap() = req.uri().path().to_string();
        Ok(resp)
    };
    let socket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!("fixture handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (inbound_tx, inbound) = mpsc::unbounded_channel::<String>();
    let path = path.lock().unwrap().clone();
    if conn_tx
        .send(ServerConn {
            path,
            outbound,
            inbound,
        })
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => match outgoing {
                Some(text) => {
                    if write.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = write.close().await;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = inbound_tx.send(text.to_string());
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Next chat message from the session, skipping lifecycle events.
pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Message {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(SessionEvent::Message(message)) => return message,
                Some(SessionEvent::State { .. }) => continue,
                None => panic!("session event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for a message event")
}

/// Everything delivered within `wait`.
pub async fn drain_events(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    wait: Duration,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = timeout(wait, rx.recv()).await {
        events.push(event);
    }
    events
}

pub fn frame(id: i64, from: Option<&str>, to: Option<&str>, content: &str) -> String {
    let mut value = serde_json::json!({
        "id": id,
        "content": content,
        "status": "sent",
        "timestamp": "2024-05-01T10:00:00.000001",
    });
    if let Some(from) = from {
        value["from"] = from.into();
    }
    if let Some(to) = to {
        value["to"] = to.into();
    }
    value.to_string()
}

/// One canned HTTP route: method, path, status and JSON body.
#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub path: &'static str,
    pub status: u16,
    pub body: String,
}

/// A request as the fixture saw it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

struct HttpState {
    routes: Vec<Route>,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct HttpFixture {
    pub config: ClientConfig,
    state: Arc<HttpState>,
}

impl HttpFixture {
    /// Requests in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

pub async fn spawn_http_server(routes: Vec<Route>) -> HttpFixture {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(HttpState {
        routes,
        requests: Mutex::new(Vec::new()),
    });
    let app = Router::new().fallback(respond).with_state(state.clone());

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            debug!("fixture http server stopped: {}", e);
        }
    });

    HttpFixture {
        config: ClientConfig::from_server_url(&format!("http://{}", addr)).unwrap(),
        state,
    }
}

async fn respond(
    State(state): State<Arc<HttpState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let (status, reply) = state
        .routes
        .iter()
        .find(|route| route.method == method && route.path == uri.path())
        .map(|route| (route.status, route.body.clone()))
        .unwrap_or((404, r#"{"detail":"Not Found"}"#.to_string()));

    state.requests.lock().unwrap().push(RecordedRequest {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body,
    });

    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        reply,
    )
}
