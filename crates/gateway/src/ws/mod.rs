// Public WebSocket endpoint: one session per upgraded connection.
//
// Lifecycle: mint id -> register -> welcome -> read loop -> unregister.
// The registry entry exists before the first byte is written, and the
// teardown block at the end of `run_session` is the single exit for every
// path, including a panic inside the session body.

pub mod connection;

use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{FutureExt, Stream, StreamExt};
use switchboard_common::protocol::{
    ws::{encode_frame, ServerFrame},
    CONNECT_PATH,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use self::connection::ClientConnection;
use crate::{forwarder::Forwarder, metrics::GatewayMetrics, registry::SessionRegistry};

#[derive(Clone)]
pub struct PublicState {
    pub registry: Arc<SessionRegistry>,
    pub forwarder: Forwarder,
    pub metrics: Arc<GatewayMetrics>,
}

pub fn router(state: PublicState) -> Router {
    Router::new().route(CONNECT_PATH, get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(State(state): State<PublicState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_failed_upgrade(|error| warn!(error = %error, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: PublicState, socket: WebSocket) {
    let (sink, stream) = socket.split();
    run_session(&state, ClientConnection::new(sink), stream).await;
}

/// Why a session's read loop stopped.
#[derive(Debug)]
pub(crate) enum SessionExit {
    WelcomeFailed(String),
    ClosedByPeer,
    ReadFailed(String),
    StreamEnded,
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WelcomeFailed(error) => write!(f, "welcome send failed: {error}"),
            Self::ClosedByPeer => f.write_str("closed by peer"),
            Self::ReadFailed(error) => write!(f, "read failed: {error}"),
            Self::StreamEnded => f.write_str("stream ended"),
        }
    }
}

pub(crate) async fn run_session<S>(
    state: &PublicState,
    connection: ClientConnection,
    mut stream: S,
) -> Option<SessionExit>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let session_id = Uuid::new_v4().to_string();
    if let Some(displaced) = state.registry.register(session_id.clone(), connection.clone()).await
    {
        error!(session_id = %session_id, "session id collision, displaced connection closed");
        displaced.close().await;
    }
    state.metrics.record_connection_opened();
    info!(session_id = %session_id, "client connected");

    let exit = AssertUnwindSafe(serve_session(
        &state.forwarder,
        &session_id,
        &connection,
        &mut stream,
    ))
    .catch_unwind()
    .await;

    state.registry.unregister(&session_id).await;
    connection.close().await;
    state.metrics.record_connection_closed();

    match exit {
        Ok(exit) => {
            if matches!(exit, SessionExit::WelcomeFailed(_)) {
                state.metrics.record_welcome_failure();
                warn!(session_id = %session_id, reason = %exit, "client disconnected");
            } else {
                info!(session_id = %session_id, reason = %exit, "client disconnected");
            }
            Some(exit)
        }
        Err(_) => {
            error!(session_id = %session_id, "session handler panicked, client disconnected");
            None
        }
    }
}

async fn serve_session<S>(
    forwarder: &Forwarder,
    session_id: &str,
    connection: &ClientConnection,
    stream: &mut S,
) -> SessionExit
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let welcome = match encode_frame(&ServerFrame::welcome(session_id)) {
        Ok(welcome) => welcome,
        Err(error) => return SessionExit::WelcomeFailed(error.to_string()),
    };
    if let Err(error) = connection.send_text(welcome).await {
        return SessionExit::WelcomeFailed(error.to_string());
    }

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                debug!(session_id = %session_id, "received text frame");
                forwarder.forward(session_id, text.as_str().as_bytes().to_vec());
            }
            Ok(Message::Binary(data)) => {
                debug!(session_id = %session_id, "received binary frame");
                forwarder.forward(session_id, data.to_vec());
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => return SessionExit::ClosedByPeer,
            Err(error) => return SessionExit::ReadFailed(error.to_string()),
        }
    }

    SessionExit::StreamEnded
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{extract::ws::Message, http::StatusCode, routing::post, Json, Router};
    use futures_util::{stream, StreamExt};
    use serde_json::Value;
    use switchboard_common::protocol::ws::{decode_frame, ServerFrame};
    use tokio::{net::TcpListener, sync::mpsc, time::timeout};

    use super::{run_session, PublicState, SessionExit};
    use crate::{
        forwarder::Forwarder,
        metrics::GatewayMetrics,
        registry::SessionRegistry,
        ws::connection::testing::{broken, capture, text_of},
    };

    async fn spawn_processor() -> (String, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/api/v1/process",
            post(move |Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    StatusCode::OK
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("processor should bind");
        let addr = listener.local_addr().expect("processor should expose address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("processor should serve");
        });
        (format!("http://{addr}/api/v1/process"), rx)
    }

    fn state(endpoint: String) -> PublicState {
        let metrics = Arc::new(GatewayMetrics::default());
        PublicState {
            registry: Arc::new(SessionRegistry::default()),
            forwarder: Forwarder::new(endpoint, Duration::from_secs(5), Arc::clone(&metrics))
                .expect("forwarder should build"),
            metrics,
        }
    }

    fn text(value: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(value.to_string().into()))
    }

    #[tokio::test]
    async fn welcome_carries_id_and_frames_are_forwarded_under_it() {
        let (endpoint, mut processor) = spawn_processor().await;
        let state = state(endpoint);
        let (connection, mut frames) = capture();
        let inbound = stream::iter(vec![
            text("ping"),
            Ok(Message::Binary(br#"{"b":2}"#.to_vec().into())),
        ]);

        let exit = run_session(&state, connection, inbound).await;
        assert!(matches!(exit, Some(SessionExit::StreamEnded)));

        let welcome = decode_frame(&text_of(frames.try_recv().expect("welcome should be sent")))
            .expect("welcome should decode");
        let ServerFrame::Welcome { client_id } = welcome;

        let mut bodies = Vec::new();
        for _ in 0..2 {
            let body = timeout(Duration::from_secs(2), processor.recv())
                .await
                .expect("processor should be called")
                .expect("processor channel should stay open");
            bodies.push(body);
        }
        assert!(bodies.iter().all(|body| body["clientId"] == client_id.as_str()));
        assert!(bodies.iter().any(|body| body["message"] == "ping"));
        assert!(bodies.iter().any(|body| body["message"]["b"] == 2));

        assert!(state.registry.lookup(&client_id).await.is_none());
    }

    #[tokio::test]
    async fn failed_welcome_never_enters_read_loop() {
        let (endpoint, mut processor) = spawn_processor().await;
        let state = state(endpoint);
        let mut inbound = stream::iter(vec![text("should-not-forward")]);

        let exit = run_session(&state, broken(), &mut inbound).await;

        assert!(matches!(exit, Some(SessionExit::WelcomeFailed(_))));
        assert!(inbound.next().await.is_some(), "inbound frames must stay unread");
        assert!(state.registry.is_empty().await);
        assert!(timeout(Duration::from_millis(200), processor.recv()).await.is_err());
        assert!(state
            .metrics
            .render_prometheus(0)
            .contains("switchboard_welcome_failures_total 1"));
    }

    #[tokio::test]
    async fn read_error_and_close_both_evict_the_session() {
        let state = state("http://127.0.0.1:9/api/v1/process".to_string());

        let (connection, _frames) = capture();
        let failing = stream::iter(vec![Err(axum::Error::new(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset,
        )))]);
        let exit = run_session(&state, connection, failing).await;
        assert!(matches!(exit, Some(SessionExit::ReadFailed(_))));

        let (connection, _frames) = capture();
        let closing = stream::iter(vec![Ok(Message::Close(None)), text("after-close")]);
        let exit = run_session(&state, connection, closing).await;
        assert!(matches!(exit, Some(SessionExit::ClosedByPeer)));

        assert!(state.registry.is_empty().await);
        let rendered = state.metrics.render_prometheus(0);
        assert!(rendered.contains("switchboard_connections_total 2"));
        assert!(rendered.contains("switchboard_disconnections_total 2"));
    }

    #[tokio::test]
    async fn session_is_registered_while_reading() {
        let state = state("http://127.0.0.1:9/api/v1/process".to_string());
        let (connection, mut frames) = capture();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Result<Message, axum::Error>>();
        let inbound = channel_stream(inbound_rx);

        let session_state = state.clone();
        let session =
            tokio::spawn(async move { run_session(&session_state, connection, inbound).await });

        let welcome = timeout(Duration::from_secs(2), frames.recv())
            .await
            .expect("welcome should arrive")
            .expect("connection should stay open");
        let ServerFrame::Welcome { client_id } =
            decode_frame(&text_of(welcome)).expect("welcome should decode");
        assert!(state.registry.lookup(&client_id).await.is_some());

        drop(inbound_tx);
        session.await.expect("session task should join");
        assert!(state.registry.lookup(&client_id).await.is_none());
    }

    fn channel_stream<T: Send + 'static>(
        mut rx: mpsc::UnboundedReceiver<T>,
    ) -> impl futures_util::Stream<Item = T> + Unpin {
        Box::pin(stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }
}
