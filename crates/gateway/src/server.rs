// Router assembly and the two-listener serve loop.
//
// The public listener only exposes the WebSocket upgrade and a health
// probe. Everything the processor calls lives on the internal listener so
// network policy can keep it private.

use std::{future::Future, sync::Arc};

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use switchboard_common::protocol::SEND_MESSAGE_PATH;
use tokio::{net::TcpListener, sync::watch, time::Instant};
use tracing::{error, info};

use crate::{
    config::GatewayConfig,
    dispatch::{send_message, Dispatcher},
    error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope},
    forwarder::Forwarder,
    metrics::GatewayMetrics,
    registry::SessionRegistry,
    ws::{self, PublicState},
};

pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Shared components behind both listeners.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<SessionRegistry>,
    metrics: Arc<GatewayMetrics>,
    forwarder: Forwarder,
    dispatcher: Arc<Dispatcher>,
}

#[derive(Clone)]
struct MetricsState {
    registry: Arc<SessionRegistry>,
    metrics: Arc<GatewayMetrics>,
}

impl Gateway {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        Self::with_processor_endpoint(config.process_endpoint(), config)
    }

    /// Builds the gateway against an explicit processor endpoint instead of
    /// the one derived from `processor_url`.
    pub fn with_processor_endpoint(
        endpoint: impl Into<String>,
        config: &GatewayConfig,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(SessionRegistry::default());
        let metrics = Arc::new(GatewayMetrics::default());
        let forwarder = Forwarder::new(endpoint, config.forward_timeout, Arc::clone(&metrics))
            .context("failed to build processor HTTP client")?;
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), Arc::clone(&metrics)));

        Ok(Self { registry, metrics, forwarder, dispatcher })
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn public_router(&self) -> Router {
        let state = PublicState {
            registry: Arc::clone(&self.registry),
            forwarder: self.forwarder.clone(),
            metrics: Arc::clone(&self.metrics),
        };

        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(state))
            .layer(middleware::from_fn(panic_handler))
    }

    pub fn internal_router(&self) -> Router {
        let metrics_state =
            MetricsState { registry: Arc::clone(&self.registry), metrics: Arc::clone(&self.metrics) };

        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(render_metrics).with_state(metrics_state))
            .route(SEND_MESSAGE_PATH, any(send_message).with_state(Arc::clone(&self.dispatcher)))
            .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
            .layer(middleware::from_fn_with_state(Arc::clone(&self.metrics), request_context))
            .layer(middleware::from_fn(panic_handler))
    }
}

/// Serves both routers until `shutdown` resolves, then drains both.
pub async fn serve<F>(
    public_listener: TcpListener,
    internal_listener: TcpListener,
    gateway: Gateway,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown.await;
        let _ = shutdown_tx.send(true);
    });

    let public = axum::serve(public_listener, gateway.public_router())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let internal = axum::serve(internal_listener, gateway.internal_router())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    let (public_result, internal_result) =
        tokio::join!(async { public.await }, async { internal.await });
    public_result.context("public server exited unexpectedly")?;
    internal_result.context("internal server exited unexpectedly")?;
    Ok(())
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    let active_sessions = state.registry.len().await;
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(active_sessions),
    )
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context(
    State(metrics): State<Arc<GatewayMetrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    // Route template, not the raw path; unknown paths share one label.
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_owned());
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    metrics.record_http_request(method.as_str(), &endpoint, response.status().as_u16(), latency_ms);
    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}
