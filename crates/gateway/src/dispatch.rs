// Outbound dispatch: pushes a processor-supplied payload to one session.
//
// The dispatcher speaks in `DispatchOutcome`s; HTTP status codes only
// appear where an outcome is turned into a response.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRequest, Request, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use switchboard_common::protocol::internal::SendMessageRequest;
use tracing::{info, warn};

use crate::{
    error::{ErrorCode, GatewayError},
    metrics::GatewayMetrics,
    registry::SessionRegistry,
};

pub const SUCCESS_MESSAGE: &str = "Message sent successfully";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    BadRequest(String),
    NotFound,
    MethodNotAllowed,
    InternalError(String),
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::InternalError(_) => "internal_error",
        }
    }
}

impl IntoResponse for DispatchOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::Success => (StatusCode::OK, SUCCESS_MESSAGE).into_response(),
            Self::BadRequest(reason) => {
                GatewayError::new(ErrorCode::ValidationFailed, reason).into_response()
            }
            Self::NotFound => GatewayError::from_code(ErrorCode::SessionNotFound).into_response(),
            Self::MethodNotAllowed => {
                GatewayError::from_code(ErrorCode::MethodNotAllowed).into_response()
            }
            Self::InternalError(reason) => {
                GatewayError::new(ErrorCode::InternalError, reason).into_response()
            }
        }
    }
}

#[derive(Debug)]
struct TargetedMessage {
    client_id: String,
    payload: Map<String, Value>,
}

fn parse_request(body: &[u8]) -> Result<TargetedMessage, String> {
    let request: SendMessageRequest =
        serde_json::from_slice(body).map_err(|error| format!("invalid JSON body: {error}"))?;

    let client_id = request
        .client_id
        .filter(|client_id| !client_id.is_empty())
        .ok_or_else(|| "clientId and payload are required".to_string())?;
    let payload = request
        .payload
        .filter(|payload| !payload.is_empty())
        .ok_or_else(|| "clientId and payload are required".to_string())?;

    Ok(TargetedMessage { client_id, payload })
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    metrics: Arc<GatewayMetrics>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { registry, metrics }
    }

    pub async fn dispatch(&self, method: &Method, body: &[u8]) -> DispatchOutcome {
        let outcome = self.run(method, body).await;
        self.metrics.record_dispatch(outcome.label());
        outcome
    }

    async fn run(&self, method: &Method, body: &[u8]) -> DispatchOutcome {
        if method != Method::POST {
            return DispatchOutcome::MethodNotAllowed;
        }

        let message = match parse_request(body) {
            Ok(message) => message,
            Err(reason) => return DispatchOutcome::BadRequest(reason),
        };

        let Some(connection) = self.registry.lookup(&message.client_id).await else {
            return DispatchOutcome::NotFound;
        };

        let encoded = match serde_json::to_string(&message.payload) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(session_id = %message.client_id, error = %error, "failed to encode dispatch payload");
                return DispatchOutcome::InternalError("could not encode payload".to_string());
            }
        };

        // A failed write leaves the session registered; its read loop is the
        // one that notices the dead socket and evicts it.
        if let Err(error) = connection.send_text(encoded).await {
            warn!(session_id = %message.client_id, error = %error, "failed to write message to client");
            return DispatchOutcome::InternalError("failed to write message".to_string());
        }

        info!(session_id = %message.client_id, "dispatched message to client");
        DispatchOutcome::Success
    }
}

/// The method is checked before the body is buffered, so a wrong method is
/// always `405` even when the body would trip the size limit.
pub(crate) async fn send_message(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request,
) -> Response {
    let method = request.method().clone();
    if method != Method::POST {
        return dispatcher.dispatch(&method, &[]).await.into_response();
    }

    match Bytes::from_request(request, &()).await {
        Ok(body) => dispatcher.dispatch(&method, &body).await.into_response(),
        Err(rejection) => rejection.into_response(),
    }
}
