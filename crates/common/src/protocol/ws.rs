// Frames the gateway writes to connected WebSocket clients.
//
// Only the welcome frame has a gateway-defined shape. Everything pushed
// afterwards through the internal send-message endpoint is the processor's
// payload, delivered verbatim.

use serde::{Deserialize, Serialize};

/// Gateway-originated frames on the public WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Server -> Client: first frame after the upgrade, carries the
    /// session id assigned to this connection.
    Welcome {
        #[serde(rename = "clientID")]
        client_id: String,
    },
}

impl ServerFrame {
    pub fn welcome(client_id: impl Into<String>) -> Self {
        Self::Welcome { client_id: client_id.into() }
    }
}

pub fn encode_frame(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

pub fn decode_frame(raw: &str) -> Result<ServerFrame, serde_json::Error> {
    serde_json::from_str(raw)
}
