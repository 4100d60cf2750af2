// Wire protocol for the public WebSocket endpoint and the internal HTTP
// endpoints exchanged with the downstream processor.

pub mod internal;
pub mod ws;

/// Public WebSocket upgrade path.
pub const CONNECT_PATH: &str = "/ws/connect";

/// Internal endpoint the processor calls to push a message to a session.
pub const SEND_MESSAGE_PATH: &str = "/internal/send-message";

/// Path on the processor that receives forwarded client messages.
pub const PROCESS_PATH: &str = "/api/v1/process";
