// Agent session against the public gateway endpoint.
//
// Connect, report the welcome id, send any queued messages, then either
// close or keep printing pushed frames until the gateway hangs up.

use std::io::Write;

use anyhow::Context;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use switchboard_common::protocol::ws::{decode_frame, ServerFrame};
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info};
use url::Url;

use crate::output::{write_output, OutputFormat};

pub const DEFAULT_GATEWAY_URL: &str = "ws://localhost:8080/ws/connect";

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub url: Url,
    pub messages: Vec<String>,
    pub listen: bool,
}

/// One line of agent output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    Welcome { client_id: String },
    Sent { message: String },
    Received { message: Value },
}

impl AgentEvent {
    fn received(raw: &str) -> Self {
        let message =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        Self::Received { message }
    }

    fn human(&self) -> String {
        match self {
            Self::Welcome { client_id } => format!("connected as {client_id}"),
            Self::Sent { message } => format!("sent: {message}"),
            Self::Received { message: Value::String(text) } => format!("received: {text}"),
            Self::Received { message } => format!("received: {message}"),
        }
    }
}

/// clap value parser for `--url`.
pub fn parse_gateway_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|error| format!("invalid gateway URL `{raw}`: {error}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(format!("gateway URL must use ws:// or wss://, got `{other}://`")),
    }
}

pub async fn run<W: Write>(
    options: &AgentOptions,
    format: OutputFormat,
    out: &mut W,
) -> anyhow::Result<()> {
    let (mut socket, _) = connect_async(options.url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", options.url))?;
    info!(url = %options.url, "connected to gateway");

    let welcome = next_text(&mut socket)
        .await?
        .context("gateway closed the connection before sending a welcome")?;
    let ServerFrame::Welcome { client_id } =
        decode_frame(&welcome).with_context(|| format!("unexpected first frame: {welcome}"))?;
    emit(out, format, &AgentEvent::Welcome { client_id })?;

    for message in &options.messages {
        socket
            .send(tungstenite::Message::Text(message.clone().into()))
            .await
            .context("failed to send message to gateway")?;
        emit(out, format, &AgentEvent::Sent { message: message.clone() })?;
    }

    if options.listen {
        loop {
            tokio::select! {
                frame = next_text(&mut socket) => match frame? {
                    Some(text) => emit(out, format, &AgentEvent::received(&text))?,
                    None => {
                        info!("gateway closed the connection");
                        return Ok(());
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, closing connection");
                    break;
                }
            }
        }
    }

    if let Err(error) = socket.close(None).await {
        debug!(error = %error, "close handshake did not complete");
    }
    Ok(())
}

fn emit<W: Write>(out: &mut W, format: OutputFormat, event: &AgentEvent) -> anyhow::Result<()> {
    write_output(out, format, event, AgentEvent::human).context("failed to write output")
}

/// Next data frame as text, or `None` once the gateway closes.
async fn next_text<S>(socket: &mut S) -> anyhow::Result<Option<String>>
where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = socket.next().await {
        match frame.context("failed to read from gateway")? {
            tungstenite::Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
            tungstenite::Message::Binary(data) => {
                return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
            }
            tungstenite::Message::Close(_) => return Ok(None),
            tungstenite::Message::Ping(_)
            | tungstenite::Message::Pong(_)
            | tungstenite::Message::Frame(_) => {}
        }
    }
    Ok(None)
}
