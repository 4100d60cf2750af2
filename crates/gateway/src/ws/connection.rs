use std::{fmt, pin::Pin, sync::Arc};

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use tokio::sync::Mutex;

type OutboundSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Write half of a client WebSocket.
///
/// Cloning yields another handle to the same socket. Every write takes the
/// handle's own lock, so the welcome frame and concurrent dispatches to one
/// session are delivered as whole frames, one after another.
#[derive(Clone)]
pub struct ClientConnection {
    sink: Arc<Mutex<OutboundSink>>,
}

impl ClientConnection {
    pub fn new<S>(sink: S) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self { sink: Arc::new(Mutex::new(Box::pin(sink))) }
    }

    pub async fn send_text(&self, text: String) -> Result<(), axum::Error> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into())).await
    }

    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }

    /// True when both handles write to the same socket.
    pub fn same_socket(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.sink, &other.sink)
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };

    use axum::extract::ws::Message;
    use futures_util::Sink;
    use tokio::sync::mpsc;

    use super::ClientConnection;

    struct ChannelSink(mpsc::UnboundedSender<Message>);

    impl Sink<Message> for ChannelSink {
        type Error = axum::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.0.send(item).map_err(axum::Error::new)
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    /// A connection whose writes land in the returned receiver. Dropping the
    /// receiver makes later writes fail.
    pub(crate) fn capture() -> (ClientConnection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientConnection::new(ChannelSink(tx)), rx)
    }

    /// A connection whose every write fails.
    pub(crate) fn broken() -> ClientConnection {
        let (connection, frames) = capture();
        drop(frames);
        connection
    }

    pub(crate) fn text_of(message: Message) -> String {
        match message {
            Message::Text(text) => text.as_str().to_owned(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}
