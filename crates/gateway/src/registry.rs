// Session registry: the only shared mutable state in the gateway.
//
// Every operation takes the single lock for one map access and releases it
// before returning, so callers never perform socket I/O while holding it.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::ws::connection::ClientConnection;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, ClientConnection>>,
}

impl SessionRegistry {
    /// Inserts unconditionally. Returns the handle that was displaced if the
    /// id was already present, which only happens if id minting is broken.
    pub async fn register(
        &self,
        session_id: impl Into<String>,
        connection: ClientConnection,
    ) -> Option<ClientConnection> {
        self.sessions.lock().await.insert(session_id.into(), connection)
    }

    /// Removes the entry if present. Returns whether anything was removed;
    /// removing an absent id is not an error.
    pub async fn unregister(&self, session_id: &str) -> bool {
        self.sessions.lock().await.remove(session_id).is_some()
    }

    pub async fn lookup(&self, session_id: &str) -> Option<ClientConnection> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
