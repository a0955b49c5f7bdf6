//! Session persistence contract.
//!
//! conduit does not serialize sessions. A backend implements
//! [`SessionStore`] over whatever storage it likes; session middleware only
//! ever talks to the trait. [`MemoryStore`] keeps everything in process and
//! is meant for tests and single-node development.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::Result;
use crate::middleware::BoxFuture;

/// Key/value contents of one session.
pub type SessionData = HashMap<String, String>;

/// Asynchronous session backend.
pub trait SessionStore: Send + Sync + 'static {
    /// Looks up a session. `Ok(None)` when it does not exist.
    fn find<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<SessionData>>>;

    /// Creates or replaces a session.
    fn save<'a>(&'a self, id: &'a str, data: SessionData) -> BoxFuture<'a, Result<()>>;

    /// Removes a session. Destroying an unknown id is not an error.
    fn destroy<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// In-process [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, SessionData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn find<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<SessionData>>> {
        Box::pin(async move { Ok(self.sessions.read().await.get(id).cloned()) })
    }

    fn save<'a>(&'a self, id: &'a str, data: SessionData) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.sessions.write().await.insert(id.to_owned(), data);
            Ok(())
        })
    }

    fn destroy<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.sessions.write().await.remove(id);
            Ok(())
        })
    }
}
