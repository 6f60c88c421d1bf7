//! Browse Session Registry
//!
//! Owns any number of independent browse sessions keyed by session id.
//! Sessions share nothing; the registry only routes by id.

use std::sync::Arc;

use dashmap::DashMap;

use super::config::BrowseConfig;
use super::diagnostics::TracingDiagnostics;
use super::path::RemotePathNormalizer;
use super::session::BrowseSession;
use super::transport::BrowseTransport;

#[derive(Default)]
pub struct BrowseRegistry {
    sessions: DashMap<String, Arc<BrowseSession>>,
}

impl BrowseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session on `transport`. Must be called inside a Tokio runtime.
    pub fn open(&self, transport: Arc<dyn BrowseTransport>, config: BrowseConfig) -> Arc<BrowseSession> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(BrowseSession::with_collaborators(
            session_id.clone(),
            transport,
            Arc::new(RemotePathNormalizer),
            Arc::new(TracingDiagnostics),
            config,
        ));
        self.sessions.insert(session_id.clone(), Arc::clone(&session));
        tracing::info!("Browse session {} registered ({} active)", session_id, self.sessions.len());
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<BrowseSession>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    /// Close and remove one session. Returns false if the id is unknown.
    pub async fn close(&self, session_id: &str) -> bool {
        // Remove first so the DashMap shard is not held across the await
        let Some((_, session)) = self.sessions.remove(session_id) else {
            tracing::debug!("Browse session {} not found", session_id);
            return false;
        };
        session.close().await;
        true
    }

    /// Close every session (shutdown)
    pub async fn close_all(&self) {
        let session_ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        tracing::info!("Closing {} browse sessions", session_ids.len());

        for session_id in session_ids {
            self.close(&session_id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
