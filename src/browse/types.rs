//! Browse data types
//!
//! Values handed to the view layer. Everything here is plain data; the
//! session engine is the only producer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state as presented to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// First contact, nothing cached yet
    Connecting,
    /// Last operation succeeded
    Healthy,
    /// Answering, but the answer is not trusted (e.g. unconfirmed empty listing)
    Degraded,
    /// Retrying after trouble, cached data still served
    Reconnecting,
    /// Retries exhausted or breaker open
    Failed,
    /// Session closed, terminal
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Healthy => "healthy",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Health record of one browse session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    /// Attempt counter of the operation in progress
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Most recent confirmed success
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionHealth {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            retry_count: 0,
            last_error: None,
            last_success_at: None,
            last_latency_ms: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Move to `state`. No-op once closed.
    pub fn transition(&mut self, state: ConnectionState, retry_count: u32, error: Option<String>) {
        if self.is_closed() {
            return;
        }
        self.state = state;
        self.retry_count = retry_count;
        if error.is_some() {
            self.last_error = error;
        }
        self.updated_at = Utc::now();
    }

    /// Record a confirmed success. Clears the last error.
    pub fn mark_success(&mut self, latency_ms: Option<u64>) {
        if self.is_closed() {
            return;
        }
        let now = Utc::now();
        self.state = ConnectionState::Healthy;
        self.retry_count = 0;
        self.last_error = None;
        self.last_success_at = Some(now);
        if latency_ms.is_some() {
            self.last_latency_ms = latency_ms;
        }
        self.updated_at = now;
    }

    /// Terminal transition. Error/latency/success metadata is kept for diagnostics.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state = ConnectionState::Closed;
        self.retry_count = 0;
        self.updated_at = Utc::now();
    }

    /// Copy with a different presented state (the stored record is untouched)
    pub fn presented_as(&self, state: ConnectionState) -> Self {
        let mut copy = self.clone();
        copy.state = state;
        copy
    }
}

/// One remote directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub full_path: String,
    pub is_directory: bool,
    pub modified_at: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
}

impl DirectoryEntry {
    pub fn directory(name: impl Into<String>, full_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_path: full_path.into(),
            is_directory: true,
            modified_at: None,
            size_bytes: None,
        }
    }
}

/// Raw result of a transport listing call
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryListing {
    pub entries: Vec<DirectoryEntry>,
    /// Server-canonicalized path, may differ from the requested one
    pub resolved_path: String,
    pub latency_ms: u64,
    /// A fresh connection had to be opened to serve this call
    pub reopened_session: bool,
}

/// Where the entries of a snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    /// The transport call that just completed
    Network,
    /// The sticky cache
    Cache,
}

/// Renderable result of one listing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub path: String,
    pub entries: Vec<DirectoryEntry>,
    pub is_stale: bool,
    pub is_confirmed_empty: bool,
    pub health: ConnectionHealth,
    pub message: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub from_cache: bool,
    pub request_id: String,
    pub latency_ms: Option<u64>,
}

impl Snapshot {
    /// Build a snapshot. `confirmed_empty` is dropped when entries are present.
    pub fn new(
        path: String,
        entries: Vec<DirectoryEntry>,
        source: EntrySource,
        confirmed_empty: bool,
        health: ConnectionHealth,
        request_id: &str,
    ) -> Self {
        let is_confirmed_empty = confirmed_empty && entries.is_empty();
        let from_cache = source == EntrySource::Cache;
        Self {
            path,
            entries,
            is_stale: from_cache,
            is_confirmed_empty,
            health,
            message: None,
            generated_at: Utc::now(),
            from_cache,
            request_id: request_id.to_string(),
            latency_ms: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_latency(mut self, latency_ms: Option<u64>) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn stale(mut self) -> Self {
        self.is_stale = true;
        self
    }
}
