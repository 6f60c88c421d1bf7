//! Browse Session Engine
//!
//! One `BrowseSession` per open browse target. It owns the sticky cache,
//! the health record, the circuit breaker and two background tasks
//! (keepalive and recovery).
//!
//! # Concurrency
//!
//! ```text
//!   list / retry / go_up ──► list_gate (fair, one request at a time)
//!                                │
//!   keepalive task ──┐           ▼
//!                    ├──► state: Mutex<SessionState>  (short, sync sections)
//!   recovery task ───┘
//! ```
//!
//! The state mutex is never held across an `.await`. Transport calls run
//! unlocked; their results are applied atomically afterwards and dropped if
//! the session was closed in the meantime.
//!
//! No operation returns an error: every failure is folded into a `Snapshot`
//! whose `health` and `message` describe it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::breaker::CircuitBreaker;
use super::cache::{CacheTier, ListingCache};
use super::config::BrowseConfig;
use super::diagnostics::{DiagnosticLevel, DiagnosticsSink, TracingDiagnostics};
use super::path::{PathNormalizer, RemotePathNormalizer};
use super::transport::{BrowseTransport, TransportError};
use super::types::{
    ConnectionHealth, ConnectionState, DirectoryListing, EntrySource, Snapshot,
};

const CATEGORY_BROWSER: &str = "browser";
const CATEGORY_BREAKER: &str = "breaker";
const CATEGORY_RECOVERY: &str = "recovery";
const CATEGORY_KEEPALIVE: &str = "keepalive";

const RECOVERY_REQUEST_ID: &str = "recovery";

/// Mutable session state. Only touched under `SessionInner::state`.
struct SessionState {
    health: ConnectionHealth,
    cache: ListingCache,
    breaker: CircuitBreaker,
    last_path: String,
    closed: bool,
    active_list_requests: u32,
    recovery_in_flight: bool,
    /// A recovery transport call is running right now
    recovery_attempt_active: bool,
    next_sequence: u64,
    recovery_launches: u64,
}

impl SessionState {
    fn issue_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Healthy with a clean breaker: recovery has nothing left to do
    fn is_settled(&self) -> bool {
        self.health.state == ConnectionState::Healthy && self.breaker.consecutive_failures() == 0
    }

    /// No listing has succeeded or failed yet
    fn is_untouched(&self) -> bool {
        self.health.state == ConnectionState::Connecting
            && self.health.last_success_at.is_none()
            && self.health.last_error.is_none()
            && self.breaker.consecutive_failures() == 0
    }
}

struct SessionInner {
    id: String,
    config: BrowseConfig,
    transport: Arc<dyn BrowseTransport>,
    normalizer: Arc<dyn PathNormalizer>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    state: Mutex<SessionState>,
    list_gate: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    recovery_task: Mutex<Option<JoinHandle<()>>>,
}

/// Counts an explicit list request as active for its whole lifetime
struct ActiveListGuard<'a> {
    inner: &'a SessionInner,
}

impl<'a> ActiveListGuard<'a> {
    fn new(inner: &'a SessionInner) -> Self {
        inner.state.lock().active_list_requests += 1;
        Self { inner }
    }
}

impl Drop for ActiveListGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.inner.state.lock();
        st.active_list_requests = st.active_list_requests.saturating_sub(1);
    }
}

/// Resilient directory browsing over one transport
///
/// Must be created inside a Tokio runtime: the keepalive task is spawned
/// on construction.
pub struct BrowseSession {
    inner: Arc<SessionInner>,
    keepalive_task: Mutex<Option<JoinHandle<()>>>,
}

impl BrowseSession {
    /// Create a session with the default normalizer and tracing diagnostics
    pub fn new(transport: Arc<dyn BrowseTransport>, config: BrowseConfig) -> Self {
        Self::with_collaborators(
            uuid::Uuid::new_v4().to_string(),
            transport,
            Arc::new(RemotePathNormalizer),
            Arc::new(TracingDiagnostics),
            config,
        )
    }

    pub fn with_collaborators(
        id: String,
        transport: Arc<dyn BrowseTransport>,
        normalizer: Arc<dyn PathNormalizer>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        config: BrowseConfig,
    ) -> Self {
        let initial_path = normalizer.normalize(&config.initial_path);
        let breaker = CircuitBreaker::new(config.breaker_threshold, config.breaker_window());
        let keepalive_interval = config.keepalive_interval();

        let inner = Arc::new(SessionInner {
            id,
            config,
            transport,
            normalizer,
            diagnostics,
            state: Mutex::new(SessionState {
                health: ConnectionHealth::new(ConnectionState::Connecting),
                cache: ListingCache::new(),
                breaker,
                last_path: initial_path.clone(),
                closed: false,
                active_list_requests: 0,
                recovery_in_flight: false,
                recovery_attempt_active: false,
                next_sequence: 0,
                recovery_launches: 0,
            }),
            list_gate: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            recovery_task: Mutex::new(None),
        });

        inner.emit(
            DiagnosticLevel::Info,
            CATEGORY_BROWSER,
            format!("session opened at {}", initial_path),
        );

        let keepalive_task = keepalive_interval.map(|interval| {
            let task_inner = Arc::clone(&inner);
            let token = inner.cancel.child_token();
            tokio::spawn(async move { task_inner.run_keepalive(interval, token).await })
        });

        Self {
            inner,
            keepalive_task: Mutex::new(keepalive_task),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.id
    }

    /// Most recently requested (normalized) path
    pub fn last_path(&self) -> String {
        self.inner.state.lock().last_path.clone()
    }

    /// List `path`. Never fails; see the module docs.
    pub async fn list(&self, path: &str, request_id: &str, force_refresh: bool) -> Snapshot {
        self.inner.list(path, request_id, force_refresh).await
    }

    /// Re-list the current path, bypassing the circuit breaker
    pub async fn retry_current_path(&self, request_id: &str) -> Snapshot {
        let path = self.last_path();
        self.inner.list(&path, request_id, true).await
    }

    /// List the parent of `current_path`
    pub async fn go_up(&self, current_path: &str, request_id: &str) -> Snapshot {
        let parent = self.inner.normalizer.parent_path(current_path);
        self.inner.list(&parent, request_id, false).await
    }

    /// Terminal. Safe to call more than once; only the first call has effect.
    pub async fn close(&self) {
        {
            let mut st = self.inner.state.lock();
            if st.closed {
                drop(st);
                tracing::debug!("Browse session {} already closed", self.inner.id);
                return;
            }
            st.closed = true;
        }

        self.inner.cancel.cancel();
        // Tasks observe the token at their next suspension point; a transport
        // call already in flight finishes and its result is discarded.
        self.keepalive_task.lock().take();
        self.inner.recovery_task.lock().take();

        self.inner.transport.invalidate(&self.inner.id).await;

        self.inner.state.lock().health.close();
        self.inner
            .emit(DiagnosticLevel::Info, CATEGORY_BROWSER, "session closed".to_string());
    }

    pub fn current_health(&self) -> ConnectionHealth {
        self.inner.state.lock().health.clone()
    }

    pub fn is_recovery_in_flight(&self) -> bool {
        self.inner.state.lock().recovery_in_flight
    }

    /// One-line operator summary. Pure read.
    pub fn summary_line(&self) -> String {
        let st = self.inner.state.lock();
        let health = &st.health;
        format!(
            "session={} path={} state={} retry={} failures={} emptyStrikes={} lastSuccess={} latencyMs={} lastError={}",
            self.inner.id,
            st.last_path,
            health.state.as_str(),
            health.retry_count,
            st.breaker.consecutive_failures(),
            st.cache.total_empty_strikes(),
            health
                .last_success_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
            health
                .last_latency_ms
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".to_string()),
            health.last_error.as_deref().unwrap_or("-"),
        )
    }

    #[cfg(test)]
    fn recovery_launches(&self) -> u64 {
        self.inner.state.lock().recovery_launches
    }

    #[cfg(test)]
    fn consecutive_failures(&self) -> u32 {
        self.inner.state.lock().breaker.consecutive_failures()
    }
}

impl Drop for BrowseSession {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl SessionInner {
    fn emit(&self, level: DiagnosticLevel, category: &str, message: String) {
        self.diagnostics
            .append(level, category, &format!("[{}] {}", self.id, message));
    }

    async fn list(self: &Arc<Self>, path: &str, request_id: &str, force_refresh: bool) -> Snapshot {
        let path = self.normalizer.normalize(path);
        let _gate = self.list_gate.lock().await;
        let _active = ActiveListGuard::new(self);

        let previous_path = {
            let mut st = self.state.lock();
            let previous = std::mem::replace(&mut st.last_path, path.clone());

            if st.breaker.clear_if_expired(Instant::now()) {
                drop(st);
                self.emit(
                    DiagnosticLevel::Info,
                    CATEGORY_BREAKER,
                    "breaker window elapsed, allowing traffic".to_string(),
                );
                st = self.state.lock();
            }

            if st.closed {
                return closed_snapshot(&st, &path, &previous, request_id);
            }

            if st.breaker.is_open(Instant::now()) && !force_refresh {
                let message = format!(
                    "Connection paused after {} consecutive failures. Showing cached data; retrying in background.",
                    st.breaker.consecutive_failures()
                );
                let health = st.health.presented_as(ConnectionState::Failed);
                let snapshot = fallback_snapshot(&st, &path, &previous, health, request_id, message);
                drop(st);
                self.emit(
                    DiagnosticLevel::Debug,
                    CATEGORY_BREAKER,
                    format!("breaker open, served {} from cache", path),
                );
                self.schedule_recovery();
                return snapshot;
            }

            previous
        };

        let delays = self.config.retry_delays();
        let max_attempts = self.config.max_attempts();
        let mut last_error: Option<TransportError> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = delays[attempt - 1];
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        let st = self.state.lock();
                        return closed_snapshot(&st, &path, &previous_path, request_id);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let sequence = {
                let mut st = self.state.lock();
                if st.closed {
                    return closed_snapshot(&st, &path, &previous_path, request_id);
                }
                let keep_healthy = attempt == 0 && st.health.state == ConnectionState::Healthy;
                if !keep_healthy {
                    let state = if !st.cache.contains(&path) {
                        ConnectionState::Connecting
                    } else {
                        ConnectionState::Reconnecting
                    };
                    st.health.transition(state, attempt as u32, None);
                }
                st.issue_sequence()
            };

            match self.transport.list_directories(&path).await {
                Ok(listing) => {
                    let (snapshot, _) = self
                        .apply_listing(&path, &previous_path, listing, sequence, request_id)
                        .await;
                    return snapshot;
                }
                Err(e) => {
                    self.emit(
                        DiagnosticLevel::Warning,
                        CATEGORY_BROWSER,
                        format!(
                            "list {} attempt {}/{} failed: {}",
                            path,
                            attempt + 1,
                            max_attempts,
                            e
                        ),
                    );
                    last_error = Some(e);
                }
            }
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown transport error".to_string());
        self.fail(
            &path,
            &previous_path,
            request_id,
            ConnectionState::Reconnecting,
            max_attempts as u32,
            format!("Listing failed after {} attempts: {}", max_attempts, error),
        )
    }

    /// Apply a transport listing (foreground or recovery). Returns the snapshot
    /// and whether the result left the session healthy.
    async fn apply_listing(
        self: &Arc<Self>,
        requested: &str,
        previous_path: &str,
        listing: DirectoryListing,
        sequence: u64,
        request_id: &str,
    ) -> (Snapshot, bool) {
        let resolved = if listing.resolved_path.trim().is_empty() {
            requested.to_string()
        } else {
            self.normalizer.normalize(&listing.resolved_path)
        };

        if listing.reopened_session {
            self.emit(
                DiagnosticLevel::Info,
                CATEGORY_BROWSER,
                format!("transport reopened its connection for {}", resolved),
            );
        }

        if !listing.entries.is_empty() {
            return (
                self.accept_listing(requested, &resolved, previous_path, listing, sequence, request_id, false),
                true,
            );
        }

        // Empty: never trusted while the cache knows better
        {
            let mut st = self.state.lock();
            if st.closed {
                return (closed_snapshot(&st, requested, previous_path, request_id), false);
            }
            if st.cache.has_entries(&resolved) || st.cache.has_entries(requested) {
                let key = if st.cache.has_entries(&resolved) { resolved.clone() } else { requested.to_string() };
                let strikes = st.cache.add_empty_strike(&key);
                st.health.transition(
                    ConnectionState::Degraded,
                    strikes,
                    Some("Server returned an empty listing for a cached directory".to_string()),
                );
                let health = st.health.presented_as(ConnectionState::Reconnecting);
                let snapshot = fallback_snapshot(
                    &st,
                    &key,
                    previous_path,
                    health,
                    request_id,
                    "Listing came back empty; showing cached entries while reconnecting.".to_string(),
                )
                .with_latency(Some(listing.latency_ms));
                drop(st);
                self.emit(
                    DiagnosticLevel::Warning,
                    CATEGORY_BROWSER,
                    format!("unconfirmed empty listing for {} (strike {})", key, strikes),
                );
                self.schedule_recovery();
                return (snapshot, false);
            }
        }

        // No cached entries: ask once more before believing it
        let confirm_sequence = {
            let mut st = self.state.lock();
            if st.closed {
                return (closed_snapshot(&st, requested, previous_path, request_id), false);
            }
            st.issue_sequence()
        };
        self.emit(
            DiagnosticLevel::Debug,
            CATEGORY_BROWSER,
            format!("empty listing for {}, confirming", resolved),
        );

        match self.transport.list_directories(&resolved).await {
            Ok(confirm) if !confirm.entries.is_empty() => {
                self.emit(
                    DiagnosticLevel::Info,
                    CATEGORY_BROWSER,
                    format!("confirmation for {} returned {} entries", resolved, confirm.entries.len()),
                );
                (
                    self.accept_listing(requested, &resolved, previous_path, confirm, confirm_sequence, request_id, false),
                    true,
                )
            }
            Ok(confirm) => (
                self.accept_listing(requested, &resolved, previous_path, confirm, confirm_sequence, request_id, true),
                true,
            ),
            Err(e) => {
                let snapshot = self.fail(
                    requested,
                    previous_path,
                    request_id,
                    ConnectionState::Degraded,
                    1,
                    format!("Could not confirm empty listing: {}", e),
                );
                (snapshot, false)
            }
        }
    }

    /// Store a trusted listing and mark the session healthy
    #[allow(clippy::too_many_arguments)]
    fn accept_listing(
        &self,
        requested: &str,
        resolved: &str,
        previous_path: &str,
        listing: DirectoryListing,
        sequence: u64,
        request_id: &str,
        confirmed_empty: bool,
    ) -> Snapshot {
        let mut st = self.state.lock();
        if st.closed {
            return closed_snapshot(&st, requested, previous_path, request_id);
        }

        let count = listing.entries.len();
        let stored = st.cache.store(resolved, listing.entries.clone(), sequence);
        if resolved != requested {
            st.cache.store(requested, listing.entries.clone(), sequence);
        }
        st.breaker.record_success();
        st.health.mark_success(Some(listing.latency_ms));

        let snapshot = Snapshot::new(
            resolved.to_string(),
            listing.entries,
            EntrySource::Network,
            confirmed_empty,
            st.health.clone(),
            request_id,
        )
        .with_latency(Some(listing.latency_ms));
        drop(st);

        if !stored {
            self.emit(
                DiagnosticLevel::Debug,
                CATEGORY_BROWSER,
                format!("kept newer cached listing for {}", resolved),
            );
        }
        let detail = if confirmed_empty { " (confirmed empty)" } else { "" };
        self.emit(
            DiagnosticLevel::Debug,
            CATEGORY_BROWSER,
            format!("listed {} entries in {}{} ({}ms)", count, resolved, detail, snapshot.latency_ms.unwrap_or(0)),
        );
        snapshot
    }

    /// Failure path: count it, maybe open the breaker, serve cache, start recovery
    fn fail(
        self: &Arc<Self>,
        path: &str,
        previous_path: &str,
        request_id: &str,
        state_below_threshold: ConnectionState,
        retry_count: u32,
        error: String,
    ) -> Snapshot {
        let mut st = self.state.lock();
        if st.closed {
            return closed_snapshot(&st, path, previous_path, request_id);
        }

        let opened = st.breaker.record_failure(Instant::now());
        let failures = st.breaker.consecutive_failures();
        let state = if st.breaker.is_tripped() {
            ConnectionState::Failed
        } else {
            state_below_threshold
        };
        st.health.transition(state, retry_count, Some(error.clone()));

        let message = if state == ConnectionState::Failed {
            format!("{}. Connection marked failed; retrying in background.", error)
        } else {
            format!("{}. Reconnecting…", error)
        };
        let health = st.health.clone();
        let snapshot = fallback_snapshot(&st, path, previous_path, health, request_id, message);
        drop(st);

        self.emit(
            DiagnosticLevel::Error,
            CATEGORY_BROWSER,
            format!("{} (consecutive failures: {})", error, failures),
        );
        if opened {
            self.emit(
                DiagnosticLevel::Error,
                CATEGORY_BREAKER,
                format!(
                    "breaker opened after {} consecutive failures for {:?}",
                    failures,
                    self.config.breaker_window()
                ),
            );
        }
        self.schedule_recovery();
        snapshot
    }

    /// Start the recovery loop unless one is already running
    fn schedule_recovery(self: &Arc<Self>) {
        {
            let mut st = self.state.lock();
            if st.closed || st.recovery_in_flight {
                return;
            }
            st.recovery_in_flight = true;
            st.recovery_launches += 1;
        }

        self.emit(
            DiagnosticLevel::Info,
            CATEGORY_RECOVERY,
            format!("recovery scheduled ({} attempts)", self.config.recovery_delays_ms.len()),
        );

        let inner = Arc::clone(self);
        let token = self.cancel.child_token();
        let task = tokio::spawn(async move { inner.run_recovery(token).await });
        *self.recovery_task.lock() = Some(task);
    }

    async fn run_recovery(self: Arc<Self>, token: CancellationToken) {
        let delays = self.config.recovery_delays();
        let total = delays.len();
        let mut last_error: Option<String> = None;

        for (index, delay) in delays.into_iter().enumerate() {
            let attempt = index as u32 + 1;
            {
                let mut st = self.state.lock();
                if st.closed {
                    st.recovery_in_flight = false;
                    return;
                }
                if st.is_settled() {
                    st.recovery_in_flight = false;
                    drop(st);
                    self.emit(
                        DiagnosticLevel::Info,
                        CATEGORY_RECOVERY,
                        "connection already healthy, recovery stopped".to_string(),
                    );
                    return;
                }
                st.health.transition(ConnectionState::Reconnecting, attempt, None);
            }
            self.emit(
                DiagnosticLevel::Info,
                CATEGORY_RECOVERY,
                format!("attempt {}/{} in {:?}", attempt, total, delay),
            );

            tokio::select! {
                _ = token.cancelled() => {
                    self.state.lock().recovery_in_flight = false;
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let (path, sequence) = {
                let mut st = self.state.lock();
                if st.closed {
                    st.recovery_in_flight = false;
                    return;
                }
                if st.is_settled() {
                    st.recovery_in_flight = false;
                    drop(st);
                    self.emit(
                        DiagnosticLevel::Info,
                        CATEGORY_RECOVERY,
                        format!("connection healthy before attempt {}, recovery stopped", attempt),
                    );
                    return;
                }
                st.recovery_attempt_active = true;
                (st.last_path.clone(), st.issue_sequence())
            };

            let healthy = match self.transport.list_directories(&path).await {
                Ok(listing) => {
                    let (_, healthy) = self
                        .apply_listing(&path, &path, listing, sequence, RECOVERY_REQUEST_ID)
                        .await;
                    healthy
                }
                Err(e) => {
                    self.emit(
                        DiagnosticLevel::Warning,
                        CATEGORY_RECOVERY,
                        format!("attempt {}/{} for {} failed: {}", attempt, total, path, e),
                    );
                    let mut st = self.state.lock();
                    // A foreground success during the call wins
                    if !st.is_settled() {
                        st.health
                            .transition(ConnectionState::Reconnecting, attempt, Some(e.to_string()));
                    }
                    last_error = Some(e.to_string());
                    false
                }
            };

            let mut st = self.state.lock();
            st.recovery_attempt_active = false;
            if (healthy && st.health.state == ConnectionState::Healthy) || st.is_settled() {
                st.recovery_in_flight = false;
                drop(st);
                self.emit(
                    DiagnosticLevel::Info,
                    CATEGORY_RECOVERY,
                    format!("connection restored on attempt {}", attempt),
                );
                return;
            }
        }

        let message = format!(
            "Recovery exhausted after {} attempts: {}",
            total,
            last_error.as_deref().unwrap_or("listing not confirmed")
        );
        {
            let mut st = self.state.lock();
            st.recovery_in_flight = false;
            if st.closed || st.is_settled() {
                return;
            }
            st.health
                .transition(ConnectionState::Failed, total as u32, Some(message.clone()));
        }
        self.emit(DiagnosticLevel::Error, CATEGORY_RECOVERY, message);
    }

    async fn run_keepalive(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        tracing::info!(
            "Keepalive task started for browse session {} (interval={}s)",
            self.id,
            interval.as_secs()
        );
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let path = {
                let st = self.state.lock();
                if st.closed {
                    break;
                }
                if st.active_list_requests > 0 || st.recovery_in_flight || st.recovery_attempt_active {
                    tracing::debug!("Keepalive skipped for {}: connection busy", self.id);
                    continue;
                }
                st.last_path.clone()
            };

            let started = Instant::now();
            let result = self.transport.ping(&path).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let mut st = self.state.lock();
            if st.closed {
                break;
            }
            match result {
                Ok(()) => {
                    // Only a listing moves a fresh session out of Connecting
                    let had_trouble = !st.is_untouched() && !st.is_settled();
                    if had_trouble {
                        st.breaker.record_success();
                        st.health.mark_success(Some(latency_ms));
                        drop(st);
                        self.emit(
                            DiagnosticLevel::Info,
                            CATEGORY_KEEPALIVE,
                            format!("ping ok ({}ms), connection healthy again", latency_ms),
                        );
                    } else {
                        drop(st);
                        tracing::debug!("Keepalive OK for {} ({}ms)", self.id, latency_ms);
                    }
                }
                Err(e) => {
                    st.health
                        .transition(ConnectionState::Reconnecting, 0, Some(e.to_string()));
                    drop(st);
                    self.emit(
                        DiagnosticLevel::Warning,
                        CATEGORY_KEEPALIVE,
                        format!("ping {} failed: {}", path, e),
                    );
                    self.schedule_recovery();
                }
            }
        }

        tracing::info!("Keepalive task stopped for browse session {}", self.id);
    }
}

/// Snapshot served from the three-tier cache. Never blank without a message.
fn fallback_snapshot(
    st: &SessionState,
    path: &str,
    previous_path: &str,
    health: ConnectionHealth,
    request_id: &str,
    message: String,
) -> Snapshot {
    match st.cache.fallback(path, Some(previous_path)) {
        Some(hit) => {
            let message = match hit.tier {
                CacheTier::ExactPath => message,
                _ => format!("{} Showing last known listing of {}.", message, hit.path),
            };
            Snapshot::new(hit.path, hit.entries, EntrySource::Cache, false, health, request_id)
                .with_message(message)
        }
        None => Snapshot::new(
            path.to_string(),
            Vec::new(),
            EntrySource::Network,
            false,
            health,
            request_id,
        )
        .stale()
        .with_message(message),
    }
}

fn closed_snapshot(st: &SessionState, path: &str, previous_path: &str, request_id: &str) -> Snapshot {
    let health = st.health.presented_as(ConnectionState::Closed);
    fallback_snapshot(
        st,
        path,
        previous_path,
        health,
        request_id,
        "Session closed.".to_string(),
    )
    .stale()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browse::diagnostics::MemoryDiagnostics;
    use crate::browse::types::DirectoryEntry;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type ListResult = Result<DirectoryListing, TransportError>;

    struct MockTransport {
        script: Mutex<VecDeque<ListResult>>,
        fallback: Mutex<ListResult>,
        ping_result: Mutex<Result<(), TransportError>>,
        list_delay: Mutex<Option<Duration>>,
        list_calls: Mutex<Vec<String>>,
        ping_calls: AtomicUsize,
        invalidations: AtomicUsize,
    }

    impl MockTransport {
        fn new(fallback: ListResult) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(fallback),
                ping_result: Mutex::new(Ok(())),
                list_delay: Mutex::new(None),
                list_calls: Mutex::new(Vec::new()),
                ping_calls: AtomicUsize::new(0),
                invalidations: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Self::new(Err(TransportError::Disconnected))
        }

        fn push(&self, result: ListResult) {
            self.script.lock().push_back(result);
        }

        fn set_fallback(&self, result: ListResult) {
            *self.fallback.lock() = result;
        }

        fn calls(&self) -> Vec<String> {
            self.list_calls.lock().clone()
        }
    }

    #[async_trait]
    impl BrowseTransport for MockTransport {
        async fn list_directories(&self, path: &str) -> Result<DirectoryListing, TransportError> {
            self.list_calls.lock().push(path.to_string());
            let delay = *self.list_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.script.lock().pop_front();
            scripted.unwrap_or_else(|| self.fallback.lock().clone())
        }

        async fn ping(&self, _path: &str) -> Result<(), TransportError> {
            self.ping_calls.fetch_add(1, Ordering::SeqCst);
            self.ping_result.lock().clone()
        }

        async fn invalidate(&self, _owner_id: &str) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn listing(path: &str, names: &[&str]) -> ListResult {
        Ok(DirectoryListing {
            entries: names
                .iter()
                .map(|n| DirectoryEntry::directory(*n, format!("{}/{}", path, n)))
                .collect(),
            resolved_path: path.to_string(),
            latency_ms: 12,
            reopened_session: false,
        })
    }

    fn base_config() -> BrowseConfig {
        BrowseConfig {
            initial_path: "/".to_string(),
            retry_delays_ms: vec![],
            recovery_delays_ms: vec![60_000],
            breaker_threshold: 8,
            breaker_window_secs: 30,
            keepalive_interval_secs: 12,
            keepalive_enabled: false,
        }
    }

    fn session_with(transport: Arc<MockTransport>, config: BrowseConfig) -> BrowseSession {
        BrowseSession::with_collaborators(
            "test-session".to_string(),
            transport,
            Arc::new(RemotePathNormalizer),
            Arc::new(MemoryDiagnostics::new(256)),
            config,
        )
    }

    fn names(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_listing_is_healthy() {
        let transport = MockTransport::failing();
        transport.push(listing("/data", &["foo", "bar"]));
        let session = session_with(transport.clone(), base_config());

        let snap = session.list("/data", "req-1", false).await;

        assert_eq!(names(&snap), vec!["foo", "bar"]);
        assert!(!snap.is_stale);
        assert!(!snap.from_cache);
        assert!(!snap.is_confirmed_empty);
        assert_eq!(snap.health.state, ConnectionState::Healthy);
        assert_eq!(snap.request_id, "req-1");
        assert_eq!(snap.latency_ms, Some(12));
        assert_eq!(transport.calls(), vec!["/data"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_empty_keeps_cache() {
        let transport = MockTransport::failing();
        transport.push(listing("/data", &["foo", "bar"]));
        transport.push(listing("/data", &[]));
        let session = session_with(transport.clone(), base_config());

        session.list("/data", "req-1", false).await;
        let snap = session.list("/data", "req-2", false).await;

        assert_eq!(names(&snap), vec!["foo", "bar"]);
        assert!(snap.is_stale);
        assert!(snap.from_cache);
        assert!(!snap.is_confirmed_empty);
        assert_eq!(snap.health.state, ConnectionState::Reconnecting);
        assert!(snap.message.is_some());
        // No confirmation call when the cache already has entries
        assert_eq!(transport.calls().len(), 2);
        assert!(session.is_recovery_in_flight());
        assert!(session.summary_line().contains("emptyStrikes=1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_at_threshold() {
        let transport = MockTransport::failing();
        let session = session_with(transport.clone(), base_config());

        for i in 1..=7 {
            let snap = session.list("/x", &format!("req-{}", i), false).await;
            assert_eq!(snap.health.state, ConnectionState::Reconnecting);
            assert!(snap.entries.is_empty());
            assert!(snap.message.is_some());
        }
        let eighth = session.list("/x", "req-8", false).await;
        assert_eq!(eighth.health.state, ConnectionState::Failed);
        assert_eq!(session.consecutive_failures(), 8);
        assert_eq!(session.recovery_launches(), 1);
        assert_eq!(transport.calls().len(), 8);

        let ninth = session.list("/x", "req-9", false).await;
        assert_eq!(ninth.health.state, ConnectionState::Failed);
        assert!(ninth.is_stale);
        assert!(ninth.message.is_some());
        assert_eq!(transport.calls().len(), 8);
        assert_eq!(session.recovery_launches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_clears_after_window() {
        let transport = MockTransport::failing();
        let mut config = base_config();
        config.breaker_threshold = 2;
        let session = session_with(transport.clone(), config);

        session.list("/x", "a", false).await;
        session.list("/x", "b", false).await;
        session.list("/x", "c", false).await;
        assert_eq!(transport.calls().len(), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        transport.set_fallback(listing("/x", &["y"]));

        let snap = session.list("/x", "d", false).await;
        assert_eq!(transport.calls().len(), 3);
        assert_eq!(snap.health.state, ConnectionState::Healthy);
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_empty_is_confirmed() {
        let transport = MockTransport::failing();
        transport.push(listing("/empty", &[]));
        transport.push(listing("/empty", &[]));
        let session = session_with(transport.clone(), base_config());

        let snap = session.list("/empty", "req-1", false).await;

        assert!(snap.entries.is_empty());
        assert!(snap.is_confirmed_empty);
        assert!(!snap.is_stale);
        assert_eq!(snap.health.state, ConnectionState::Healthy);
        assert_eq!(transport.calls(), vec!["/empty", "/empty"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_disagreement_accepts_entries() {
        let transport = MockTransport::failing();
        transport.push(listing("/data", &[]));
        transport.push(listing("/data", &["late"]));
        let session = session_with(transport.clone(), base_config());

        let snap = session.list("/data", "req-1", false).await;

        assert_eq!(names(&snap), vec!["late"]);
        assert!(!snap.is_confirmed_empty);
        assert_eq!(snap.health.state, ConnectionState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_failure_falls_back_to_cache() {
        let transport = MockTransport::failing();
        transport.push(listing("/data", &["foo"]));
        transport.push(listing("/new", &[]));
        transport.push(Err(TransportError::Timeout("readdir".to_string())));
        let session = session_with(transport.clone(), base_config());

        session.list("/data", "req-1", false).await;
        let snap = session.list("/new", "req-2", false).await;

        assert_eq!(snap.path, "/data");
        assert_eq!(names(&snap), vec!["foo"]);
        assert!(snap.from_cache);
        assert!(snap.is_stale);
        assert_eq!(snap.health.state, ConnectionState::Degraded);
        assert!(session.is_recovery_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_up_lists_parent() {
        let transport = MockTransport::new(listing("/a/b", &["c"]));
        let session = session_with(transport.clone(), base_config());

        let snap = session.go_up("/a/b/c", "req-1").await;

        assert_eq!(transport.calls(), vec!["/a/b"]);
        assert_eq!(snap.path, "/a/b");
        assert_eq!(session.last_path(), "/a/b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_current_path_bypasses_breaker() {
        let transport = MockTransport::failing();
        let mut config = base_config();
        config.breaker_threshold = 1;
        let session = session_with(transport.clone(), config);

        session.list("/x", "req-1", false).await;
        session.list("/x", "req-2", false).await;
        assert_eq!(transport.calls().len(), 1);

        transport.set_fallback(listing("/x", &["y"]));
        let snap = session.retry_current_path("req-3").await;

        assert_eq!(transport.calls(), vec!["/x", "/x"]);
        assert_eq!(snap.health.state, ConnectionState::Healthy);
        assert_eq!(names(&snap), vec!["y"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let transport = MockTransport::failing();
        transport.push(listing("/data", &["foo"]));
        let session = session_with(transport.clone(), base_config());
        session.list("/data", "req-1", false).await;

        session.close().await;
        session.close().await;
        assert_eq!(transport.invalidations.load(Ordering::SeqCst), 1);

        let snap = session.list("/data", "req-2", false).await;
        assert_eq!(snap.health.state, ConnectionState::Closed);
        assert!(snap.is_stale);
        assert_eq!(names(&snap), vec!["foo"]);
        assert_eq!(transport.calls().len(), 1);

        let health = session.current_health();
        assert_eq!(health.state, ConnectionState::Closed);
        assert_eq!(health.last_latency_ms, Some(12));
        assert!(health.last_success_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures() {
        let transport = MockTransport::failing();
        let session = session_with(transport.clone(), base_config());

        for _ in 0..3 {
            session.list("/x", "req", false).await;
        }
        assert_eq!(session.consecutive_failures(), 3);

        transport.set_fallback(listing("/x", &["y"]));
        let snap = session.list("/x", "req", false).await;

        assert_eq!(snap.health.state, ConnectionState::Healthy);
        assert_eq!(session.consecutive_failures(), 0);
        assert!(session.current_health().last_error.is_none());
        assert!(session.summary_line().contains("failures=0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_retries_follow_schedule() {
        let transport = MockTransport::failing();
        transport.push(Err(TransportError::Disconnected));
        transport.push(Err(TransportError::Disconnected));
        transport.push(listing("/x", &["y"]));
        let mut config = base_config();
        config.retry_delays_ms = vec![300, 800];
        let session = session_with(transport.clone(), config);

        let started = Instant::now();
        let snap = session.list("/x", "req", false).await;

        assert_eq!(snap.health.state, ConnectionState::Healthy);
        assert_eq!(transport.calls().len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(1100));
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_restores_health() {
        let transport = MockTransport::failing();
        let mut config = base_config();
        config.recovery_delays_ms = vec![200];
        let session = session_with(transport.clone(), config);

        session.list("/x", "req", false).await;
        assert!(session.is_recovery_in_flight());
        transport.set_fallback(listing("/x", &["y"]));

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(session.current_health().state, ConnectionState::Healthy);
        assert!(!session.is_recovery_in_flight());
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_exhaustion_marks_failed() {
        let transport = MockTransport::failing();
        let mut config = base_config();
        config.recovery_delays_ms = vec![100, 100];
        let session = session_with(transport.clone(), config);

        session.list("/x", "req", false).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let health = session.current_health();
        assert_eq!(health.state, ConnectionState::Failed);
        assert!(health.last_error.unwrap().contains("Recovery exhausted"));
        assert!(!session.is_recovery_in_flight());
        // 1 foreground call + 2 recovery attempts
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_failure_preserves_cache() {
        let transport = MockTransport::failing();
        transport.push(listing("/data", &["foo"]));
        let mut config = base_config();
        config.keepalive_enabled = true;
        let session = session_with(transport.clone(), config);

        session.list("/data", "req-1", false).await;
        *transport.ping_result.lock() = Err(TransportError::Disconnected);

        tokio::time::sleep(Duration::from_secs(13)).await;

        assert_eq!(transport.ping_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.current_health().state, ConnectionState::Reconnecting);
        assert!(session.is_recovery_in_flight());

        let snap = session.list("/data", "req-2", false).await;
        assert_eq!(names(&snap), vec!["foo"]);
        assert!(snap.from_cache);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_success_restores_health() {
        let transport = MockTransport::failing();
        let mut config = base_config();
        config.keepalive_enabled = true;
        config.recovery_delays_ms = vec![];
        config.breaker_threshold = 1;
        let session = session_with(transport.clone(), config);

        session.list("/x", "req", false).await;
        // Empty recovery schedule gives up immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.current_health().state, ConnectionState::Failed);

        tokio::time::sleep(Duration::from_secs(13)).await;

        assert_eq!(session.current_health().state, ConnectionState::Healthy);
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_discards_in_flight_result() {
        let transport = MockTransport::new(listing("/slow", &["a"]));
        *transport.list_delay.lock() = Some(Duration::from_secs(5));
        let session = Arc::new(session_with(transport.clone(), base_config()));

        let pending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.list("/slow", "req", false).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.close().await;

        let snap = pending.await.unwrap();
        assert_eq!(snap.health.state, ConnectionState::Closed);
        assert!(snap.entries.is_empty());
        assert!(snap.is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_stops_once_foreground_restores_health() {
        let transport = MockTransport::failing();
        let mut config = base_config();
        config.recovery_delays_ms = vec![200, 800, 2000, 5000];
        let session = session_with(transport.clone(), config);

        session.list("/x", "req-1", false).await;
        assert!(session.is_recovery_in_flight());

        // First recovery attempt at 200ms still fails
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(transport.calls().len(), 2);

        transport.set_fallback(listing("/x", &["y"]));
        let snap = session.list("/x", "req-2", false).await;
        assert_eq!(snap.health.state, ConnectionState::Healthy);
        assert_eq!(session.consecutive_failures(), 0);

        // The loop wakes for attempt 2, sees a healthy session and stops
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(!session.is_recovery_in_flight());
        assert_eq!(transport.calls().len(), 3);

        transport.set_fallback(Err(TransportError::Disconnected));
        tokio::time::sleep(Duration::from_secs(10)).await;

        let health = session.current_health();
        assert_eq!(health.state, ConnectionState::Healthy);
        assert!(health.last_error.is_none());
        assert_eq!(transport.calls().len(), 3);
        assert_eq!(session.recovery_launches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_skips_while_list_in_flight() {
        let transport = MockTransport::new(listing("/slow", &["a"]));
        *transport.list_delay.lock() = Some(Duration::from_secs(20));
        let mut config = base_config();
        config.keepalive_enabled = true;
        let session = Arc::new(session_with(transport.clone(), config));

        let pending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.list("/slow", "req", false).await })
        };

        // Keepalive ticks at 12s while the list is still running
        tokio::time::sleep(Duration::from_secs(13)).await;
        assert_eq!(transport.ping_calls.load(Ordering::SeqCst), 0);

        let snap = pending.await.unwrap();
        assert_eq!(snap.health.state, ConnectionState::Healthy);
        assert_eq!(transport.ping_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_skips_while_recovery_in_flight() {
        let transport = MockTransport::failing();
        let mut config = base_config();
        config.keepalive_enabled = true;
        let session = session_with(transport.clone(), config);

        session.list("/x", "req", false).await;
        assert!(session.is_recovery_in_flight());

        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(transport.ping_calls.load(Ordering::SeqCst), 0);
        assert!(session.is_recovery_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_pending_recovery() {
        let transport = MockTransport::failing();
        let mut config = base_config();
        config.recovery_delays_ms = vec![5_000, 5_000];
        let session = session_with(transport.clone(), config);

        session.list("/x", "req", false).await;
        assert!(session.is_recovery_in_flight());
        tokio::time::sleep(Duration::from_secs(1)).await;

        session.close().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(transport.calls(), vec!["/x"]);
        assert!(!session.is_recovery_in_flight());
        assert_eq!(session.current_health().state, ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_leaves_fresh_session_connecting() {
        let transport = MockTransport::failing();
        let mut config = base_config();
        config.keepalive_enabled = true;
        let session = session_with(transport.clone(), config);

        tokio::time::sleep(Duration::from_secs(13)).await;

        assert_eq!(transport.ping_calls.load(Ordering::SeqCst), 1);
        let health = session.current_health();
        assert_eq!(health.state, ConnectionState::Connecting);
        assert!(health.last_success_at.is_none());
        assert!(transport.calls().is_empty());
    }
}
