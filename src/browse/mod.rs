//! Resilient remote directory browsing
//!
//! `BrowseSession` turns an unreliable transport into a stream of
//! self-describing `Snapshot`s: cached entries are kept through network
//! trouble, empty listings are confirmed before they are believed, and a
//! circuit breaker plus a background recovery loop keep a dead link from
//! being hammered.

pub mod breaker;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod path;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

pub use breaker::CircuitBreaker;
pub use cache::{CacheHit, CacheTier, ListingCache};
pub use config::{BrowseConfig, ConfigError};
pub use diagnostics::{DiagnosticLevel, DiagnosticsSink, MemoryDiagnostics, TracingDiagnostics};
pub use path::{
    is_absolute_remote_path, join_remote_path, normalize_remote_path, parent_remote_path,
    PathNormalizer, RemotePathNormalizer,
};
pub use registry::BrowseRegistry;
pub use session::BrowseSession;
pub use transport::{BrowseTransport, TransportError};
pub use types::{
    ConnectionHealth, ConnectionState, DirectoryEntry, DirectoryListing, EntrySource, Snapshot,
};
