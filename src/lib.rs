//! ssh-browse - resilient remote directory browsing over SSH
//!
//! `browse` holds the session engine and its collaborator traits; `sftp`
//! and `ssh` provide the transport that reaches a real host.

pub mod browse;
pub mod sftp;
pub mod ssh;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber (`RUST_LOG` overrides the `info` default).
/// Log lines go to stderr.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
