//! SSH layer
//!
//! Connection setup, authentication and host key verification on top of
//! `russh`. A connected handle lives in its own owner task
//! (`handle_owner`); callers hold a `HandleController`.

mod client;
mod config;
mod error;
mod handle_owner;
pub mod known_hosts;

pub use client::{ClientHandler, SshClient};
pub use config::{AuthMethod, SshConfig};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController, PingResult};
pub use known_hosts::{known_hosts, HostKeyVerification, KnownHostsStore};
