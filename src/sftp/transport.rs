//! SFTP-backed browse transport
//!
//! Holds at most one SSH connection with one SFTP channel. The link is opened
//! lazily by the first call, dropped on connection loss and reopened by the
//! next call.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::SftpSession as RusshSftpSession;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::listing::{directory_entry, is_directory_mode, is_dot_entry, sftp_path, sort_entries};
use crate::browse::{BrowseTransport, DirectoryEntry, DirectoryListing, TransportError};
use crate::ssh::{HandleController, PingResult, SshClient, SshConfig, SshError};

struct SftpLink {
    controller: HandleController,
    sftp: Arc<RusshSftpSession>,
}

pub struct SftpTransport {
    config: SshConfig,
    timeout: Duration,
    link: Mutex<Option<SftpLink>>,
}

impl SftpTransport {
    pub fn new(config: SshConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        Self {
            config,
            timeout,
            link: Mutex::new(None),
        }
    }

    /// Current SFTP session, connecting first if needed. The flag is true
    /// when a new connection was opened.
    async fn session(&self) -> Result<(Arc<RusshSftpSession>, HandleController, bool), TransportError> {
        let mut link = self.link.lock().await;

        if let Some(existing) = link.as_ref() {
            if existing.controller.is_connected() {
                return Ok((Arc::clone(&existing.sftp), existing.controller.clone(), false));
            }
            debug!("SFTP link to {} is gone, reopening", self.config.target());
            *link = None;
        }

        let controller = SshClient::new(self.config.clone())
            .connect(&self.config.target())
            .await?;
        let sftp = match self.open_sftp(&controller).await {
            Ok(sftp) => Arc::new(sftp),
            Err(e) => {
                controller.disconnect().await;
                return Err(e);
            }
        };

        info!("SFTP link opened to {}", self.config.target());
        *link = Some(SftpLink {
            controller: controller.clone(),
            sftp: Arc::clone(&sftp),
        });
        Ok((sftp, controller, true))
    }

    async fn open_sftp(&self, controller: &HandleController) -> Result<RusshSftpSession, TransportError> {
        let channel = controller.open_session_channel().await?;

        tokio::time::timeout(self.timeout, channel.request_subsystem(true, "sftp"))
            .await
            .map_err(|_| TransportError::Timeout("sftp subsystem request".to_string()))?
            .map_err(|e| TransportError::from(SshError::from(e)))?;

        tokio::time::timeout(self.timeout, RusshSftpSession::new(channel.into_stream()))
            .await
            .map_err(|_| TransportError::Timeout("sftp init".to_string()))?
            .map_err(|e| map_sftp_error(e, "sftp init"))
    }

    async fn drop_link(&self) {
        if let Some(link) = self.link.lock().await.take() {
            link.controller.disconnect().await;
            info!("SFTP link to {} dropped", self.config.target());
        }
    }

    /// Run one SFTP request under the per-step timeout
    async fn timed<T, F>(&self, what: &str, fut: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, SftpErrorInner>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| map_sftp_error(e, what)),
            Err(_) => Err(TransportError::Timeout(format!("{} after {:?}", what, self.timeout))),
        }
    }

    async fn read_directories(
        &self,
        sftp: &RusshSftpSession,
        path: &str,
    ) -> Result<(String, Vec<DirectoryEntry>), TransportError> {
        let resolved = self
            .timed(&format!("realpath {}", path), sftp.canonicalize(sftp_path(path)))
            .await?;
        let read_dir = self
            .timed(&format!("readdir {}", resolved), sftp.read_dir(resolved.clone()))
            .await?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            if is_dot_entry(&name) {
                continue;
            }
            let metadata = entry.metadata();

            let is_dir = match is_directory_mode(metadata.permissions) {
                Some(is_dir) => is_dir,
                None => {
                    // No mode bits in the listing; ask for them
                    let full_path = crate::browse::join_remote_path(&resolved, &name);
                    self.timed(&format!("stat {}", full_path), sftp.metadata(full_path.clone()))
                        .await
                        .map(|attrs| attrs.is_dir())
                        .unwrap_or(false)
                }
            };
            if !is_dir {
                continue;
            }

            entries.push(directory_entry(&resolved, &name, metadata.size, metadata.mtime));
        }

        sort_entries(&mut entries);
        Ok((resolved, entries))
    }

    async fn after_error(&self, error: &TransportError) {
        if error.is_connection_loss() {
            warn!("SFTP connection to {} lost: {}", self.config.target(), error);
            self.drop_link().await;
        }
    }
}

#[async_trait]
impl BrowseTransport for SftpTransport {
    async fn list_directories(&self, path: &str) -> Result<DirectoryListing, TransportError> {
        let started = Instant::now();
        let (sftp, _, reopened) = self.session().await?;

        match self.read_directories(&sftp, path).await {
            Ok((resolved_path, entries)) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                debug!(
                    "Listed {} directories in {} ({}ms)",
                    entries.len(),
                    resolved_path,
                    latency_ms
                );
                Ok(DirectoryListing {
                    entries,
                    resolved_path,
                    latency_ms,
                    reopened_session: reopened,
                })
            }
            Err(e) => {
                self.after_error(&e).await;
                Err(e)
            }
        }
    }

    async fn ping(&self, path: &str) -> Result<(), TransportError> {
        let (sftp, controller, _) = self.session().await?;

        // SSH-level keepalive first, then a stat through the SFTP channel
        let result = match controller.ping().await {
            PingResult::Ok => self
                .timed(&format!("stat {}", path), sftp.metadata(sftp_path(path).to_string()))
                .await
                .map(|_| ()),
            PingResult::Timeout => Err(TransportError::Timeout("keepalive".to_string())),
            PingResult::IoError => Err(TransportError::Disconnected),
        };
        if let Err(e) = &result {
            self.after_error(e).await;
        }
        result
    }

    async fn invalidate(&self, owner_id: &str) {
        debug!("Invalidating SFTP link for {}", owner_id);
        self.drop_link().await;
    }
}

/// Map russh-sftp errors by their message
fn map_sftp_error(err: SftpErrorInner, context: &str) -> TransportError {
    let err_str = err.to_string();
    let lower = err_str.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        TransportError::Timeout(context.to_string())
    } else if lower.contains("i/o") || lower.contains("closed") || lower.contains("eof") {
        TransportError::Disconnected
    } else if lower.contains("no such file") || lower.contains("not found") {
        TransportError::Protocol(format!("{}: no such directory", context))
    } else if lower.contains("permission denied") {
        TransportError::Protocol(format!("{}: permission denied", context))
    } else {
        TransportError::Protocol(format!("{}: {}", context, err_str))
    }
}
