//! SSH Client implementation using russh

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::client::KeyboardInteractiveAuthResponse;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;
use super::handle_owner::{spawn_handle_owner_task, HandleController};
use super::known_hosts::{known_hosts, HostKeyVerification, KnownHostsStore};

pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect, authenticate and hand the handle to its owner task
    pub async fn connect(self, owner_id: &str) -> Result<HandleController, SshError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let timeout = Duration::from_secs(self.config.timeout_secs);

        info!("Connecting to SSH server at {}", addr);

        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        // The browse session runs its own keepalive; russh only detects dead links
        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.port,
            self.config.strict_host_key_checking,
            known_hosts(),
        );

        let mut handle = tokio::time::timeout(
            timeout,
            client::connect(Arc::new(ssh_config), socket_addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("connect to {}", addr)))??;

        debug!("SSH handshake completed for {}", addr);

        let authenticated = tokio::time::timeout(timeout, authenticate(&mut handle, &self.config))
            .await
            .map_err(|_| SshError::Timeout("authentication".to_string()))??;

        if !authenticated {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}", self.config.target());

        Ok(spawn_handle_owner_task(handle, owner_id.to_string()))
    }
}

/// Rounds of keyboard-interactive prompts answered before giving up
const MAX_KEYBOARD_INTERACTIVE_ROUNDS: usize = 8;

async fn authenticate(
    handle: &mut client::Handle<ClientHandler>,
    config: &SshConfig,
) -> Result<bool, SshError> {
    match &config.auth {
        AuthMethod::Password { password } => {
            let result = handle
                .authenticate_password(&config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;
            if result.success() {
                return Ok(true);
            }
            debug!(
                "Password rejected for {}, trying keyboard-interactive",
                config.target()
            );
            authenticate_keyboard_interactive(handle, &config.username, password).await
        }
        AuthMethod::Key {
            key_path,
            passphrase,
        } => {
            let key = russh::keys::load_secret_key(key_path, passphrase.as_deref())?;
            let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
            handle
                .authenticate_publickey(&config.username, key_with_hash)
                .await
                .map(|result| result.success())
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))
        }
    }
}

/// Keyboard-interactive login that answers every prompt with the password
async fn authenticate_keyboard_interactive(
    handle: &mut client::Handle<ClientHandler>,
    username: &str,
    password: &str,
) -> Result<bool, SshError> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(username, None::<String>)
        .await
        .map_err(|e| SshError::AuthenticationFailed(format!("KBI start failed: {}", e)))?;

    let mut rounds = 0;
    loop {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                if rounds == MAX_KEYBOARD_INTERACTIVE_ROUNDS {
                    warn!("Keyboard-interactive login for {} did not settle", username);
                    return Ok(false);
                }
                rounds += 1;
                debug!("Keyboard-interactive round with {} prompts", prompts.len());
                response = handle
                    .authenticate_keyboard_interactive_respond(prompt_answers(prompts.len(), password))
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(format!("KBI respond failed: {}", e)))?;
            }
        }
    }
}

fn prompt_answers(prompt_count: usize, password: &str) -> Vec<String> {
    vec![password.to_string(); prompt_count]
}

/// Client handler for russh callbacks (host key verification)
pub struct ClientHandler {
    host: String,
    port: u16,
    /// Reject unknown hosts instead of recording them
    strict: bool,
    store: &'static KnownHostsStore,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, strict: bool, store: &'static KnownHostsStore) -> Self {
        Self {
            host,
            port,
            strict,
            store,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.store.verify(&self.host, self.port, server_public_key) {
            HostKeyVerification::Verified => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } => {
                if self.strict {
                    warn!(
                        "Unknown host key for {}:{} (fingerprint: {}). Strict mode enabled, rejecting.",
                        self.host, self.port, fingerprint
                    );
                    return Err(SshError::HostKeyRejected(format!(
                        "unknown host {}:{} ({})",
                        self.host, self.port, fingerprint
                    )));
                }
                info!(
                    "New host {}:{}, adding to known_hosts (fingerprint: {})",
                    self.host, self.port, fingerprint
                );
                if let Err(e) = self.store.add_host(&self.host, self.port, server_public_key) {
                    warn!("Failed to save host key: {}", e);
                }
                Ok(true)
            }
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                warn!(
                    "HOST KEY CHANGED for {}:{}! Expected {}, got {}",
                    self.host, self.port, expected_fingerprint, actual_fingerprint
                );
                Err(SshError::HostKeyRejected(format!(
                    "key for {}:{} has changed (expected {}, got {}); remove the old entry from {:?} if this is legitimate",
                    self.host,
                    self.port,
                    expected_fingerprint,
                    actual_fingerprint,
                    self.store.path()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_prompt_gets_the_password() {
        assert_eq!(prompt_answers(2, "hunter2"), vec!["hunter2", "hunter2"]);
        // Servers may send an empty round before the real prompts
        assert!(prompt_answers(0, "hunter2").is_empty());
    }
}
