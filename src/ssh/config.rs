//! SSH Configuration

use serde::{Deserialize, Serialize};

/// SSH connection configuration for a browse target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Authentication method
    pub auth: AuthMethod,

    /// Per-step timeout in seconds (connect, handshake, every SFTP call)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Strict host key checking (default: false)
    /// - true: reject connections to unknown hosts
    /// - false: accept and record unknown hosts, still reject changed keys
    #[serde(default)]
    pub strict_host_key_checking: bool,
}

/// Authentication methods supported
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password authentication
    Password { password: String },

    /// SSH key authentication
    Key {
        /// Path to private key file
        key_path: String,
        /// Optional passphrase for encrypted keys
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: password.into(),
        }
    }

    pub fn key(key_path: impl Into<String>, passphrase: Option<String>) -> Self {
        Self::Key {
            key_path: key_path.into(),
            passphrase,
        }
    }
}

impl SshConfig {
    /// `user@host:port`, for logs
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    /// Parse `user@host[:port]` (IPv6 hosts in brackets: `user@[::1]:22`)
    pub fn parse_target(target: &str, auth: AuthMethod) -> Option<Self> {
        let (username, rest) = target.split_once('@')?;
        if username.is_empty() || rest.is_empty() {
            return None;
        }

        let (host, port) = if let Some(stripped) = rest.strip_prefix('[') {
            let (host, tail) = stripped.split_once(']')?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().ok()?,
                None if tail.is_empty() => default_port(),
                None => return None,
            };
            (host.to_string(), port)
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), port.parse().ok()?),
                None => (rest.to_string(), default_port()),
            }
        };
        if host.is_empty() {
            return None;
        }

        Some(Self {
            host,
            port,
            username: username.to_string(),
            auth,
            ..Self::default()
        })
    }
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    15
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            auth: AuthMethod::Password {
                password: String::new(),
            },
            timeout_secs: default_timeout(),
            strict_host_key_checking: false,
        }
    }
}
