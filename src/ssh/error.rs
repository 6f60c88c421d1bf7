//! SSH Error types

use thiserror::Error;

use crate::browse::TransportError;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("SFTP error: {0}")]
    SftpError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Host key rejected: {0}")]
    HostKeyRejected(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Disconnected")]
    Disconnected,
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::Disconnect | russh::Error::HUP => SshError::Disconnected,
            russh::Error::IO(e) => SshError::IoError(e),
            other => SshError::ProtocolError(other.to_string()),
        }
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyError(err.to_string())
    }
}

impl From<SshError> for TransportError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::ConnectionFailed(msg) => TransportError::Connect(msg),
            SshError::IoError(e) => TransportError::Connect(e.to_string()),
            SshError::AuthenticationFailed(msg) | SshError::KeyError(msg) => {
                TransportError::Auth(msg)
            }
            SshError::HostKeyRejected(msg) => TransportError::Auth(format!("host key rejected: {}", msg)),
            SshError::Timeout(msg) => TransportError::Timeout(msg),
            SshError::Disconnected => TransportError::Disconnected,
            SshError::ChannelError(msg) | SshError::ProtocolError(msg) | SshError::SftpError(msg) => {
                TransportError::Protocol(msg)
            }
        }
    }
}

impl serde::Serialize for SshError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
