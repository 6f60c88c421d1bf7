//! SFTP transport
//!
//! `SftpTransport` implements `BrowseTransport` over an SSH connection with
//! the SFTP subsystem. Listings contain directories only.

pub mod listing;
mod transport;

pub use transport::SftpTransport;
