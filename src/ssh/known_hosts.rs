//! Known hosts management for SSH host key verification
//!
//! Reads and appends OpenSSH `known_hosts` files. Hashed hostnames (`|1|...`)
//! are ignored.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::error::SshError;

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    /// Key matches known_hosts entry
    Verified,
    /// Host (or this key type for it) not recorded yet
    Unknown { fingerprint: String },
    /// Key changed from known_hosts entry
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

#[derive(Clone, Debug)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

pub struct KnownHostsStore {
    /// `host` or `[host]:port` -> keys
    hosts: RwLock<HashMap<String, Vec<HostKeyEntry>>>,
    path: PathBuf,
}

impl KnownHostsStore {
    /// Load from `path`. A missing or unreadable file gives an empty store.
    pub fn open(path: PathBuf) -> Self {
        let hosts = match Self::load(&path) {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!("Failed to load known_hosts {:?}: {}", path, e);
                HashMap::new()
            }
        };
        Self {
            hosts: RwLock::new(hosts),
            path,
        }
    }

    /// ~/.ssh/known_hosts
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from(".ssh/known_hosts"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<HashMap<String, Vec<HostKeyEntry>>, SshError> {
        let mut hosts: HashMap<String, Vec<HostKeyEntry>> = HashMap::new();
        if !path.exists() {
            return Ok(hosts);
        }

        let reader = BufReader::new(fs::File::open(path)?);
        let mut entry_count = 0;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // hostname[,alias] keytype base64key [comment]
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }
            let entry = HostKeyEntry {
                key_type: parts[1].to_string(),
                key_data: parts[2].to_string(),
            };

            for hostname in parts[0].split(',') {
                if hostname.starts_with('|') {
                    continue;
                }
                hosts
                    .entry(Self::canonical_hostname(hostname))
                    .or_default()
                    .push(entry.clone());
                entry_count += 1;
            }
        }

        debug!(
            "Loaded {} known host entries ({} unique hosts) from {:?}",
            entry_count,
            hosts.len(),
            path
        );
        Ok(hosts)
    }

    /// `[host]:22` and `host` are the same entry
    fn canonical_hostname(hostname: &str) -> String {
        let lower = hostname.to_lowercase();
        match lower.strip_prefix('[').and_then(|h| h.strip_suffix("]:22")) {
            Some(host) => host.to_string(),
            None => lower,
        }
    }

    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// SHA256 fingerprint in OpenSSH format
    pub fn fingerprint(key: &PublicKey) -> String {
        Self::fingerprint_bytes(&key.public_key_bytes())
    }

    fn fingerprint_bytes(bytes: &[u8]) -> String {
        let hash = Sha256::digest(bytes);
        format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
    }

    fn fingerprint_b64(key_b64: &str) -> String {
        BASE64
            .decode(key_b64)
            .map(|bytes| Self::fingerprint_bytes(&bytes))
            .unwrap_or_else(|_| "unknown".to_string())
    }

    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        let key_b64 = BASE64.encode(key.public_key_bytes());
        self.verify_encoded(host, port, key.algorithm().as_str(), &key_b64)
    }

    /// Verify a key given as known_hosts fields (type + base64 blob)
    pub fn verify_encoded(
        &self,
        host: &str,
        port: u16,
        key_type: &str,
        key_b64: &str,
    ) -> HostKeyVerification {
        let lookup_key = Self::make_key(host, port);
        let fingerprint = Self::fingerprint_b64(key_b64);
        let hosts = self.hosts.read();

        let Some(entries) = hosts.get(&lookup_key) else {
            debug!("Unknown host: {}", lookup_key);
            return HostKeyVerification::Unknown { fingerprint };
        };

        match entries.iter().find(|e| e.key_type == key_type) {
            Some(entry) if entry.key_data == key_b64 => {
                debug!("Host key verified for {} (type: {})", lookup_key, key_type);
                HostKeyVerification::Verified
            }
            Some(entry) => HostKeyVerification::Changed {
                expected_fingerprint: Self::fingerprint_b64(&entry.key_data),
                actual_fingerprint: fingerprint,
            },
            None => {
                debug!("Host {} known but no {} key stored", lookup_key, key_type);
                HostKeyVerification::Unknown { fingerprint }
            }
        }
    }

    pub fn add_host(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        let key_b64 = BASE64.encode(key.public_key_bytes());
        self.add_encoded(host, port, key.algorithm().as_str(), &key_b64)
    }

    /// Record a key in memory and append it to the file
    pub fn add_encoded(
        &self,
        host: &str,
        port: u16,
        key_type: &str,
        key_b64: &str,
    ) -> Result<(), SshError> {
        let lookup_key = Self::make_key(host, port);
        self.hosts
            .write()
            .entry(lookup_key.clone())
            .or_default()
            .push(HostKeyEntry {
                key_type: key_type.to_string(),
                key_data: key_b64.to_string(),
            });

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} {} {}", lookup_key, key_type, key_b64)?;

        info!("Added host key for {} (type: {}) to known_hosts", lookup_key, key_type);
        Ok(())
    }
}

static KNOWN_HOSTS: std::sync::OnceLock<KnownHostsStore> = std::sync::OnceLock::new();

/// Process-wide store backed by ~/.ssh/known_hosts
pub fn known_hosts() -> &'static KnownHostsStore {
    KNOWN_HOSTS.get_or_init(|| KnownHostsStore::open(KnownHostsStore::default_path()))
}
