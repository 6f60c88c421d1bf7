//! ssh-browse: interactive directory browser over SSH.
//!
//! ```text
//! ssh-browse [--version] user@host[:port] [path]
//! ```
//!
//! Credentials come from the environment: `SSH_BROWSE_KEY` (private key path,
//! optional `SSH_BROWSE_PASSPHRASE`) or `SSH_BROWSE_PASSWORD`.
//!
//! Commands on stdin: `ls [path]`, `cd <path>`, `up`, `retry`, `health`, `quit`.

use std::sync::Arc;

use ssh_browse::browse::{is_absolute_remote_path, join_remote_path, BrowseConfig, BrowseSession, Snapshot};
use ssh_browse::sftp::SftpTransport;
use ssh_browse::ssh::{AuthMethod, SshConfig};
use tokio::io::{AsyncBufReadExt, BufReader};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "usage: ssh-browse [--version] user@host[:port] [path]";

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(|a| a == "--version" || a == "-V").unwrap_or(false) {
        println!("ssh-browse {}", VERSION);
        return;
    }
    let Some(target) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    ssh_browse::init_logging();

    let auth = match auth_from_env() {
        Some(auth) => auth,
        None => {
            eprintln!("set SSH_BROWSE_KEY or SSH_BROWSE_PASSWORD");
            std::process::exit(2);
        }
    };
    let Some(ssh_config) = SshConfig::parse_target(target, auth) else {
        eprintln!("invalid target {:?}\n{}", target, USAGE);
        std::process::exit(2);
    };

    let mut config = match BrowseConfig::load_default().await {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring browse config: {}", e);
            BrowseConfig::default()
        }
    };
    if let Some(path) = args.get(1) {
        config.initial_path = path.clone();
    }

    let transport = Arc::new(SftpTransport::new(ssh_config));
    let session = BrowseSession::new(transport, config);

    let mut current = session.last_path();
    let mut request_seq: u64 = 0;
    let mut next_request_id = move || {
        request_seq += 1;
        format!("cli-{}", request_seq)
    };

    let snapshot = session.list(&current, &next_request_id(), false).await;
    current = show(&snapshot);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("stdin: {}", e);
                break;
            }
        };

        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or("");
        let argument = words.next();

        let snapshot = match (command, argument) {
            ("", _) => continue,
            ("ls", None) => session.list(&current, &next_request_id(), true).await,
            ("ls", Some(path)) | ("cd", Some(path)) => {
                let target = resolve_argument(&current, path);
                session.list(&target, &next_request_id(), false).await
            }
            ("up", _) => session.go_up(&current, &next_request_id()).await,
            ("retry", _) => session.retry_current_path(&next_request_id()).await,
            ("health", _) => {
                println!("{}", session.summary_line());
                continue;
            }
            ("quit", _) | ("exit", _) => break,
            _ => {
                println!("commands: ls [path], cd <path>, up, retry, health, quit");
                continue;
            }
        };
        current = show(&snapshot);
    }

    session.close().await;
}

fn auth_from_env() -> Option<AuthMethod> {
    if let Ok(key_path) = std::env::var("SSH_BROWSE_KEY") {
        let passphrase = std::env::var("SSH_BROWSE_PASSPHRASE").ok();
        return Some(AuthMethod::key(key_path, passphrase));
    }
    std::env::var("SSH_BROWSE_PASSWORD").ok().map(AuthMethod::password)
}

/// Relative arguments are taken from the current directory
fn resolve_argument(current: &str, argument: &str) -> String {
    if is_absolute_remote_path(argument) || argument == "~" || argument.starts_with("~/") {
        argument.to_string()
    } else {
        join_remote_path(current, argument)
    }
}

/// Print a snapshot and return the path it shows
fn show(snapshot: &Snapshot) -> String {
    let mut flags = vec![snapshot.health.state.as_str()];
    if snapshot.is_stale {
        flags.push("stale");
    }
    if let Some(latency) = snapshot.latency_ms {
        println!("{} [{}] {}ms", snapshot.path, flags.join(", "), latency);
    } else {
        println!("{} [{}]", snapshot.path, flags.join(", "));
    }
    if let Some(message) = &snapshot.message {
        println!("  ! {}", message);
    }
    if snapshot.is_confirmed_empty {
        println!("  (no subdirectories)");
    }
    for entry in &snapshot.entries {
        println!("  {}/", entry.name);
    }
    snapshot.path.clone()
}
