//! Diagnostics sink
//!
//! Categorized log lines emitted by the session engine. The default sink
//! forwards to `tracing`; `MemoryDiagnostics` keeps lines for inspection.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Fire-and-forget log sink. Implementations must not block.
pub trait DiagnosticsSink: Send + Sync {
    fn append(&self, level: DiagnosticLevel, category: &str, message: &str);
}

/// Routes diagnostics into the `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn append(&self, level: DiagnosticLevel, category: &str, message: &str) {
        match level {
            DiagnosticLevel::Debug => debug!(category, "{}", message),
            DiagnosticLevel::Info => info!(category, "{}", message),
            DiagnosticLevel::Warning => warn!(category, "{}", message),
            DiagnosticLevel::Error => error!(category, "{}", message),
        }
    }
}

/// One recorded line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticLine {
    pub level: DiagnosticLevel,
    pub category: String,
    pub message: String,
}

/// Bounded in-memory sink (oldest lines dropped first)
pub struct MemoryDiagnostics {
    lines: Mutex<Vec<DiagnosticLine>>,
    capacity: usize,
}

impl MemoryDiagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn lines(&self) -> Vec<DiagnosticLine> {
        self.lines.lock().clone()
    }

    pub fn count_at_least(&self, level: DiagnosticLevel) -> usize {
        self.lines.lock().iter().filter(|l| l.level >= level).count()
    }
}

impl DiagnosticsSink for MemoryDiagnostics {
    fn append(&self, level: DiagnosticLevel, category: &str, message: &str) {
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            lines.remove(0);
        }
        lines.push(DiagnosticLine {
            level,
            category: category.to_string(),
            message: message.to_string(),
        });
    }
}
