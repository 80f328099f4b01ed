use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

const DEFAULT_MAX_LINES: usize = 2_000;

/// Which pipe a captured line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Per-process ring buffer of captured daemon output, kept for diagnostics only.
pub struct LogBuffer {
    max_lines: usize,
    logs: RwLock<HashMap<String, VecDeque<LogLine>>>,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// Append a line, evicting the oldest once over capacity.
    pub fn push(&self, process: &str, stream: OutputStream, text: String) {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        let entries = logs.entry(process.to_string()).or_default();
        entries.push_back(LogLine { stream, text });
        while entries.len() > self.max_lines {
            entries.pop_front();
        }
    }

    /// Last `n` lines for a process, oldest first.
    pub fn tail(&self, process: &str, n: usize) -> Vec<LogLine> {
        let logs = self.logs.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = logs.get(process) else {
            return Vec::new();
        };
        let start = entries.len().saturating_sub(n);
        entries.iter().skip(start).cloned().collect()
    }

    pub fn clear(&self, process: &str) {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        logs.remove(process);
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}
