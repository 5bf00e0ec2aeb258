//! In-memory query log
//!
//! Entries are plain strings. Executed statements are recorded with the
//! [`QUERY_PREFIX`]; anything else is a diagnostic message.

use std::time::Duration;

use tracing::debug;

/// Marks an entry as an executed statement
pub const QUERY_PREFIX: &str = "SQL ";

#[derive(Debug, Default, Clone)]
pub struct QueryLog {
    entries: Vec<String>,
}

impl QueryLog {
    pub fn log_query(&mut self, sql: &str, elapsed: Duration) {
        debug!(?elapsed, sql = %sql, "query");
        self.entries.push(format!("{QUERY_PREFIX}{sql}"));
    }

    pub fn log_message(&mut self, message: impl Into<String>) {
        self.entries.push(message.into());
    }

    /// Every entry, queries and diagnostics alike, in arrival order
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn queries(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(String::as_str)
            .filter(|e| e.starts_with(QUERY_PREFIX))
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.starts_with(QUERY_PREFIX))
            .count()
    }
}
