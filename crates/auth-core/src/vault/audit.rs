//! Bounded audit trail of vault operations

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    Create,
    Read,
    Rotate,
    Delete,
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Read => write!(f, "read"),
            Self::Rotate => write!(f, "rotate"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: AuditOperation,
    pub secret_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    max_entries: usize,
}

impl AuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries,
        }
    }

    /// Append an entry, dropping the oldest once the log is full
    pub fn record(&self, operation: AuditOperation, secret_id: &str, success: bool, detail: Option<String>) {
        if success {
            info!(operation = %operation, secret_id = %secret_id, "Vault audit");
        } else {
            warn!(operation = %operation, secret_id = %secret_id, detail = ?detail, "Vault audit failure");
        }

        if self.max_entries == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(AuditEntry {
            timestamp: Utc::now(),
            operation,
            secret_id: secret_id.to_string(),
            success,
            detail,
        });
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded() {
        let log = AuditLog::new(3);
        for i in 0..5 {
            log.record(AuditOperation::Read, &format!("s{}", i), true, None);
        }
        let ids: Vec<String> = log.entries().into_iter().map(|e| e.secret_id).collect();
        assert_eq!(ids, vec!["s2", "s3", "s4"]);
    }

    #[test]
    fn test_failure_detail_kept() {
        let log = AuditLog::new(10);
        log.record(AuditOperation::Delete, "missing", false, Some("Secret missing not found".into()));
        let entry = &log.entries()[0];
        assert!(!entry.success);
        assert_eq!(entry.operation, AuditOperation::Delete);
        assert_eq!(entry.detail.as_deref(), Some("Secret missing not found"));
    }
}
