//! Append-only audit log
//!
//! Every admin-gated or irreversible financial transition writes exactly one
//! entry here, per successful transition rather than per attempt. There is no
//! update or delete path; the admin activity viewer consumes this log in
//! reverse-chronological pages.

use crate::models::{Actor, AuditEntry};
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Append-only sink for audit entries
///
/// In-memory backing; in production this is an insert-only database table.
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    next_id: AtomicI64,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Append one entry and return it
    pub async fn append(
        &self,
        actor: &Actor,
        action_type: &str,
        target_type: &str,
        target_id: Uuid,
        details: serde_json::Value,
    ) -> AuditEntry {
        let entry = AuditEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            actor: *actor,
            action_type: action_type.to_string(),
            target_type: target_type.to_string(),
            target_id,
            details,
            created_at: Utc::now(),
        };

        self.entries.write().await.push(entry.clone());
        entry
    }

    /// Most recent entries first
    pub async fn recent(&self, limit: usize, offset: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// All entries for one target, oldest first
    pub async fn for_target(&self, target_type: &str, target_id: Uuid) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.target_type == target_type && e.target_id == target_id)
            .cloned()
            .collect()
    }

    /// Entries recorded under one action type
    pub async fn for_action(&self, action_type: &str) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.action_type == action_type)
            .cloned()
            .collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
