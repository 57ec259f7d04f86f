//! Append-only audit trail.
//!
//! Every state transition in the store writes one immutable entry. The log is
//! a capped ring: memory stays bounded at the cost of long-term history,
//! which callers needing durability must archive themselves.

use crate::signal::RingBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How many entries the log retains before evicting the oldest.
pub const AUDIT_LOG_CAPACITY: usize = 10_000;

/// What kind of transition an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    TokenIssued,
    TokenRefreshed,
    TokenRevoked,
    DelegationCreated,
    DelegationRevoked,
    DelegationExpired,
    VerificationCompleted,
    AgentAction,
    AgentBlocked,
}

/// One immutable audit record. References at most one of token / delegation /
/// session, plus the acting agent when there is one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: AuditEventType,
    pub human_token_id: Option<String>,
    pub delegation_id: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub details: Value,
    pub ip: String,
}

/// Query filters for reading the log back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub human_token_id: Option<String>,
    pub delegation_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<AuditEventType>,
    pub limit: Option<usize>,
}

/// Capped ring of audit entries.
#[derive(Debug)]
pub struct AuditLog {
    entries: RingBuffer<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: RingBuffer::new(AUDIT_LOG_CAPACITY),
        }
    }

    pub fn append(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Matching entries, newest first. Default limit is 100.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let limit = filter.limit.unwrap_or(100);
        self.entries
            .iter()
            .rev()
            .filter(|e| {
                filter
                    .human_token_id
                    .as_ref()
                    .map_or(true, |id| e.human_token_id.as_deref() == Some(id.as_str()))
            })
            .filter(|e| {
                filter
                    .delegation_id
                    .as_ref()
                    .map_or(true, |id| e.delegation_id.as_deref() == Some(id.as_str()))
            })
            .filter(|e| {
                filter
                    .event_type
                    .map_or(true, |t| e.event_type == t)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Count of entries of one type, over everything still retained.
    pub fn count_of(&self, event_type: AuditEventType) -> usize {
        self.entries
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
