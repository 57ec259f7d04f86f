//! Entity types for the verification store.

use crate::signal::ChannelScores;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription plan attached to an API key. Controls the monthly session
/// quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
}

impl Plan {
    /// Monthly session quota; None means unlimited.
    pub fn monthly_quota(&self) -> Option<u64> {
        match self {
            Plan::Free => Some(10_000),
            Plan::Pro => Some(100_000),
            Plan::Enterprise => None,
        }
    }
}

/// Monthly usage counter for an API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Month in "YYYY-MM" form; the counter resets when the month rolls over.
    pub month: String,
    pub count: u64,
}

/// An integrating application's credential pair. The site key is public and
/// creates sessions; the secret key authenticates server-to-server calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub site_key: String,
    pub secret_key: String,
    pub name: String,
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub plan: Plan,
    pub usage: Usage,
    pub rate_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Analyzing,
    Completed,
    Expired,
}

/// One verification attempt. Created pending with a 5-minute expiry; mutated
/// once to completed by the final channel-score submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub site_key: String,
    pub status: SessionStatus,
    pub score: f64,
    pub channels: ChannelScores,
    pub is_human: bool,
    /// Opaque verification token; empty unless the session scored human.
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Expired,
    Revoked,
}

/// Token metadata captured at issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub user_agent: String,
    pub ip: String,
    pub verification_count: u32,
}

/// Long-lived portable proof of a successful verification. One active token
/// per user; re-issuance refreshes the existing token instead of minting a
/// duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanToken {
    pub id: String,
    pub user_id: String,
    pub status: TokenStatus,
    pub score: f64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
    pub refresh_count: u32,
    pub device_fingerprint: String,
    pub session_ids: Vec<String>,
    pub metadata: TokenMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    Active,
    Expired,
    Revoked,
    Exhausted,
}

impl fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DelegationStatus::Active => "active",
            DelegationStatus::Expired => "expired",
            DelegationStatus::Revoked => "revoked",
            DelegationStatus::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// What an agent is allowed to do under a delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelegationScope {
    Read,
    Write,
    Transact,
    Communicate,
    TravelBooking,
    Purchase,
    DataAccess,
    SignDocument,
    Schedule,
    Custom,
}

/// Hard limits on a delegation. `actions_used` and `spent_amount` only ever
/// increase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConstraints {
    pub max_actions: u32,
    pub actions_used: u32,
    pub max_spend: Option<f64>,
    pub spent_amount: f64,
    pub allowed_domains: Vec<String>,
    pub ip_whitelist: Vec<String>,
}

/// Caller-supplied constraint overrides; anything omitted takes the default
/// (100 actions, unlimited spend, any domain, 60 minutes).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConstraintRequest {
    pub max_actions: Option<u32>,
    pub max_spend: Option<f64>,
    pub allowed_domains: Option<Vec<String>>,
    pub ip_whitelist: Option<Vec<String>>,
    pub duration_minutes: Option<i64>,
}

/// A scoped, constrained, time-limited authorization for a third-party agent
/// to act on a human token's trust without holding the token itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub id: String,
    pub human_token_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub agent_platform: String,
    pub status: DelegationStatus,
    pub scopes: Vec<DelegationScope>,
    pub constraints: DelegationConstraints,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Result of checking a verification token.
#[derive(Debug, Clone, Serialize)]
pub struct TokenVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

/// Result of a delegation authorization check. Denials carry a reason string
/// that is part of the contract.
#[derive(Debug, Clone, Serialize)]
pub struct DelegationDecision {
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation: Option<Delegation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_token: Option<HumanToken>,
}

impl DelegationDecision {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            authorized: false,
            reason: Some(reason.into()),
            delegation: None,
            human_token: None,
        }
    }
}

/// Aggregate counters over the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_keys: usize,
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub human_verified: usize,
    pub avg_score: f64,
    pub active_tokens: usize,
    pub total_tokens: usize,
    pub active_delegations: usize,
    pub total_delegations: usize,
    pub total_agent_actions: usize,
    pub blocked_agent_actions: usize,
    pub total_audit_entries: usize,
}
