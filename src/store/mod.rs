//! In-memory verification store.
//!
//! Owns all sessions, human tokens, delegations, API keys, and the audit
//! trail, and implements every state transition between them. The store is an
//! explicit object with no ambient state: construct one with [`Store::new`]
//! and inject it wherever it is needed (the HTTP layer wraps it in an async
//! lock; tests build throwaway instances).
//!
//! Domain conditions (unknown id, expired entity, exhausted limits) are
//! reported through `Option`/decision returns, never panics. Nothing here
//! persists: process restart loses all state, and integrators who need
//! durability must back these contracts with storage of their own.

pub mod audit;
pub mod types;

pub use audit::{AuditEntry, AuditEventType, AuditFilter, AuditLog, AUDIT_LOG_CAPACITY};
pub use types::{
    ApiKey, ConstraintRequest, Delegation, DelegationConstraints, DelegationDecision,
    DelegationScope, DelegationStatus, HumanToken, Plan, Session, SessionStatus, StoreStats,
    TokenMetadata, TokenStatus, TokenVerification, Usage,
};

use crate::signal::ChannelScores;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// A session must be completed within this window.
const SESSION_TTL_MINUTES: i64 = 5;
/// Human tokens live this long between refreshes.
const TOKEN_TTL_DAYS: i64 = 30;
/// Delegation defaults when the caller leaves constraints unset.
const DEFAULT_MAX_ACTIONS: u32 = 100;
const DEFAULT_DELEGATION_MINUTES: i64 = 60;
/// A completed session at or above this score counts as human.
pub const HUMAN_THRESHOLD: f64 = 0.5;

/// Built-in demo credential pair, seeded on construction.
pub const DEMO_SITE_KEY: &str = "hsg_live_demo_0000000000";
pub const DEMO_SECRET_KEY: &str = "hsg_secret_demo_0000000000";

/// Prefixed opaque id. Format is opaque to the rest of the system; nothing
/// parses structure back out of these.
pub fn generate_id(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}

fn current_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// All verification state for one process.
#[derive(Debug)]
pub struct Store {
    api_keys: HashMap<String, ApiKey>,
    site_key_index: HashMap<String, String>,
    secret_key_index: HashMap<String, String>,
    sessions: HashMap<String, Session>,
    tokens: HashMap<String, HumanToken>,
    user_token_index: HashMap<String, String>,
    delegations: HashMap<String, Delegation>,
    token_delegations: HashMap<String, Vec<String>>,
    audit: AuditLog,
}

impl Store {
    /// Empty store with the demo API key seeded.
    pub fn new() -> Self {
        let mut store = Self {
            api_keys: HashMap::new(),
            site_key_index: HashMap::new(),
            secret_key_index: HashMap::new(),
            sessions: HashMap::new(),
            tokens: HashMap::new(),
            user_token_index: HashMap::new(),
            delegations: HashMap::new(),
            token_delegations: HashMap::new(),
            audit: AuditLog::new(),
        };
        store.seed_demo_key();
        store
    }

    fn seed_demo_key(&mut self) {
        let key = ApiKey {
            id: generate_id("key_"),
            site_key: DEMO_SITE_KEY.to_string(),
            secret_key: DEMO_SECRET_KEY.to_string(),
            name: "Demo".to_string(),
            domain: "localhost".to_string(),
            created_at: Utc::now(),
            plan: Plan::Free,
            usage: Usage {
                month: current_month(),
                count: 0,
            },
            rate_limit: 100,
        };
        self.insert_api_key(key);
    }

    fn insert_api_key(&mut self, key: ApiKey) {
        self.site_key_index
            .insert(key.site_key.clone(), key.id.clone());
        self.secret_key_index
            .insert(key.secret_key.clone(), key.id.clone());
        self.api_keys.insert(key.id.clone(), key);
    }

    fn audit_event(
        &mut self,
        event_type: AuditEventType,
        human_token_id: Option<&str>,
        delegation_id: Option<&str>,
        session_id: Option<&str>,
        agent_id: Option<&str>,
        details: Value,
        ip: &str,
    ) {
        self.audit.append(AuditEntry {
            id: generate_id("aud_"),
            timestamp: Utc::now(),
            event_type,
            human_token_id: human_token_id.map(String::from),
            delegation_id: delegation_id.map(String::from),
            session_id: session_id.map(String::from),
            agent_id: agent_id.map(String::from),
            details,
            ip: ip.to_string(),
        });
    }

    // ===== API keys =====

    pub fn create_api_key(&mut self, name: &str, domain: &str) -> ApiKey {
        let key = ApiKey {
            id: generate_id("key_"),
            site_key: generate_id("hsg_live_"),
            secret_key: generate_id("hsg_secret_"),
            name: name.to_string(),
            domain: domain.to_string(),
            created_at: Utc::now(),
            plan: Plan::Free,
            usage: Usage {
                month: current_month(),
                count: 0,
            },
            rate_limit: 100,
        };
        self.insert_api_key(key.clone());
        key
    }

    pub fn api_key_by_site_key(&self, site_key: &str) -> Option<ApiKey> {
        let id = self.site_key_index.get(site_key)?;
        self.api_keys.get(id).cloned()
    }

    pub fn api_key_by_secret_key(&self, secret_key: &str) -> Option<ApiKey> {
        let id = self.secret_key_index.get(secret_key)?;
        self.api_keys.get(id).cloned()
    }

    pub fn list_api_keys(&self) -> Vec<ApiKey> {
        self.api_keys.values().cloned().collect()
    }

    fn increment_usage(&mut self, site_key: &str) {
        let Some(id) = self.site_key_index.get(site_key) else {
            return;
        };
        let Some(key) = self.api_keys.get_mut(id) else {
            return;
        };
        let month = current_month();
        if key.usage.month != month {
            key.usage = Usage { month, count: 0 };
        }
        key.usage.count += 1;
    }

    // ===== Sessions =====

    /// Open a pending session for the given site key. Returns None when the
    /// key is unknown or its monthly plan quota is exhausted.
    pub fn create_session(
        &mut self,
        site_key: &str,
        ip: &str,
        user_agent: &str,
    ) -> Option<Session> {
        let key = self.api_key_by_site_key(site_key)?;
        if key.usage.month == current_month() {
            if let Some(quota) = key.plan.monthly_quota() {
                if key.usage.count >= quota {
                    return None;
                }
            }
        }

        let now = Utc::now();
        let session = Session {
            id: generate_id("ses_"),
            site_key: site_key.to_string(),
            status: SessionStatus::Pending,
            score: 0.0,
            channels: ChannelScores::default(),
            is_human: false,
            token: String::new(),
            created_at: now,
            completed_at: None,
            expires_at: now + Duration::minutes(SESSION_TTL_MINUTES),
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
        };
        self.sessions.insert(session.id.clone(), session.clone());
        self.increment_usage(site_key);
        Some(session)
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).cloned()
    }

    /// Finalize a session with the client-computed score and channel scores.
    ///
    /// Trust boundary: the score is accepted as submitted and not recomputed
    /// from raw samples. A verification token is minted only when the score
    /// clears [`HUMAN_THRESHOLD`].
    pub fn complete_session(
        &mut self,
        id: &str,
        score: f64,
        channels: ChannelScores,
    ) -> Option<Session> {
        let now = Utc::now();
        let snapshot = {
            let session = self.sessions.get_mut(id)?;
            session.status = SessionStatus::Completed;
            session.score = score;
            session.channels = channels;
            session.is_human = score >= HUMAN_THRESHOLD;
            session.completed_at = Some(now);
            if session.is_human {
                session.token = mint_session_token(id, score, now);
            }
            session.clone()
        };
        self.audit_event(
            AuditEventType::VerificationCompleted,
            None,
            None,
            Some(id),
            None,
            json!({ "score": score, "is_human": snapshot.is_human }),
            &snapshot.ip,
        );
        Some(snapshot)
    }

    /// Look up a session by its verification token. Sessions past their
    /// expiry are marked expired and report invalid.
    pub fn verify_token(&mut self, token: &str) -> TokenVerification {
        if token.is_empty() {
            return TokenVerification {
                valid: false,
                session: None,
            };
        }
        let now = Utc::now();
        let found = self
            .sessions
            .values_mut()
            .find(|s| !s.token.is_empty() && s.token == token);
        match found {
            Some(session) if session.expires_at < now => {
                session.status = SessionStatus::Expired;
                TokenVerification {
                    valid: false,
                    session: None,
                }
            }
            Some(session) => TokenVerification {
                valid: true,
                session: Some(session.clone()),
            },
            None => TokenVerification {
                valid: false,
                session: None,
            },
        }
    }

    // ===== Human tokens =====

    /// Issue a human token from a completed session. Returns None unless the
    /// session exists and verified as human. Issuing for a user who already
    /// holds an active token refreshes that token instead of minting a
    /// duplicate.
    pub fn issue_token(
        &mut self,
        session_id: &str,
        user_id: &str,
        device_fingerprint: &str,
    ) -> Option<HumanToken> {
        let session = self.session(session_id)?;
        if !session.is_human {
            return None;
        }

        if let Some(existing_id) = self.user_token_index.get(user_id).cloned() {
            if let Some(existing) = self.tokens.get(&existing_id) {
                if existing.status == TokenStatus::Active {
                    return self.refresh_token(&existing_id);
                }
            }
        }

        let now = Utc::now();
        let token = HumanToken {
            id: generate_id("htk_"),
            user_id: user_id.to_string(),
            status: TokenStatus::Active,
            score: session.score,
            issued_at: now,
            expires_at: now + Duration::days(TOKEN_TTL_DAYS),
            refreshed_at: now,
            refresh_count: 0,
            device_fingerprint: device_fingerprint.to_string(),
            session_ids: vec![session_id.to_string()],
            metadata: TokenMetadata {
                user_agent: session.user_agent.clone(),
                ip: session.ip.clone(),
                verification_count: 1,
            },
        };
        self.tokens.insert(token.id.clone(), token.clone());
        self.user_token_index
            .insert(user_id.to_string(), token.id.clone());
        self.token_delegations.insert(token.id.clone(), Vec::new());
        self.audit_event(
            AuditEventType::TokenIssued,
            Some(&token.id),
            None,
            Some(session_id),
            None,
            json!({ "score": session.score, "user_id": user_id }),
            &session.ip,
        );
        Some(token)
    }

    /// Read a token, lazily expiring it if its lifetime has passed.
    pub fn token(&mut self, id: &str) -> Option<HumanToken> {
        let now = Utc::now();
        let token = self.tokens.get_mut(id)?;
        if token.status == TokenStatus::Active && token.expires_at < now {
            token.status = TokenStatus::Expired;
        }
        Some(token.clone())
    }

    pub fn token_by_user(&mut self, user_id: &str) -> Option<HumanToken> {
        let id = self.user_token_index.get(user_id)?.clone();
        self.token(&id)
    }

    /// Extend an active token by another full lifetime. Fails on any other
    /// status.
    pub fn refresh_token(&mut self, id: &str) -> Option<HumanToken> {
        let snapshot = {
            let token = self.tokens.get_mut(id)?;
            if token.status != TokenStatus::Active {
                return None;
            }
            let now = Utc::now();
            token.refreshed_at = now;
            token.expires_at = now + Duration::days(TOKEN_TTL_DAYS);
            token.refresh_count += 1;
            token.clone()
        };
        self.audit_event(
            AuditEventType::TokenRefreshed,
            Some(id),
            None,
            None,
            None,
            json!({ "refresh_count": snapshot.refresh_count }),
            "",
        );
        Some(snapshot)
    }

    /// Revoke a token and cascade to every delegation it owns. Returns the
    /// number of delegations revoked, or None if the token is unknown.
    pub fn revoke_token(&mut self, id: &str) -> Option<usize> {
        {
            let token = self.tokens.get_mut(id)?;
            token.status = TokenStatus::Revoked;
        }
        let owned = self.token_delegations.get(id).cloned().unwrap_or_default();
        for delegation_id in &owned {
            self.revoke_delegation(delegation_id);
        }
        self.audit_event(
            AuditEventType::TokenRevoked,
            Some(id),
            None,
            None,
            None,
            json!({ "revoked_delegations": owned.len() }),
            "",
        );
        Some(owned.len())
    }

    pub fn list_tokens(&self) -> Vec<HumanToken> {
        self.tokens.values().cloned().collect()
    }

    // ===== Delegations =====

    /// Grant an agent a scoped delegation under an active human token.
    pub fn create_delegation(
        &mut self,
        human_token_id: &str,
        agent_id: &str,
        agent_name: &str,
        agent_platform: &str,
        scopes: Vec<DelegationScope>,
        constraints: ConstraintRequest,
    ) -> Option<Delegation> {
        let token = self.token(human_token_id)?;
        if token.status != TokenStatus::Active {
            return None;
        }

        let now = Utc::now();
        let duration = constraints
            .duration_minutes
            .unwrap_or(DEFAULT_DELEGATION_MINUTES);
        let delegation = Delegation {
            id: generate_id("del_"),
            human_token_id: human_token_id.to_string(),
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            agent_platform: agent_platform.to_string(),
            status: DelegationStatus::Active,
            scopes,
            constraints: DelegationConstraints {
                max_actions: constraints.max_actions.unwrap_or(DEFAULT_MAX_ACTIONS),
                actions_used: 0,
                max_spend: constraints.max_spend,
                spent_amount: 0.0,
                allowed_domains: constraints
                    .allowed_domains
                    .unwrap_or_else(|| vec!["*".to_string()]),
                ip_whitelist: constraints.ip_whitelist.unwrap_or_default(),
            },
            created_at: now,
            expires_at: now + Duration::minutes(duration),
            revoked_at: None,
            last_used_at: None,
        };
        self.delegations
            .insert(delegation.id.clone(), delegation.clone());
        self.token_delegations
            .entry(human_token_id.to_string())
            .or_default()
            .push(delegation.id.clone());
        self.audit_event(
            AuditEventType::DelegationCreated,
            Some(human_token_id),
            Some(&delegation.id),
            None,
            Some(agent_id),
            json!({
                "agent_name": agent_name,
                "agent_platform": agent_platform,
                "max_actions": delegation.constraints.max_actions,
                "max_spend": delegation.constraints.max_spend,
            }),
            "",
        );
        Some(delegation)
    }

    /// Read a delegation, lazily expiring it (and auditing the expiry) if its
    /// window has passed.
    pub fn delegation(&mut self, id: &str) -> Option<Delegation> {
        let now = Utc::now();
        let (snapshot, expired) = {
            let delegation = self.delegations.get_mut(id)?;
            let expired =
                delegation.status == DelegationStatus::Active && delegation.expires_at < now;
            if expired {
                delegation.status = DelegationStatus::Expired;
            }
            (delegation.clone(), expired)
        };
        if expired {
            self.audit_event(
                AuditEventType::DelegationExpired,
                Some(&snapshot.human_token_id),
                Some(id),
                None,
                Some(&snapshot.agent_id),
                json!({}),
                "",
            );
        }
        Some(snapshot)
    }

    /// Authorize one agent action under a delegation.
    ///
    /// Checks run in a fixed order, each denial short-circuiting and audited
    /// separately: existence and active status, parent token validity, action
    /// budget (which flips the delegation to exhausted when spent), domain
    /// allowlist, then spend ceiling. A successful check consumes one action,
    /// records any spend, and stamps the usage time.
    pub fn verify_delegation(
        &mut self,
        id: &str,
        action: &str,
        domain: Option<&str>,
        amount: Option<f64>,
    ) -> DelegationDecision {
        let Some(delegation) = self.delegation(id) else {
            return DelegationDecision::denied("Delegation not found");
        };
        if delegation.status != DelegationStatus::Active {
            return DelegationDecision::denied(format!("Delegation {}", delegation.status));
        }

        let token = match self.token(&delegation.human_token_id) {
            Some(t) if t.status == TokenStatus::Active => t,
            _ => return DelegationDecision::denied("Human token invalid"),
        };

        if delegation.constraints.actions_used >= delegation.constraints.max_actions {
            if let Some(d) = self.delegations.get_mut(id) {
                d.status = DelegationStatus::Exhausted;
            }
            self.audit_blocked(&delegation, json!({ "reason": "action_limit" }));
            return DelegationDecision::denied("Action limit reached");
        }

        if let Some(domain) = domain {
            let allowed = delegation
                .constraints
                .allowed_domains
                .iter()
                .any(|d| d == "*" || d == domain);
            if !allowed {
                self.audit_blocked(
                    &delegation,
                    json!({ "reason": "domain_blocked", "domain": domain }),
                );
                return DelegationDecision::denied("Domain not allowed");
            }
        }

        if let (Some(amount), Some(max_spend)) = (amount, delegation.constraints.max_spend) {
            if delegation.constraints.spent_amount + amount > max_spend {
                self.audit_blocked(
                    &delegation,
                    json!({ "reason": "spend_limit", "amount": amount }),
                );
                return DelegationDecision::denied("Spend limit exceeded");
            }
        }

        let now = Utc::now();
        let snapshot = {
            let Some(d) = self.delegations.get_mut(id) else {
                return DelegationDecision::denied("Delegation not found");
            };
            if let Some(amount) = amount {
                d.constraints.spent_amount += amount;
            }
            d.constraints.actions_used += 1;
            d.last_used_at = Some(now);
            d.clone()
        };
        self.audit_event(
            AuditEventType::AgentAction,
            Some(&snapshot.human_token_id),
            Some(id),
            None,
            Some(&snapshot.agent_id),
            json!({ "action": action, "domain": domain, "amount": amount }),
            "",
        );
        DelegationDecision {
            authorized: true,
            reason: None,
            delegation: Some(snapshot),
            human_token: Some(token),
        }
    }

    fn audit_blocked(&mut self, delegation: &Delegation, details: Value) {
        self.audit_event(
            AuditEventType::AgentBlocked,
            Some(&delegation.human_token_id),
            Some(&delegation.id),
            None,
            Some(&delegation.agent_id),
            details,
            "",
        );
    }

    pub fn revoke_delegation(&mut self, id: &str) -> bool {
        let snapshot = {
            let Some(delegation) = self.delegations.get_mut(id) else {
                return false;
            };
            delegation.status = DelegationStatus::Revoked;
            delegation.revoked_at = Some(Utc::now());
            delegation.clone()
        };
        self.audit_event(
            AuditEventType::DelegationRevoked,
            Some(&snapshot.human_token_id),
            Some(id),
            None,
            Some(&snapshot.agent_id),
            json!({}),
            "",
        );
        true
    }

    pub fn list_delegations(&self, human_token_id: Option<&str>) -> Vec<Delegation> {
        self.delegations
            .values()
            .filter(|d| human_token_id.map_or(true, |id| d.human_token_id == id))
            .cloned()
            .collect()
    }

    // ===== Audit and stats =====

    pub fn audit_entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.audit.query(filter)
    }

    pub fn stats(&self) -> StoreStats {
        let completed: Vec<&Session> = self
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Completed)
            .collect();
        let avg_score = if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|s| s.score).sum::<f64>() / completed.len() as f64
        };
        StoreStats {
            total_keys: self.api_keys.len(),
            total_sessions: self.sessions.len(),
            completed_sessions: completed.len(),
            human_verified: self.sessions.values().filter(|s| s.is_human).count(),
            avg_score,
            active_tokens: self
                .tokens
                .values()
                .filter(|t| t.status == TokenStatus::Active)
                .count(),
            total_tokens: self.tokens.len(),
            active_delegations: self
                .delegations
                .values()
                .filter(|d| d.status == DelegationStatus::Active)
                .count(),
            total_delegations: self.delegations.len(),
            total_agent_actions: self.audit.count_of(AuditEventType::AgentAction),
            blocked_agent_actions: self.audit.count_of(AuditEventType::AgentBlocked),
            total_audit_entries: self.audit.len(),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque verification token: a prefixed base64 payload of session id,
/// rounded score, mint time, and a random nonce. Nothing parses this back.
fn mint_session_token(session_id: &str, score: f64, now: DateTime<Utc>) -> String {
    let payload = json!({
        "sid": session_id,
        "s": (score * 1000.0).round() as i64,
        "t": now.timestamp_millis(),
        "r": Uuid::new_v4().simple().to_string(),
    });
    format!("hsg_tok_{}", URL_SAFE_NO_PAD.encode(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_key_seeded() {
        let store = Store::new();
        let key = store.api_key_by_site_key(DEMO_SITE_KEY).unwrap();
        assert_eq!(key.plan, Plan::Free);
        assert!(store.api_key_by_secret_key(DEMO_SECRET_KEY).is_some());
    }

    #[test]
    fn test_create_api_key_indexes_both_keys() {
        let mut store = Store::new();
        let key = store.create_api_key("Acme", "acme.test");
        assert!(key.site_key.starts_with("hsg_live_"));
        assert!(key.secret_key.starts_with("hsg_secret_"));
        assert_eq!(
            store.api_key_by_site_key(&key.site_key).unwrap().id,
            key.id
        );
        assert_eq!(
            store.api_key_by_secret_key(&key.secret_key).unwrap().id,
            key.id
        );
    }

    #[test]
    fn test_session_usage_counted() {
        let mut store = Store::new();
        store
            .create_session(DEMO_SITE_KEY, "127.0.0.1", "test-agent")
            .unwrap();
        let key = store.api_key_by_site_key(DEMO_SITE_KEY).unwrap();
        assert_eq!(key.usage.count, 1);
    }

    #[test]
    fn test_generate_id_prefix_and_uniqueness() {
        let a = generate_id("ses_");
        let b = generate_id("ses_");
        assert!(a.starts_with("ses_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_token_is_opaque_and_prefixed() {
        let token = mint_session_token("ses_abc", 0.87, Utc::now());
        assert!(token.starts_with("hsg_tok_"));
        // The payload decodes but nothing in the system relies on that
        let decoded = URL_SAFE_NO_PAD
            .decode(token.trim_start_matches("hsg_tok_"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["s"], 870);
    }
}
