//! Append-only action history entries.

use crate::domain::{AccountId, PoolName, TimeMs};
use serde::{Deserialize, Serialize};

/// Kind of economically meaningful step recorded in a pool's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Swap,
    Deposit,
    Withdraw,
    Rebalance,
    Buy,
    Sell,
    AiCall,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Swap => "SWAP",
            ActionKind::Deposit => "DEPOSIT",
            ActionKind::Withdraw => "WITHDRAW",
            ActionKind::Rebalance => "REBALANCE",
            ActionKind::Buy => "BUY",
            ActionKind::Sell => "SELL",
            ActionKind::AiCall => "AI_CALL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SWAP" => Some(ActionKind::Swap),
            "DEPOSIT" => Some(ActionKind::Deposit),
            "WITHDRAW" => Some(ActionKind::Withdraw),
            "REBALANCE" => Some(ActionKind::Rebalance),
            "BUY" => Some(ActionKind::Buy),
            "SELL" => Some(ActionKind::Sell),
            "AI_CALL" => Some(ActionKind::AiCall),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who performed an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Actor {
    /// The settlement engine itself (swaps, rebalances).
    Platform,
    /// A depositor or redeemer.
    Account(AccountId),
    /// A human operator issuing trades.
    Operator(String),
    /// An automated recommender whose decision was replayed as a trade.
    Recommender(String),
}

impl Default for Actor {
    fn default() -> Self {
        Actor::Platform
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Platform => write!(f, "Platform"),
            Actor::Account(id) => write!(f, "{}", id),
            Actor::Operator(name) => write!(f, "operator:{}", name),
            Actor::Recommender(name) => write!(f, "recommender:{}", name),
        }
    }
}

/// One audit entry. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Deterministic key so a retried write is stored once.
    pub action_key: String,
    pub pool: PoolName,
    pub kind: ActionKind,
    pub actor: Actor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub details: serde_json::Value,
    pub timestamp: TimeMs,
}

impl ActionRecord {
    pub fn new(
        pool: PoolName,
        kind: ActionKind,
        actor: Actor,
        job_id: Option<&str>,
        step: u32,
        details: serde_json::Value,
    ) -> Self {
        let timestamp = TimeMs::now();
        let action_key = Self::compute_action_key(&pool, kind, job_id, step, timestamp);
        Self {
            action_key,
            pool,
            kind,
            actor,
            job_id: job_id.map(str::to_string),
            details,
            timestamp,
        }
    }

    /// Key derived from (pool, job, kind, step). Actions outside a job also
    /// mix in the timestamp, since there is nothing else to dedupe on.
    pub fn compute_action_key(
        pool: &PoolName,
        kind: ActionKind,
        job_id: Option<&str>,
        step: u32,
        timestamp: TimeMs,
    ) -> String {
        use sha2::{Digest, Sha256};

        fn hash_var(hasher: &mut Sha256, data: &str) {
            hasher.update((data.len() as u32).to_le_bytes());
            hasher.update(data.as_bytes());
        }

        let mut hasher = Sha256::new();
        hash_var(&mut hasher, pool.as_str());
        hash_var(&mut hasher, kind.as_str());
        hasher.update(step.to_le_bytes());
        match job_id {
            Some(id) => hash_var(&mut hasher, id),
            None => hasher.update(timestamp.as_ms().to_le_bytes()),
        }

        let hash = hasher.finalize();
        format!("act:{}", hex::encode(&hash[..16]))
    }
}
