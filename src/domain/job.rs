//! Queued jobs and their validated, per-action payloads.

use crate::domain::{AccountId, Actor, AssetSymbol, Decimal, PoolName};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a job as reported back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Complete,
    Failed,
    /// Retries against an external service were exhausted mid-job. Needs an
    /// operator to reconcile before the job is retried or closed.
    Stuck,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Stuck => "stuck",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "complete" => Some(JobStatus::Complete),
            "failed" => Some(JobStatus::Failed),
            "stuck" => Some(JobStatus::Stuck),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job as it sits in the queue, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawJob {
    pub id: String,
    pub action: String,
    pub pool_name: String,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default = "default_status")]
    pub status: JobStatus,
}

fn default_status() -> JobStatus {
    JobStatus::Pending
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    /// Ledger-side reference of the escrowed deposit, used for idempotency.
    pub request_ref: String,
    pub account: AccountId,
    /// Deposited amount of the native settlement currency.
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub request_ref: String,
    pub account: AccountId,
    /// Shares to redeem.
    pub shares: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub asset: AssetSymbol,
    pub quantity: Decimal,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_url: Option<String>,
}

/// Validated job payload. Each variant carries only what its action needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobAction {
    Deposit(DepositRequest),
    Withdraw(WithdrawRequest),
    Buy(TradeRequest),
    Sell(TradeRequest),
    Recommend(RecommendRequest),
}

impl JobAction {
    /// Parse and validate a payload for the named action.
    pub fn parse(action: &str, details: &serde_json::Value) -> Result<Self, JobParseError> {
        let parsed = match action.to_ascii_lowercase().as_str() {
            "deposit" | "fulfilldeposit" => JobAction::Deposit(from_details(action, details)?),
            "withdraw" | "fulfillwithdraw" => JobAction::Withdraw(from_details(action, details)?),
            "buy" => JobAction::Buy(from_details(action, details)?),
            "sell" => JobAction::Sell(from_details(action, details)?),
            "recommend" | "runai" => {
                if details.is_null() {
                    JobAction::Recommend(RecommendRequest::default())
                } else {
                    JobAction::Recommend(from_details(action, details)?)
                }
            }
            _ => return Err(JobParseError::UnknownAction(action.to_string())),
        };
        parsed.validate(action)?;
        Ok(parsed)
    }

    fn validate(&self, action: &str) -> Result<(), JobParseError> {
        match self {
            JobAction::Deposit(req) => {
                require_positive(action, "amount", req.amount)?;
                require_non_empty(action, "request_ref", &req.request_ref)?;
                require_non_empty(action, "account", req.account.as_str())
            }
            JobAction::Withdraw(req) => {
                require_positive(action, "shares", req.shares)?;
                require_non_empty(action, "request_ref", &req.request_ref)?;
                require_non_empty(action, "account", req.account.as_str())
            }
            JobAction::Buy(req) | JobAction::Sell(req) => {
                require_positive(action, "quantity", req.quantity)?;
                require_non_empty(action, "asset", req.asset.as_str())
            }
            JobAction::Recommend(_) => Ok(()),
        }
    }

    /// Canonical action name used on the queue.
    pub fn name(&self) -> &'static str {
        match self {
            JobAction::Deposit(_) => "deposit",
            JobAction::Withdraw(_) => "withdraw",
            JobAction::Buy(_) => "buy",
            JobAction::Sell(_) => "sell",
            JobAction::Recommend(_) => "recommend",
        }
    }

    pub fn details(&self) -> serde_json::Value {
        let value = match self {
            JobAction::Deposit(req) => serde_json::to_value(req),
            JobAction::Withdraw(req) => serde_json::to_value(req),
            JobAction::Buy(req) | JobAction::Sell(req) => serde_json::to_value(req),
            JobAction::Recommend(req) => serde_json::to_value(req),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// A validated job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub pool: PoolName,
    pub action: JobAction,
}

impl TryFrom<RawJob> for Job {
    type Error = JobParseError;

    fn try_from(raw: RawJob) -> Result<Self, Self::Error> {
        if raw.pool_name.trim().is_empty() {
            return Err(JobParseError::Malformed {
                action: raw.action,
                reason: "poolName must not be empty".to_string(),
            });
        }
        let action = JobAction::parse(&raw.action, &raw.details)?;
        Ok(Job {
            id: raw.id,
            pool: PoolName::new(raw.pool_name),
            action,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobParseError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("malformed {action} details: {reason}")]
    Malformed { action: String, reason: String },
}

impl JobParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            JobParseError::UnknownAction(_) => "unknown_action",
            JobParseError::Malformed { .. } => "malformed",
        }
    }
}

fn from_details<T: serde::de::DeserializeOwned>(
    action: &str,
    details: &serde_json::Value,
) -> Result<T, JobParseError> {
    serde_json::from_value(details.clone()).map_err(|e| JobParseError::Malformed {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

/// Largest amount, share count or quantity a job may carry. Keeps every
/// product the engine forms (amount × rate, quantity × price) well inside
/// the decimal range.
pub const MAX_JOB_AMOUNT: u64 = 1_000_000_000_000_000;

fn require_positive(action: &str, field: &str, value: Decimal) -> Result<(), JobParseError> {
    if !value.is_positive() {
        return Err(JobParseError::Malformed {
            action: action.to_string(),
            reason: format!("{} must be > 0, got {}", field, value),
        });
    }
    if value > Decimal::from_u64(MAX_JOB_AMOUNT) {
        return Err(JobParseError::Malformed {
            action: action.to_string(),
            reason: format!("{} must be at most {}, got {}", field, MAX_JOB_AMOUNT, value),
        });
    }
    Ok(())
}

fn require_non_empty(action: &str, field: &str, value: &str) -> Result<(), JobParseError> {
    if value.trim().is_empty() {
        Err(JobParseError::Malformed {
            action: action.to_string(),
            reason: format!("{} must not be empty", field),
        })
    } else {
        Ok(())
    }
}
