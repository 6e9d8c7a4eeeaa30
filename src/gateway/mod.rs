//! Interfaces to the services the settlement engine depends on.
//!
//! The engine never talks to a network or database directly. Each
//! collaborator is an object-safe async trait so production clients and
//! in-memory doubles are interchangeable.

use crate::domain::{
    AccountId, ActionRecord, AssetSymbol, Decimal, Holdings, JobAction, JobStatus, Pool,
    PoolName, QuoteBook, RawJob,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod conversion;
pub mod http;
pub mod ledger;
pub mod mock;
pub mod recommender;

pub use conversion::FixedRateConverter;
pub use http::PoolApiClient;
pub use ledger::HttpLedgerGateway;
pub use recommender::HttpRecommender;

/// Durable holder of pool holdings.
#[async_trait]
pub trait PoolStore: Send + Sync + fmt::Debug {
    /// Fetch a pool. Unknown pools come back with empty holdings.
    async fn get_pool(&self, pool: &PoolName) -> Result<Pool, GatewayError>;

    /// Replace the whole holdings map in one write.
    async fn replace_pool_holdings(
        &self,
        pool: &PoolName,
        holdings: &Holdings,
    ) -> Result<(), GatewayError>;

    /// Add `delta` to one asset's amount. `cost_basis`, when given, replaces
    /// the stored basis.
    async fn add_holding(
        &self,
        pool: &PoolName,
        asset: &AssetSymbol,
        delta: Decimal,
        cost_basis: Option<Decimal>,
    ) -> Result<(), GatewayError>;
}

/// Bid/ask feed for the assets a pool holds.
#[async_trait]
pub trait QuoteSource: Send + Sync + fmt::Debug {
    async fn get_quotes(
        &self,
        pool: &PoolName,
        assets: &[AssetSymbol],
    ) -> Result<QuoteBook, GatewayError>;
}

/// Direction of a conversion between the native settlement currency and the
/// pool's cash asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionDirection {
    NativeToCash,
    CashToNative,
}

/// Result of a conversion: amount received in the target currency and the
/// fee charged, expressed in the target currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub received: Decimal,
    pub fee: Decimal,
}

#[async_trait]
pub trait ConversionService: Send + Sync + fmt::Debug {
    async fn convert(
        &self,
        amount: Decimal,
        direction: ConversionDirection,
    ) -> Result<Conversion, GatewayError>;
}

/// External share ledger. Mutating calls are idempotent by `request_ref`, so
/// retrying them after an ambiguous failure is safe.
#[async_trait]
pub trait LedgerGateway: Send + Sync + fmt::Debug {
    async fn total_shares_outstanding(&self, pool: &PoolName) -> Result<Decimal, GatewayError>;

    /// Mint shares to the depositor and mark the deposit request fulfilled.
    async fn mint_shares(
        &self,
        pool: &PoolName,
        request_ref: &str,
        account: &AccountId,
        shares: Decimal,
    ) -> Result<(), GatewayError>;

    /// Release native currency to the redeemer and burn the escrowed shares
    /// of the withdrawal request.
    async fn burn_and_release(
        &self,
        pool: &PoolName,
        request_ref: &str,
        account: &AccountId,
        native_amount: Decimal,
    ) -> Result<(), GatewayError>;
}

/// Append-only audit log.
#[async_trait]
pub trait ActionLog: Send + Sync + fmt::Debug {
    async fn record_action(&self, record: &ActionRecord) -> Result<(), GatewayError>;
}

/// Source of work for the dispatcher and sink for job outcomes.
#[async_trait]
pub trait JobQueue: Send + Sync + fmt::Debug {
    async fn fetch_pending(&self) -> Result<Vec<RawJob>, GatewayError>;

    async fn report_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: &serde_json::Value,
    ) -> Result<(), GatewayError>;

    /// Queue a new job, returning its id.
    async fn enqueue(&self, pool: &PoolName, action: &JobAction) -> Result<String, GatewayError>;
}

/// Input handed to a recommender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecommendationContext {
    pub pool: PoolName,
    pub holdings: Holdings,
    pub cash_available: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

/// A recommender's verdict. `asset` and `quantity` are set for buy/sell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetSymbol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_url: Option<String>,
}

#[async_trait]
pub trait Recommender: Send + Sync + fmt::Debug {
    /// Name recorded as the acting authority on replayed trades.
    fn name(&self) -> &str;

    async fn recommend(
        &self,
        context: &RecommendationContext,
    ) -> Result<Recommendation, GatewayError>;
}

/// The full set of collaborators a settlement engine is built from.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub store: Arc<dyn PoolStore>,
    pub quotes: Arc<dyn QuoteSource>,
    pub conversion: Arc<dyn ConversionService>,
    pub ledger: Arc<dyn LedgerGateway>,
    pub actions: Arc<dyn ActionLog>,
    pub recommender: Option<Arc<dyn Recommender>>,
}

/// Error returned by collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Connection failure, timeout, DNS.
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("rate limited")]
    RateLimited,
    #[error("parse error: {0}")]
    Parse(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The remote side understood the request and refused it.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl GatewayError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Network(_) | GatewayError::RateLimited => true,
            GatewayError::Http { status, .. } => *status >= 500,
            GatewayError::Storage(_) => true,
            GatewayError::Parse(_) | GatewayError::NotFound(_) | GatewayError::Rejected(_) => {
                false
            }
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => GatewayError::NotFound(err.to_string()),
            other => GatewayError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::Network("connection timeout".to_string());
        assert_eq!(err.to_string(), "network error: connection timeout");

        let err = GatewayError::Http {
            status: 429,
            message: "Too many requests".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 429: Too many requests");
    }

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::RateLimited.is_transient());
        assert!(GatewayError::Http {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!GatewayError::Http {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(!GatewayError::Rejected("iou already fulfilled".into()).is_transient());
        assert!(!GatewayError::Parse("bad json".into()).is_transient());
    }

    #[test]
    fn test_recommendation_parses_minimal_hold() {
        let rec: Recommendation =
            serde_json::from_value(serde_json::json!({"decision": "hold"})).unwrap();
        assert_eq!(rec.decision, Decision::Hold);
        assert!(rec.asset.is_none());
    }
}
