//! HTTP client for the remote pool record store.
//!
//! The store exposes pools, market prices, the action history and the job
//! queue as JSON endpoints. Amounts travel as decimal strings.

use super::{ActionLog, GatewayError, JobQueue, PoolStore, QuoteSource};
use crate::domain::{
    ActionRecord, AssetSymbol, Decimal, Holdings, JobAction, JobStatus, Pool, PoolName, Quote,
    QuoteBook, RawJob,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the pool API (`/api/pool`, `/api/actions`, `/api/jobs`, ...).
#[derive(Debug, Clone)]
pub struct PoolApiClient {
    client: Client,
    base_url: String,
}

impl PoolApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<serde_json::Value, GatewayError> {
        send_json(request.timeout(REQUEST_TIMEOUT)).await
    }
}

/// Send a request and classify the outcome the same way for every client:
/// connection failures, 429 and 5xx are transient, other non-2xx and bad
/// bodies are permanent.
pub(crate) async fn send_json(request: RequestBuilder) -> Result<serde_json::Value, GatewayError> {
    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::Network(e.to_string()))?;

    let status = response.status();
    if status.as_u16() == 429 {
        return Err(GatewayError::RateLimited);
    }
    if status.as_u16() == 404 {
        return Err(GatewayError::NotFound(response.text().await.unwrap_or_default()));
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(GatewayError::Http {
            status: status.as_u16(),
            message,
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::Network(e.to_string()))?;
    if body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| GatewayError::Parse(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct PoolResponse {
    name: String,
    #[serde(default)]
    holdings: Option<Holdings>,
}

#[async_trait]
impl PoolStore for PoolApiClient {
    async fn get_pool(&self, pool: &PoolName) -> Result<Pool, GatewayError> {
        debug!(pool = %pool, "Fetching pool");
        let body = self
            .send(
                self.client
                    .get(self.url("/api/pool"))
                    .query(&[("name", pool.as_str())]),
            )
            .await?;
        let parsed: PoolResponse =
            serde_json::from_value(body).map_err(|e| GatewayError::Parse(e.to_string()))?;
        Ok(Pool::new(
            PoolName::new(parsed.name),
            parsed.holdings.unwrap_or_default(),
        ))
    }

    async fn replace_pool_holdings(
        &self,
        pool: &PoolName,
        holdings: &Holdings,
    ) -> Result<(), GatewayError> {
        debug!(pool = %pool, assets = holdings.len(), "Replacing pool holdings");
        let payload = serde_json::json!({
            "poolName": pool,
            "holdings": holdings,
        });
        self.send(self.client.post(self.url("/api/pool/holdings")).json(&payload))
            .await?;
        Ok(())
    }

    async fn add_holding(
        &self,
        pool: &PoolName,
        asset: &AssetSymbol,
        delta: Decimal,
        cost_basis: Option<Decimal>,
    ) -> Result<(), GatewayError> {
        debug!(pool = %pool, asset = %asset, delta = %delta, "Adding to pool holding");
        let mut payload = serde_json::json!({
            "poolName": pool,
            "assetName": asset,
            "amount": delta,
        });
        if let Some(basis) = cost_basis {
            payload["costBasis"] = serde_json::to_value(basis)
                .map_err(|e| GatewayError::Parse(e.to_string()))?;
        }
        self.send(
            self.client
                .post(self.url("/api/add_pool_holdings"))
                .json(&payload),
        )
        .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    bid: Option<String>,
    ask: Option<String>,
}

#[async_trait]
impl QuoteSource for PoolApiClient {
    async fn get_quotes(
        &self,
        pool: &PoolName,
        assets: &[AssetSymbol],
    ) -> Result<QuoteBook, GatewayError> {
        debug!(pool = %pool, assets = assets.len(), "Fetching market prices");
        let body = self
            .send(
                self.client
                    .get(self.url("/api/market_prices"))
                    .query(&[("pool", pool.as_str())]),
            )
            .await?;
        let raw: HashMap<String, RawQuote> =
            serde_json::from_value(body).map_err(|e| GatewayError::Parse(e.to_string()))?;
        Ok(parse_quotes(raw, assets))
    }
}

/// Keep only the requested assets with both sides quoted. One-sided or
/// unparsable quotes are dropped so the engine reports them as missing.
fn parse_quotes(raw: HashMap<String, RawQuote>, assets: &[AssetSymbol]) -> QuoteBook {
    let mut book = QuoteBook::new();
    for asset in assets {
        let Some(quote) = raw.get(asset.as_str()) else {
            continue;
        };
        let bid = quote.bid.as_deref().map(Decimal::from_str_canonical);
        let ask = quote.ask.as_deref().map(Decimal::from_str_canonical);
        match (bid, ask) {
            (Some(Ok(bid)), Some(Ok(ask))) => book.insert(asset.clone(), Quote::new(bid, ask)),
            _ => warn!(asset = %asset, "Dropping incomplete quote"),
        }
    }
    book
}

#[async_trait]
impl ActionLog for PoolApiClient {
    async fn record_action(&self, record: &ActionRecord) -> Result<(), GatewayError> {
        let payload = serde_json::json!({
            "actionKey": record.action_key,
            "action": record.kind,
            "by": record.actor.to_string(),
            "details": record.details,
            "poolName": record.pool,
            "jobId": record.job_id,
            "timestamp": record.timestamp.as_ms(),
        });
        self.send(self.client.post(self.url("/api/actions")).json(&payload))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PoolApiClient {
    async fn fetch_pending(&self) -> Result<Vec<RawJob>, GatewayError> {
        let body = self.send(self.client.get(self.url("/api/jobs"))).await?;
        let values = body
            .as_array()
            .ok_or_else(|| GatewayError::Parse("Expected array response".to_string()))?;

        let mut jobs = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_value::<RawJob>(value.clone()) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(error = %e, "Failed to parse job"),
            }
        }
        Ok(jobs)
    }

    async fn report_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: &serde_json::Value,
    ) -> Result<(), GatewayError> {
        let payload = serde_json::json!({
            "jobId": job_id,
            "status": status,
            "details": details,
        });
        self.send(self.client.post(self.url("/api/jobs")).json(&payload))
            .await?;
        Ok(())
    }

    async fn enqueue(&self, pool: &PoolName, action: &JobAction) -> Result<String, GatewayError> {
        let payload = serde_json::json!({
            "poolName": pool,
            "action": action.name(),
            "details": action.details(),
        });
        let body = self
            .send(self.client.post(self.url("/api/queueJob")).json(&payload))
            .await?;
        body.get("jobId")
            .and_then(|v| {
                v.as_str()
                    .map(str::to_string)
                    .or_else(|| v.as_i64().map(|n| n.to_string()))
            })
            .ok_or_else(|| GatewayError::Parse("Missing jobId in queue response".to_string()))
    }
}
