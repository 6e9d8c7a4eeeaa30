//! HTTP bridge to the external share ledger.
//!
//! The bridge fronts the pool's fungible-token contract: it reports supply
//! and balances, fulfills deposit IOUs by minting, and fulfills withdrawal
//! IOUs by burning the escrowed shares and releasing native currency.

use super::http::send_json;
use super::{GatewayError, LedgerGateway};
use crate::domain::{AccountId, Decimal, PoolName};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpLedgerGateway {
    client: Client,
    base_url: String,
    share_decimals: u32,
    native_decimals: u32,
}

impl HttpLedgerGateway {
    pub fn new(base_url: String, share_decimals: u32, native_decimals: u32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            share_decimals,
            native_decimals,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_amount(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Decimal, GatewayError> {
        let body = send_json(
            self.client
                .get(self.url(path))
                .query(query)
                .timeout(REQUEST_TIMEOUT),
        )
        .await?;
        parse_amount(&body)
    }

    async fn post(&self, path: &str, payload: serde_json::Value) -> Result<(), GatewayError> {
        let body = send_json(
            self.client
                .post(self.url(path))
                .json(&payload)
                .timeout(REQUEST_TIMEOUT),
        )
        .await?;
        if body.get("success").and_then(|v| v.as_bool()) == Some(false) {
            let reason = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("ledger refused request")
                .to_string();
            return Err(GatewayError::Rejected(reason));
        }
        Ok(())
    }
}

/// Amounts come back as `{"amount": "123.45"}`.
fn parse_amount(body: &serde_json::Value) -> Result<Decimal, GatewayError> {
    let raw = body
        .get("amount")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::Parse("Missing amount field".to_string()))?;
    Decimal::from_str_canonical(raw)
        .map_err(|e| GatewayError::Parse(format!("Invalid amount: {}", e)))
}

#[async_trait]
impl LedgerGateway for HttpLedgerGateway {
    async fn total_shares_outstanding(&self, pool: &PoolName) -> Result<Decimal, GatewayError> {
        debug!(pool = %pool, "Fetching total share supply");
        self.get_amount("/ft_total_supply", &[("pool", pool.as_str())])
            .await
    }

    async fn mint_shares(
        &self,
        pool: &PoolName,
        request_ref: &str,
        account: &AccountId,
        shares: Decimal,
    ) -> Result<(), GatewayError> {
        info!(pool = %pool, request_ref, account = %account, shares = %shares, "Fulfilling deposit IOU");
        self.post(
            "/fulfill_deposit_iou",
            serde_json::json!({
                "pool": pool,
                "iou_id": request_ref,
                "account_id": account,
                "amount": shares,
                "decimals": self.share_decimals,
            }),
        )
        .await
    }

    async fn burn_and_release(
        &self,
        pool: &PoolName,
        request_ref: &str,
        account: &AccountId,
        native_amount: Decimal,
    ) -> Result<(), GatewayError> {
        info!(pool = %pool, request_ref, account = %account, amount = %native_amount, "Fulfilling withdraw IOU");
        self.post(
            "/fulfill_withdraw_iou",
            serde_json::json!({
                "pool": pool,
                "iou_id": request_ref,
                "account_id": account,
                "amount": native_amount,
                "decimals": self.native_decimals,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        let amount = parse_amount(&serde_json::json!({"amount": "1050.5"})).unwrap();
        assert_eq!(amount.to_string(), "1050.5");
    }

    #[test]
    fn test_parse_amount_missing_field() {
        let err = parse_amount(&serde_json::json!({"supply": "1"})).unwrap_err();
        assert!(matches!(err, GatewayError::Parse(_)));
    }

    #[test]
    fn test_parse_amount_rejects_number() {
        let err = parse_amount(&serde_json::json!({"amount": 1.5})).unwrap_err();
        assert!(!err.is_transient());
    }
}
