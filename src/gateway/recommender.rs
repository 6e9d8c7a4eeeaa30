//! HTTP client for the trading recommender agent.

use super::http::send_json;
use super::{Decision, GatewayError, Recommendation, RecommendationContext, Recommender};
use crate::domain::{AssetSymbol, Decimal};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct HttpRecommender {
    client: Client,
    url: String,
    name: String,
    auth_token: Option<String>,
}

impl HttpRecommender {
    pub fn new(url: String, name: String, auth_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            name,
            auth_token,
        }
    }
}

/// Agent reply: `{"operation": "BUY", "asset": "Yes", "amount": "10", "log_url": "..."}`.
#[derive(Debug, Deserialize)]
struct AgentReply {
    operation: String,
    #[serde(default)]
    asset: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    log_url: Option<String>,
}

fn parse_reply(reply: AgentReply) -> Result<Recommendation, GatewayError> {
    let decision = match reply.operation.to_ascii_uppercase().as_str() {
        "BUY" => Decision::Buy,
        "SELL" => Decision::Sell,
        "HOLD" | "NONE" => Decision::Hold,
        other => {
            return Err(GatewayError::Parse(format!(
                "Unknown recommender operation: {}",
                other
            )))
        }
    };
    let quantity = reply
        .amount
        .as_deref()
        .map(Decimal::from_str_canonical)
        .transpose()
        .map_err(|e| GatewayError::Parse(format!("Invalid amount: {}", e)))?;

    Ok(Recommendation {
        decision,
        asset: reply.asset.map(AssetSymbol::new),
        quantity,
        log_url: reply.log_url,
    })
}

#[async_trait]
impl Recommender for HttpRecommender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn recommend(
        &self,
        context: &RecommendationContext,
    ) -> Result<Recommendation, GatewayError> {
        info!(pool = %context.pool, recommender = %self.name, "Requesting recommendation");
        let payload = serde_json::json!({
            "url": context.market_url,
            "holdings": context.holdings,
            "usdc_available": context.cash_available,
        });
        let mut request = self
            .client
            .post(&self.url)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let body = send_json(request).await?;
        let reply: AgentReply =
            serde_json::from_value(body).map_err(|e| GatewayError::Parse(e.to_string()))?;
        parse_reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(value: serde_json::Value) -> AgentReply {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_buy() {
        let rec = parse_reply(reply(serde_json::json!({
            "operation": "BUY", "asset": "Yes", "amount": "12.5"
        })))
        .unwrap();
        assert_eq!(rec.decision, Decision::Buy);
        assert_eq!(rec.asset, Some(AssetSymbol::new("Yes")));
        assert_eq!(rec.quantity.unwrap().to_string(), "12.5");
    }

    #[test]
    fn test_parse_hold_without_target() {
        let rec = parse_reply(reply(serde_json::json!({"operation": "hold"}))).unwrap();
        assert_eq!(rec.decision, Decision::Hold);
        assert!(rec.quantity.is_none());
    }

    #[test]
    fn test_parse_unknown_operation() {
        let err = parse_reply(reply(serde_json::json!({"operation": "SHORT"}))).unwrap_err();
        assert!(matches!(err, GatewayError::Parse(_)));
    }
}
