use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::domain::{
    ActionRecord, AssetSymbol, Decimal, Holdings, PoolName, Quote, QuoteBook, QuoteSide,
};
use crate::engine::accounting::portfolio_value;
use crate::error::AppError;

const DEFAULT_ACTIONS_LIMIT: u32 = 50;
const MAX_ACTIONS_LIMIT: u32 = 500;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolResponse {
    pub name: PoolName,
    pub holdings: Holdings,
    pub cash: Decimal,
    /// Liquidation value. Absent while any held asset lacks a quote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_bid: Option<Decimal>,
    /// Re-acquisition value, the basis for pricing new shares.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_ask: Option<Decimal>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_quotes: Vec<AssetSymbol>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolsResponse {
    pub pools: Vec<PoolResponse>,
}

async fn summarize(state: &AppState, name: PoolName) -> Result<PoolResponse, AppError> {
    let pool = state.store.get_pool(&name).await?;
    let assets: Vec<AssetSymbol> = pool
        .holdings
        .held_assets()
        .into_iter()
        .filter(|a| !state.policy.is_cash(a))
        .collect();
    let quotes = if assets.is_empty() {
        QuoteBook::new()
    } else {
        state.quotes.get_quotes(&name, &assets).await?
    };

    let missing_quotes: Vec<AssetSymbol> = assets
        .into_iter()
        .filter(|a| quotes.get(a).is_none())
        .collect();
    let (value_bid, value_ask) = if missing_quotes.is_empty() {
        (
            Some(portfolio_value(&pool.holdings, &quotes, QuoteSide::Bid, &state.policy)?),
            Some(portfolio_value(&pool.holdings, &quotes, QuoteSide::Ask, &state.policy)?),
        )
    } else {
        (None, None)
    };

    Ok(PoolResponse {
        cash: pool.holdings.amount(&state.policy.cash_symbol),
        name: pool.name,
        holdings: pool.holdings,
        value_bid,
        value_ask,
        missing_quotes,
    })
}

/// Holdings and valuation of every pool in the local database.
pub async fn list_pools(State(state): State<AppState>) -> Result<Json<PoolsResponse>, AppError> {
    let names = state.repo.list_pools().await?;
    let pools = try_join_all(names.into_iter().map(|name| summarize(&state, name))).await?;
    Ok(Json(PoolsResponse { pools }))
}

pub async fn get_pool(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PoolResponse>, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("pool name must not be empty".into()));
    }
    Ok(Json(summarize(&state, PoolName::new(name)).await?))
}

#[derive(Debug, Deserialize)]
pub struct ActionsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionsResponse {
    pub pool: PoolName,
    pub actions: Vec<ActionRecord>,
}

pub async fn get_actions(
    Path(name): Path<String>,
    Query(params): Query<ActionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<ActionsResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_ACTIONS_LIMIT);
    if limit == 0 || limit > MAX_ACTIONS_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_ACTIONS_LIMIT
        )));
    }
    let pool = PoolName::new(name);
    let actions = state.repo.list_actions(&pool, limit).await?;
    Ok(Json(ActionsResponse { pool, actions }))
}

#[derive(Debug, Deserialize)]
pub struct QuoteUpdate {
    pub asset: AssetSymbol,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Record the latest bid/ask for a pool asset in the local quote table.
pub async fn post_quote(
    Path(name): Path<String>,
    State(state): State<AppState>,
    Json(update): Json<QuoteUpdate>,
) -> Result<StatusCode, AppError> {
    if update.asset.as_str().trim().is_empty() {
        return Err(AppError::BadRequest("asset must not be empty".into()));
    }
    if !update.bid.is_positive() || !update.ask.is_positive() {
        return Err(AppError::BadRequest("bid and ask must be positive".into()));
    }
    if update.bid > update.ask {
        return Err(AppError::BadRequest("bid must not exceed ask".into()));
    }
    state
        .repo
        .upsert_quote(
            &PoolName::new(name),
            &update.asset,
            &Quote::new(update.bid, update.ask),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
