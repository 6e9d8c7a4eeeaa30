use super::Repository;
use crate::domain::{AssetSymbol, Decimal, PoolName, Quote, QuoteBook, TimeMs};
use crate::gateway::{GatewayError, QuoteSource};
use async_trait::async_trait;
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

impl Repository {
    /// Store the latest bid/ask for one asset of a pool.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_quote(
        &self,
        pool: &PoolName,
        asset: &AssetSymbol,
        quote: &Quote,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO quotes (pool, asset, bid, ask, updated_ms)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(pool, asset) DO UPDATE SET
                bid = excluded.bid,
                ask = excluded.ask,
                updated_ms = excluded.updated_ms
            "#,
        )
        .bind(pool.as_str())
        .bind(asset.as_str())
        .bind(quote.bid.to_canonical_string())
        .bind(quote.ask.to_canonical_string())
        .bind(TimeMs::now().as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every stored quote for a pool. Rows with unparseable prices are
    /// skipped with a warning.
    pub async fn query_quotes(&self, pool: &PoolName) -> Result<QuoteBook, sqlx::Error> {
        let rows = sqlx::query("SELECT asset, bid, ask FROM quotes WHERE pool = ?")
            .bind(pool.as_str())
            .fetch_all(&self.pool)
            .await?;

        let book = rows
            .iter()
            .filter_map(|row| {
                let asset: String = row.get("asset");
                let bid: String = row.get("bid");
                let ask: String = row.get("ask");
                match (Decimal::from_str(&bid), Decimal::from_str(&ask)) {
                    (Ok(bid), Ok(ask)) => Some((AssetSymbol::new(asset), Quote::new(bid, ask))),
                    _ => {
                        warn!(pool = %pool, asset = %asset, bid = %bid, ask = %ask, "Failed to parse stored quote, skipping");
                        None
                    }
                }
            })
            .collect();
        Ok(book)
    }
}

#[async_trait]
impl QuoteSource for Repository {
    async fn get_quotes(
        &self,
        pool: &PoolName,
        assets: &[AssetSymbol],
    ) -> Result<QuoteBook, GatewayError> {
        let book = self.query_quotes(pool).await?;
        Ok(assets
            .iter()
            .filter_map(|a| book.get(a).map(|q| (a.clone(), *q)))
            .collect())
    }
}
