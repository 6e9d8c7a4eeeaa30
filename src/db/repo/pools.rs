use super::{decode_json, encode_json, Repository};
use crate::domain::{AssetSymbol, Decimal, Holdings, Pool, PoolName, TimeMs};
use crate::gateway::{GatewayError, PoolStore};
use async_trait::async_trait;
use sqlx::{Row, Sqlite, Transaction};

impl Repository {
    /// Names of every pool with a stored snapshot.
    pub async fn list_pools(&self) -> Result<Vec<PoolName>, sqlx::Error> {
        let rows = sqlx::query("SELECT name FROM pools ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| PoolName::new(row.get::<String, _>("name")))
            .collect())
    }

    async fn load_holdings(
        tx: &mut Transaction<'_, Sqlite>,
        pool: &PoolName,
    ) -> Result<Holdings, GatewayError> {
        let row = sqlx::query("SELECT holdings FROM pools WHERE name = ?")
            .bind(pool.as_str())
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => decode_json("holdings", &row.get::<String, _>("holdings")),
            None => Ok(Holdings::new()),
        }
    }

    async fn store_holdings(
        tx: &mut Transaction<'_, Sqlite>,
        pool: &PoolName,
        holdings: &Holdings,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO pools (name, holdings, updated_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                holdings = excluded.holdings,
                updated_ms = excluded.updated_ms
            "#,
        )
        .bind(pool.as_str())
        .bind(encode_json(holdings)?)
        .bind(TimeMs::now().as_ms())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PoolStore for Repository {
    async fn get_pool(&self, pool: &PoolName) -> Result<Pool, GatewayError> {
        let row = sqlx::query("SELECT holdings FROM pools WHERE name = ?")
            .bind(pool.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let holdings = match row {
            Some(row) => decode_json("holdings", &row.get::<String, _>("holdings"))?,
            None => Holdings::new(),
        };
        Ok(Pool::new(pool.clone(), holdings))
    }

    async fn replace_pool_holdings(
        &self,
        pool: &PoolName,
        holdings: &Holdings,
    ) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await?;
        Self::store_holdings(&mut tx, pool, holdings).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_holding(
        &self,
        pool: &PoolName,
        asset: &AssetSymbol,
        delta: Decimal,
        cost_basis: Option<Decimal>,
    ) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await?;
        let mut holdings = Self::load_holdings(&mut tx, pool).await?;
        holdings.add(asset, delta, cost_basis);
        Self::store_holdings(&mut tx, pool, &holdings).await?;
        tx.commit().await?;
        Ok(())
    }
}
