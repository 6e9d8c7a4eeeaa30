use crate::domain::{AssetSymbol, Decimal};
use crate::engine::{CashPolicy, RedemptionBasis, Scales, SettlementPolicy};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub pool_store: PoolStoreBackend,
    /// Remote pool service. Required when `pool_store` is `Http`.
    pub pool_api_url: Option<String>,
    pub ledger_api_url: String,
    pub recommender_url: Option<String>,
    pub recommender_name: String,
    pub recommender_token: Option<String>,
    pub conversion_rate: Decimal,
    pub conversion_fee_bps: u32,
    pub policy: SettlementPolicy,
    pub poll_interval: Duration,
    pub retry_max_elapsed: Duration,
}

/// Where holdings, quotes, actions and jobs live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStoreBackend {
    /// Local SQLite file at `DATABASE_PATH`.
    Sqlite,
    /// Remote pool service at `POOL_API_URL`.
    Http,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue(key.to_string(), reason.into())
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    reason: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| invalid(key, reason)),
        None => Ok(default),
    }
}

fn parse_bps(env_map: &HashMap<String, String>, key: &str, default: u32) -> Result<u32, ConfigError> {
    let bps = parse_or(env_map, key, default, "must be a whole number of basis points")?;
    if bps > 10_000 {
        return Err(invalid(key, "must be at most 10000"));
    }
    Ok(bps)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let pool_store = match env_map
            .get("POOL_STORE")
            .map(|s| s.as_str())
            .unwrap_or("sqlite")
        {
            "sqlite" => PoolStoreBackend::Sqlite,
            "http" => PoolStoreBackend::Http,
            other => {
                return Err(invalid(
                    "POOL_STORE",
                    format!("must be sqlite or http, got {}", other),
                ))
            }
        };

        let pool_api_url = env_map.get("POOL_API_URL").cloned();
        if pool_store == PoolStoreBackend::Http && pool_api_url.is_none() {
            return Err(ConfigError::MissingEnv("POOL_API_URL".to_string()));
        }

        let ledger_api_url = env_map
            .get("LEDGER_API_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("LEDGER_API_URL".to_string()))?;

        let recommender_url = env_map.get("RECOMMENDER_URL").cloned();
        let recommender_name = env_map
            .get("RECOMMENDER_NAME")
            .cloned()
            .unwrap_or_else(|| "agent".to_string());
        let recommender_token = env_map.get("RECOMMENDER_TOKEN").cloned();

        let conversion_rate = parse_or(
            &env_map,
            "CONVERSION_RATE",
            Decimal::from_u64(5),
            "must be a decimal number",
        )?;
        if !conversion_rate.is_positive() {
            return Err(invalid("CONVERSION_RATE", "must be positive"));
        }
        let conversion_fee_bps = parse_bps(&env_map, "CONVERSION_FEE_BPS", 0)?;

        let redemption_basis = match env_map
            .get("REDEMPTION_BASIS")
            .map(|s| s.as_str())
            .unwrap_or("outstanding")
        {
            "outstanding" => RedemptionBasis::Outstanding,
            "outstanding_plus_redeemed" => RedemptionBasis::OutstandingPlusRedeemed,
            other => {
                return Err(invalid(
                    "REDEMPTION_BASIS",
                    format!(
                        "must be outstanding or outstanding_plus_redeemed, got {}",
                        other
                    ),
                ))
            }
        };

        let cash_policy = match env_map
            .get("CASH_POLICY")
            .map(|s| s.as_str())
            .unwrap_or("require_covered")
        {
            "require_covered" => CashPolicy::RequireCovered,
            "allow_negative" => CashPolicy::AllowNegative,
            other => {
                return Err(invalid(
                    "CASH_POLICY",
                    format!("must be require_covered or allow_negative, got {}", other),
                ))
            }
        };

        let defaults = SettlementPolicy::default();
        let cash_symbol = env_map
            .get("CASH_SYMBOL")
            .map(AssetSymbol::new)
            .unwrap_or(defaults.cash_symbol);
        let native_symbol = env_map
            .get("NATIVE_SYMBOL")
            .map(AssetSymbol::new)
            .unwrap_or(defaults.native_symbol);
        if cash_symbol == native_symbol {
            return Err(invalid("NATIVE_SYMBOL", "must differ from CASH_SYMBOL"));
        }

        let policy = SettlementPolicy {
            cash_symbol,
            native_symbol,
            deposit_fee_bps: parse_bps(&env_map, "DEPOSIT_FEE_BPS", defaults.deposit_fee_bps)?,
            withdraw_fee_bps: parse_bps(&env_map, "WITHDRAW_FEE_BPS", defaults.withdraw_fee_bps)?,
            scales: Scales::default(),
            redemption_basis,
            cash_policy,
        };

        let poll_interval_ms = parse_or(&env_map, "POLL_INTERVAL_MS", 10_000u64, "must be a valid u64")?;
        if poll_interval_ms == 0 {
            return Err(invalid("POLL_INTERVAL_MS", "must be greater than zero"));
        }
        let retry_max_elapsed_ms = parse_or(
            &env_map,
            "RETRY_MAX_ELAPSED_MS",
            120_000u64,
            "must be a valid u64",
        )?;

        Ok(Config {
            port,
            database_path,
            pool_store,
            pool_api_url,
            ledger_api_url,
            recommender_url,
            recommender_name,
            recommender_token,
            conversion_rate,
            conversion_fee_bps,
            policy,
            poll_interval: Duration::from_millis(poll_interval_ms),
            retry_max_elapsed: Duration::from_millis(retry_max_elapsed_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map.insert(
            "LEDGER_API_URL".to_string(),
            "http://localhost:3001".to_string(),
        );
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.pool_store, PoolStoreBackend::Sqlite);
        assert_eq!(config.conversion_rate, Decimal::from_u64(5));
        assert_eq!(config.policy, SettlementPolicy::default());
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert!(config.recommender_url.is_none());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_ledger_url() {
        let mut env_map = setup_required_env();
        env_map.remove("LEDGER_API_URL");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "LEDGER_API_URL"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_http_store_requires_pool_api_url() {
        let mut env_map = setup_required_env();
        env_map.insert("POOL_STORE".to_string(), "http".to_string());
        match Config::from_env_map(env_map.clone()) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "POOL_API_URL"),
            _ => panic!("Expected MissingEnv error"),
        }

        env_map.insert(
            "POOL_API_URL".to_string(),
            "http://localhost:3000".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.pool_store, PoolStoreBackend::Http);
    }

    #[test]
    fn test_policy_overrides() {
        let mut env_map = setup_required_env();
        env_map.insert("DEPOSIT_FEE_BPS".to_string(), "0".to_string());
        env_map.insert("WITHDRAW_FEE_BPS".to_string(), "50".to_string());
        env_map.insert(
            "REDEMPTION_BASIS".to_string(),
            "outstanding_plus_redeemed".to_string(),
        );
        env_map.insert("CASH_POLICY".to_string(), "allow_negative".to_string());
        env_map.insert("CASH_SYMBOL".to_string(), "USDT".to_string());

        let policy = Config::from_env_map(env_map).unwrap().policy;
        assert_eq!(policy.deposit_fee_bps, 0);
        assert_eq!(policy.withdraw_fee_bps, 50);
        assert_eq!(policy.redemption_basis, RedemptionBasis::OutstandingPlusRedeemed);
        assert_eq!(policy.cash_policy, CashPolicy::AllowNegative);
        assert_eq!(policy.cash_symbol, AssetSymbol::new("USDT"));
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_fee_bps() {
        let mut env_map = setup_required_env();
        env_map.insert("WITHDRAW_FEE_BPS".to_string(), "20000".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "WITHDRAW_FEE_BPS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_cash_policy() {
        let mut env_map = setup_required_env();
        env_map.insert("CASH_POLICY".to_string(), "yolo".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "CASH_POLICY"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_non_positive_conversion_rate() {
        let mut env_map = setup_required_env();
        env_map.insert("CONVERSION_RATE".to_string(), "0".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "CONVERSION_RATE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
