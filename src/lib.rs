pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    AccountId, ActionKind, ActionRecord, Actor, AssetSymbol, Decimal, Holdings, Job, JobAction,
    JobStatus, PoolName, QuoteBook, RawJob, TimeMs,
};
pub use engine::{SettlementEngine, SettlementError, SettlementPolicy};
pub use error::AppError;
pub use gateway::{Collaborators, GatewayError};
pub use orchestration::JobDispatcher;
