//! Domain types for pool settlement.
//!
//! This module provides:
//! - Lossless fixed-point amounts via the Decimal wrapper
//! - Primitives: TimeMs, PoolName, AssetSymbol, AccountId
//! - Holdings, quotes, jobs and the append-only action record

pub mod action;
pub mod decimal;
pub mod holding;
pub mod job;
pub mod primitives;
pub mod quote;

pub use action::{ActionKind, ActionRecord, Actor};
pub use decimal::Decimal;
pub use holding::{Holding, Holdings, Pool};
pub use job::{
    DepositRequest, Job, JobAction, JobParseError, JobStatus, RawJob, RecommendRequest,
    TradeRequest, WithdrawRequest,
};
pub use primitives::{AccountId, AssetSymbol, PoolName, TimeMs};
pub use quote::{Quote, QuoteBook, QuoteSide};
