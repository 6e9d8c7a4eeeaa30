pub mod health;
pub mod jobs;
pub mod pools;

use crate::db::Repository;
use crate::engine::SettlementPolicy;
use crate::gateway::{JobQueue, PoolStore, QuoteSource};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    /// Local database: action history, job records and stored quotes.
    pub repo: Arc<Repository>,
    pub store: Arc<dyn PoolStore>,
    pub quotes: Arc<dyn QuoteSource>,
    pub queue: Arc<dyn JobQueue>,
    pub policy: SettlementPolicy,
}

impl AppState {
    /// State backed entirely by the local database.
    pub fn new(repo: Arc<Repository>, policy: SettlementPolicy) -> Self {
        Self {
            store: repo.clone(),
            quotes: repo.clone(),
            queue: repo.clone(),
            repo,
            policy,
        }
    }

    /// Serve pool reads and job submissions from other collaborators, e.g.
    /// the remote pool service.
    pub fn with_collaborators(
        mut self,
        store: Arc<dyn PoolStore>,
        quotes: Arc<dyn QuoteSource>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        self.store = store;
        self.quotes = quotes;
        self.queue = queue;
        self
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/pools", get(pools::list_pools))
        .route("/v1/pools/:name", get(pools::get_pool))
        .route("/v1/pools/:name/actions", get(pools::get_actions))
        .route("/v1/pools/:name/quotes", post(pools::post_quote))
        .route("/v1/jobs", post(jobs::submit_job))
        .route("/v1/jobs/:id", get(jobs::get_job))
        .layer(cors)
        .with_state(state)
}
