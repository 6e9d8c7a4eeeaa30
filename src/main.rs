use anyhow::Context;
use poolkeeper::api;
use poolkeeper::config::{Config, PoolStoreBackend};
use poolkeeper::engine::RetryPolicy;
use poolkeeper::gateway::{
    ActionLog, Collaborators, FixedRateConverter, HttpLedgerGateway, HttpRecommender, JobQueue,
    PoolApiClient, PoolStore, QuoteSource, Recommender,
};
use poolkeeper::{init_db, JobDispatcher, Repository, SettlementEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

type Backend = (
    Arc<dyn PoolStore>,
    Arc<dyn QuoteSource>,
    Arc<dyn ActionLog>,
    Arc<dyn JobQueue>,
);

fn backend<T>(service: Arc<T>) -> Backend
where
    T: PoolStore + QuoteSource + ActionLog + JobQueue + 'static,
{
    (service.clone(), service.clone(), service.clone(), service)
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("Failed to initialize database at {}", config.database_path))?;
    let repo = Arc::new(Repository::new(pool));
    let policy = config.policy.clone();
    let scales = policy.scales;

    let (store, quotes, actions, queue) = match config.pool_store {
        PoolStoreBackend::Sqlite => backend(repo.clone()),
        PoolStoreBackend::Http => {
            let url = config
                .pool_api_url
                .clone()
                .context("POOL_API_URL is required for the http pool store")?;
            backend(Arc::new(PoolApiClient::new(url)))
        }
    };

    let recommender = config.recommender_url.clone().map(|url| {
        Arc::new(HttpRecommender::new(
            url,
            config.recommender_name.clone(),
            config.recommender_token.clone(),
        )) as Arc<dyn Recommender>
    });

    let collaborators = Collaborators {
        store: store.clone(),
        quotes: quotes.clone(),
        conversion: Arc::new(FixedRateConverter::new(
            config.conversion_rate,
            config.conversion_fee_bps,
            scales.cash,
            scales.native,
        )),
        ledger: Arc::new(HttpLedgerGateway::new(
            config.ledger_api_url.clone(),
            scales.shares,
            scales.native,
        )),
        actions,
        recommender,
    };

    let retry = RetryPolicy::new(
        Duration::from_millis(500),
        Duration::from_secs(10),
        config.retry_max_elapsed,
    );
    let engine = Arc::new(SettlementEngine::new(collaborators, policy.clone(), retry));
    let dispatcher = JobDispatcher::new(engine, queue.clone())
        .with_poll_interval(config.poll_interval)
        .with_retry(retry);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });

    let state = api::AppState::new(repo, policy).with_collaborators(store, quotes, queue);
    let app = api::create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(
        "Server listening on {} (pool store: {:?})",
        addr,
        config.pool_store
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Let an in-flight job finish before exiting.
    shutdown_tx.send(true).ok();
    worker.await.context("Job dispatcher task failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
