use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, LevelFilter};
use orchestrator::{
    start_server, BuildRegistry, Cli, ClientCache, RedisStore, ServiceContext, StoreContext,
};
use tokio::sync::Semaphore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = match cli.log_level.as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let config = Arc::new(cli.into_config());
    let store = Arc::new(RedisStore::new(&config.redis_url)?);
    let stores = Arc::new(StoreContext::new(store));
    let registry = Arc::new(BuildRegistry::new());
    let clients = Arc::new(ClientCache::new(config.clone(), registry.clone()));
    let limiter = Arc::new(Semaphore::new(config.thread_limit));

    let ctx = Arc::new(ServiceContext {
        config: config.clone(),
        stores,
        registry,
        clients,
        limiter,
    });

    tokio::select! {
        res = start_server(&config.host, config.port, ctx) => {
            if let Err(e) = res {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            error!("Shutdown signal received");
        }
    }
    Ok(())
}
