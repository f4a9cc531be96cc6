mod address;
mod aggregator;
mod api;
mod chat;
mod config;
mod db;
mod ens;
mod error;
mod llm;
mod models;
mod nfts;
mod parser;
mod query;
mod rpc;
mod stream;
mod transfers;
mod wallet;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::llm::{GeminiClient, TextGenerator};
use crate::query::Database;
use crate::rpc::{AlchemyRpc, Upstream};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("chainquery starting...");

    let cfg = config::load()?;

    let rpc = AlchemyRpc::new(cfg.alchemy_url.clone(), cfg.upstream_timeout)?;
    let upstream = Upstream::new(Arc::new(rpc));

    let database = match &cfg.database_url {
        Some(path) => {
            let db = Database::open(path)?;
            let info = query::database_info(&db).await;
            info!(tables = ?info.tables, "connected to database");
            Some(db)
        }
        None => {
            warn!("DATABASE_URL not set, query endpoints disabled");
            None
        }
    };

    let llm: Option<Arc<dyn TextGenerator>> = match &cfg.google_api_key {
        Some(key) => {
            let client = GeminiClient::new(key.clone(), cfg.gemini_model.clone(), cfg.upstream_timeout)?
                .with_base_url(cfg.gemini_base_url.clone());
            Some(Arc::new(client) as Arc<dyn TextGenerator>)
        }
        None => {
            warn!("GOOGLE_API_KEY not set, LLM endpoints disabled");
            None
        }
    };

    let state = api::AppState {
        upstream,
        page_delay: cfg.page_delay,
        full_limits: cfg.full_limits,
        database,
        llm,
    };

    let api_handle = tokio::spawn({
        let cfg = cfg.clone();
        async move { api::serve(cfg, state).await }
    });

    // Graceful shutdown
    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    info!("chainquery stopped.");
    Ok(())
}
