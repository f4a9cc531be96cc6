use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::address::resolve_address;
use crate::aggregator::derive_stats;
use crate::chat::{self, ChatRequest, ChatResponse};
use crate::config::Config;
use crate::db::StoredCounts;
use crate::error::AppError;
use crate::llm::TextGenerator;
use crate::models::{
    Direction, StreamEvent, TokenBalances, Transfer, WalletMetadata, WalletSnapshot, WalletStats,
};
use crate::nfts::{stream_nfts, validate_page_size, DEFAULT_NFT_PAGE_SIZE};
use crate::query::{self, Database, DatabaseInfo, NlQueryService, QueryResponse};
use crate::rpc::Upstream;
use crate::stream::terminated;
use crate::transfers::{stream_transfers, TransferQuery};
use crate::wallet::{self, FullDataLimits, FullDataRequest};

const SERVICE_NAME: &str = "chainquery";
const CHAT_SERVICE_NAME: &str = "chainquery-chat";

#[derive(Clone)]
pub struct AppState {
    pub upstream: Upstream,
    pub page_delay: Duration,
    pub full_limits: FullDataLimits,
    pub database: Option<Database>,
    pub llm: Option<Arc<dyn TextGenerator>>,
}

impl AppState {
    fn llm(&self) -> Result<Arc<dyn TextGenerator>, AppError> {
        self.llm
            .clone()
            .ok_or_else(|| AppError::Unavailable("GOOGLE_API_KEY is not configured".to_string()))
    }

    fn database(&self) -> Result<Database, AppError> {
        self.database
            .clone()
            .ok_or_else(|| AppError::Unavailable("DATABASE_URL is not configured".to_string()))
    }
}

#[derive(Deserialize)]
pub struct TransferStreamParams {
    pub from_block: Option<String>,
    pub max_transfers: Option<usize>,
    pub include_nft: Option<bool>,
    pub direction: Option<String>,
}

#[derive(Deserialize)]
pub struct NftStreamParams {
    pub page_size: Option<u32>,
}

#[derive(Deserialize)]
pub struct FullDataParams {
    pub include_nft: Option<bool>,
    pub max_transfers: Option<usize>,
    pub direction: Option<String>,
}

#[derive(Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

#[derive(Serialize)]
pub struct LoadResponse {
    pub address: String,
    pub stored: StoredCounts,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub address: String,
    pub summary: String,
    pub derived_stats: WalletStats,
}

fn parse_direction(raw: Option<&str>) -> Result<Direction, AppError> {
    Ok(raw.map(str::parse::<Direction>).transpose()?.unwrap_or_default())
}

/// One SSE `data:` event per stream item.
fn sse<T>(
    events: impl Stream<Item = StreamEvent<T>> + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>> + Send + 'static>
where
    T: Serialize + Send + 'static,
{
    Sse::new(events.map(|ev| Event::default().json_data(&ev))).keep_alive(KeepAlive::default())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/v1/health", get(health))
        .route("/api/v1/chat/health", get(chat_health))
        .route("/api/v1/wallet/:address/metadata", get(wallet_metadata))
        .route("/api/v1/wallet/:address/transfers/stream", get(wallet_transfers_stream))
        .route("/api/v1/wallet/:address/tokens", get(wallet_tokens))
        .route("/api/v1/wallet/:address/nfts/stream", get(wallet_nfts_stream))
        .route("/api/v1/wallet/:address/stats", post(wallet_stats))
        .route("/api/v1/wallet/:address/full", get(wallet_full))
        .route("/api/v1/wallet/:address/summary", get(wallet_summary))
        .route("/api/v1/wallet/:address/load", post(wallet_load))
        .route("/api/v1/query", post(nl_query))
        .route("/api/v1/database/info", get(db_info))
        .route("/api/v1/chat", post(chat_message))
        .with_state(state)
}

pub async fn serve(cfg: Config, state: AppState) -> eyre::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Natural-language SQL queries and Ethereum wallet data",
        "health": "/api/v1/health",
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

async fn chat_health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": CHAT_SERVICE_NAME }))
}

async fn wallet_metadata(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<WalletMetadata>, AppError> {
    let address = resolve_address(&state.upstream, &address).await?;
    Ok(Json(wallet::get_metadata(&state.upstream, address).await?))
}

async fn wallet_transfers_stream(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<TransferStreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>> + Send + 'static>, AppError> {
    let direction = parse_direction(params.direction.as_deref())?;
    let address = resolve_address(&state.upstream, &address).await?;

    let defaults = TransferQuery::new(address);
    let query = TransferQuery {
        from_block: params.from_block.unwrap_or(defaults.from_block),
        max_per_direction: params.max_transfers.unwrap_or(defaults.max_per_direction),
        include_nft: params.include_nft.unwrap_or(defaults.include_nft),
        address,
    };
    info!(%address, ?direction, cap = query.max_per_direction, "streaming transfers");

    let batches = stream_transfers(state.upstream.clone(), query, direction, state.page_delay);
    Ok(sse(terminated(batches, "Transfer fetch complete")))
}

async fn wallet_tokens(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<TokenBalances>, AppError> {
    let address = resolve_address(&state.upstream, &address).await?;
    Ok(Json(wallet::get_token_balances(&state.upstream, address).await?))
}

async fn wallet_nfts_stream(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<NftStreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>> + Send + 'static>, AppError> {
    let page_size = validate_page_size(params.page_size.unwrap_or(DEFAULT_NFT_PAGE_SIZE))?;
    let address = resolve_address(&state.upstream, &address).await?;
    info!(%address, page_size, "streaming NFTs");

    let batches = stream_nfts(state.upstream.clone(), address, page_size, state.page_delay);
    Ok(sse(terminated(batches, "NFT fetch complete")))
}

async fn wallet_stats(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(transfers): Json<Vec<Transfer>>,
) -> Result<Json<WalletStats>, AppError> {
    let address = resolve_address(&state.upstream, &address).await?;
    Ok(Json(derive_stats(&address, &transfers)))
}

async fn full_snapshot(
    state: &AppState,
    address: &str,
    params: FullDataParams,
) -> Result<WalletSnapshot, AppError> {
    let direction = parse_direction(params.direction.as_deref())?;
    let address = resolve_address(&state.upstream, address).await?;
    let request = FullDataRequest {
        include_nft: params.include_nft.unwrap_or(true),
        max_per_direction: params.max_transfers.unwrap_or(0),
        direction,
    };
    Ok(wallet::full_wallet_data(
        &state.upstream,
        address,
        &request,
        state.full_limits,
        state.page_delay,
    )
    .await?)
}

async fn wallet_full(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<FullDataParams>,
) -> Result<Json<WalletSnapshot>, AppError> {
    Ok(Json(full_snapshot(&state, &address, params).await?))
}

async fn wallet_summary(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<FullDataParams>,
) -> Result<Json<SummaryResponse>, AppError> {
    let llm = state.llm()?;
    let snapshot = full_snapshot(&state, &address, params).await?;
    let summary = chat::summarize_wallet(llm.as_ref(), &snapshot).await?;
    Ok(Json(SummaryResponse {
        address: snapshot.metadata.address,
        summary,
        derived_stats: snapshot.derived_stats,
    }))
}

/// Fetch the bounded full snapshot and upsert it into the query database.
async fn wallet_load(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<FullDataParams>,
) -> Result<Json<LoadResponse>, AppError> {
    let db = state.database()?;
    let snapshot = full_snapshot(&state, &address, params).await?;
    let address = snapshot.metadata.address.clone();
    let stored = db.store_snapshot(snapshot).await?;
    info!(%address, ?stored, "wallet loaded into database");
    Ok(Json(LoadResponse { address, stored }))
}

async fn nl_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let service = NlQueryService::new(state.database()?, state.llm()?);
    Ok(Json(service.answer(&request.question).await))
}

async fn db_info(State(state): State<AppState>) -> Json<DatabaseInfo> {
    match &state.database {
        Some(db) => Json(query::database_info(db).await),
        None => Json(DatabaseInfo {
            connected: false,
            dialect: None,
            tables: None,
            error: Some("DATABASE_URL is not configured".to_string()),
        }),
    }
}

async fn chat_message(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let llm = state.llm()?;
    Ok(Json(chat::chat(llm.as_ref(), &request).await))
}
