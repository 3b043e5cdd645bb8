//! Router assembly and the HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

use signet_consensus::{ConsensusEngine, GossipSink};
use signet_core::{EventBus, Mempool, StateStore};
use signet_crypto::KeyPair;
use signet_execution::{ContractCompiler, ExecutionEngine};
use signet_storage::ChainStore;

use crate::{handlers, ws, ApiError, ApiResult};

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            // the dashboard's default endpoint
            listen_addr: ([127, 0, 0, 1], 8080).into(),
        }
    }
}

/// Everything the handlers reach for.
///
/// All fields are shared handles; cloning the context is cheap and
/// every request gets its own copy through the router state.
#[derive(Clone)]
pub struct ApiContext {
    pub chain_id: String,
    /// Signs node-built transactions; `None` on observer nodes
    pub node_key: Option<KeyPair>,
    pub state: Arc<RwLock<StateStore>>,
    pub mempool: Arc<RwLock<Mempool>>,
    pub store: Arc<ChainStore>,
    pub engine: Arc<ConsensusEngine>,
    pub exec: ExecutionEngine,
    pub bus: EventBus,
    pub compiler: Arc<dyn ContractCompiler>,
    pub gossip: Arc<dyn GossipSink>,
}

/// The REST and WebSocket server
pub struct ApiServer {
    config: ApiConfig,
    ctx: ApiContext,
}

impl ApiServer {
    pub fn new(config: ApiConfig, ctx: ApiContext) -> Self {
        ApiServer { config, ctx }
    }

    /// Binds the listener and serves until the task is aborted
    pub async fn start(self) -> ApiResult<()> {
        let addr = self.config.listen_addr;
        let router = router(self.ctx);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::Internal(format!("cannot bind {}: {}", addr, e)))?;
        info!(%addr, "API server listening");

        axum::serve(listener, router)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))
    }
}

/// Builds the full route table over a context
pub fn router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/info", get(handlers::info))
        .route("/blocks", get(handlers::list_blocks))
        .route("/blocks/:id", get(handlers::block_by_id))
        .route(
            "/transactions",
            get(handlers::list_transactions).post(handlers::submit_transaction),
        )
        .route(
            "/transactions/:hash/status",
            get(handlers::transaction_status),
        )
        .route(
            "/transactions/:hash/receipt",
            get(handlers::transaction_receipt),
        )
        .route(
            "/validators",
            get(handlers::list_validators).post(handlers::add_validator),
        )
        .route("/validators/current", get(handlers::current_validator))
        .route("/validators/:address", delete(handlers::remove_validator))
        .route(
            "/contracts",
            get(handlers::list_contracts).post(handlers::deploy_contract),
        )
        .route("/contracts/estimate", post(handlers::estimate_gas))
        .route("/contracts/:address", get(handlers::contract_info))
        .route(
            "/contracts/:address/execute",
            post(handlers::execute_contract),
        )
        .route("/contracts/:address/enable", post(handlers::enable_contract))
        .route(
            "/contracts/:address/disable",
            post(handlers::disable_contract),
        )
        .route(
            "/contracts/:address/transactions",
            get(handlers::contract_transactions),
        )
        .route("/contracts/:address/events", get(handlers::contract_events))
        .route(
            "/contracts/:address/analytics",
            get(handlers::contract_analytics),
        )
        .route("/contracts/:address/verify", post(handlers::verify_contract))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
