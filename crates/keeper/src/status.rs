//! Read-only status surface: the last observed state of every pool

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tower_http::trace::TraceLayer;
use tracing::info;
use tranche_types::serde_helpers::pubkey_serde;
use tranche_types::{PoolId, Pubkey};

use crate::error::KeeperResult;

/// Last observation of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochStatus {
    #[serde(with = "pubkey_serde")]
    pub pool: PoolId,
    pub name: String,
    pub epoch_id: Option<u64>,
    /// Phase label, `None` when the last read failed
    pub phase: Option<String>,
    pub feasibility: Option<String>,
    pub last_action: String,
    pub updated_at: DateTime<Utc>,
}

/// Shared, cloneable view of pool statuses
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BTreeMap<PoolId, EpochStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, status: EpochStatus) {
        self.inner.write().await.insert(status.pool, status);
    }

    pub async fn get(&self, pool: &PoolId) -> Option<EpochStatus> {
        self.inner.read().await.get(pool).cloned()
    }

    pub async fn all(&self) -> Vec<EpochStatus> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Drop entries for pools that left the registry
    pub async fn retain<F>(&self, keep: F)
    where
        F: Fn(&PoolId) -> bool,
    {
        self.inner.write().await.retain(|pool, _| keep(pool));
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Build the status router
pub fn router(board: StatusBoard) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(list_handler))
        .route("/status/:pool", get(pool_handler))
        .with_state(board)
        .layer(TraceLayer::new_for_http())
}

/// Serve the status surface until `shutdown` fires
pub async fn serve(
    board: StatusBoard,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> KeeperResult<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Status server listening on {}", addr);

    axum::serve(listener, router(board))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    info!("Status server stopped");
    Ok(())
}

async fn health_handler(State(board): State<StatusBoard>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().timestamp(),
        "pools": board.len().await,
        "service": "tranche-keeper"
    }))
}

async fn list_handler(State(board): State<StatusBoard>) -> Json<Vec<EpochStatus>> {
    Json(board.all().await)
}

async fn pool_handler(
    State(board): State<StatusBoard>,
    Path(pool): Path<String>,
) -> Result<Json<EpochStatus>, StatusCode> {
    let pool = Pubkey::from_str(&pool).map_err(|_| StatusCode::BAD_REQUEST)?;
    board.get(&pool).await.map(Json).ok_or(StatusCode::NOT_FOUND)
}
