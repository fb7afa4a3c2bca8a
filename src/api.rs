use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::store::{TradeRecord, TradeStatus};
use crate::trading_core::{EngineSnapshot, PerformanceSummary};

/// Shared between the cycle loop (writer) and the handlers (readers)
#[derive(Default)]
pub struct AppState {
    pub snapshot: RwLock<EngineSnapshot>,
    pub trades: RwLock<Vec<TradeRecord>>,
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the published view after a cycle
    pub async fn publish(&self, snapshot: EngineSnapshot, trades: Vec<TradeRecord>) {
        *self.snapshot.write().await = snapshot;
        *self.trades.write().await = trades;
    }
}

/// Response for trades list
#[derive(Serialize)]
pub struct TradesResponse {
    pub trades: Vec<TradeRecord>,
    pub performance: PerformanceSummary,
}

/// Query params for trades endpoint
#[derive(Debug, Deserialize)]
pub struct TradesQueryParams {
    pub limit: Option<usize>,
    pub status: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(get_health))
        .route("/api/state", get(get_state))
        .route("/api/trades", get(get_trades))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

/// GET /api/health
pub async fn get_health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

/// GET /api/state - Last published cycle
pub async fn get_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.snapshot.read().await;
    if snapshot.updated_at.is_none() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "No cycle completed yet"})),
        );
    }
    (StatusCode::OK, Json(serde_json::json!(*snapshot)))
}

/// GET /api/trades - Trade log, newest first
pub async fn get_trades(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TradesQueryParams>,
) -> impl IntoResponse {
    let status = match params.status.as_deref().map(str::to_ascii_uppercase).as_deref() {
        None => None,
        Some("ACTIVE") => Some(TradeStatus::Active),
        Some("WIN") => Some(TradeStatus::Win),
        Some("LOSS") => Some(TradeStatus::Loss),
        Some(other) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Unknown status '{}'", other)})),
            );
        }
    };

    let all = state.trades.read().await;
    let performance = PerformanceSummary::from_records(&all);
    let trades: Vec<TradeRecord> = all
        .iter()
        .rev()
        .filter(|t| status.map_or(true, |s| t.status == s))
        .take(params.limit.unwrap_or(50))
        .cloned()
        .collect();

    (StatusCode::OK, Json(serde_json::json!(TradesResponse { trades, performance })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, status: TradeStatus) -> TradeRecord {
        TradeRecord {
            id: id.to_string(),
            leg: "25000 CE".to_string(),
            price: 120.0,
            weak_pivot: 90.0,
            entry: 60.0,
            target1: 156.0,
            target2: 192.0,
            target3: 252.0,
            structure: "STRONG".to_string(),
            gamma_filter: String::new(),
            exit_reason: None,
            entry_time: "10:00:00".to_string(),
            exit_time: None,
            status,
        }
    }

    #[tokio::test]
    async fn test_state_unavailable_before_first_cycle() {
        let state = AppState::new();
        let response = get_state(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let snapshot = EngineSnapshot { updated_at: Some(Utc::now()), ..Default::default() };
        state.publish(snapshot, Vec::new()).await;
        let response = get_state(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_trades_status_filter() {
        let state = AppState::new();
        state
            .publish(
                EngineSnapshot::default(),
                vec![record("a", TradeStatus::Win), record("b", TradeStatus::Active)],
            )
            .await;

        let ok = TradesQueryParams { limit: None, status: Some("win".to_string()) };
        let response = get_trades(State(state.clone()), Query(ok)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let bad = TradesQueryParams { limit: None, status: Some("OPEN".to_string()) };
        let response = get_trades(State(state), Query(bad)).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
