use axum::{extract::State, Json};
use std::sync::Arc;

use super::types::{EngineStatus, SearchEngineStatus};
use crate::api::ApiResponse;
use crate::state::AppState;

/// Build the engine overview / 构建引擎概览
pub(super) fn engine_status(state: &AppState) -> SearchEngineStatus {
    let broker = state.platform.broker();
    let engines = broker
        .registered_engines()
        .into_iter()
        .map(|(kind, engine)| EngineStatus {
            kind,
            name: engine.name().to_string(),
            enabled: engine.is_enabled(),
            active: engine.is_active(),
        })
        .collect();

    SearchEngineStatus {
        active_engine: broker.active_engine(),
        engines,
    }
}

/// GET /api/search/engine
pub async fn get_search_engine(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<SearchEngineStatus>> {
    Json(ApiResponse::success(engine_status(&state)))
}
