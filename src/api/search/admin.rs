use axum::{extract::State, Json};
use std::sync::Arc;

use postsearch_backend::config::{self, SearchConfig};
use postsearch_backend::migration::MigrationError;

use super::query::engine_status;
use super::types::{BackfillStatus, SearchEngineStatus};
use crate::api::ApiResponse;
use crate::state::AppState;

/// GET /api/admin/search/backfill - 回填进度
pub async fn get_backfill_status(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<BackfillStatus>> {
    match state.platform.is_backfill_complete().await {
        Ok(complete) => Json(ApiResponse::success(BackfillStatus {
            complete,
            progress: state.platform.backfill_status(),
        })),
        Err(e) => {
            tracing::error!("Failed to read backfill marker: {}", e);
            Json(ApiResponse::error(&format!("Failed to read backfill status: {}", e)))
        }
    }
}

/// POST /api/admin/search/backfill - 后台触发回填
pub async fn start_backfill(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<()>> {
    if state.platform.broker().get_active_engines().is_empty() {
        return Json(ApiResponse::error("No active search engine"));
    }

    // Outcome is reported through the status endpoint
    match state.platform.spawn_channel_type_backfill() {
        Ok(_) => {
            tracing::info!("Channel type backfill triggered");
            Json(ApiResponse::success(()))
        }
        Err(MigrationError::AlreadyRunning(_)) => {
            Json(ApiResponse::conflict("Channel type backfill is already running"))
        }
        Err(e) => Json(ApiResponse::error(&e.to_string())),
    }
}

/// POST /api/admin/search/backfill/cancel - 取消回填
pub async fn cancel_backfill(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<()>> {
    if state.platform.cancel_backfill() {
        Json(ApiResponse::success(()))
    } else {
        Json(ApiResponse::error("No backfill is running"))
    }
}

/// POST /api/admin/search/config - 更新搜索配置
pub async fn update_search_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchConfig>,
) -> Json<ApiResponse<SearchEngineStatus>> {
    if let Err(e) = config::update_search_config(req.clone()) {
        tracing::error!("Failed to save search config: {}", e);
        return Json(ApiResponse::error(&e));
    }

    // Engine starts finish in the background
    if let Err(e) = state.platform.update_config(req).await {
        tracing::error!("Failed to apply search config: {}", e);
        return Json(ApiResponse::error(&format!("Failed to apply search config: {}", e)));
    }

    tracing::info!("Search config updated");
    Json(ApiResponse::success(engine_status(&state)))
}
