use axum::extract::State;

use crate::api::v1::dto::EngineResponse;
use crate::api::v1::response::ApiResponse;
use crate::api::AppState;

/// `GET /api/v1/engines`
///
/// Engine catalog in priority order, with rolling statistics.
#[utoipa::path(
    get,
    path = "/api/v1/engines",
    tag = "engines",
    operation_id = "engines.list",
    responses(
        (status = 200, description = "Engine catalog", body = Vec<EngineResponse>),
    )
)]
pub async fn list_engines(State(state): State<AppState>) -> ApiResponse<Vec<EngineResponse>> {
    match state.pipeline.engines().await {
        Ok(engines) => ApiResponse::success(engines.into_iter().map(Into::into).collect()),
        Err(e) => e.into(),
    }
}
