use axum::extract::State;
use serde::Serialize;

use crate::api::state::AppState;
use crate::api::v1::response::ApiResponse;

/// Health data returned inside the v1 envelope.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub database: DatabaseStatus,
    pub engines: EnginesStatus,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct DatabaseStatus {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnginesStatus {
    /// `ok` when at least one active engine has an implementation.
    pub status: String,
    pub active: Vec<String>,
}

/// `GET /api/v1/health`
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "health",
    responses(
        (status = 200, description = "Service health status", body = HealthData),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> ApiResponse<HealthData> {
    let database = match state.pipeline.status_counts().await {
        Ok(_) => DatabaseStatus {
            status: "ok".to_string(),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Health check database query failed");
            DatabaseStatus {
                status: "error".to_string(),
            }
        }
    };

    let engines = match state.pipeline.registry().list_active_engines_by_priority().await {
        Ok(active) if !active.is_empty() => EnginesStatus {
            status: "ok".to_string(),
            active: active.iter().map(|e| e.name().to_string()).collect(),
        },
        Ok(_) => EnginesStatus {
            status: "none".to_string(),
            active: Vec::new(),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Health check engine listing failed");
            EnginesStatus {
                status: "misconfigured".to_string(),
                active: Vec::new(),
            }
        }
    };

    let status = if database.status == "ok" && engines.status == "ok" {
        "ok"
    } else {
        "degraded"
    };

    ApiResponse::success(HealthData {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        engines,
    })
}
