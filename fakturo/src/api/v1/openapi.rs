use axum::Json;
use utoipa::OpenApi;
use utoipa_redoc::{Redoc, Servable};

use super::dto;
use super::handlers;
use super::response;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fakturo API",
        version = "1.0.0",
        description = "OCR pipeline for invoice documents: upload, status, manual review.",
    ),
    paths(
        handlers::health::health_check,
        handlers::documents::upload_document,
        handlers::documents::get_document,
        handlers::documents::cancel_document,
        handlers::documents::list_attempts,
        handlers::documents::list_audit,
        handlers::reviews::list_reviews,
        handlers::reviews::complete_review,
        handlers::engines::list_engines,
    ),
    components(schemas(
        // Response envelope
        response::ErrorCode,
        response::ApiError,
        response::ResponseMeta,
        // Common
        dto::common::LimitQuery,
        dto::common::FieldValueResponse,
        // Documents
        handlers::documents::UploadForm,
        dto::documents::UploadDocumentResponse,
        dto::documents::DocumentResponse,
        dto::documents::OcrResultResponse,
        dto::documents::AttemptResponse,
        dto::documents::AuditEntryResponse,
        // Reviews
        dto::reviews::CompleteReviewRequest,
        dto::reviews::ReviewFeedbackResponse,
        dto::reviews::ReviewQueueItem,
        // Engines
        dto::engines::EngineResponse,
        // Health (handler-local types)
        handlers::health::HealthData,
        handlers::health::DatabaseStatus,
        handlers::health::EnginesStatus,
    )),
    tags(
        (name = "health", description = "Health check"),
        (name = "documents", description = "Invoice upload, status and diagnostics"),
        (name = "reviews", description = "Manual review queue"),
        (name = "engines", description = "OCR engine catalog"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(utoipa::openapi::security::Http::new(
                utoipa::openapi::security::HttpAuthScheme::Bearer,
            )),
        );
    }
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn redoc_router<S: Clone + Send + Sync + 'static>() -> axum::Router<S> {
    Redoc::with_url("/docs", ApiDoc::openapi()).into()
}
