//! v1 manual review handlers.

use axum::extract::{Path, Query, State};

use crate::api::extractors::AppJson;
use crate::api::v1::dto::{
    CompleteReviewRequest, LimitQuery, ReviewFeedbackResponse, ReviewQueueItem,
};
use crate::api::v1::response::{ApiError, ApiResponse, ResponseMeta};
use crate::api::AppState;
use crate::error::FakturoError;

/// `GET /api/v1/reviews`
///
/// Documents awaiting manual review, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/reviews",
    tag = "reviews",
    operation_id = "reviews.list",
    params(LimitQuery),
    responses(
        (status = 200, description = "Review queue", body = Vec<ReviewQueueItem>),
    )
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResponse<Vec<ReviewQueueItem>> {
    match state.pipeline.review_queue(query.limit()).await {
        Ok(docs) => {
            let total = docs.len() as u64;
            ApiResponse::success_with_meta(
                docs.into_iter().map(Into::into).collect(),
                ResponseMeta { total: Some(total) },
            )
        }
        Err(e) => e.into(),
    }
}

/// `POST /api/v1/reviews/{documentId}/complete`
///
/// Records the reviewer's corrections and completes the document. OCR is
/// not re-run.
#[utoipa::path(
    post,
    path = "/api/v1/reviews/{documentId}/complete",
    tag = "reviews",
    operation_id = "reviews.complete",
    params(("documentId" = String, Path, description = "Document ID")),
    request_body = CompleteReviewRequest,
    responses(
        (status = 200, description = "Review recorded", body = ReviewFeedbackResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 404, description = "Document not found", body = ApiError),
        (status = 409, description = "Document is not awaiting review", body = ApiError),
    )
)]
pub async fn complete_review(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    body: Result<AppJson<CompleteReviewRequest>, FakturoError>,
) -> ApiResponse<ReviewFeedbackResponse> {
    let AppJson(req) = match body {
        Ok(body) => body,
        Err(e) => return e.into(),
    };

    match state
        .pipeline
        .complete_review(&document_id, req.into())
        .await
    {
        Ok(feedback) => ApiResponse::success(feedback.into()),
        Err(e) => e.into(),
    }
}
