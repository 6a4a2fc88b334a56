//! v1 Document handlers: upload, status polling, cancellation and the
//! attempt/audit diagnostics. Responses use the [`ApiResponse`] envelope.

use axum::extract::{Multipart, Path, State};

use crate::api::v1::dto::{
    AttemptResponse, AuditEntryResponse, DocumentResponse, UploadDocumentResponse,
};
use crate::api::v1::response::{ApiError, ApiResponse, ErrorCode, ResponseMeta};
use crate::api::AppState;
use crate::pipeline::{actor, Upload};

/// Multipart form for `POST /api/v1/documents:upload`.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// The invoice scan: PDF, JPEG, PNG or TIFF.
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    uploaded_by: Option<String>,
    /// Engine to try first for this document.
    preferred_engine: Option<String>,
}

/// `POST /api/v1/documents:upload`
///
/// Stores the file and returns at once. Valid files answer 202 with status
/// `queued`; files failing size or type checks are still recorded and
/// answer 202 with status `rejected` and the reason.
#[utoipa::path(
    post,
    path = "/api/v1/documents:upload",
    tag = "documents",
    operation_id = "documents.upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Document stored", body = UploadDocumentResponse),
        (status = 400, description = "Invalid request", body = ApiError),
    )
)]
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResponse<UploadDocumentResponse> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut file_content_type: Option<String> = None;
    let mut uploaded_by: Option<String> = None;
    let mut preferred_engine: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return ApiResponse::error(
                    ErrorCode::InvalidRequest,
                    format!("Malformed multipart body: {}", e.body_text()),
                );
            }
        };
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(str::to_string);
                file_content_type = field.content_type().map(str::to_string);
                match field.bytes().await {
                    Ok(bytes) => file_bytes = Some(bytes.to_vec()),
                    Err(e) => {
                        return ApiResponse::error(
                            ErrorCode::InvalidRequest,
                            format!("Failed to read file: {}", e.body_text()),
                        );
                    }
                }
            }
            "uploadedBy" | "uploaded_by" => match field.text().await {
                Ok(text) if !text.trim().is_empty() => uploaded_by = Some(text.trim().to_string()),
                Ok(_) => {}
                Err(e) => {
                    return ApiResponse::error(
                        ErrorCode::InvalidRequest,
                        format!("Invalid uploadedBy: {}", e.body_text()),
                    );
                }
            },
            "preferredEngine" | "preferred_engine" => match field.text().await {
                Ok(text) if !text.trim().is_empty() => {
                    preferred_engine = Some(text.trim().to_string())
                }
                Ok(_) => {}
                Err(e) => {
                    return ApiResponse::error(
                        ErrorCode::InvalidRequest,
                        format!("Invalid preferredEngine: {}", e.body_text()),
                    );
                }
            },
            _ => {}
        }
    }

    let Some(bytes) = file_bytes else {
        return ApiResponse::error(ErrorCode::InvalidRequest, "Missing required 'file' field");
    };

    let upload = Upload {
        filename: file_name.unwrap_or_default(),
        content_type: file_content_type,
        uploaded_by,
        preferred_engine,
        bytes,
    };

    match state.pipeline.ingest(upload).await {
        Ok(admission) => ApiResponse::accepted(admission.into()),
        Err(e) => e.into(),
    }
}

/// `GET /api/v1/documents/{documentId}`
#[utoipa::path(
    get,
    path = "/api/v1/documents/{documentId}",
    tag = "documents",
    operation_id = "documents.get",
    params(("documentId" = String, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Status and active result", body = DocumentResponse),
        (status = 404, description = "Document not found", body = ApiError),
    )
)]
pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> ApiResponse<DocumentResponse> {
    match state.pipeline.status(&document_id).await {
        Ok(view) => ApiResponse::success(view.into()),
        Err(e) => e.into(),
    }
}

/// `POST /api/v1/documents/{documentId}/cancel`
#[utoipa::path(
    post,
    path = "/api/v1/documents/{documentId}/cancel",
    tag = "documents",
    operation_id = "documents.cancel",
    params(("documentId" = String, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Document cancelled", body = DocumentResponse),
        (status = 404, description = "Document not found", body = ApiError),
        (status = 409, description = "Document already terminal", body = ApiError),
    )
)]
pub async fn cancel_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> ApiResponse<DocumentResponse> {
    match state.pipeline.cancel(&document_id, actor::API).await {
        Ok(doc) => ApiResponse::success(doc.into()),
        Err(e) => e.into(),
    }
}

/// `GET /api/v1/documents/{documentId}/attempts`
#[utoipa::path(
    get,
    path = "/api/v1/documents/{documentId}/attempts",
    tag = "documents",
    operation_id = "documents.attempts",
    params(("documentId" = String, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Attempts in order", body = Vec<AttemptResponse>),
        (status = 404, description = "Document not found", body = ApiError),
    )
)]
pub async fn list_attempts(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> ApiResponse<Vec<AttemptResponse>> {
    match state.pipeline.attempts(&document_id).await {
        Ok(attempts) => {
            let total = attempts.len() as u64;
            ApiResponse::success_with_meta(
                attempts.into_iter().map(Into::into).collect(),
                ResponseMeta { total: Some(total) },
            )
        }
        Err(e) => e.into(),
    }
}

/// `GET /api/v1/documents/{documentId}/audit`
#[utoipa::path(
    get,
    path = "/api/v1/documents/{documentId}/audit",
    tag = "documents",
    operation_id = "documents.audit",
    params(("documentId" = String, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Audit trail, oldest first", body = Vec<AuditEntryResponse>),
        (status = 404, description = "Document not found", body = ApiError),
    )
)]
pub async fn list_audit(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> ApiResponse<Vec<AuditEntryResponse>> {
    match state.pipeline.audit_trail(&document_id).await {
        Ok(entries) => {
            let total = entries.len() as u64;
            ApiResponse::success_with_meta(
                entries.into_iter().map(Into::into).collect(),
                ResponseMeta { total: Some(total) },
            )
        }
        Err(e) => e.into(),
    }
}
