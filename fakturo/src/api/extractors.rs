use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;

use crate::error::FakturoError;

/// JSON body extractor whose rejections become `FakturoError::Validation`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(FakturoError))]
pub struct AppJson<T>(pub T);

impl From<JsonRejection> for FakturoError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => {
                let message = err.body_text();
                match missing_field(&message) {
                    Some(field) => FakturoError::Validation(format!("Missing required field: {field}")),
                    None => FakturoError::Validation(format!("Invalid JSON: {message}")),
                }
            }
            JsonRejection::JsonSyntaxError(err) => {
                FakturoError::Validation(format!("JSON syntax error: {}", err.body_text()))
            }
            JsonRejection::MissingJsonContentType(_) => FakturoError::Validation(
                "Missing `Content-Type: application/json` header".to_string(),
            ),
            JsonRejection::BytesRejection(_) => {
                FakturoError::Internal("Failed to read request body".to_string())
            }
            other => FakturoError::Validation(other.body_text()),
        }
    }
}

fn missing_field(message: &str) -> Option<&str> {
    let prefix = "missing field `";
    let start = message.find(prefix)? + prefix.len();
    let rest = message.get(start..)?;
    rest.get(..rest.find('`')?)
}
