//! Bearer API-key authentication for v1 routes.
//!
//! Everything except `/health`, `/openapi.json` and `/docs` requires
//! `Authorization: Bearer <key>` with a key from `FAKTURO_API_KEYS`. Errors
//! use the v1 [`ApiResponse`] envelope.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::state::AppState;

use super::response::{ApiResponse, ErrorCode};

/// With no keys configured the server still starts, but every protected
/// route answers 401.
pub async fn v1_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if state.config.server.api_keys.is_empty() {
        return ApiResponse::<()>::error(
            ErrorCode::Unauthorized,
            "API keys not configured. Set FAKTURO_API_KEYS to enable access.",
        )
        .into_response();
    }

    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(token) => token,
            None => {
                return ApiResponse::<()>::error(
                    ErrorCode::Unauthorized,
                    "Invalid authorization header format. Expected: Bearer <token>",
                )
                .into_response();
            }
        },
        None => {
            return ApiResponse::<()>::error(
                ErrorCode::Unauthorized,
                "Missing authorization header",
            )
            .into_response();
        }
    };

    if state.config.server.api_keys.iter().any(|key| key == token) {
        next.run(request).await
    } else {
        ApiResponse::<()>::error(ErrorCode::Unauthorized, "Invalid API key").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn build_test_app(api_keys: Vec<String>) -> (tempfile::TempDir, Router) {
        let (dir, state, _receiver) = AppState::for_tests(api_keys).await;

        async fn protected_handler() -> &'static str {
            "protected"
        }

        async fn health_handler() -> &'static str {
            "healthy"
        }

        let public_routes = Router::new().route("/health", get(health_handler));

        let protected_routes = Router::new()
            .route("/protected", get(protected_handler))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                v1_auth_middleware,
            ));

        let app = Router::new()
            .merge(public_routes)
            .merge(protected_routes)
            .with_state(state);
        (dir, app)
    }

    async fn parse_error_body(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get_request(uri: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_v1_auth_rejects_when_no_keys_configured() {
        let (_dir, app) = build_test_app(vec![]).await;

        let response = app.oneshot(get_request("/protected", None)).await.unwrap();

        let (status, json) = parse_error_body(response).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "unauthorized");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("FAKTURO_API_KEYS"));
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn test_v1_auth_allows_with_valid_key() {
        let (_dir, app) = build_test_app(vec!["k1".to_string(), "k2".to_string()]).await;

        let response = app
            .oneshot(get_request("/protected", Some("Bearer k2")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_v1_auth_rejects_invalid_key() {
        let (_dir, app) = build_test_app(vec!["k1".to_string()]).await;

        let response = app
            .oneshot(get_request("/protected", Some("Bearer wrong")))
            .await
            .unwrap();

        let (status, json) = parse_error_body(response).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["message"], "Invalid API key");
    }

    #[tokio::test]
    async fn test_v1_auth_rejects_non_bearer_scheme() {
        let (_dir, app) = build_test_app(vec!["k1".to_string()]).await;

        let response = app
            .oneshot(get_request("/protected", Some("Basic azE6")))
            .await
            .unwrap();

        let (status, json) = parse_error_body(response).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Bearer <token>"));
    }

    #[tokio::test]
    async fn test_v1_auth_rejects_missing_header() {
        let (_dir, app) = build_test_app(vec!["k1".to_string()]).await;

        let response = app.oneshot(get_request("/protected", None)).await.unwrap();

        let (status, json) = parse_error_body(response).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["message"], "Missing authorization header");
    }

    #[tokio::test]
    async fn test_v1_health_bypasses_auth() {
        let (_dir, app) = build_test_app(vec!["secret".to_string()]).await;

        let response = app.oneshot(get_request("/health", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
