use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::api::state::AppState;

use super::handlers;
use super::middleware::v1_auth_middleware;

pub fn v1_router(state: AppState) -> Router<AppState> {
    let documents = Router::new()
        .route("/{documentId}", get(handlers::documents::get_document))
        .route(
            "/{documentId}/cancel",
            post(handlers::documents::cancel_document),
        )
        .route(
            "/{documentId}/attempts",
            get(handlers::documents::list_attempts),
        )
        .route("/{documentId}/audit", get(handlers::documents::list_audit));

    let reviews = Router::new()
        .route("/", get(handlers::reviews::list_reviews))
        .route(
            "/{documentId}/complete",
            post(handlers::reviews::complete_review),
        );

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/openapi.json", get(super::openapi::openapi_json))
        .merge(super::openapi::redoc_router());

    let protected_routes = Router::new()
        .route(
            "/documents:upload",
            post(handlers::documents::upload_document),
        )
        .nest("/documents", documents)
        .nest("/reviews", reviews)
        .route("/engines", get(handlers::engines::list_engines))
        .route_layer(middleware::from_fn_with_state(state, v1_auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
