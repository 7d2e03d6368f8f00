//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection (in-memory or Postgres) and background tasks
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and parsing helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use ctms_infra::AuthService;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(auth: Arc<AuthService>) -> Router {
    // Protected routes: require a bearer session token.
    let protected = routes::protected_router()
        .layer(axum::middleware::from_fn(middleware::bearer_middleware));

    Router::new()
        .merge(routes::public_router())
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(Extension(auth))
                .layer(axum::middleware::from_fn(middleware::client_context_middleware)),
        )
}
