use axum::{
    Router,
    routing::{get, post},
};

pub mod admin;
pub mod auth;
pub mod events;
pub mod rbac;
pub mod system;

/// Routes reachable without a session.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/auth/login", post(auth::login))
}

/// Routes that require a bearer session token.
pub fn protected_router() -> Router {
    Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/password", post(auth::change_password))
        .route("/auth/whoami", get(auth::whoami))
        .route("/auth/sessions", get(auth::sessions))
        .route("/authorize", get(auth::authorize))
        .route("/events", post(events::record_event))
        .nest("/admin", admin::router())
}
