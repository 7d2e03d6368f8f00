//! Session endpoints: login, logout, password change and token checks.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use ctms_infra::{AuthService, retry_transient};

use crate::app::dto::{AuthorizeQuery, ChangePasswordRequest, LoginRequest, SessionView};
use crate::app::errors;
use crate::context::{BearerToken, ClientContext};

/// POST /auth/login
pub async fn login(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(client): Extension<ClientContext>,
    Json(body): Json<LoginRequest>,
) -> axum::response::Response {
    match auth
        .login(
            &body.username,
            &body.password,
            client.ip_address(),
            client.user_agent(),
            Utc::now(),
        )
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /auth/logout
pub async fn logout(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
) -> axum::response::Response {
    match auth.logout(bearer.token(), Utc::now()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /auth/password
pub async fn change_password(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Json(body): Json<ChangePasswordRequest>,
) -> axum::response::Response {
    match auth
        .change_password(bearer.token(), &body.old_password, &body.new_password, Utc::now())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /auth/whoami
pub async fn whoami(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
) -> axum::response::Response {
    let now = Utc::now();
    match retry_transient(|| auth.whoami(bearer.token(), now)).await {
        Ok(principal) => (StatusCode::OK, Json(principal)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /auth/sessions - the caller's live sessions (tokens are never returned)
pub async fn sessions(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
) -> axum::response::Response {
    let now = Utc::now();
    match retry_transient(|| auth.active_sessions(bearer.token(), now)).await {
        Ok(sessions) => {
            let sessions: Vec<SessionView> = sessions.into_iter().map(SessionView::from).collect();
            (StatusCode::OK, Json(serde_json::json!({ "sessions": sessions }))).into_response()
        }
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /authorize?resource=&action=
pub async fn authorize(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Query(query): Query<AuthorizeQuery>,
) -> axum::response::Response {
    match auth
        .authorize(bearer.token(), &query.resource, &query.action, Utc::now())
        .await
    {
        Ok(principal) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "allowed": true,
                "user": principal,
            })),
        )
            .into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}
