//! Admin routes for user management and the audit log.
//!
//! Every handler delegates the permission check to `AuthService`, which
//! audits denials; self-demotion and self-deactivation are refused there too.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;

use ctms_infra::{AuthService, retry_transient};

use crate::app::dto::{
    AuditQuery, ChangeRoleRequest, CreateUserBody, SetActiveRequest, UpdateProfileRequest,
    parse_role, parse_user_id,
};
use crate::app::errors;
use crate::app::routes::rbac;
use crate::context::BearerToken;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route("/users/:id", put(update_profile))
        .route("/users/:id/role", put(change_role))
        .route("/users/:id/active", put(set_active))
        .route("/users/:id/unlock", post(unlock_user))
        .route("/users/:id/reset-password", post(reset_password))
        .route("/audit", get(audit_log))
        .nest("/rbac", rbac::router())
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /admin/users - Create a new user
pub async fn create_user(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Json(body): Json<CreateUserBody>,
) -> axum::response::Response {
    let request = match body.into_request() {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match auth.create_user(bearer.token(), request, Utc::now()).await {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /admin/users - List users, newest first
pub async fn list_users(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
) -> axum::response::Response {
    let now = Utc::now();
    match retry_transient(|| auth.list_users(bearer.token(), now)).await {
        Ok(users) => (StatusCode::OK, Json(serde_json::json!({ "users": users }))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// PUT /admin/users/:id - edit email and/or full name
pub async fn update_profile(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Path(id): Path<String>,
    Json(body): Json<UpdateProfileRequest>,
) -> axum::response::Response {
    let user_id = match parse_user_id(&id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match auth
        .update_profile(
            bearer.token(),
            user_id,
            body.email.as_deref(),
            body.full_name.as_deref(),
            Utc::now(),
        )
        .await
    {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// PUT /admin/users/:id/role
pub async fn change_role(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Path(id): Path<String>,
    Json(body): Json<ChangeRoleRequest>,
) -> axum::response::Response {
    let (user_id, role) = match (parse_user_id(&id), parse_role(&body.role)) {
        (Ok(u), Ok(r)) => (u, r),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };

    match auth.change_role(bearer.token(), user_id, role, Utc::now()).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// PUT /admin/users/:id/active
pub async fn set_active(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Path(id): Path<String>,
    Json(body): Json<SetActiveRequest>,
) -> axum::response::Response {
    let user_id = match parse_user_id(&id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match auth
        .set_user_active(bearer.token(), user_id, body.active, Utc::now())
        .await
    {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /admin/users/:id/unlock
pub async fn unlock_user(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let user_id = match parse_user_id(&id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match auth.unlock_user(bearer.token(), user_id, Utc::now()).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /admin/users/:id/reset-password - returns the temporary password once
pub async fn reset_password(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let user_id = match parse_user_id(&id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match auth.reset_password(bearer.token(), user_id, Utc::now()).await {
        Ok(temporary_password) => (
            StatusCode::OK,
            Json(serde_json::json!({ "temporary_password": temporary_password })),
        )
            .into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /admin/audit?user_id=&action=&resource=&from=&to=&limit=
pub async fn audit_log(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Query(query): Query<AuditQuery>,
) -> axum::response::Response {
    let filter = match query.into_filter() {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    let now = Utc::now();
    match retry_transient(|| auth.audit_log(bearer.token(), &filter, now)).await {
        Ok(records) => {
            (StatusCode::OK, Json(serde_json::json!({ "records": records }))).into_response()
        }
        Err(e) => errors::auth_error_to_response(e),
    }
}
