//! RBAC inspection endpoints for answering "why was this request denied?".

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;

use ctms_auth::{Action, Permission, Resource};
use ctms_infra::AuthService;

use crate::app::dto::{ExplainQuery, parse_role};
use crate::app::errors;
use crate::context::BearerToken;

pub fn router() -> Router {
    Router::new()
        .route("/roles", get(list_roles))
        .route("/explain", get(explain_authorization_decision))
}

/// GET /admin/rbac/roles - List all roles and their permissions
pub async fn list_roles(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
) -> axum::response::Response {
    match auth.rbac_registry(bearer.token(), Utc::now()).await {
        Ok(registry) => (StatusCode::OK, Json(registry)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /admin/rbac/explain?role=&resource=&action=
pub async fn explain_authorization_decision(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Query(query): Query<ExplainQuery>,
) -> axum::response::Response {
    let role = match parse_role(&query.role) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let permission = match (query.resource.parse::<Resource>(), query.action.parse::<Action>()) {
        (Ok(resource), Ok(action)) => Permission::new(resource, action),
        _ => {
            return errors::bad_request(format!(
                "unknown permission '{}.{}'",
                query.resource, query.action
            ));
        }
    };

    match auth.explain(bearer.token(), role, permission, Utc::now()).await {
        Ok(explanation) => (StatusCode::OK, Json(explanation)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}
