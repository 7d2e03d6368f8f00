use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use chrono::Utc;

use ctms_infra::AuthService;

use crate::app::dto::RecordEventRequest;
use crate::app::errors;
use crate::context::{BearerToken, ClientContext};

/// POST /events - log a business event for the calling user
pub async fn record_event(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(bearer): Extension<BearerToken>,
    Extension(client): Extension<ClientContext>,
    Json(body): Json<RecordEventRequest>,
) -> axum::response::Response {
    let entry = match body.into_entry(client.ip_address()) {
        Ok(entry) => entry,
        Err(resp) => return resp,
    };

    match auth.record_event(bearer.token(), entry, Utc::now()).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}
