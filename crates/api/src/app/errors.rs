use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use ctms_auth::AuthError;

pub fn auth_error_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials
        | AuthError::InvalidToken
        | AuthError::ExpiredSession
        | AuthError::AccountInactive => StatusCode::UNAUTHORIZED,
        AuthError::AccountLocked { .. } => StatusCode::LOCKED,
        AuthError::PermissionDenied { .. } | AuthError::UnknownPermission(_) => StatusCode::FORBIDDEN,
        AuthError::DuplicateIdentity => StatusCode::CONFLICT,
        AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::UserNotFound => StatusCode::NOT_FOUND,
        AuthError::TransientStoreFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Store(_) | AuthError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn auth_error_to_response(err: AuthError) -> axum::response::Response {
    let status = auth_error_status(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    json_error(status, err.code(), err.public_message())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn bad_request(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn status_mapping_follows_error_kind() {
        assert_eq!(auth_error_status(&AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(
            auth_error_status(&AuthError::AccountLocked { until: Utc::now() }),
            StatusCode::LOCKED
        );
        assert_eq!(auth_error_status(&AuthError::DuplicateIdentity), StatusCode::CONFLICT);
        assert_eq!(
            auth_error_status(&AuthError::TransientStoreFailure("timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(auth_error_status(&AuthError::UserNotFound), StatusCode::NOT_FOUND);
    }
}
