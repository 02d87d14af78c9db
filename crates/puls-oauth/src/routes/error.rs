use std::borrow::Cow;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use crate::{auth::LoginError, db::identity_errors::StoreError};

#[derive(Debug)]
pub struct ErrorResponse {
    status: StatusCode,
    message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub(crate) fn login_error_response(error: LoginError) -> ErrorResponse {
    match &error {
        LoginError::ProviderExchange(err) => warn!(?err, "provider error during oauth login"),
        LoginError::Store(err) => warn!(?err, "store error during oauth login"),
        LoginError::InvalidRequest(reason) => warn!(%reason, "rejected oauth login request"),
        _ => {}
    }

    let (status, code) = classify_login_error(&error);
    ErrorResponse::new(status, code)
}

pub(crate) fn store_error_response(error: StoreError) -> ErrorResponse {
    warn!(?error, "store error");
    ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
}

fn classify_login_error(error: &LoginError) -> (StatusCode, Cow<'static, str>) {
    match error {
        LoginError::InvalidRequest(_) => {
            (StatusCode::BAD_REQUEST, Cow::Borrowed("invalid_request"))
        }
        LoginError::InvalidState => (StatusCode::BAD_REQUEST, Cow::Borrowed("invalid_state")),
        LoginError::Unauthenticated => {
            (StatusCode::UNAUTHORIZED, Cow::Borrowed("unauthenticated"))
        }
        LoginError::AlreadyLinked => (StatusCode::CONFLICT, Cow::Borrowed("already_linked")),
        LoginError::ProviderExchange(_) => {
            (StatusCode::BAD_GATEWAY, Cow::Borrowed("provider_error"))
        }
        LoginError::Store(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Cow::Borrowed("internal_error"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_errors_map_to_status_codes() {
        let cases = [
            (LoginError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST, "invalid_request"),
            (LoginError::InvalidState, StatusCode::BAD_REQUEST, "invalid_state"),
            (LoginError::Unauthenticated, StatusCode::UNAUTHORIZED, "unauthenticated"),
            (LoginError::AlreadyLinked, StatusCode::CONFLICT, "already_linked"),
            (
                LoginError::ProviderExchange(anyhow::anyhow!("boom")),
                StatusCode::BAD_GATEWAY,
                "provider_error",
            ),
            (
                LoginError::Store(StoreError::NotFound),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
        ];

        for (error, status, code) in cases {
            assert_eq!(classify_login_error(&error), (status, Cow::Borrowed(code)));
        }
    }
}
