use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use tracing::warn;

use crate::{
    AppState, configure_user_scope,
    db::{identity_errors::StoreError, remember_tokens::hash_token, users::User},
};

/// Forum user resolved from the remember-me cookie.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Looks up the user behind the remember-me cookie, refreshing its activity
/// timestamp. Unknown or missing tokens resolve to `None`.
pub async fn current_user(state: &AppState, jar: &CookieJar) -> Result<Option<User>, StoreError> {
    let Some(cookie) = jar.get(state.config().remember_cookie()) else {
        return Ok(None);
    };
    if cookie.value().is_empty() {
        return Ok(None);
    }

    let identities = state.identities();
    let Some(token) = identities
        .touch_remember_token(&hash_token(cookie.value()))
        .await?
    else {
        warn!("remember token not recognised");
        return Ok(None);
    };

    let user = identities.find_user(token.user_id).await?;
    match &user {
        Some(user) => {
            configure_user_scope(user.id, Some(user.username.as_str()), user.email.as_deref())
        }
        None => warn!("user `{}` missing for remember token", token.user_id),
    }
    Ok(user)
}

pub async fn require_user(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match current_user(&state, &jar).await {
        Ok(Some(user)) => {
            req.extensions_mut().insert(CurrentUser(user));
            next.run(req).await
        }
        Ok(None) => StatusCode::UNAUTHORIZED.into_response(),
        Err(error) => {
            warn!(?error, "failed to resolve remember token");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
