use axum::{
    Json, Router,
    extract::{Extension, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use tracing::{info, warn};
use utils::api::oauth::{ForumSettingsResponse, LinkedProvidersResponse, UnlinkRequest};

use super::error::{ErrorResponse, login_error_response, store_error_response};
use crate::{
    AppState,
    auth::{
        AuthSession, CurrentUser, Flow, LoginQuery, Provider, RequestContext, SESSION_COOKIE,
        current_user, generate_session_id,
    },
};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/oauth/login", get(login))
        .route("/oauth/link", get(link))
        .route("/oauth/settings", get(settings))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/oauth/unlink", post(unlink))
        .route("/oauth/providers", get(providers))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> Response {
    run_flow(state, Flow::Login, user_agent(&headers), jar, query).await
}

pub async fn link(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> Response {
    run_flow(state, Flow::Link, user_agent(&headers), jar, query).await
}

/// Browsers may send obs-text in `User-Agent`; only the device pattern matters here.
fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

async fn run_flow(
    state: AppState,
    flow: Flow,
    user_agent: Option<String>,
    jar: CookieJar,
    query: LoginQuery,
) -> Response {
    let (session_id, session) = match load_session(&state, &jar).await {
        Ok(loaded) => loaded,
        Err(response) => return response,
    };
    let had_state = session.oauth2state.is_some();

    let user = match flow {
        Flow::Login => None,
        Flow::Link => match current_user(&state, &jar).await {
            Ok(user) => user,
            Err(error) => return store_error_response(error).into_response(),
        },
    };

    let mut ctx = RequestContext::new(user_agent, session).with_user(user);

    let handler = state.login();
    let result = match flow {
        Flow::Login => handler.handle_login(&query, &mut ctx).await,
        Flow::Link => handler.handle_link(&query, &mut ctx).await,
    };

    // only a start leg leaves a state behind; callbacks consume it even when they fail
    let jar = if ctx.session.oauth2state.is_some() {
        if let Err(error) = state.sessions().save(&session_id, &ctx.session).await {
            return store_error_response(error).into_response();
        }
        jar.add(session_cookie(session_id, state.secure_cookies()))
    } else if had_state {
        if let Err(error) = state.sessions().delete(&session_id).await {
            return store_error_response(error).into_response();
        }
        jar
    } else {
        jar
    };

    match result {
        Ok(outcome) => (jar, outcome).into_response(),
        Err(error) => (jar, login_error_response(error)).into_response(),
    }
}

async fn load_session(
    state: &AppState,
    jar: &CookieJar,
) -> Result<(String, AuthSession), Response> {
    let Some(session_id) = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|id| !id.is_empty())
    else {
        return Ok((generate_session_id(), AuthSession::default()));
    };

    match state.sessions().load(&session_id).await {
        Ok(session) => Ok((session_id, session.unwrap_or_default())),
        Err(error) => Err(store_error_response(error).into_response()),
    }
}

fn session_cookie(session_id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

pub async fn unlink(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(payload): Json<UnlinkRequest>,
) -> Response {
    let provider = match payload.provider.parse::<Provider>() {
        Ok(provider) => provider,
        Err(error) => {
            warn!(%error, "unlink requested for unknown provider");
            return ErrorResponse::new(StatusCode::BAD_REQUEST, "invalid_request").into_response();
        }
    };

    match state.identities().remove_link(user.id, provider).await {
        Ok(true) => {
            info!(%provider, user_id = %user.id, "unlinked provider account");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => ErrorResponse::new(StatusCode::NOT_FOUND, "not_found").into_response(),
        Err(error) => store_error_response(error).into_response(),
    }
}

pub async fn providers(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<LinkedProvidersResponse>, ErrorResponse> {
    let linked: Vec<Provider> = state
        .identities()
        .list_links(user.id)
        .await
        .map_err(store_error_response)?
        .into_iter()
        .filter_map(|link| link.provider.parse().ok())
        .collect();

    Ok(Json(LinkedProvidersResponse {
        is_qq_linked: linked.contains(&Provider::Qq),
        is_wx_linked: linked.contains(&Provider::Wx),
        is_sina_linked: linked.contains(&Provider::Sina),
        providers_count: linked.len() as u32,
    }))
}

pub async fn settings(State(state): State<AppState>) -> Json<ForumSettingsResponse> {
    let config = state.config();
    Json(ForumSettingsResponse {
        oauth_openqq: config.is_enabled(Provider::Qq),
        oauth_openwx: config.is_enabled(Provider::Wx),
        oauth_opensina: config.is_enabled(Provider::Sina),
    })
}
