//! Login, logout and account endpoints

use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, header::SET_COOKIE, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

use crate::AppState;
use crate::constants::AUTH_COOKIE;
use crate::models::{Authentication, Credentials};
use crate::services::auth::AuthError;
use crate::services::{cookies, error::LogErr};

pub fn routes() -> Router<Arc<AppState>> {
    // Brute force protection on the endpoints that take a password
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(6)
        .burst_size(10)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("Failed to build rate limit config");

    let rate_limit_layer = GovernorLayer {
        config: rate_limit_config.into(),
    };

    let credential_routes = Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .layer(rate_limit_layer);

    Router::new()
        .merge(credential_routes)
        .route("/logout", post(logout))
        .route("/password", post(change_password))
        .route("/me", get(get_me).delete(delete_me))
}

/// Token from the AUTH cookie, falling back to an `Authorization: Bearer` header
fn request_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    jar.get(AUTH_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        })
}

/// Extractor resolving the request's token to a live authentication
pub struct AuthUser(pub Authentication);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_request_parts(parts, state)
            .await
            .log_500("Cookie extraction error")?;

        let token = request_token(&jar, &parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;

        state
            .auth
            .authenticate_by_token(&token)
            .await
            .map(AuthUser)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Authentication body plus the cookie that carries its token
fn session_response(status: StatusCode, auth: Authentication) -> Result<Response, StatusCode> {
    let cookie = cookies::build_auth_cookie(&auth.id)?;
    Ok((status, [(SET_COOKIE, cookie)], Json(auth)).into_response())
}

/// POST /data/login
async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<Response, StatusCode> {
    let auth = state
        .auth
        .authenticate_by_credentials(&credentials)
        .await
        .ok_or(StatusCode::FORBIDDEN)?;

    session_response(StatusCode::OK, auth)
}

/// POST /data/register - create an account and log it in
async fn register(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<Response, StatusCode> {
    let auth = state
        .auth
        .register_user(&credentials)
        .await
        .map_err(|e| match e {
            AuthError::UserExists(_) => StatusCode::CONFLICT,
            AuthError::Invalid => StatusCode::BAD_REQUEST,
            AuthError::UnknownUser(_) => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

    session_response(StatusCode::CREATED, auth)
}

/// POST /data/logout - always clears the cookie, even without a live session
async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    if let Some(token) = request_token(&jar, &headers) {
        state.auth.remove_authentication(&token).await;
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::build_clear_auth_cookie()?);
    Ok(response)
}

#[derive(Deserialize)]
struct PasswordChange {
    password: String,
}

/// POST /data/password
async fn change_password(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Json(req): Json<PasswordChange>,
) -> Result<StatusCode, StatusCode> {
    state
        .auth
        .change_password(&auth, &req.password)
        .await
        .log_status("Change password error", StatusCode::BAD_REQUEST)?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /data/me
async fn get_me(AuthUser(auth): AuthUser) -> Json<Authentication> {
    Json(auth)
}

/// DELETE /data/me - remove the account and every session it has
async fn delete_me(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
) -> Result<Response, StatusCode> {
    state.auth.remove_user(&auth.user).await;

    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::build_clear_auth_cookie()?);
    Ok(response)
}
