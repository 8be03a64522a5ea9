//! Set-Cookie values for the authentication token

use axum::http::{HeaderValue, StatusCode};
use tracing::error;

use crate::constants::AUTH_COOKIE;

fn is_dev() -> bool {
    std::env::var("ENV").as_deref() != Ok("prod")
}

/// Session cookie carrying the authentication token
pub fn build_auth_cookie(token: &str) -> Result<HeaderValue, StatusCode> {
    let secure = if is_dev() { "" } else { " Secure;" };
    let cookie = format!(
        "{}={}; HttpOnly;{} SameSite=Lax; Path=/",
        AUTH_COOKIE, token, secure
    );
    cookie.parse().map_err(|_| {
        error!("failed to build auth cookie header");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub fn build_clear_auth_cookie() -> Result<HeaderValue, StatusCode> {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", AUTH_COOKIE)
        .parse()
        .map_err(|_| {
            error!("failed to build clearing auth cookie header");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_cookie_carries_the_token() {
        let cookie = build_auth_cookie("abc123").unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("AUTH=abc123;"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[test]
    fn clearing_cookie_expires_it() {
        let cookie = build_clear_auth_cookie().unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("AUTH=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn header_injection_is_rejected() {
        assert_eq!(
            build_auth_cookie("bad\nvalue"),
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }
}
