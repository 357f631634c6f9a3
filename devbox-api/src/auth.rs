use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};

/// Header names carrying the owner id, most specific first.
pub const USER_HEADERS: &[&str] = &["x-devbox-user", "x-forwarded-user", "x-user"];

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
    pub email: Option<String>,
}

/// Auth middleware - extracts the owner id set by the fronting proxy
///
/// An authenticating proxy in front of devbox-api sets `x-devbox-user`. oauth2-proxy's
/// `x-forwarded-user` is accepted too, and `x-user` serves local development.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let username = USER_HEADERS
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let email = req
        .headers()
        .get("x-devbox-email")
        .or_else(|| req.headers().get("x-forwarded-email"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let username = username.ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut()
        .insert(AuthenticatedUser { username, email });

    Ok(next.run(req).await)
}
