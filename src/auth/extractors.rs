use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use tracing::warn;

use super::jwt::JwtKeys;
use crate::{
    error::ApiError,
    state::AppState,
    store::{Role, User},
};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "jwt";

const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Pulls the session token from `Authorization: Bearer <token>`, falling
/// back to the `jwt` cookie.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    cookie_value(headers, SESSION_COOKIE)
}

pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((k, v)) = pair.trim().split_once('=') {
                if k == name {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

/// Full protection chain: token presence, signature and expiry, user still
/// exists, password unchanged since issuance.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = extract_token(headers).ok_or(ApiError::Unauthenticated)?;

    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify(&token).map_err(|_| {
        warn!("invalid or expired token");
        ApiError::InvalidToken
    })?;

    let user = state
        .store
        .find_by_id(claims.sub)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::TokenUserGone)?;

    if user.changed_password_after(claims.iat) {
        warn!(user_id = %user.id, "token predates password change");
        return Err(ApiError::StalePassword);
    }

    Ok(user)
}

/// Extractor form of route protection; rejects with 401 on any failure.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = authenticate(state, &parts.headers).await?;
        Ok(CurrentUser(user))
    }
}

/// Best-effort identity for pages that render differently when logged in.
/// Never rejects; every failure becomes `None`.
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(authenticate(state, &parts.headers).await.ok()))
    }
}

/// Protection plus role restriction to the admin set; 403 for any other
/// role.
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = authenticate(state, &parts.headers).await?;
        if !user.role.permits(ADMIN_ONLY) {
            warn!(user_id = %user.id, role = ?user.role, "role not permitted");
            return Err(ApiError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = headers_with(header::AUTHORIZATION, "Bearer from-header");
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("jwt=from-cookie"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn falls_back_to_session_cookie() {
        let headers = headers_with(header::COOKIE, "theme=dark; jwt=abc.def.ghi; lang=en");
        assert_eq!(extract_token(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn missing_token_yields_none() {
        assert_eq!(extract_token(&HeaderMap::new()), None);
        let headers = headers_with(header::COOKIE, "theme=dark");
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        let headers = headers_with(header::AUTHORIZATION, "Basic dXNlcjpwYXNz");
        assert_eq!(extract_token(&headers), None);
    }
}
