//! Request authentication: bearer header first, `access_token` cookie second.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    RequestPartsExt,
};
use tower_cookies::{cookie::SameSite, Cookie, Cookies};

use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::models::User;
use crate::core::shared::state::AppState;
use crate::security::jwt::extract_bearer_token;

pub const AUTH_COOKIE: &str = "access_token";
pub const LOGIN_PATH: &str = "/login";

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .map(str::to_string)
}

/// API routes answer with JSON errors, everything else is a browser page.
pub fn is_api_path(path: &str) -> bool {
    path.contains("/api/")
}

/// Browser pages are sent to the login form instead of getting a 401 body.
pub fn rejection_for(path: &str, err: TaxError) -> Response {
    if matches!(err, TaxError::Unauthenticated(_)) && !is_api_path(path) {
        return Redirect::to(LOGIN_PATH).into_response();
    }
    err.into_response()
}

/// The caller's local account, resolved from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let path = parts.uri.path().to_string();

        let token = match bearer_from_headers(&parts.headers) {
            Some(token) => token,
            None => match parts.extract::<Cookies>().await {
                Ok(cookies) => cookies
                    .get(AUTH_COOKIE)
                    .map(|c| c.value().to_string())
                    .ok_or_else(|| {
                        rejection_for(
                            &path,
                            TaxError::Unauthenticated("Authentication required".into()),
                        )
                    })?,
                Err(_) => {
                    return Err(rejection_for(
                        &path,
                        TaxError::Unauthenticated("Authentication required".into()),
                    ))
                }
            },
        };

        state
            .identity()
            .resolve(&token)
            .await
            .map(AuthenticatedUser)
            .map_err(|e| rejection_for(&path, e))
    }
}

/// Copies the `access_token` cookie into an `Authorization` header when the
/// request carries no bearer token of its own.
pub async fn cookie_to_bearer(
    cookies: Cookies,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !request.headers().contains_key(header::AUTHORIZATION) {
        if let Some(cookie) = cookies.get(AUTH_COOKIE) {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", cookie.value())) {
                request.headers_mut().insert(header::AUTHORIZATION, value);
            }
        }
    }
    next.run(request).await
}

pub fn create_auth_cookie(token: &str, expires_in_minutes: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, token.to_string()))
        .path("/")
        .secure(secure)
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::minutes(expires_in_minutes))
        .build()
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, ""))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::ZERO)
        .build()
}

pub fn require_admin(user: &User) -> TaxResult<()> {
    if user.is_admin || user.is_top_level_admin {
        Ok(())
    } else {
        Err(TaxError::Unauthorized("Admin access required".into()))
    }
}

pub fn require_top_level_admin(user: &User) -> TaxResult<()> {
    if user.is_top_level_admin {
        Ok(())
    } else {
        Err(TaxError::Unauthorized("Top-level admin access required".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_api_paths() {
        assert!(is_api_path("/api/v1/register"));
        assert!(is_api_path("/admin/api/users"));
        assert!(is_api_path("/topadmin/api/dashboard"));
        assert!(!is_api_path("/admin"));
        assert!(!is_api_path("/logout"));
    }

    #[test]
    fn test_browser_rejection_redirects() {
        let response = rejection_for("/admin", TaxError::Unauthenticated("no".into()));
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            LOGIN_PATH
        );

        let response = rejection_for("/api/v1/register", TaxError::Unauthenticated("no".into()));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = rejection_for("/admin", TaxError::NotFound("gone".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_auth_cookie_attributes() {
        let cookie = create_auth_cookie("jwt-value", 30, false);
        assert_eq!(cookie.name(), AUTH_COOKIE);
        assert_eq!(cookie.value(), "jwt-value");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::minutes(30)));
    }
}
