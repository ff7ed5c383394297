use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;

use crate::error::AppError;
use crate::models::chair::Chair;
use crate::state::AppState;

pub const CHAIR_SESSION_COOKIE: &str = "chair_session";

/// Chair resolved from the `chair_session` cookie, via the credential cache
/// first and the store on a miss.
pub struct AuthenticatedChair(pub Chair);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedChair {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts).ok_or_else(|| {
            AppError::Unauthorized(format!("{CHAIR_SESSION_COOKIE} cookie is required"))
        })?;

        if let Some(chair) = state.cache.chair_by_token(&token) {
            return Ok(Self(chair));
        }

        let chair = state
            .store
            .transaction(|tx| tx.chair_by_access_token(&token))
            .await?
            .ok_or_else(|| AppError::Unauthorized("invalid access token".to_string()))?;
        state.cache.remember_chair(chair.clone());
        Ok(Self(chair))
    }
}

fn session_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    jar.get(CHAIR_SESSION_COOKIE)
        .map(|cookie| cookie.value_trimmed().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::session_token;

    #[test]
    fn token_is_found_among_other_cookies() {
        let (parts, _) = Request::builder()
            .header("cookie", "theme=dark; chair_session=abc123; lang=en")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(session_token(&parts).as_deref(), Some("abc123"));
    }

    #[test]
    fn empty_or_missing_token_is_ignored() {
        let (parts, _) = Request::builder()
            .header("cookie", "chair_session=")
            .body(())
            .unwrap()
            .into_parts();
        assert!(session_token(&parts).is_none());

        let (parts, _) = Request::builder().body(()).unwrap().into_parts();
        assert!(session_token(&parts).is_none());
    }

    #[test]
    fn quoted_token_is_unwrapped() {
        let (parts, _) = Request::builder()
            .header("cookie", "chair_session=\"abc123\"")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(session_token(&parts).as_deref(), Some("abc123"));
    }

    #[test]
    fn token_may_arrive_in_a_separate_cookie_header() {
        let (parts, _) = Request::builder()
            .header("cookie", "theme=dark")
            .header("cookie", "chair_session=xyz")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(session_token(&parts).as_deref(), Some("xyz"));
    }
}
