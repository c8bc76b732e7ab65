use anyhow::Context;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use super::repo::User;
use crate::{error::AuthError, state::AppState};

/// Resolves the session token (cookie first, then `Authorization: Bearer`)
/// into the stored user. Protected handlers take this as an argument.
pub struct CurrentUser(pub User);

fn bearer_token(parts: &Parts) -> Option<String> {
    let auth = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    let (scheme, token) = auth.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = state
            .cookie
            .read(&jar)
            .or_else(|| bearer_token(parts))
            .ok_or(AuthError::Unauthorized("Unauthorized - No Token Provided"))?;

        let claims = state.keys.verify(&token).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            AuthError::Unauthorized("Unauthorized - Invalid Token")
        })?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await
            .context("load session user")?
            .ok_or(AuthError::UserNotFound)?;

        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{header::AUTHORIZATION, Request};

    use super::*;

    fn parts_with(auth: &str) -> Parts {
        Request::builder()
            .header(AUTHORIZATION, auth)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        for header in ["Bearer abc", "bearer abc", "BEARER abc", "bEaReR abc", "Bearer   abc "] {
            assert_eq!(bearer_token(&parts_with(header)).as_deref(), Some("abc"), "{header}");
        }
    }

    #[test]
    fn other_schemes_and_empty_tokens_are_ignored() {
        for header in ["Basic abc", "Bearerabc", "Bearer", "Bearer    ", "abc"] {
            assert!(bearer_token(&parts_with(header)).is_none(), "{header}");
        }
        let parts = Request::builder().body(()).unwrap().into_parts().0;
        assert!(bearer_token(&parts).is_none());
    }
}
