use std::time::Duration;

use axum::extract::FromRef;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::{config::CookieConfig, state::AppState};

/// Policy for the cookie that carries the session token.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    pub name: String,
    pub secure: bool,
    pub max_age: Duration,
}

impl FromRef<AppState> for SessionCookie {
    fn from_ref(state: &AppState) -> Self {
        state.cookie.clone()
    }
}

impl SessionCookie {
    pub fn from_config(cfg: &CookieConfig, max_age: Duration) -> Self {
        Self {
            name: cfg.name.clone(),
            secure: cfg.secure,
            max_age,
        }
    }

    fn build(&self, value: String, max_age: time::Duration) -> Cookie<'static> {
        Cookie::build((self.name.clone(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(self.secure)
            .max_age(max_age)
            .build()
    }

    pub fn attach(&self, jar: CookieJar, token: String) -> CookieJar {
        let secs = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        let max_age = time::Duration::seconds(secs);
        jar.add(self.build(token, max_age))
    }

    /// Overwrites the session with an empty value that expires immediately.
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.build(String::new(), time::Duration::ZERO))
    }

    /// Token from the jar; an empty (logged-out) value counts as absent.
    pub fn read(&self, jar: &CookieJar) -> Option<String> {
        jar.get(&self.name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }
}
