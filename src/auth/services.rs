use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use super::{
    dto::SignupRequest,
    password::{hash_password_blocking, verify_password_blocking},
    repo::{NewUser, User, UserStore},
};
use crate::error::AuthError;

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Field checks run before the store is touched. A short non-empty password
/// wins over every other problem; an empty or blank one counts as missing.
pub(crate) fn validate_signup(req: &SignupRequest) -> Result<(), AuthError> {
    let pw_len = req.password.chars().count();
    if pw_len > 0 && pw_len < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    if req.full_name.trim().is_empty()
        || req.email.trim().is_empty()
        || req.password.trim().is_empty()
    {
        return Err(AuthError::MissingField("All fields are required"));
    }
    if !is_valid_email(&normalize_email(&req.email)) {
        return Err(AuthError::InvalidUserData);
    }
    Ok(())
}

/// Validates, hashes and persists a new account. The caller mints the
/// session only after this returns.
pub async fn register(store: &dyn UserStore, req: SignupRequest) -> Result<User, AuthError> {
    validate_signup(&req)?;
    let email = normalize_email(&req.email);
    let full_name = req.full_name.trim();

    if store.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AuthError::DuplicateEmail);
    }

    let hash = hash_password_blocking(req.password).await?;
    let user = store
        .create(NewUser {
            full_name,
            email: &email,
            password_hash: &hash,
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

/// Checks credentials. Unknown email and wrong password are
/// indistinguishable to the caller.
pub async fn authenticate(
    store: &dyn UserStore,
    email: &str,
    password: String,
) -> Result<User, AuthError> {
    let email = normalize_email(email);
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }

    let Some(user) = store.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AuthError::InvalidCredentials);
    };

    if !verify_password_blocking(password, user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AuthError::InvalidCredentials);
    }

    info!(user_id = %user.id, "user logged in");
    Ok(user)
}
