use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        cookies::SessionCookie,
        dto::{LoginRequest, MessageResponse, PublicUser, SignupRequest, UpdateProfileRequest},
        extractors::CurrentUser,
        repo::User,
        services,
    },
    error::AuthError,
    images::services::upload_profile_picture,
    state::AppState,
};

const PROFILE_BODY_LIMIT: usize = 10 * 1024 * 1024; // 10MB of base64
const PICTURE_REQUIRED: AuthError = AuthError::MissingField("Profile picture is required");

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/check", get(check_auth))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/update-profile", put(update_profile))
        .layer(DefaultBodyLimit::max(PROFILE_BODY_LIMIT))
}

/// Malformed bodies report the route's own client error instead of axum's
/// plain-text rejection.
fn reject_body(rejection: JsonRejection, fallback: AuthError) -> AuthError {
    warn!(status = %rejection.status(), error = %rejection.body_text(), "rejected request body");
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AuthError::PayloadTooLarge
    } else {
        fallback
    }
}

#[instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, CookieJar, Json<PublicUser>), AuthError> {
    let Json(payload) = payload.map_err(|r| reject_body(r, AuthError::InvalidUserData))?;
    let user = services::register(state.users.as_ref(), payload).await?;

    let token = state.keys.mint(user.id).context("sign session token")?;
    let jar = state.cookie.attach(jar, token);

    Ok((StatusCode::CREATED, jar, Json(PublicUser::from(user))))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<PublicUser>), AuthError> {
    let Json(payload) = payload.map_err(|r| reject_body(r, AuthError::InvalidCredentials))?;
    let user = services::authenticate(state.users.as_ref(), &payload.email, payload.password).await?;

    let token = state.keys.mint(user.id).context("sign session token")?;
    let jar = state.cookie.attach(jar, token);

    Ok((jar, Json(PublicUser::from(user))))
}

#[instrument(skip_all)]
pub async fn logout(
    State(cookie): State<SessionCookie>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    (
        cookie.clear(jar),
        Json(MessageResponse {
            message: "Logged out successfully",
        }),
    )
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<User>, AuthError> {
    let Json(payload) = payload.map_err(|r| reject_body(r, PICTURE_REQUIRED))?;
    if payload.profile_picture.trim().is_empty() {
        return Err(PICTURE_REQUIRED);
    }

    let url = upload_profile_picture(state.storage.as_ref(), user.id, &payload.profile_picture)
        .await
        .context("upload profile picture")?;

    let updated = state
        .users
        .set_profile_picture(user.id, &url)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    info!(profile_picture = %updated.profile_picture, "profile picture updated");
    Ok(Json(updated))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn check_auth(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}
