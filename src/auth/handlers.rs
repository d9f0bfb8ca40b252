use axum::{
    extract::{FromRef, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            is_valid_email, CreateAdminRequest, ForgotPasswordRequest, LoginRequest,
            MessageResponse, PublicUser, ResetPasswordRequest, SessionResponse, SignupRequest,
            TokenResponse, UpdatePasswordRequest, UpdateUserRequest, UserData, UserResponse,
        },
        extractors::{AdminUser, CurrentUser, MaybeUser, SESSION_COOKIE},
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        reset::{self, RESET_TOKEN_TTL},
    },
    error::{ApiError, ApiResult},
    notify::reset_email_html,
    state::AppState,
    store::{NewUser, Role, User},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/logout", get(logout))
        .route("/users/me", get(get_me))
        .route("/users/session", get(session))
        .route("/users/forgotPassword", post(forgot_password))
        .route("/users/resetPassword/:token", patch(reset_password))
        .route("/users/updatePassword", patch(update_password))
        .route("/users/createAdmin", post(create_admin))
        .route("/users/:id", patch(update_user))
}

fn session_cookie(value: &str, max_age: u64, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={value}; Path=/; Max-Age={max_age}; HttpOnly");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Issues a session token, sets the `jwt` cookie and returns the sanitized
/// user in the success envelope.
fn send_token(state: &AppState, user: &User, status: StatusCode) -> ApiResult<Response> {
    let keys = JwtKeys::from_ref(state);
    let token = keys.sign(user.id).map_err(ApiError::Internal)?;
    let cookie = session_cookie(&token, keys.ttl_seconds(), state.config.is_production());
    let body = TokenResponse {
        status: "success",
        token,
        data: UserData {
            user: PublicUser::from(user),
        },
    };
    Ok((status, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

fn validate_new_password(password: &str, confirm: &str) -> ApiResult<()> {
    if password.len() < 8 {
        return Err(ApiError::Validation("Password too short".into()));
    }
    if password != confirm {
        return Err(ApiError::Validation("Passwords do not match".into()));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> ApiResult<Response> {
    payload.email = payload.email.trim().to_lowercase();
    payload.username = payload.username.trim().to_string();

    if payload.username.is_empty() {
        return Err(ApiError::Validation("Please provide a username".into()));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }
    validate_new_password(&payload.password, &payload.password_confirm)?;

    let existing = state
        .store
        .find_by_identifier(Some(&payload.email), Some(&payload.username))
        .await
        .map_err(ApiError::Internal)?;
    if existing.is_some() {
        warn!(email = %payload.email, "email or username already taken");
        return Err(ApiError::DuplicateUser);
    }

    let password_hash = hash_password(payload.password).await.map_err(ApiError::Internal)?;
    let user = state
        .store
        .create(NewUser {
            username: payload.username,
            email: payload.email,
            password_hash,
            role: Role::User,
        })
        .await
        .map_err(ApiError::Internal)?;

    info!(user_id = %user.id, email = %user.email, "user signed up");
    send_token(&state, &user, StatusCode::CREATED)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Response> {
    let email = payload
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    let username = payload
        .username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());
    let password = payload.password.filter(|p| !p.is_empty());

    if email.is_none() && username.is_none() {
        return Err(ApiError::MissingCredentials);
    }
    let Some(password) = password else {
        return Err(ApiError::MissingCredentials);
    };

    let user = state
        .store
        .find_by_identifier(email.as_deref(), username)
        .await
        .map_err(ApiError::Internal)?;

    // Unknown user and wrong password fail identically.
    let Some(user) = user else {
        warn!("login with unknown identifier");
        return Err(ApiError::InvalidCredentials);
    };
    let ok = verify_password(password, user.password_hash.clone())
        .await
        .map_err(ApiError::Internal)?;
    if !ok {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    info!(user_id = %user.id, "user logged in");
    send_token(&state, &user, StatusCode::OK)
}

/// Overwrites the session cookie with a short-lived placeholder.
pub async fn logout() -> impl IntoResponse {
    let cookie = session_cookie("loggedout", 10, false);
    (
        [(header::SET_COOKIE, cookie)],
        Json(MessageResponse {
            status: "success",
            message: None,
        }),
    )
}

#[instrument(skip_all)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse {
        status: "success",
        data: UserData {
            user: PublicUser::from(&user),
        },
    })
}

/// Best-effort identity; never fails, even with a bad or missing token.
#[instrument(skip_all)]
pub async fn session(MaybeUser(user): MaybeUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        status: "success",
        data: user.map(|u| UserData {
            user: PublicUser::from(&u),
        }),
    })
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let email = payload.email.trim().to_lowercase();
    let mut user = state
        .store
        .find_by_email(&email)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::UserNotFound)?;

    let token = reset::generate();
    user.password_reset_token = Some(token.hashed);
    user.password_reset_expires = Some(OffsetDateTime::now_utc() + RESET_TOKEN_TTL);
    state.store.save(&user).await.map_err(ApiError::Internal)?;

    let reset_url = format!(
        "{}/changePassword?token={}",
        state.config.frontend_url, token.plaintext
    );

    let sent = state
        .mailer
        .send(
            &user.email,
            "Your password reset token (valid for 10 min)",
            &reset_email_html(&reset_url),
        )
        .await;

    if let Err(e) = sent {
        warn!(user_id = %user.id, error = %e, "reset email failed, clearing token");
        user.password_reset_token = None;
        user.password_reset_expires = None;
        // Best-effort rollback; a failure here leaves the token to expire
        // naturally.
        if let Err(e) = state.store.save(&user).await {
            warn!(user_id = %user.id, error = %e, "reset token rollback failed");
        }
        return Err(ApiError::NotificationFailure);
    }

    info!(user_id = %user.id, "reset token sent");
    Ok(Json(MessageResponse {
        status: "success",
        message: Some("Token sent to email!".into()),
    }))
}

#[instrument(skip(state, payload, token))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<Response> {
    validate_new_password(&payload.password, &payload.password_confirm)?;

    let hashed = reset::hash_token(&token);
    let mut user = state
        .store
        .find_by_reset_token(&hashed)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::InvalidOrExpiredToken)?;

    user.password_hash = hash_password(payload.password)
        .await
        .map_err(ApiError::Internal)?;
    user.password_changed_at = Some(OffsetDateTime::now_utc());
    user.password_reset_token = None;
    user.password_reset_expires = None;
    state.store.save(&user).await.map_err(ApiError::Internal)?;

    info!(user_id = %user.id, "password reset");
    send_token(&state, &user, StatusCode::OK)
}

#[instrument(skip_all)]
pub async fn update_password(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    Json(payload): Json<UpdatePasswordRequest>,
) -> ApiResult<Response> {
    let ok = verify_password(payload.password_current, user.password_hash.clone())
        .await
        .map_err(ApiError::Internal)?;
    if !ok {
        warn!(user_id = %user.id, "wrong current password");
        return Err(ApiError::WrongCurrentPassword);
    }

    validate_new_password(&payload.password, &payload.password_confirm)?;

    user.password_hash = hash_password(payload.password)
        .await
        .map_err(ApiError::Internal)?;
    user.password_changed_at = Some(OffsetDateTime::now_utc());
    state.store.save(&user).await.map_err(ApiError::Internal)?;

    info!(user_id = %user.id, "password updated");
    send_token(&state, &user, StatusCode::OK)
}

#[instrument(skip_all)]
pub async fn create_admin(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(payload): Json<CreateAdminRequest>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    let email = payload.email.trim().to_lowercase();
    if payload.username.trim().is_empty() || !is_valid_email(&email) {
        return Err(ApiError::Validation(
            "Please provide username, email, password and role".into(),
        ));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::Validation("Password too short".into()));
    }

    if state
        .store
        .find_by_email(&email)
        .await
        .map_err(ApiError::Internal)?
        .is_some()
    {
        return Err(ApiError::DuplicateUser);
    }

    let password_hash = hash_password(payload.password).await.map_err(ApiError::Internal)?;
    let user = state
        .store
        .create(NewUser {
            username: payload.username.trim().to_string(),
            email,
            password_hash,
            role: payload.role,
        })
        .await
        .map_err(ApiError::Internal)?;

    info!(user_id = %user.id, role = ?user.role, "admin created user");
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            status: "success",
            data: UserData {
                user: PublicUser::from(&user),
            },
        }),
    ))
}

#[instrument(skip(state, payload, _admin))]
pub async fn update_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<Json<UserResponse>> {
    let mut user = state
        .store
        .find_by_id(id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::UserNotFound)?;

    // Admin accounts are not editable through this route.
    if user.role == Role::Admin {
        return Err(ApiError::AdminImmutable);
    }

    if let Some(username) = payload.username {
        user.username = username;
    }
    if let Some(role) = payload.role {
        user.role = role;
    }
    if let Some(password) = payload.password {
        if password.len() < 8 {
            return Err(ApiError::Validation("Password too short".into()));
        }
        user.password_hash = hash_password(password).await.map_err(ApiError::Internal)?;
        user.password_changed_at = Some(OffsetDateTime::now_utc());
    }
    state.store.save(&user).await.map_err(ApiError::Internal)?;

    info!(user_id = %user.id, "user updated by admin");
    Ok(Json(UserResponse {
        status: "success",
        data: UserData {
            user: PublicUser::from(&user),
        },
    }))
}
