//! Authentication: registration, login, session checks, and the
//! [`CurrentUser`] extractor that gates protected routes.
//!
//! Passwords are stored as Argon2id hashes; sessions are stateless HS256
//! JWTs sent as `Authorization: Bearer <token>`.

pub mod password;
pub mod session;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::AppState;
use crate::db::{self, SharedConnection, User};
use crate::errors::Error;

pub use session::{SessionClaims, SessionKeys};

pub const MIN_PASSWORD_LENGTH: usize = 8;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

// ============================================================================
// REQUESTS / RESPONSES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// Create an account. Duplicate email → Conflict.
pub fn register(db: &SharedConnection, request: &RegisterRequest) -> Result<User, Error> {
    if !is_valid_email(&request.email) {
        return Err(Error::bad_request("Invalid email address"));
    }
    if request.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let duplicate = || Error::Conflict {
        message: "email already registered".to_string(),
    };

    if db::find_user_by_email(&*db::lock(db)?, &request.email)?.is_some() {
        return Err(duplicate());
    }

    // Hash outside the lock
    let password_hash = password::hash_password(&request.password)?;
    let user = User::new(&request.email, password_hash, &request.first_name, &request.last_name);

    let conn = db::lock(db)?;
    match db::create_user(&conn, &user) {
        Ok(()) => {}
        // Lost a race with a concurrent registration
        Err(e) if db::is_constraint_violation(&e) => return Err(duplicate()),
        Err(e) => return Err(e.into()),
    }

    info!(user_id = %user.id, "User registered");
    Ok(user)
}

/// Check credentials and issue a session token
pub fn login(db: &SharedConnection, keys: &SessionKeys, request: &LoginRequest) -> Result<LoginResponse, Error> {
    let invalid = || Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    };

    let user = db::find_user_by_email(&*db::lock(db)?, &request.email)?.ok_or_else(invalid)?;

    if !password::verify_password(&request.password, &user.password_hash)? {
        return Err(invalid());
    }

    let access_token = keys.create_token(&user)?;
    info!(user_id = %user.id, "User logged in");

    Ok(LoginResponse {
        access_token,
        token_type: "bearer",
        user,
    })
}

/// Whether a token is still valid, and for whom
pub fn check_session(db: &SharedConnection, keys: &SessionKeys, token: &str) -> Result<SessionStatus, Error> {
    let claims = match keys.verify_token(token) {
        Ok(claims) => claims,
        Err(Error::Unauthenticated { .. }) => return Ok(SessionStatus { valid: false, user: None }),
        Err(e) => return Err(e),
    };

    let user = db::get_user(&*db::lock(db)?, &claims.sub)?;
    Ok(SessionStatus {
        valid: user.is_some(),
        user,
    })
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// The authenticated caller, taken from the bearer token
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
}

impl From<SessionClaims> for CurrentUser {
    fn from(claims: SessionClaims) -> Self {
        CurrentUser {
            id: claims.sub,
            email: claims.email,
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(Error::Unauthenticated { message: None })?;
        let claims = state.sessions.verify_token(token)?;
        Ok(CurrentUser::from(claims))
    }
}
