use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode};
use tower_sessions::Session;
use uuid::Uuid;

use crate::app::AppState;
use crate::constants::*;
use crate::database::Db;
use crate::models::{LoginPayload, PublicUser, RegisterPayload, User};
use crate::utils::{ApiError, bad_request, db_error};

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

pub async fn create_user(db: &Db, username: &str, password: &str) -> anyhow::Result<PublicUser> {
    let hash = hash_password(password)?;
    let id = Uuid::new_v4().to_string();
    let conn = db.write().await;

    conn.execute(
        "INSERT INTO users (id, name, password_hash) VALUES (?, ?, ?)",
        (id.as_str(), username, hash.as_str()),
    )
    .await?;

    Ok(PublicUser {
        id,
        username: username.to_string(),
    })
}

pub fn validate_registration(payload: &RegisterPayload) -> Result<(), ApiError> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(bad_request("Username cannot be empty"));
    }
    if username.len() < MIN_USERNAME_LENGTH || username.len() > MAX_USERNAME_LENGTH {
        return Err(bad_request(format!(
            "Username must be between {} and {} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    if payload.password.len() < MIN_PASSWORD_LENGTH {
        return Err(bad_request(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(bad_request(
            "Username can only contain alphanumeric characters, underscores, and hyphens",
        ));
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<PublicUser>), ApiError> {
    validate_registration(&payload)?;

    let user = create_user(&state.main_db, payload.username.trim(), &payload.password)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                (StatusCode::CONFLICT, "Username already exists".to_string())
            } else {
                tracing::error!(error = %e, "user registration failed");
                db_error()
            }
        })?;

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user_by_username(db: &Db, username: &str) -> anyhow::Result<Option<User>> {
    let conn = db.read().await;
    let mut rows = conn
        .query(
            "SELECT id, name, password_hash FROM users WHERE name = ?",
            [username],
        )
        .await?;

    if let Some(row) = rows.next().await? {
        Ok(Some(User {
            id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
        }))
    } else {
        Ok(None)
    }
}

pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<LoginPayload>,
) -> Result<(StatusCode, Json<PublicUser>), ApiError> {
    if payload.username.trim().is_empty() {
        return Err(bad_request("Username cannot be empty"));
    }
    if payload.password.is_empty() {
        return Err(bad_request("Password cannot be empty"));
    }

    let user = get_user_by_username(&state.main_db, payload.username.trim())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "user lookup failed");
            db_error()
        })?
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()))?;

    let is_valid = verify_password(&payload.password, &user.password_hash)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if !is_valid {
        tracing::warn!(username = %user.username, "failed login attempt");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
    }

    // Rotate the session id on privilege change
    session
        .cycle_id()
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, ERR_INVALID_SESSION.to_string()))?;
    session
        .insert("user_id", &user.id)
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, ERR_INVALID_SESSION.to_string()))?;
    session
        .insert("username", &user.username)
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, ERR_INVALID_SESSION.to_string()))?;

    tracing::info!(user_id = %user.id, "user logged in");
    Ok((
        StatusCode::OK,
        Json(PublicUser {
            id: user.id,
            username: user.username,
        }),
    ))
}

pub async fn get_current_user(session: &Session) -> Result<PublicUser, ApiError> {
    let user_id: Option<String> = session
        .get("user_id")
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, ERR_INVALID_SESSION.to_string()))?;

    let username: Option<String> = session
        .get("username")
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, ERR_INVALID_SESSION.to_string()))?;

    match (user_id, username) {
        (Some(id), Some(name)) => Ok(PublicUser { id, username: name }),
        _ => Err((StatusCode::UNAUTHORIZED, ERR_UNAUTHORIZED.to_string())),
    }
}

pub async fn me(session: Session) -> Result<(StatusCode, Json<PublicUser>), ApiError> {
    let user = get_current_user(&session).await?;
    Ok((StatusCode::OK, Json(user)))
}

pub async fn logout(session: Session) -> Result<StatusCode, ApiError> {
    session.flush().await.map_err(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, ERR_INVALID_SESSION.to_string())
    })?;

    Ok(StatusCode::NO_CONTENT)
}
