use crate::persist::SaveFile;
use crate::world::{User, World};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

// JWT secret - in production, load from environment
const JWT_SECRET: &[u8] = b"your-secret-key-change-in-production";
const JWT_EXPIRY_HOURS: i64 = 24;

// ── Auth request/response types ────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        UserResponse {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUsernameRequest {
    pub username: String,
}

// ── JWT ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,        // user id
    pub username: String,
    pub exp: usize,       // expiry timestamp
    pub iat: usize,       // issued at
}

// ── Shared state ───────────────────────────────────────────────

pub struct AppState {
    pub world: std::sync::RwLock<World>,
    pub save_file: SaveFile,
}

pub type SharedState = Arc<AppState>;

// ── Helpers ────────────────────────────────────────────────────

pub fn create_token(user_id: Uuid, username: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiry = now + Duration::hours(JWT_EXPIRY_HOURS);

    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: expiry.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET),
    )
}

pub fn verify_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn hash_password(password: &str) -> Result<String, (StatusCode, String)> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

// ── Caller identity extractor ──────────────────────────────────

/// The authenticated caller, pulled out of the Bearer token.
/// Every task/tomato/punishment handler takes one of these; the engine
/// trusts the id it carries.
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "Missing token".to_string()))?;

        let claims = verify_token(token)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".to_string()))?;

        Ok(AuthUser {
            id: claims.sub,
            username: claims.username,
        })
    }
}

// ── Handlers ───────────────────────────────────────────────────

pub async fn register(
    State(state): State<SharedState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), (StatusCode, String)> {
    if payload.username.trim().is_empty() || payload.email.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Username and email are required".to_string()));
    }

    let password_hash = hash_password(&payload.password)?;

    let mut world = state.world.write().unwrap();
    if world.get_user_by_email(&payload.email).is_some() {
        return Err((StatusCode::CONFLICT, "Email already taken".to_string()));
    }

    let user = User {
        id: Uuid::new_v4(),
        username: payload.username.trim().to_string(),
        email: payload.email.trim().to_string(),
        password_hash,
        created_at: Utc::now(),
    };

    state
        .save_file
        .save_user(&user)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let response = UserResponse::from(&user);
    world.users.insert(user.id, user);

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    let world = state.world.read().unwrap();

    let user = world
        .get_user_by_email(&payload.email)
        .ok_or((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()))?;

    if !verify_password(&payload.password, &user.password_hash) {
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
    }

    let token = create_token(user.id, &user.username)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(LoginResponse {
        token,
        user: UserResponse::from(user),
    }))
}

pub async fn logout() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn update_username(
    State(state): State<SharedState>,
    auth: AuthUser,
    Json(payload): Json<UpdateUsernameRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let desired = payload.username.trim().to_string();
    if desired.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Username is required".to_string()));
    }

    let mut world = state.world.write().unwrap();
    let user = world
        .users
        .get_mut(&auth.id)
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;

    if desired == user.username {
        let response = json!({ "message": "Username unchanged", "user": UserResponse::from(&*user) });
        return Ok(Json(response));
    }

    user.username = desired;
    let saved = user.clone();
    state
        .save_file
        .save_user(&saved)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({ "message": "Username updated", "user": UserResponse::from(&saved) })))
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let user_id = Uuid::new_v4();
        let token = create_token(user_id, "lena").unwrap();

        let claims = verify_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "lena");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn garbage_token_rejected() {
        assert!(verify_token("not-a-jwt").is_err());
    }

    #[test]
    fn password_hash_and_verify() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-hash"));
    }
}
