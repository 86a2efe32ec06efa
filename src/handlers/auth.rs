//! Staff authentication handlers

use std::net::SocketAddr;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use super::AppState;
use crate::db::users;
use crate::models::*;
use crate::validation::{validate_password, validate_username};

/// Session cookie name
pub const SESSION_COOKIE: &str = "scheduler_session";

/// Rate limit: max attempts per IP per hour
const MAX_LOGIN_ATTEMPTS: i64 = 10;

// =============================================================================
// Login Endpoint
// =============================================================================

/// Staff login
pub async fn staff_login(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(input): Json<LoginRequest>,
) -> impl IntoResponse {
    let client_ip = get_client_ip(&headers, peer, &state.trusted_proxies);

    if !check_rate_limit(&state.pool, &client_ip, "login").await {
        tracing::warn!(ip = %client_ip, "Login rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::SET_COOKIE, "".to_string())],
            Json(ApiResponse::<StaffUserResponse>::error(
                "Too many login attempts. Please try again later.",
            )),
        );
    }

    record_attempt(&state.pool, &client_ip, "login").await;

    let user = match users::find_by_username(&state.pool, input.username.trim()).await {
        Ok(Some(u)) => u,
        Ok(None) | Err(_) => {
            // Don't reveal whether username exists
            return (
                StatusCode::UNAUTHORIZED,
                [(header::SET_COOKIE, "".to_string())],
                Json(ApiResponse::error("Invalid username or password")),
            );
        }
    };

    let parsed_hash = match PasswordHash::new(&user.password_hash) {
        Ok(h) => h,
        Err(_) => {
            tracing::error!("Invalid password hash in database for user {}", user.username);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::SET_COOKIE, "".to_string())],
                Json(ApiResponse::error("Authentication error")),
            );
        }
    };

    if Argon2::default()
        .verify_password(input.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::SET_COOKIE, "".to_string())],
            Json(ApiResponse::error("Invalid username or password")),
        );
    }

    let token = generate_session_token();
    let token_hash = hash_token(&token);
    let expiry_hours = state.session_expiry_hours as i64;
    let expires_at = Utc::now() + Duration::hours(expiry_hours);

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.chars().take(500).collect::<String>());

    let session_result = sqlx::query(
        r#"
        INSERT INTO staff_sessions (user_id, token_hash, expires_at, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user.id)
    .bind(&token_hash)
    .bind(expires_at)
    .bind(&client_ip)
    .bind(&user_agent)
    .execute(&state.pool)
    .await;

    if let Err(e) = session_result {
        tracing::error!("Failed to create session: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::SET_COOKIE, "".to_string())],
            Json(ApiResponse::error("Failed to create session")),
        );
    }

    let _ = users::touch_last_login(&state.pool, user.id).await;
    record_audit(&state.pool, "staff_login", "staff_user", Some(user.id), &user.username, None).await;
    tracing::info!(user = %user.username, "Staff login");

    let secure = if state.is_production { "; Secure" } else { "" };
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}{}",
        SESSION_COOKIE,
        token,
        expiry_hours * 3600,
        secure
    );

    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::success(StaffUserResponse::from(user))),
    )
}

/// Staff logout
pub async fn staff_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        let token_hash = hash_token(&token);

        let session = sqlx::query_as::<_, StaffSession>(
            "DELETE FROM staff_sessions WHERE token_hash = $1 RETURNING *",
        )
        .bind(&token_hash)
        .fetch_optional(&state.pool)
        .await
        .ok()
        .flatten();

        if let Some(session) = session {
            record_audit(
                &state.pool,
                "staff_logout",
                "staff_user",
                Some(session.user_id),
                &session.user_id.to_string(),
                None,
            )
            .await;
        }
    }

    let cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0",
        SESSION_COOKIE
    );

    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::success(())),
    )
}

/// Get current staff user
pub async fn get_current_staff(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match validate_staff_session(&state.pool, &headers).await {
        Some(user) => (
            StatusCode::OK,
            Json(ApiResponse::success(StaffUserResponse::from(user))),
        ),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Not authenticated")),
        ),
    }
}

// =============================================================================
// Session Validation
// =============================================================================

/// Validate a staff session from request headers
pub async fn validate_staff_session(pool: &PgPool, headers: &HeaderMap) -> Option<StaffUser> {
    let token = extract_session_token(headers)?;
    let token_hash = hash_token(&token);

    let session = sqlx::query_as::<_, StaffSession>(
        "SELECT * FROM staff_sessions WHERE token_hash = $1 AND expires_at > NOW()",
    )
    .bind(&token_hash)
    .fetch_optional(pool)
    .await
    .ok()??;

    users::find_by_id(pool, session.user_id).await.ok()?
}

// =============================================================================
// Password Utilities
// =============================================================================

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Create the first admin account when the user table is empty
pub async fn bootstrap_admin(
    pool: &PgPool,
    username: &str,
    password: &str,
) -> Result<Option<StaffUser>, Box<dyn std::error::Error>> {
    if users::count(pool).await? > 0 {
        return Ok(None);
    }
    validate_username(username)?;
    validate_password(password)?;

    let password_hash = hash_password(password).map_err(|e| e.to_string())?;
    let email = format!("{}@localhost", username);
    let user = users::insert(pool, username, &email, &password_hash, None, true).await?;
    tracing::info!(user = %user.username, "Bootstrap admin account created");
    Ok(Some(user))
}

// =============================================================================
// Helper Functions
// =============================================================================

pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;

    for cookie in cookie_header.split(';') {
        let cookie = cookie.trim();
        if let Some(value) = cookie.strip_prefix(&format!("{}=", SESSION_COOKIE)) {
            return Some(value.to_string());
        }
    }

    None
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Client address, honouring X-Forwarded-For only from trusted proxies
pub fn get_client_ip(headers: &HeaderMap, peer: SocketAddr, trusted_proxies: &[String]) -> String {
    let peer_ip = peer.ip().to_string();
    let from_proxy = trusted_proxies.iter().any(|p| peer_ip.starts_with(p.as_str()));

    if from_proxy {
        if let Some(first_ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|xff| xff.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return first_ip.to_string();
        }
    }

    peer_ip
}

async fn check_rate_limit(pool: &PgPool, ip: &str, endpoint: &str) -> bool {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM rate_limit_attempts
        WHERE ip_address = $1 AND endpoint = $2
        AND attempted_at > NOW() - INTERVAL '1 hour'
        "#,
    )
    .bind(ip)
    .bind(endpoint)
    .fetch_one(pool)
    .await
    .unwrap_or(0);

    count < MAX_LOGIN_ATTEMPTS
}

async fn record_attempt(pool: &PgPool, ip: &str, endpoint: &str) {
    let _ = sqlx::query(
        "INSERT INTO rate_limit_attempts (ip_address, endpoint) VALUES ($1, $2)",
    )
    .bind(ip)
    .bind(endpoint)
    .execute(pool)
    .await;
}

/// Best-effort audit entry for staff and admin actions
pub async fn record_audit(
    pool: &PgPool,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
    actor: &str,
    details: Option<Value>,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_log (action, entity_type, entity_id, actor, details)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(actor)
    .bind(details)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(action, "Failed to write audit entry: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(ip: &str) -> SocketAddr {
        format!("{}:4000", ip).parse().unwrap()
    }

    #[test]
    fn test_hash_token_is_sha256() {
        let hash = hash_token("test-staff-token");
        // SHA-256 produces 64-character hex string
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_token("test-staff-token"));
    }

    #[test]
    fn test_generate_session_token() {
        let t1 = generate_session_token();
        let t2 = generate_session_token();
        // 32 random bytes = 64 hex chars
        assert_eq!(t1.len(), 64);
        assert_ne!(t1, t2);
    }

    #[test]
    fn test_extract_session_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; scheduler_session=abc123xyz".parse().unwrap(),
        );
        assert_eq!(extract_session_token(&headers), Some("abc123xyz".to_string()));

        let mut other = HeaderMap::new();
        other.insert(header::COOKIE, "session=abc123".parse().unwrap());
        assert_eq!(extract_session_token(&other), None);
    }

    #[test]
    fn test_forwarded_for_only_from_trusted_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.2".parse().unwrap());
        let trusted = vec!["10.0.0.".to_string()];

        assert_eq!(get_client_ip(&headers, peer("10.0.0.5"), &trusted), "203.0.113.7");
        assert_eq!(get_client_ip(&headers, peer("198.51.100.1"), &trusted), "198.51.100.1");
        assert_eq!(get_client_ip(&headers, peer("10.0.0.5"), &[]), "10.0.0.5");
    }

    #[test]
    fn test_hash_password_verifies() {
        let hash = hash_password("correct horse battery").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default()
            .verify_password(b"correct horse battery", &parsed)
            .is_ok());
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }
}
