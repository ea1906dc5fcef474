use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use password_hash::rand_core::OsRng;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::auth::{
        AccessClaims, LoginRequest, LoginResponse, LogoutRequest, ProfileResponse, RefreshClaims,
        RefreshRequest, RefreshResponse, RegisterRequest,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Role, User},
    response::{ApiResponse, Meta},
};

const ACCESS_TTL_MINUTES: i64 = 15;
const REFRESH_TTL_DAYS: i64 = 7;

pub fn jwt_secret() -> Result<String, AppError> {
    std::env::var("JWT_SECRET")
        .map_err(|_| AppError::Internal(anyhow::anyhow!("JWT_SECRET is not set")))
}

pub async fn register_user(pool: &DbPool, payload: RegisterRequest) -> AppResult<ApiResponse<User>> {
    let RegisterRequest {
        username,
        email,
        password,
        role,
    } = payload;

    if username.trim().is_empty() {
        return Err(AppError::Validation("username must not be empty".into()));
    }
    if password.is_empty() {
        return Err(AppError::Validation("password must not be empty".into()));
    }

    let email_taken: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(pool)
        .await?;
    if email_taken.is_some() {
        return Err(AppError::Validation("Email is already taken".to_string()));
    }

    let username_taken: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM users WHERE username = $1")
            .bind(username.as_str())
            .fetch_optional(pool)
            .await?;
    if username_taken.is_some() {
        return Err(AppError::Validation("Username is already taken".to_string()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();

    let role = role.unwrap_or(Role::Customer);
    let id = Uuid::new_v4();

    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (id, username, email, password_hash, role)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(username.as_str())
    .bind(email.as_str())
    .bind(password_hash)
    .bind(role.as_str())
    .fetch_one(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.id),
        "user_register",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id, "role": role.as_str() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
    Ok(ApiResponse::success("User created", user, None))
}

pub async fn login_user(pool: &DbPool, payload: LoginRequest) -> AppResult<ApiResponse<LoginResponse>> {
    let LoginRequest { email, password } = payload;
    let user: Option<User> = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(pool)
        .await?;

    // Single generic failure for unknown email, wrong password and inactive
    // account; the response never reveals which check failed.
    let user = match user {
        Some(u) if u.is_active => u,
        _ => return Err(AppError::Validation("Invalid email or password".into())),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;

    let argon2 = Argon2::default();
    if argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(AppError::Validation("Invalid email or password".into()));
    }

    let access = issue_access_token(user.id, user.role)?;
    let (refresh, _, _) = issue_refresh_token(user.id)?;

    if let Err(err) = log_audit(
        pool,
        Some(user.id),
        "user_login",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Logged in",
        LoginResponse { access, refresh },
        Some(Meta::empty()),
    ))
}

/// Exchange a live refresh token for a fresh access token. A revoked or
/// malformed token fails with a generic 401.
pub async fn refresh_access(
    pool: &DbPool,
    payload: RefreshRequest,
) -> AppResult<ApiResponse<RefreshResponse>> {
    let claims = decode_refresh(&payload.refresh).map_err(|_| AppError::Unauthorized)?;

    let revoked: (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE jti = $1)")
            .bind(claims.jti)
            .fetch_one(pool)
            .await?;
    if revoked.0 {
        return Err(AppError::Unauthorized);
    }

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    let user = match user {
        Some(u) if u.is_active => u,
        _ => return Err(AppError::Unauthorized),
    };

    let access = issue_access_token(user.id, user.role)?;
    Ok(ApiResponse::success(
        "Token refreshed",
        RefreshResponse { access },
        Some(Meta::empty()),
    ))
}

/// Blacklist the presented refresh token. The revocation set is durable
/// (survives restarts, shared across instances); expired entries are purged
/// opportunistically on each logout.
pub async fn logout_user(
    pool: &DbPool,
    user: &AuthUser,
    payload: LogoutRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let claims = decode_refresh(&payload.refresh)
        .map_err(|_| AppError::Validation("Invalid or expired token".into()))?;

    let expires_at = DateTime::<Utc>::from_timestamp(claims.exp as i64, 0)
        .ok_or_else(|| AppError::Validation("Invalid or expired token".into()))?;

    sqlx::query(
        r#"
        INSERT INTO revoked_tokens (jti, user_id, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (jti) DO NOTHING
        "#,
    )
    .bind(claims.jti)
    .bind(user.user_id)
    .bind(expires_at)
    .execute(pool)
    .await?;

    sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < now()")
        .execute(pool)
        .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "user_logout",
        Some("users"),
        Some(serde_json::json!({ "jti": claims.jti })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Logged out successfully",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn profile(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<ProfileResponse>> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_optional(pool)
        .await?;
    let row = row.ok_or(AppError::NotFound)?;

    Ok(ApiResponse::success(
        "OK",
        ProfileResponse {
            id: row.id,
            email: row.email,
            username: row.username,
        },
        Some(Meta::empty()),
    ))
}

pub fn issue_access_token(user_id: Uuid, role: Role) -> Result<String, AppError> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::minutes(ACCESS_TTL_MINUTES))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = AccessClaims {
        sub: user_id.to_string(),
        role,
        exp: expiration.timestamp() as usize,
    };
    sign(&claims)
}

pub fn issue_refresh_token(user_id: Uuid) -> Result<(String, Uuid, DateTime<Utc>), AppError> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::days(REFRESH_TTL_DAYS))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let jti = Uuid::new_v4();
    let claims = RefreshClaims {
        sub: user_id.to_string(),
        jti,
        exp: expiration.timestamp() as usize,
    };
    let token = sign(&claims)?;
    Ok((token, jti, expiration))
}

pub fn decode_refresh(token: &str) -> Result<RefreshClaims, AppError> {
    let secret = jwt_secret()?;
    let decoded = decode::<RefreshClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized)?;
    Ok(decoded.claims)
}

fn sign<C: serde::Serialize>(claims: &C) -> Result<String, AppError> {
    let secret = jwt_secret()?;
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}
