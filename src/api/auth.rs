//! Authentication endpoints and middleware.
//!
//! Handlers only translate between HTTP and [`AuthService`]: they validate
//! request bodies, move tokens in and out of cookies, and map errors.
//!
//! [`AuthService`]: crate::services::AuthService

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{ConnectInfo, Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use super::cookies::{self, REFRESH_COOKIE};
use super::types::{
    LoginRequest, LoginResponse, MessageResponse, RefreshRequest, RegisterRequest,
    ResendVerificationRequest, TokenExpiryDto, UserResponse,
};
use super::validation;
use super::{ApiError, ApiResponse, AppState};
use crate::domain::{ClientMeta, Role};
use crate::services::{AuthContext, AuthError, EmailStatus, RegisterInput};

const MAX_USER_AGENT_LEN: usize = 512;

// ============================================================================
// Middleware
// ============================================================================

/// Resolves the access token (Bearer header, then cookie) to an [`AuthContext`]
/// and stores it in the request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = cookies::access_token(request.headers()).ok_or(AuthError::AccessTokenRequired)?;

    let ctx = state.auth_service().authenticate(&token).await?;
    tracing::Span::current().record("account_id", ctx.account.id.value());

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

/// Must run after [`auth_middleware`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let is_admin = request
        .extensions()
        .get::<AuthContext>()
        .is_some_and(|ctx| ctx.account.role == Role::Admin);

    if !is_admin {
        return Err(AuthError::Forbidden.into());
    }
    Ok(next.run(request).await)
}

/// Records the caller's address and user agent for session bookkeeping.
/// These values are informational only and never used for access decisions.
pub async fn client_meta_middleware(mut request: Request, next: Next) -> Response {
    let headers = request.headers();

    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let ip_address = forwarded_for.or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    });

    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());

    request.extensions_mut().insert(ClientMeta {
        ip_address,
        user_agent,
    });
    next.run(request).await
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validation::validate_registration(&payload)?;

    let user = state
        .auth_service()
        .register(RegisterInput {
            username: payload.username,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(UserResponse { user })),
    ))
}

/// POST /auth/login
/// Sets both token cookies on success
pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(client): Extension<ClientMeta>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = validation::require_non_empty(&payload.email, "Email")?;
    let password = validation::require_non_empty(&payload.password, "Password")?;

    let result = state
        .auth_service()
        .login(email, password, &client)
        .await?;

    let mut headers = HeaderMap::new();
    state
        .cookie_settings()
        .set_tokens(&mut headers, &result.tokens)
        .map_err(|e| ApiError::internal(format!("Failed to build cookie: {e}")))?;

    Ok((
        headers,
        Json(ApiResponse::success(LoginResponse {
            expiry: TokenExpiryDto::from(&result.tokens),
            user: result.account,
        })),
    ))
}

/// POST /auth/logout
/// Ends the session behind the presented tokens and clears both cookies
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let access_token = cookies::access_token(&headers);
    let refresh_token = cookies::read_cookie(&headers, REFRESH_COOKIE);

    let mut response_headers = HeaderMap::new();
    if let Err(e) = state.cookie_settings().clear_tokens(&mut response_headers) {
        return ApiError::internal(format!("Failed to build cookie: {e}")).into_response();
    }

    match state
        .auth_service()
        .logout(access_token.as_deref(), refresh_token.as_deref())
        .await
    {
        Ok(()) => (
            response_headers,
            Json(ApiResponse::success(MessageResponse::new("Logged out"))),
        )
            .into_response(),
        Err(err) => (response_headers, ApiError::from(err)).into_response(),
    }
}

/// POST /auth/refresh
/// Reads the refresh token from its cookie or a `refreshToken` body field.
/// A failed refresh clears both cookies.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let from_body = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<RefreshRequest>(&body) {
            Ok(request) => request.refresh_token.filter(|t| !t.is_empty()),
            Err(e) => {
                return ApiError::validation(format!("Invalid request body: {e}")).into_response();
            }
        }
    };

    let Some(token) = cookies::read_cookie(&headers, REFRESH_COOKIE).or(from_body) else {
        return ApiError::from(AuthError::RefreshTokenRequired).into_response();
    };

    let settings = state.cookie_settings();
    let mut response_headers = HeaderMap::new();

    let result = match state.auth_service().refresh(&token).await {
        Ok(tokens) => settings
            .set_tokens(&mut response_headers, &tokens)
            .map(|()| Json(ApiResponse::success(TokenExpiryDto::from(&tokens))).into_response()),
        Err(err) => settings
            .clear_tokens(&mut response_headers)
            .map(|()| ApiError::from(err).into_response()),
    };

    match result {
        Ok(response) => (response_headers, response).into_response(),
        Err(e) => ApiError::internal(format!("Failed to build cookie: {e}")).into_response(),
    }
}

/// GET /auth/verify-email/{token}
pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let user = state.auth_service().verify_email(&token).await?;
    Ok(Json(ApiResponse::success(UserResponse { user })))
}

/// POST /auth/resend-verification
pub async fn resend_verification(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResendVerificationRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let email = validation::validate_email(&payload.email)?;

    state.auth_service().resend_verification(email).await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Verification email sent",
    ))))
}

/// GET /auth/email-status
pub async fn email_status(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<EmailStatus>>, ApiError> {
    let status = state.auth_service().email_status(ctx.account.id).await?;
    Ok(Json(ApiResponse::success(status)))
}

/// GET /auth/me
pub async fn me(Extension(ctx): Extension<AuthContext>) -> Json<ApiResponse<UserResponse>> {
    Json(ApiResponse::success(UserResponse { user: ctx.account }))
}
