//! Admin account management endpoints.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use std::sync::Arc;

use super::types::{ListUsersQuery, UserResponse};
use super::validation;
use super::{ApiError, ApiResponse, AppState};
use crate::domain::{AccountId, Role};
use crate::services::{AccountPage, AccountUpdate, AuthContext};

/// GET /users
/// Query: `page`, `limit`, `role`, `isActive`, `search`
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<ApiResponse<AccountPage>>, ApiError> {
    let (filter, page, limit) = validation::parse_user_query(query)?;
    let accounts = state
        .auth_service()
        .list_accounts(&filter, page, limit)
        .await?;
    Ok(Json(ApiResponse::success(accounts)))
}

/// PATCH /users/{id}
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
    Json(update): Json<AccountUpdate>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let id = AccountId::new(id);

    if id == ctx.account.id
        && (update.is_active == Some(false) || update.role == Some(Role::User))
    {
        return Err(ApiError::validation(
            "Admins cannot deactivate or demote their own account",
        ));
    }

    let user = state.auth_service().update_account(id, update).await?;
    tracing::info!(admin_id = %ctx.account.id, account_id = %id, "Account updated by admin");

    Ok(Json(ApiResponse::success(UserResponse { user })))
}
