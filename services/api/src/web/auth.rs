//! services/api/src/web/auth.rs
//!
//! Account claiming and credential login. Every subscriber starts as a
//! ghost identity; claiming attaches a username and password so the
//! dashboard stays reachable without digging up an old email.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::security::TokenPurpose;
use crate::web::rest::{build_dashboard, DashboardResponse};
use crate::web::state::AppState;
use dailylit_core::ports::PortError;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize)]
pub struct ClaimRequest {
    /// The profile token from any delivery email; proves control of the inbox.
    pub token: String,
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct ClaimResponse {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/claim - Attach a username and password to a ghost identity.
pub async fn claim_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClaimRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = state
        .tokens
        .verify(&req.token, TokenPurpose::Profile)
        .and_then(|s| Uuid::parse_str(&s).ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            "This link is invalid or damaged".to_string(),
        ))?;

    if req.username.trim().is_empty() || req.password.len() < 8 {
        return Err((
            StatusCode::BAD_REQUEST,
            "Pick a username and a password of at least 8 characters".to_string(),
        ));
    }

    match state
        .users
        .claim(user_id, req.username.trim(), &req.password)
        .await
    {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(ClaimResponse {
                user_id,
                username: req.username.trim().to_string(),
            }),
        )),
        Err(PortError::Duplicate(_)) => Err((
            StatusCode::CONFLICT,
            "That username is taken".to_string(),
        )),
        Err(e) => {
            error!("Failed to claim account {}: {:?}", user_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to claim the account".to_string(),
            ))
        }
    }
}

/// POST /auth/login - Credential login for claimed accounts. The failure
/// response is identical for unknown usernames and wrong passwords.
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<DashboardResponse>, (StatusCode, String)> {
    let user_id = state
        .users
        .verify(&req.username, &req.password)
        .await
        .map_err(|e| {
            error!("Login check failed: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login failed, please try again".to_string(),
            )
        })?
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "Invalid username or password".to_string(),
        ))?;

    let dashboard = build_dashboard(&state, user_id).await.map_err(|e| {
        error!("Failed to load dashboard for {}: {:?}", user_id, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to load the dashboard".to_string(),
        )
    })?;

    Ok(Json(dashboard))
}
