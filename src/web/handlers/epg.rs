//! EPG endpoints
//!
//! `/epg/{user}` merges all of a user's providers, `/epg/{user}/{provider}` and
//! the Xtream-style `/xmltv.php?username=<provider>&password=<user>` pass one
//! provider's guide straight through.

use axum::{
    extract::{Path, Query, State},
    response::Response,
};
use serde::Deserialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::UserId;
use crate::web::AppState;

#[derive(Debug, Deserialize)]
pub struct XmltvParams {
    pub username: Option<String>,
    pub password: Option<String>,
}

pub async fn all_providers_epg(State(state): State<AppState>, Path(user): Path<String>) -> AppResult<Response> {
    let user = resolve_user(&state, &user)?;
    state.guides.all_providers(user).await
}

pub async fn single_provider_epg(
    State(state): State<AppState>,
    Path((user, provider)): Path<(String, String)>,
) -> AppResult<Response> {
    let user = resolve_user(&state, &user)?;
    let provider_id = parse_provider_id(&provider)?;
    state.guides.single_provider(user, provider_id).await
}

pub async fn xmltv_epg(State(state): State<AppState>, Query(params): Query<XmltvParams>) -> AppResult<Response> {
    let (Some(provider), Some(token)) = (params.username, params.password) else {
        return Err(AppError::unauthorized("missing username or password"));
    };
    let user = resolve_user(&state, &token)?;
    let provider_id = parse_provider_id(&provider)?;
    state.guides.single_provider(user, provider_id).await
}

fn resolve_user(state: &AppState, token: &str) -> AppResult<UserId> {
    state.tokens.decode(token).map_err(|e| {
        debug!(error = %e, "User token rejected");
        AppError::unauthorized("invalid user token")
    })
}

/// Provider ids are positive integers; anything else is an auth failure
fn parse_provider_id(raw: &str) -> AppResult<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id >= 1)
        .ok_or_else(|| AppError::unauthorized(format!("invalid provider id '{raw}'")))
}
