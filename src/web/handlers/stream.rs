use axum::{
    extract::{Query, State},
    http::{HeaderMap, Method},
    response::Response,
};
use serde::Deserialize;

use crate::errors::AppResult;
use crate::web::AppState;

#[derive(Debug, Deserialize)]
pub struct RelayParams {
    pub url: Option<String>,
}

/// Live media relay for any method; the relay answers OPTIONS and 405 itself
pub async fn relay_stream(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(params): Query<RelayParams>,
) -> AppResult<Response> {
    state.relay.handle(&method, params.url.as_deref(), &headers).await
}
