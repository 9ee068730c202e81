use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use room_stream::catalog;
use room_stream::{ErrorKind, ResolutionOptions, ResolvedStream, RoomAddress, StreamError};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::warn;

use crate::config::Config;

use super::AppState;

/// Query parameters accepted by the stream endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub quality: Option<String>,
    pub circuit: Option<String>,
    pub rate: Option<i64>,
    #[serde(default)]
    pub fresh: bool,
}

fn get_base_url(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost:8099");
    format!("{scheme}://{host}")
}

/// Map a resolution error onto the status we answer with.
pub fn status_for(error: &StreamError) -> StatusCode {
    match error.kind() {
        ErrorKind::InvalidAddress => StatusCode::BAD_REQUEST,
        ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::UpstreamProtocol | ErrorKind::SandboxExecution | ErrorKind::Transport => {
            StatusCode::BAD_GATEWAY
        }
    }
}

/// Build resolution options, filling gaps from the configured preferences.
pub fn options_for(config: &Config, query: StreamQuery) -> ResolutionOptions {
    ResolutionOptions::new(
        query
            .quality
            .unwrap_or_else(|| config.preferred_quality.clone()),
        query
            .circuit
            .unwrap_or_else(|| config.preferred_circuit.clone()),
    )
    .with_fresh_signature(query.fresh)
    .with_bitrate_code(query.rate)
}

async fn resolve(
    state: &AppState,
    address: &str,
    query: StreamQuery,
) -> Result<ResolvedStream, StatusCode> {
    let address = RoomAddress::parse(address).map_err(|e| status_for(&e))?;
    let options = options_for(&state.config, query);
    let deadline = Instant::now() + state.config.resolve_timeout();

    match state
        .engine
        .resolve_with_deadline(&address, &options, deadline)
        .await
    {
        Ok(Some(stream)) => Ok(stream),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!("[server] Resolution failed for room {}: {}", address, e);
            Err(status_for(&e))
        }
    }
}

/// Root endpoint: catalog and endpoint templates.
pub async fn index(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let base_url = get_base_url(&headers);

    let qualities: Vec<serde_json::Value> = catalog::qualities()
        .map(|(code, label)| serde_json::json!({ "code": code, "display": label }))
        .collect();
    let circuits: Vec<serde_json::Value> = catalog::circuits()
        .map(|(code, label)| serde_json::json!({ "code": code, "display": label }))
        .collect();

    (
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        serde_json::json!({
            "preferred": {
                "quality": state.config.preferred_quality,
                "circuit": state.config.preferred_circuit,
            },
            "qualities": qualities,
            "circuits": circuits,
            "info": format!("{}/{{address}}/info", base_url),
            "stream": format!("{}/{{address}}/stream", base_url),
        })
        .to_string(),
    )
}

/// Stream info endpoint.
pub async fn stream_info(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let stream = resolve(&state, &address, query).await?;
    let body = serde_json::to_string(&stream).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        body,
    ))
}

/// Redirect straight to the resolved stream, for players.
pub async fn stream_redirect(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let stream = resolve(&state, &address, query).await?;
    Ok((StatusCode::FOUND, [(header::LOCATION, stream.stream_url)]))
}

/// Drop the cached signing function for a room.
pub async fn invalidate_signature(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let address = RoomAddress::parse(&address).map_err(|e| status_for(&e))?;
    state.engine.invalidate_signature(&address);
    Ok(StatusCode::NO_CONTENT)
}
