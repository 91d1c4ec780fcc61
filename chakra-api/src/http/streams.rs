//! Stream management endpoints

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use chakra_relay::StreamInfo;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateStreamRequest {
    pub name: String,
    /// Publishing sources; entries that are not IP addresses are skipped
    pub allowed_hosts: Vec<String>,
}

fn check_bearer(headers: &HeaderMap, expected: &str) -> AppResult<()> {
    if expected.is_empty() {
        return Ok(());
    }

    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(AppError::unauthorized("Invalid or missing bearer token"))
    }
}

fn parse_hosts(hosts: &[String]) -> Vec<IpAddr> {
    hosts
        .iter()
        .filter_map(|host| match host.trim().parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                debug!(host = %host, "Skipping allowed host that is not an IP address");
                None
            }
        })
        .collect()
}

/// Create a stream and start listening for RTP on its port
///
/// Without a usable allow-list the caller's own address becomes the only
/// publisher, as long as the host policy is enforced.
pub async fn create_stream(
    State(state): State<AppState>,
    ConnectInfo(caller): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateStreamRequest>,
) -> AppResult<Json<StreamInfo>> {
    check_bearer(&headers, &state.auth_token)?;

    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("Stream name is required"));
    }

    let mut allowed_hosts = parse_hosts(&req.allowed_hosts);
    if allowed_hosts.is_empty() && state.registry.config().host_policy.enforces() {
        allowed_hosts.push(caller.ip().to_canonical());
    }

    let info = state.registry.create_stream(&req.name, allowed_hosts).await?;

    info!(stream_id = %info.id, name = %info.name, port = info.port, caller = %caller, "Stream created");
    Ok(Json(info))
}

pub async fn get_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> AppResult<Json<StreamInfo>> {
    check_bearer(&headers, &state.auth_token)?;

    let stream = state
        .registry
        .get_stream_by_name(&name)
        .await
        .ok_or_else(|| AppError::not_found(format!("Stream '{name}' not found")))?;
    Ok(Json(stream.info()))
}

pub async fn delete_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> AppResult<StatusCode> {
    check_bearer(&headers, &state.auth_token)?;

    if state.registry.remove_stream(&name).await {
        info!(name = %name, "Stream removed");
        Ok(StatusCode::OK)
    } else {
        Err(AppError::not_found(format!("Stream '{name}' not found")))
    }
}
