//! Device lookup, purge, config patch, location history, and command
//! submission (spec.md §4.13). Talks to the registry for anything live and
//! straight to Postgres for anything persisted — there is no repository
//! layer here, these queries are small and specific enough not to earn one.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use gateway_core::error::SessionError;
use gateway_core::serial::TrackerId;
use gateway_core::DeviceConfig;
use serde::Deserialize;
use sqlx::Row;

use crate::http::response::{bad_gateway, bad_request, conflict, internal_error, not_found};
use crate::state::AppState;

fn parse_tracker_id(raw: &str) -> Result<TrackerId, Response> {
    raw.parse::<i64>().map(TrackerId).map_err(|_| bad_request("tracker_id must be an integer"))
}

pub async fn get_device(State(state): State<AppState>, Path(raw_id): Path<String>) -> impl IntoResponse {
    let tracker_id = match parse_tracker_id(&raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(device) = state.registry.get(tracker_id) else {
        return not_found("device not registered");
    };

    let row = match sqlx::query("SELECT config, attribute FROM tracker WHERE id = $1")
        .bind(tracker_id.0)
        .fetch_optional(&state.pool)
        .await
    {
        Ok(row) => row,
        Err(e) => return internal_error(e),
    };
    let Some(row) = row else { return not_found("device not registered") };
    let config_json: serde_json::Value = match row.try_get("config") {
        Ok(v) => v,
        Err(e) => return internal_error(e),
    };
    let attribute: serde_json::Value = match row.try_get("attribute") {
        Ok(v) => v,
        Err(e) => return internal_error(e),
    };

    let last_location = device.handler.last_location().map(|loc| {
        serde_json::json!({
            "latitude": loc.latitude,
            "longitude": loc.longitude,
            "speed_mps": loc.speed_mps,
            "gps_time": loc.gps_time.to_rfc3339(),
            "server_time": loc.server_time.to_rfc3339(),
        })
    });

    Json(serde_json::json!({
        "tracker_id": tracker_id.0,
        "nsn": device.nsn.pretty(),
        "protocol": match device.protocol {
            gateway_core::registry::Protocol::Gt06 => "gt06",
            gateway_core::registry::Protocol::SimpleJson => "simplejson",
        },
        "purged": device.is_purged(),
        "config": config_json,
        "attribute": attribute,
        "last_location": last_location,
    }))
    .into_response()
}

pub async fn purge_device(State(state): State<AppState>, Path(raw_id): Path<String>) -> impl IntoResponse {
    let tracker_id = match parse_tracker_id(&raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if state.registry.purge(tracker_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found("device not registered")
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ConfigPatch {
    pub allow_connect: Option<bool>,
    pub sublist_send: Option<bool>,
    pub store: Option<bool>,
    pub broadcast: Option<bool>,
    pub log_level: Option<gateway_core::config::LogLevel>,
    pub read_deadline_minutes: Option<u32>,
}

pub async fn patch_device_config(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Json(patch): Json<ConfigPatch>,
) -> impl IntoResponse {
    let tracker_id = match parse_tracker_id(&raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let row = match sqlx::query("SELECT config FROM tracker WHERE id = $1").bind(tracker_id.0).fetch_optional(&state.pool).await {
        Ok(row) => row,
        Err(e) => return internal_error(e),
    };
    let Some(row) = row else { return not_found("device not registered") };
    let current_json: serde_json::Value = match row.try_get("config") {
        Ok(v) => v,
        Err(e) => return internal_error(e),
    };
    let mut current: DeviceConfig = serde_json::from_value(current_json).unwrap_or_default();

    if let Some(v) = patch.allow_connect {
        current.allow_connect = v;
    }
    if let Some(v) = patch.sublist_send {
        current.sublist_send = v;
    }
    if let Some(v) = patch.store {
        current.store = v;
    }
    if let Some(v) = patch.broadcast {
        current.broadcast = v;
    }
    if let Some(v) = patch.log_level {
        current.log_level = v;
    }
    if let Some(v) = patch.read_deadline_minutes {
        current.read_deadline_minutes = v;
    }

    let updated_json = match serde_json::to_value(current) {
        Ok(v) => v,
        Err(e) => return internal_error(e),
    };
    if let Err(e) = sqlx::query("UPDATE tracker SET config = $2 WHERE id = $1")
        .bind(tracker_id.0)
        .bind(&updated_json)
        .execute(&state.pool)
        .await
    {
        return internal_error(e);
    }

    Json(updated_json).into_response()
}

#[derive(Debug, Deserialize)]
pub struct LocationsQuery {
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

pub async fn list_device_locations(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Query(query): Query<LocationsQuery>,
) -> impl IntoResponse {
    let tracker_id = match parse_tracker_id(&raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(device) = state.registry.get(tracker_id) else {
        return not_found("device not registered");
    };
    let fsn = device.nsn.pretty();
    let since = query.since.unwrap_or_else(|| DateTime::<Utc>::MIN_UTC);
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let rows = match sqlx::query(
        "SELECT latitude, longitude, altitude, speed, gps_time, server_time FROM locations_history \
         WHERE fsn = $1 AND gps_time >= $2 ORDER BY gps_time DESC LIMIT $3",
    )
    .bind(&fsn)
    .bind(since)
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => return internal_error(e),
    };

    let locations: Result<Vec<serde_json::Value>, sqlx::Error> = rows
        .iter()
        .map(|row| {
            Ok(serde_json::json!({
                "latitude": row.try_get::<f64, _>("latitude")?,
                "longitude": row.try_get::<f64, _>("longitude")?,
                "altitude": row.try_get::<Option<f32>, _>("altitude")?,
                "speed_mps": row.try_get::<f32, _>("speed")?,
                "gps_time": row.try_get::<DateTime<Utc>, _>("gps_time")?.to_rfc3339(),
                "server_time": row.try_get::<DateTime<Utc>, _>("server_time")?.to_rfc3339(),
            }))
        })
        .collect();
    match locations {
        Ok(locations) => Json(serde_json::json!({ "locations": locations })).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

pub async fn submit_device_command(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Json(body): Json<CommandRequest>,
) -> impl IntoResponse {
    let tracker_id = match parse_tracker_id(&raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(device) = state.registry.get(tracker_id) else {
        return not_found("device not registered");
    };
    match device.handler.submit_command(&body.command).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(SessionError::PendingCommand) => conflict("a command is already outstanding for this device"),
        Err(SessionError::Unsupported(msg)) => conflict(msg),
        Err(SessionError::Io(e)) => bad_gateway(e.to_string()),
        Err(SessionError::ConnectionClosed) => bad_gateway("device is not currently connected"),
        Err(e) => internal_error(e),
    }
}
