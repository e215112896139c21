pub mod devices;
pub mod health;
pub mod response;

use axum::routing::{get, patch, post};
use axum::Router;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/api/v1/devices/:tracker_id", get(devices::get_device))
        .route("/api/v1/devices/:tracker_id/purge", post(devices::purge_device))
        .route("/api/v1/devices/:tracker_id/config", patch(devices::patch_device_config))
        .route("/api/v1/devices/:tracker_id/locations", get(devices::list_device_locations))
        .route("/api/v1/devices/:tracker_id/command", post(devices::submit_device_command))
        .with_state(state)
}
