//! Explicit dependency-injection struct threaded through the TCP acceptor,
//! the websocket listener, and the HTTP control plane — mirroring
//! `services/server/src/state.rs::AppState`'s role, sized down to what this
//! gateway actually needs.

use std::sync::Arc;

use gateway_core::location_store::LocationStore;
use gateway_core::misc_store::MiscStore;
use gateway_core::registry::DeviceRegistry;
use gateway_core::sublist::SublistMap;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: Arc<DeviceRegistry>,
    pub sublist_map: Arc<SublistMap>,
    pub location_store: Arc<LocationStore>,
    pub misc_store: Arc<MiscStore>,
}
