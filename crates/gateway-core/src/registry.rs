//! Device registry (spec.md §4.5): NSN → tracker id → live device lookup,
//! plus the first-seen-or-returning config fetch that mints a tracker row.
//! Schema ownership (the `tracker` / `config_template` tables and their
//! migrations) lives with the binary that deploys this crate — this module
//! only issues the queries the registry needs against tables it assumes
//! already exist.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::config::DeviceConfig;
use crate::conn::SharedConn;
use crate::error::{SessionError, StoreError};
use crate::serial::{Nsn, TrackerId};

/// A same-signature stand-in for `async fn` in a `dyn`-safe trait: the
/// command-submission path is the only place a device handler needs to
/// expose an async operation through a trait object.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Which protocol a device's handler is currently speaking; informational
/// only, surfaced through the registry for the HTTP control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Gt06,
    SimpleJson,
}

/// Last-known-location snapshot, surfaced to the HTTP control plane (spec.md
/// §4.13's device lookup). Deliberately separate from
/// [`crate::location_store::LocationRecord`] — that one is the batched-write
/// wire shape, this one is what a live handler holds in memory right now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_mps: f32,
    pub gps_time: DateTime<Utc>,
    pub server_time: DateTime<Utc>,
}

/// The contract a protocol-specific device handler offers the registry:
/// hand off a freshly accepted connection on reconnection, or tear the
/// handler down on purge. Neither call blocks on in-flight I/O completing.
pub trait DeviceHandler: Send + Sync {
    /// Kicks off the handler's read loop for the first time, against the
    /// connection it was constructed with.
    fn start(self: Arc<Self>);
    fn replace_conn(self: Arc<Self>, conn: SharedConn);
    fn stop(&self);
    /// The last location this handler has processed, if any.
    fn last_location(&self) -> Option<DeviceSnapshot>;
    /// Replaces the in-memory config snapshot; picked up on the handler's
    /// next read of it (spec.md §4.5: hot-read on login, not live-pushed).
    fn set_config(&self, config: DeviceConfig);
    /// Submits an operator-originated command through the live connection.
    /// Protocols with no command channel (SimpleJSON) return
    /// [`SessionError::Unsupported`].
    fn submit_command(&self, command: &str) -> BoxFuture<'_, Result<(), SessionError>>;
}

/// One registry row. `purged` is a tombstone, never removed — so a later
/// login for the same NSN can tell "replace the live device" apart from
/// "the old one was purged, mint a fresh one".
pub struct Device {
    pub tracker_id: TrackerId,
    pub nsn: Nsn,
    pub protocol: Protocol,
    pub handler: Arc<dyn DeviceHandler>,
    purged: AtomicBool,
}

impl Device {
    pub fn is_purged(&self) -> bool {
        self.purged.load(Ordering::SeqCst)
    }
}

struct RegistryInner {
    by_tracker_id: HashMap<TrackerId, Arc<Device>>,
    tracker_id_by_nsn: HashMap<Nsn, TrackerId>,
}

/// Two maps behind one mutex — both are always mutated together, so one
/// lock is enough and there is no lock-ordering hazard to get wrong.
pub struct DeviceRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                by_tracker_id: HashMap::new(),
                tracker_id_by_nsn: HashMap::new(),
            }),
        }
    }

    pub fn device_by_nsn(&self, nsn: Nsn) -> Option<Arc<Device>> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        let tid = inner.tracker_id_by_nsn.get(&nsn)?;
        inner.by_tracker_id.get(tid).cloned()
    }

    pub fn get(&self, tracker_id: TrackerId) -> Option<Arc<Device>> {
        self.inner.lock().expect("registry mutex poisoned").by_tracker_id.get(&tracker_id).cloned()
    }

    pub fn add(&self, nsn: Nsn, tracker_id: TrackerId, handler: Arc<dyn DeviceHandler>, protocol: Protocol) -> Arc<Device> {
        let device = Arc::new(Device { tracker_id, nsn, protocol, handler, purged: AtomicBool::new(false) });
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner.by_tracker_id.insert(tracker_id, device.clone());
        inner.tracker_id_by_nsn.insert(nsn, tracker_id);
        device
    }

    /// Marks the tombstone and stops the handler. The entry stays in place
    /// so a subsequent login for the same NSN observes `purged` and mints a
    /// fresh device instead of reconnecting the old one.
    pub fn purge(&self, tracker_id: TrackerId) -> bool {
        let device = self.inner.lock().expect("registry mutex poisoned").by_tracker_id.get(&tracker_id).cloned();
        match device {
            Some(device) => {
                device.purged.store(true, Ordering::SeqCst);
                device.handler.stop();
                true
            }
            None => false,
        }
    }

    pub fn all(&self) -> Vec<Arc<Device>> {
        self.inner.lock().expect("registry mutex poisoned").by_tracker_id.values().cloned().collect()
    }
}

/// Resolves an NSN to its tracker id, config, and attribute snapshot — the
/// acceptor's only dependency on persistence. Kept as a trait (rather than a
/// concrete `PgConfigStore` reference baked into the acceptor) so tests can
/// swap in an in-memory fake without a database.
pub trait ConfigFetcher: Send + Sync + 'static {
    fn register_and_fetch(
        &self,
        nsn: Nsn,
    ) -> impl Future<Output = Result<(TrackerId, DeviceConfig, serde_json::Value), StoreError>> + Send;
}

/// The production [`ConfigFetcher`], backed by the `tracker` /
/// `config_template` tables (spec.md §4.5, SPEC_FULL §4.14).
pub struct PgConfigStore {
    pool: PgPool,
}

impl PgConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ConfigFetcher for PgConfigStore {
    async fn register_and_fetch(&self, nsn: Nsn) -> Result<(TrackerId, DeviceConfig, serde_json::Value), StoreError> {
        if let Some(row) = sqlx::query("SELECT id, config, attribute FROM tracker WHERE nsn = $1")
            .bind(nsn.raw() as i64)
            .fetch_optional(&self.pool)
            .await?
        {
            let id: i64 = row.try_get("id")?;
            let config_json: serde_json::Value = row.try_get("config")?;
            let attribute: serde_json::Value = row.try_get("attribute")?;
            let config: DeviceConfig =
                serde_json::from_value(config_json).map_err(|e| StoreError::Encode(e.to_string()))?;
            return Ok((TrackerId(id), config, attribute));
        }

        let template_config = match sqlx::query("SELECT config FROM config_template WHERE name = $1")
            .bind("tracker_default_config")
            .fetch_optional(&self.pool)
            .await?
        {
            Some(row) => row.try_get::<serde_json::Value, _>("config")?,
            None => serde_json::to_value(DeviceConfig::default()).map_err(|e| StoreError::Encode(e.to_string()))?,
        };
        let default_config: DeviceConfig =
            serde_json::from_value(template_config.clone()).map_err(|e| StoreError::Encode(e.to_string()))?;

        let row = sqlx::query(
            "INSERT INTO tracker (nsn, config, attribute) VALUES ($1, $2, '{}'::jsonb) RETURNING id",
        )
        .bind(nsn.raw() as i64)
        .bind(&template_config)
        .fetch_one(&self.pool)
        .await?;
        let id: i64 = row.try_get("id")?;
        Ok((TrackerId(id), default_config, serde_json::json!({})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeHandler {
        stopped: AtomicBool,
        replacements: AtomicUsize,
    }

    impl FakeHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self { stopped: AtomicBool::new(false), replacements: AtomicUsize::new(0) })
        }
    }

    impl DeviceHandler for FakeHandler {
        fn start(self: Arc<Self>) {}

        fn replace_conn(self: Arc<Self>, _conn: SharedConn) {
            self.replacements.fetch_add(1, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn last_location(&self) -> Option<DeviceSnapshot> {
            None
        }

        fn set_config(&self, _config: DeviceConfig) {}

        fn submit_command(&self, _command: &str) -> BoxFuture<'_, Result<(), SessionError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn add_then_lookup_by_nsn_and_tracker_id() {
        let registry = DeviceRegistry::new();
        let nsn = Nsn::combine(crate::serial::SnType::Imei, 123456789012345);
        let handler = FakeHandler::new();
        let device = registry.add(nsn, TrackerId(1), handler, Protocol::Gt06);
        assert_eq!(device.tracker_id, TrackerId(1));
        assert!(registry.device_by_nsn(nsn).is_some());
        assert!(registry.get(TrackerId(1)).is_some());
        assert!(registry.get(TrackerId(2)).is_none());
    }

    #[test]
    fn purge_tombstones_and_stops_without_removing_the_row() {
        let registry = DeviceRegistry::new();
        let nsn = Nsn::combine(crate::serial::SnType::Imei, 1);
        let handler = FakeHandler::new();
        registry.add(nsn, TrackerId(7), handler.clone(), Protocol::Gt06);

        assert!(registry.purge(TrackerId(7)));
        assert!(handler.stopped.load(Ordering::SeqCst));
        let device = registry.device_by_nsn(nsn).expect("tombstoned row still present");
        assert!(device.is_purged());
        assert!(!registry.purge(TrackerId(999)));
    }
}
