//! SimpleJSON device handler: the same reconnection, replacement, and
//! store/publish gating contract as the GT06 handler (spec.md §4.3), with a
//! far smaller dispatch table since there is no command correlation or
//! time-check round trip to maintain for this protocol.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use gt06_protocol::simplejson::{self, codes, LocationMessage};

use crate::config::DeviceConfig;
use crate::conn::{ReadError, SharedConn};
use crate::error::SessionError;
use crate::location_store::{LocationRecord, LocationStore};
use crate::misc_store::MiscStore;
use crate::registry::DeviceHandler;
use crate::serial::{Nsn, TrackerId};
use crate::sublist::SublistMap;

use super::{ConnSlot, RunState, RunningState};

const MAX_TIMEOUT_STREAK: u8 = 2;
const RECONNECT_COOL_OFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
struct LastLocation {
    latitude: f64,
    longitude: f64,
    speed_mps: f32,
    gps_time: DateTime<Utc>,
    server_time: DateTime<Utc>,
}

pub struct SimpleJsonDevice {
    tracker_id: TrackerId,
    nsn: Nsn,
    conn: ConnSlot,
    run: RunState,
    config: RwLock<DeviceConfig>,
    last_location: Mutex<Option<LastLocation>>,
    sublist_map: Arc<SublistMap>,
    location_store: Arc<LocationStore>,
    misc_store: Arc<MiscStore>,
}

impl SimpleJsonDevice {
    pub fn new(
        tracker_id: TrackerId,
        nsn: Nsn,
        conn: SharedConn,
        config: DeviceConfig,
        sublist_map: Arc<SublistMap>,
        location_store: Arc<LocationStore>,
        misc_store: Arc<MiscStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tracker_id,
            nsn,
            conn: ConnSlot::new(conn),
            run: RunState::default(),
            config: RwLock::new(config),
            last_location: Mutex::new(None),
            sublist_map,
            location_store,
            misc_store,
        })
    }

    pub fn tracker_id(&self) -> TrackerId {
        self.tracker_id
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            let outcome = self.serve_current_connection().await;
            if outcome.is_err() {
                self.conn.current().close();
            }
            if self.run.is_stopped() {
                self.run.set(RunningState::Paused);
                return;
            }
            match self.conn.take_next() {
                Some(next) => {
                    tokio::time::sleep(RECONNECT_COOL_OFF).await;
                    if self.run.is_stopped() {
                        self.run.set(RunningState::Paused);
                        return;
                    }
                    self.conn.set_current(next);
                }
                None => {
                    self.run.set(RunningState::Paused);
                    return;
                }
            }
        }
    }

    async fn serve_current_connection(self: &Arc<Self>) -> Result<(), SessionError> {
        let conn = self.conn.current();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 2048];
        let mut timeout_streak = 0u8;

        loop {
            let deadline_minutes = self.config.read().expect("device config lock poisoned").read_deadline_minutes;
            let deadline = Duration::from_secs(u64::from(deadline_minutes) * 60);
            match conn.read(&mut chunk, Some(deadline)).await {
                Ok(n) => {
                    timeout_streak = 0;
                    buf.extend_from_slice(&chunk[..n]);
                    self.drain_frames(&mut buf).await?;
                }
                Err(ReadError::Timeout) => {
                    timeout_streak += 1;
                    if timeout_streak >= MAX_TIMEOUT_STREAK {
                        return Err(SessionError::ReadTimeout);
                    }
                }
                Err(ReadError::Closed | ReadError::Io) => return Err(SessionError::ConnectionClosed),
            }
        }
    }

    async fn drain_frames(self: &Arc<Self>, buf: &mut Vec<u8>) -> Result<(), SessionError> {
        loop {
            match simplejson::try_decode(buf) {
                Ok(Some((frame, consumed))) => {
                    buf.drain(..consumed);
                    self.dispatch(frame.protocol, &frame.body).await;
                }
                Ok(None) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn dispatch(&self, protocol: u8, body: &[u8]) {
        match protocol {
            codes::LOCATION_UPDATE => self.handle_location(body).await,
            codes::STATUS | codes::SAT_UPDATE | codes::GPS_ERROR | codes::GPS_INIT => {
                tracing::debug!(protocol, tracker_id = %self.tracker_id, "simplejson informational message, not persisted");
            }
            other => tracing::debug!(protocol = other, tracker_id = %self.tracker_id, "unknown simplejson protocol code, ignoring"),
        }
    }

    async fn handle_location(&self, body: &[u8]) {
        let Ok(msg) = serde_json::from_slice::<LocationMessage>(body) else {
            tracing::warn!(tracker_id = %self.tracker_id, "malformed simplejson location body, ignoring");
            return;
        };
        let now = Utc::now();
        let gps_time = Utc.timestamp_opt(msg.gps_time, 0).single().unwrap_or(now);
        let config = *self.config.read().expect("device config lock poisoned");

        if config.store {
            self.location_store.put(LocationRecord {
                nsn: self.nsn,
                latitude: msg.latitude,
                longitude: msg.longitude,
                altitude: msg.altitude,
                speed_mps: msg.speed,
                gps_time,
                server_time: now,
            });
        }
        if config.sublist_send {
            if let Some(list) = self.sublist_map.get(self.tracker_id, true) {
                list.send_location(msg.latitude, msg.longitude, msg.speed, gps_time, now);
            }
        }
        *self.last_location.lock().expect("last location mutex poisoned") = Some(LastLocation {
            latitude: msg.latitude,
            longitude: msg.longitude,
            speed_mps: msg.speed,
            gps_time,
            server_time: now,
        });
    }
}

impl DeviceHandler for SimpleJsonDevice {
    fn start(self: Arc<Self>) {
        self.run.set(RunningState::Running);
        tokio::spawn(Self::run_loop(self));
    }

    fn replace_conn(self: Arc<Self>, conn: SharedConn) {
        match self.run.get() {
            RunningState::Running => {
                self.conn.queue_next(conn);
                self.conn.current().close();
            }
            RunningState::Paused | RunningState::Created => {
                self.conn.set_current(conn);
                self.run.set(RunningState::Running);
                tokio::spawn(Self::run_loop(self));
            }
        }
    }

    fn stop(&self) {
        self.run.latch_stopped();
        self.conn.current().close();
    }

    fn last_location(&self) -> Option<crate::registry::DeviceSnapshot> {
        self.last_location.lock().expect("last location mutex poisoned").map(|loc| crate::registry::DeviceSnapshot {
            latitude: loc.latitude,
            longitude: loc.longitude,
            speed_mps: loc.speed_mps,
            gps_time: loc.gps_time,
            server_time: loc.server_time,
        })
    }

    fn set_config(&self, config: DeviceConfig) {
        *self.config.write().expect("device config lock poisoned") = config;
    }

    fn submit_command(&self, _command: &str) -> crate::registry::BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async { Err(SessionError::Unsupported("simplejson devices have no command channel".into())) })
    }
}
