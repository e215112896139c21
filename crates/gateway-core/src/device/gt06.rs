//! GT06/GK310 device handler: the per-connection read loop, message
//! dispatch, reconnection takeover, and outbound command path (spec.md
//! §4.2). Grounded in the receiver service's `run_session_loop` shape — one
//! task per device, driven by `tokio::select!`-free sequential reads since
//! (unlike the receiver) there is exactly one peer and no shutdown channel
//! to race against; shutdown instead rides the `stopped` latch.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use gt06_protocol::gt06::{self, codes, CommandResponse, DeviceSnTuple, GpsFix, GpsTimestamp, LbsInfo, StatusInfo};

use crate::config::DeviceConfig;
use crate::conn::{ReadError, SharedConn};
use crate::error::SessionError;
use crate::events::GatewayEvent;
use crate::location_store::{LocationRecord, LocationStore};
use crate::misc_store::MiscStore;
use crate::registry::DeviceHandler;
use crate::serial::{Nsn, TrackerId};
use crate::sublist::SublistMap;

use super::command::PendingCommand;
use super::{ConnSlot, RunState, RunningState};

/// A read timed out twice in a row without the STATUS# probe producing any
/// traffic; the connection is presumed dead.
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

pub struct Gt06Device {
    tracker_id: TrackerId,
    nsn: Nsn,
    conn: ConnSlot,
    run: RunState,
    pending: PendingCommand,
    outbound_serial: AtomicU32,
    time_offset_minutes: i32,
    config: RwLock<DeviceConfig>,
    last_status: Mutex<Option<StatusInfo>>,
    last_status_at: Mutex<Option<DateTime<Utc>>>,
    last_location: Mutex<Option<LastLocation>>,
    last_lbs: Mutex<Option<LbsInfo>>,
    sublist_map: Arc<SublistMap>,
    location_store: Arc<LocationStore>,
    misc_store: Arc<MiscStore>,
}

impl Gt06Device {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker_id: TrackerId,
        nsn: Nsn,
        conn: SharedConn,
        config: DeviceConfig,
        time_offset_minutes: i32,
        sublist_map: Arc<SublistMap>,
        location_store: Arc<LocationStore>,
        misc_store: Arc<MiscStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tracker_id,
            nsn,
            conn: ConnSlot::new(conn),
            run: RunState::default(),
            pending: PendingCommand::new(),
            outbound_serial: AtomicU32::new(0),
            time_offset_minutes,
            config: RwLock::new(config),
            last_status: Mutex::new(None),
            last_status_at: Mutex::new(None),
            last_location: Mutex::new(None),
            last_lbs: Mutex::new(None),
            sublist_map,
            location_store,
            misc_store,
        })
    }

    pub fn tracker_id(&self) -> TrackerId {
        self.tracker_id
    }

    /// Submits an operator- or probe-originated command for delivery over
    /// the current connection.
    pub async fn send_command(&self, msg: &str, force: bool) -> Result<(), SessionError> {
        let conn = self.conn.current();
        self.send_command_on(&conn, msg, force).await
    }

    async fn send_command_on(&self, conn: &SharedConn, msg: &str, force: bool) -> Result<(), SessionError> {
        let flag = self.pending.submit(msg, force).map_err(|_| SessionError::PendingCommand)?;
        let body = gt06::encode_server_command(flag, msg);
        let serial = self.next_outbound_serial();
        let frame = gt06::encode_short(codes::SERVER_COMMAND, &body, serial);
        match conn.write_all(&frame).await {
            Ok(()) => {
                let now = Utc::now();
                self.pending.mark_sent(now);
                self.misc_store
                    .save_event(self.tracker_id, &GatewayEvent::CommandSent { server_flag: flag, command: msg.to_owned() }, now)
                    .await;
                Ok(())
            }
            Err(e) => {
                self.pending.mark_send_failed();
                Err(SessionError::Io(e))
            }
        }
    }

    fn next_outbound_serial(&self) -> u16 {
        let s = self.outbound_serial.fetch_add(1, Ordering::Relaxed);
        (s & 0xFFFF) as u16
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
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 2048];
        let mut timeout_streak = 0u8;

        loop {
            let deadline_minutes = self.config.read().expect("device config lock poisoned").read_deadline_minutes;
            let deadline = Duration::from_secs(u64::from(deadline_minutes) * 60);
            match conn.read(&mut chunk, Some(deadline)).await {
                Ok(n) => {
                    timeout_streak = 0;
                    buf.extend_from_slice(&chunk[..n]);
                    self.drain_frames(&conn, &mut buf).await?;
                }
                Err(ReadError::Timeout) => {
                    timeout_streak += 1;
                    if timeout_streak >= MAX_TIMEOUT_STREAK {
                        return Err(SessionError::ReadTimeout);
                    }
                    let _ = self.send_command_on(&conn, "STATUS#", true).await;
                }
                Err(ReadError::Closed) => return Err(SessionError::ConnectionClosed),
                Err(ReadError::Io) => return Err(SessionError::ConnectionClosed),
            }
        }
    }

    async fn drain_frames(self: &Arc<Self>, conn: &SharedConn, buf: &mut Vec<u8>) -> Result<(), SessionError> {
        loop {
            match gt06::try_decode(buf) {
                Ok(Some((frame, consumed))) => {
                    buf.drain(..consumed);
                    self.dispatch(conn, frame.protocol, frame.serial, &frame.body).await?;
                }
                Ok(None) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, conn: &SharedConn, protocol: u8, serial: u16, body: &[u8]) -> Result<(), SessionError> {
        match protocol {
            codes::TIME_CHECK => self.handle_time_check(conn, serial).await?,
            codes::STATUS_INFORMATION => self.handle_heartbeat(conn, serial, body).await?,
            codes::GT06_GPS => self.handle_gps(body, false, false).await,
            codes::GK310_GPS => self.handle_gps(body, true, false).await,
            codes::GT06_GPS_ALARM => self.handle_gps(body, false, true).await,
            codes::GK310_GPS_ALARM => self.handle_gps(body, true, true).await,
            codes::INFORMATION_TX_PACKET => self.handle_info_tx(body).await,
            codes::STRING_INFORMATION | codes::SERVER_COMMAND_RESPONSE => self.handle_command_response(body).await,
            other => {
                tracing::debug!(protocol = format!("{other:#04x}"), tracker_id = %self.tracker_id, "unknown GT06 protocol byte, ignoring");
            }
        }
        Ok(())
    }

    async fn handle_time_check(&self, conn: &SharedConn, serial: u16) -> Result<(), SessionError> {
        let now = Utc::now();
        let body = gt06::encode_time_response(
            (now.year() % 100) as u8,
            now.month() as u8,
            now.day() as u8,
            now.hour() as u8,
            now.minute() as u8,
            now.second() as u8,
        );
        let frame = gt06::encode_short(codes::TIME_CHECK, &body, serial);
        conn.write_all(&frame).await?;
        Ok(())
    }

    async fn handle_heartbeat(&self, conn: &SharedConn, serial: u16, body: &[u8]) -> Result<(), SessionError> {
        let ack = gt06::encode_short(codes::STATUS_INFORMATION, &[], serial);
        conn.write_all(&ack).await?;

        let Some(status) = StatusInfo::parse(body) else { return Ok(()) };
        let now = Utc::now();
        let (changed, stale) = {
            let mut last_status = self.last_status.lock().expect("last status mutex poisoned");
            let mut last_at = self.last_status_at.lock().expect("last status time mutex poisoned");
            let changed = *last_status != Some(status);
            let stale = last_at.map(|t| now - t >= chrono::Duration::minutes(10)).unwrap_or(true);
            *last_status = Some(status);
            *last_at = Some(now);
            (changed, stale)
        };

        if changed {
            let event = GatewayEvent::HeartbeatChanged { gps_time: now };
            self.misc_store.save_event(self.tracker_id, &event, now).await;
            if let Some(list) = self.sublist_map.get(self.tracker_id, true) {
                list.send_event(&event, now);
            }
        } else if stale {
            self.misc_store
                .save_event(self.tracker_id, &GatewayEvent::HeartbeatUnchanged { gps_time: now }, now)
                .await;
        }
        Ok(())
    }

    async fn handle_gps(&self, body: &[u8], gk310: bool, alarm: bool) {
        let Some((fix, _consumed)) = GpsFix::parse(body, gk310) else { return };
        let now = Utc::now();
        let offset = if gk310 { 0 } else { self.time_offset_minutes };
        let gps_time = gps_timestamp_to_utc(fix.timestamp, offset);
        let latitude = fix.latitude_deg();
        let longitude = fix.longitude_deg();
        let speed_mps = fix.speed_mps();

        let config = *self.config.read().expect("device config lock poisoned");
        if config.store {
            self.location_store.put(LocationRecord {
                nsn: self.nsn,
                latitude,
                longitude,
                altitude: None,
                speed_mps,
                gps_time,
                server_time: now,
            });
        }
        if config.sublist_send {
            if let Some(list) = self.sublist_map.get(self.tracker_id, true) {
                list.send_location(latitude, longitude, speed_mps, gps_time, now);
            }
        }
        *self.last_location.lock().expect("last location mutex poisoned") =
            Some(LastLocation { latitude, longitude, speed_mps, gps_time, server_time: now });

        let lbs_changed = {
            let mut last_lbs = self.last_lbs.lock().expect("last lbs mutex poisoned");
            let changed = *last_lbs != Some(fix.lbs);
            *last_lbs = Some(fix.lbs);
            changed
        };
        if lbs_changed {
            self.misc_store
                .save_event(
                    self.tracker_id,
                    &GatewayEvent::CellInfoChanged { mcc: fix.lbs.mcc, mnc: fix.lbs.mnc, lac: fix.lbs.lac, cell_id: fix.lbs.cell_id },
                    now,
                )
                .await;
        }

        if alarm {
            let event = GatewayEvent::Alarm { alarm_code: 0, gps_time };
            self.misc_store.save_event(self.tracker_id, &event, now).await;
            if config.sublist_send {
                if let Some(list) = self.sublist_map.get(self.tracker_id, true) {
                    list.send_event(&event, now);
                }
            }
        }
    }

    async fn handle_info_tx(&self, body: &[u8]) {
        if body.is_empty() {
            return;
        }
        match body[0] {
            codes::INFO_TX_TERMINAL_STATUS_SYNC => {
                let text = String::from_utf8_lossy(&body[1..]).into_owned();
                self.set_attribute("terminal_status", serde_json::Value::String(text)).await;
            }
            codes::INFO_TX_DEVICE_SN => {
                if let Some(sn) = DeviceSnTuple::parse(body) {
                    self.set_attribute("imei", serde_json::Value::String(sn.imei)).await;
                    self.set_attribute("imsi", serde_json::Value::String(sn.imsi)).await;
                    self.set_attribute("iccid", serde_json::Value::String(sn.iccid)).await;
                }
            }
            other => {
                tracing::debug!(sub_code = format!("{other:#04x}"), tracker_id = %self.tracker_id, "unknown informationTxPacket sub-code, ignoring");
            }
        }
    }

    async fn handle_command_response(&self, body: &[u8]) {
        let Some(resp) = CommandResponse::parse(body) else { return };
        let now = Utc::now();
        self.misc_store
            .save_event(self.tracker_id, &GatewayEvent::CommandResponse { server_flag: resp.server_flag, response: resp.message.clone() }, now)
            .await;

        match self.pending.resolve(resp.server_flag) {
            Some(command) => {
                self.misc_store
                    .save_command_response(self.tracker_id, resp.server_flag, &command, now, &resp.message, now)
                    .await;
                let upper = command.trim().to_uppercase();
                if upper == "VERSION#" || upper == "PARAM#" {
                    self.set_attribute(&upper, serde_json::Value::String(resp.message.clone())).await;
                }
            }
            None => {
                tracing::warn!(server_flag = resp.server_flag, tracker_id = %self.tracker_id, "command response server flag did not match the tracked pending command");
            }
        }
    }

    async fn set_attribute(&self, key: &str, value: serde_json::Value) {
        self.misc_store.update_attribute(self.tracker_id, key, &value).await;
    }
}

impl DeviceHandler for Gt06Device {
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

    fn submit_command(&self, command: &str) -> crate::registry::BoxFuture<'_, Result<(), SessionError>> {
        let command = command.to_owned();
        Box::pin(async move { self.send_command(&command, false).await })
    }
}

/// GK310 timestamps are UTC directly; GT06 timestamps are local to the
/// device's configured offset (`time_offset_minutes` from the login frame's
/// BCD-combined offset bytes), so `offset` is subtracted to recover UTC.
fn gps_timestamp_to_utc(ts: GpsTimestamp, offset_minutes: i32) -> DateTime<Utc> {
    let year = 2000 + i32::from(ts.year);
    let naive = chrono::NaiveDate::from_ymd_opt(year, u32::from(ts.month).max(1), u32::from(ts.day).max(1))
        .and_then(|d| d.and_hms_opt(u32::from(ts.hour), u32::from(ts.minute), u32::from(ts.second)));
    let naive = naive.unwrap_or(chrono::NaiveDateTime::UNIX_EPOCH);
    let utc = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);
    utc - chrono::Duration::minutes(i64::from(offset_minutes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gk310_timestamp_is_treated_as_utc() {
        let ts = GpsTimestamp { year: 23, month: 1, day: 2, hour: 3, minute: 4, second: 5 };
        let utc = gps_timestamp_to_utc(ts, 0);
        assert_eq!(utc.year(), 2023);
        assert_eq!(utc.hour(), 3);
    }

    #[test]
    fn gt06_timestamp_subtracts_the_device_offset() {
        let ts = GpsTimestamp { year: 23, month: 1, day: 2, hour: 3, minute: 0, second: 0 };
        let utc = gps_timestamp_to_utc(ts, 60);
        assert_eq!(utc.hour(), 2);
    }
}
