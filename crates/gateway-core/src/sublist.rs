//! Per-tracker-id subscriber fanout with lossy, non-blocking push and
//! last-payload caching so a freshly-subscribed client sees the current
//! state immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::events::{EventFrameBody, GatewayEvent};
use crate::serial::TrackerId;
use crate::subscriber::{Subscriber, SubscriberId};

/// Encodes the 39-byte binary location frame: `0x00 | tid:u16 | lat:f64 |
/// lon:f64 | speed:f32 | gps_time_ms:i64 | server_time_ms:i64`, all
/// little-endian.
pub fn encode_location_frame(
    tid: TrackerId,
    latitude: f64,
    longitude: f64,
    speed_mps: f32,
    gps_time: DateTime<Utc>,
    server_time: DateTime<Utc>,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(39);
    buf.put_u8(0x00);
    buf.put_u16_le(tid.0 as u16);
    buf.put_f64_le(latitude);
    buf.put_f64_le(longitude);
    buf.put_f32_le(speed_mps);
    buf.put_i64_le(gps_time.timestamp_millis());
    buf.put_i64_le(server_time.timestamp_millis());
    buf.freeze()
}

/// Encodes the variable-length event frame: `0x01` followed by the JSON
/// body.
pub fn encode_event_frame(tid: TrackerId, event: &GatewayEvent, at: DateTime<Utc>) -> Bytes {
    let message = match event {
        GatewayEvent::CommandResponse { response, .. } => Some(response.clone()),
        GatewayEvent::CommandSent { command, .. } => Some(command.clone()),
        _ => None,
    };
    let body = EventFrameBody { tid, topic: event.topic(), message, time: at.timestamp() };
    let json = serde_json::to_vec(&body).unwrap_or_default();
    let mut buf = BytesMut::with_capacity(1 + json.len());
    buf.put_u8(0x01);
    buf.extend_from_slice(&json);
    buf.freeze()
}

struct SublistInner {
    subscribers: HashMap<SubscriberId, Arc<dyn Subscriber>>,
    last_location_payload: Bytes,
    last_event_payload: Bytes,
}

/// One per tracker id. Only constructible through [`SublistMap::get`] so the
/// last-payload caches are always initialized.
pub struct Sublist {
    key: TrackerId,
    inner: Mutex<SublistInner>,
}

impl Sublist {
    fn new(key: TrackerId) -> Self {
        let seed = serde_json::to_vec(&serde_json::json!({ "tracker_id": key.0 })).unwrap_or_default();
        Self {
            key,
            inner: Mutex::new(SublistInner {
                subscribers: HashMap::new(),
                last_location_payload: Bytes::from(seed.clone()),
                last_event_payload: Bytes::from(seed),
            }),
        }
    }

    pub fn key(&self) -> TrackerId {
        self.key
    }

    /// Inserts `sub` and immediately pushes the cached location then event
    /// payload, so a late joiner sees one consistent snapshot.
    pub fn subscribe(&self, id: SubscriberId, sub: Arc<dyn Subscriber>) {
        let mut inner = self.inner.lock().expect("sublist mutex poisoned");
        let location = inner.last_location_payload.clone();
        let event = inner.last_event_payload.clone();
        inner.subscribers.insert(id, sub.clone());
        drop(inner);
        sub.push(self.key, location);
        sub.push(self.key, event);
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.lock().expect("sublist mutex poisoned").subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("sublist mutex poisoned").subscribers.len()
    }

    pub fn send_location(
        &self,
        latitude: f64,
        longitude: f64,
        speed_mps: f32,
        gps_time: DateTime<Utc>,
        server_time: DateTime<Utc>,
    ) {
        let payload = encode_location_frame(self.key, latitude, longitude, speed_mps, gps_time, server_time);
        self.fanout(payload, true);
    }

    pub fn send_event(&self, event: &GatewayEvent, at: DateTime<Utc>) {
        let payload = encode_event_frame(self.key, event, at);
        self.fanout(payload, false);
    }

    fn fanout(&self, payload: Bytes, is_location: bool) {
        let mut inner = self.inner.lock().expect("sublist mutex poisoned");
        if is_location {
            inner.last_location_payload = payload.clone();
        } else {
            inner.last_event_payload = payload.clone();
        }
        inner.subscribers.retain(|_, sub| !sub.push(self.key, payload.clone()));
    }
}

/// Owns every tracker id's [`Sublist`] behind a single mutex covering just
/// the top-level map, mirroring the registry's locking granularity.
pub struct SublistMap {
    lists: Mutex<HashMap<TrackerId, Arc<Sublist>>>,
}

impl Default for SublistMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SublistMap {
    pub fn new() -> Self {
        Self { lists: Mutex::new(HashMap::new()) }
    }

    /// The sole constructor for a [`Sublist`]; `create=false` returns `None`
    /// if one doesn't already exist.
    pub fn get(&self, key: TrackerId, create: bool) -> Option<Arc<Sublist>> {
        let mut lists = self.lists.lock().expect("sublist map mutex poisoned");
        if let Some(list) = lists.get(&key) {
            return Some(list.clone());
        }
        if !create {
            return None;
        }
        let list = Arc::new(Sublist::new(key));
        lists.insert(key, list.clone());
        Some(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct RecordingSubscriber {
        pushes: Mutex<Vec<Bytes>>,
        closed: AtomicBool,
        push_count: AtomicUsize,
    }

    impl RecordingSubscriber {
        fn new() -> Self {
            Self { pushes: Mutex::new(Vec::new()), closed: AtomicBool::new(false), push_count: AtomicUsize::new(0) }
        }
    }

    impl Subscriber for RecordingSubscriber {
        fn push(&self, _tid: TrackerId, payload: Bytes) -> bool {
            self.push_count.fetch_add(1, Ordering::SeqCst);
            self.pushes.lock().unwrap().push(payload);
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn location_frame_layout_matches_spec() {
        let tid = TrackerId(7);
        let t = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let frame = encode_location_frame(tid, 1.5, -2.5, 3.0, t, t);
        assert_eq!(frame.len(), 39);
        assert_eq!(frame[0], 0x00);
        assert_eq!(u16::from_le_bytes([frame[1], frame[2]]), 7);
        assert_eq!(f64::from_le_bytes(frame[3..11].try_into().unwrap()), 1.5);
        assert_eq!(f64::from_le_bytes(frame[11..19].try_into().unwrap()), -2.5);
        assert_eq!(f32::from_le_bytes(frame[19..23].try_into().unwrap()), 3.0);
    }

    #[test]
    fn subscribe_delivers_cached_location_then_event_payload_once() {
        let map = SublistMap::new();
        let list = map.get(TrackerId(1), true).unwrap();
        let t = Utc::now();
        list.send_location(1.0, 2.0, 3.0, t, t);
        list.send_event(&GatewayEvent::HeartbeatChanged { gps_time: t }, t);

        let sub = Arc::new(RecordingSubscriber::new());
        list.subscribe(1, sub.clone());

        let pushes = sub.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0][0], 0x00); // cached location frame first
        assert_eq!(pushes[1][0], 0x01); // cached event frame second
    }

    #[test]
    fn fanout_removes_subscribers_that_report_closed() {
        let map = SublistMap::new();
        let list = map.get(TrackerId(2), true).unwrap();
        let sub = Arc::new(RecordingSubscriber::new());
        sub.closed.store(true, Ordering::SeqCst);
        list.subscribe(99, sub.clone());
        assert_eq!(list.subscriber_count(), 1);

        let t = Utc::now();
        list.send_location(0.0, 0.0, 0.0, t, t);
        assert_eq!(list.subscriber_count(), 0);
    }

    #[test]
    fn get_without_create_returns_none_for_unknown_key() {
        let map = SublistMap::new();
        assert!(map.get(TrackerId(42), false).is_none());
    }
}
