//! Typed replacement for the `interface{}` event payloads the misc store
//! persists and the sublist fans out as JSON. One serialization surface per
//! event kind instead of an untyped map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serial::TrackerId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    Location {
        latitude: f64,
        longitude: f64,
        speed_mps: f32,
        gps_time: DateTime<Utc>,
    },
    HeartbeatChanged {
        gps_time: DateTime<Utc>,
    },
    HeartbeatUnchanged {
        gps_time: DateTime<Utc>,
    },
    Alarm {
        alarm_code: u8,
        gps_time: DateTime<Utc>,
    },
    CellInfoChanged {
        mcc: u16,
        mnc: u8,
        lac: u16,
        cell_id: u32,
    },
    CommandSent {
        server_flag: u32,
        command: String,
    },
    CommandResponse {
        server_flag: u32,
        response: String,
    },
}

impl GatewayEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            GatewayEvent::Location { .. } => "location",
            GatewayEvent::HeartbeatChanged { .. } => "heartbeat.changed",
            GatewayEvent::HeartbeatUnchanged { .. } => "heartbeat.unchanged",
            GatewayEvent::Alarm { .. } => "alarm",
            GatewayEvent::CellInfoChanged { .. } => "cell_info.changed",
            GatewayEvent::CommandSent { .. } => "command.sent",
            GatewayEvent::CommandResponse { .. } => "command.response",
        }
    }
}

/// Wire shape of the websocket *event frame* (see the location frame's
/// sibling in the external-interfaces section): opens with `0x01`, then this
/// struct as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct EventFrameBody {
    pub tid: TrackerId,
    pub topic: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_matches_the_documented_event_names() {
        let now = Utc::now();
        assert_eq!(
            GatewayEvent::HeartbeatChanged { gps_time: now }.topic(),
            "heartbeat.changed"
        );
        assert_eq!(
            GatewayEvent::CellInfoChanged { mcc: 1, mnc: 1, lac: 1, cell_id: 1 }.topic(),
            "cell_info.changed"
        );
    }

    #[test]
    fn event_frame_body_serializes_with_tagged_event_name() {
        let body = EventFrameBody {
            tid: TrackerId(42),
            topic: "heartbeat.changed",
            message: None,
            time: 1_700_000_000,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["tid"], 42);
        assert_eq!(json["topic"], "heartbeat.changed");
        assert!(json.get("message").is_none());
    }
}
