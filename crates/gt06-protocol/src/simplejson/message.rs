use serde::{Deserialize, Serialize};

pub mod codes {
    pub const LOGIN: u8 = 0x01;
    pub const LOCATION_UPDATE: u8 = 0x02;
    pub const SAT_UPDATE: u8 = 0x03;
    pub const GPS_ERROR: u8 = 0x04;
    pub const GPS_INIT: u8 = 0x05;
    pub const STATUS: u8 = 0x06;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginMessage {
    pub sn_type: String,
    pub serial: String,
    #[serde(default)]
    pub device_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sat {
    pub sprn: u32,
    pub snr: i32,
    pub used_in_fix: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMessage {
    pub gps_time: i64,
    #[serde(default)]
    pub machine_time: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f32>,
    #[serde(default)]
    pub sat_inview: Option<u32>,
    #[serde(default)]
    pub sat_tracked: Option<u32>,
    #[serde(default)]
    pub sat_used: Option<u32>,
    #[serde(default)]
    pub fix: Option<bool>,
    #[serde(default)]
    pub fix_mode: Option<u8>,
    /// Already SI (metres/second) — unlike GT06, no km/h conversion needed.
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub gps_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fix_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_longitude: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_message_round_trips_through_json() {
        let login = LoginMessage {
            sn_type: "imei".to_owned(),
            serial: "123456789012345".to_owned(),
            device_type: Some("phone".to_owned()),
        };
        let json = serde_json::to_string(&login).unwrap();
        let parsed: LoginMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, login);
    }

    #[test]
    fn location_message_tolerates_missing_optional_fields() {
        let json = r#"{"gps_time":1700000000,"latitude":1.0,"longitude":2.0,"speed":3.5}"#;
        let parsed: LocationMessage = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.latitude, 1.0);
        assert_eq!(parsed.altitude, None);
        assert_eq!(parsed.speed, 3.5);
    }
}
