//! GT06/GK310 message bodies: protocol codes and the payload layouts for
//! each one this gateway understands.

/// Protocol code constants, named exactly as the dispatch table in the
/// component design calls them.
pub mod codes {
    pub const LOGIN: u8 = 0x01;
    pub const GT06_GPS: u8 = 0x12;
    pub const STATUS_INFORMATION: u8 = 0x13;
    pub const STRING_INFORMATION: u8 = 0x15;
    pub const GT06_GPS_ALARM: u8 = 0x16;
    pub const SERVER_COMMAND_RESPONSE: u8 = 0x21;
    pub const GK310_GPS: u8 = 0x22;
    pub const GK310_GPS_ALARM: u8 = 0x26;
    pub const SERVER_COMMAND: u8 = 0x80;
    pub const TIME_CHECK: u8 = 0x8A;
    pub const INFORMATION_TX_PACKET: u8 = 0x94;

    pub const INFO_TX_TERMINAL_STATUS_SYNC: u8 = 0x04;
    pub const INFO_TX_DEVICE_SN: u8 = 0x0A;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginMessage {
    /// 8-byte BCD-encoded IMEI, one nibble per decimal digit.
    pub imei_bcd: [u8; 8],
    pub type_id: Option<u16>,
    pub time_offset_minutes: Option<i32>,
}

impl LoginMessage {
    /// Renders the BCD IMEI as its 16-hex-digit decimal string.
    pub fn imei_decimal(&self) -> String {
        self.imei_bcd.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < 8 {
            return None;
        }
        let mut imei_bcd = [0u8; 8];
        imei_bcd.copy_from_slice(&body[0..8]);

        let type_id = if body.len() >= 10 {
            Some(u16::from_be_bytes([body[8], body[9]]))
        } else {
            None
        };

        let time_offset_minutes = if body.len() >= 12 {
            // BCD-combine the two offset bytes into hours/minutes, exactly as
            // the original device parser does: the high byte's low nibble
            // becomes the high nibble of a 3-digit BCD value, the low byte's
            // high nibble becomes its low digit.
            let bcd_offset = (u16::from(body[10]) << 4) + (u16::from(body[11]) >> 4);
            let h_offset = bcd_offset / 100;
            let m_offset = bcd_offset % 100;
            let magnitude = i32::from(h_offset) * 60 + i32::from(m_offset);
            let negative = body[11] & 0b0000_1000 != 0;
            Some(if negative { -magnitude } else { magnitude })
        } else {
            None
        };

        Some(Self { imei_bcd, type_id, time_offset_minutes })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsTimestamp {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbsInfo {
    pub mcc: u16,
    pub mnc: u8,
    pub lac: u16,
    pub cell_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub timestamp: GpsTimestamp,
    pub satellites: u8,
    /// Raw fixed-point latitude, divide by 1,800,000 for decimal degrees.
    pub latitude_raw: u32,
    /// Raw fixed-point longitude, divide by 1,800,000 for decimal degrees.
    pub longitude_raw: u32,
    pub south: bool,
    pub west: bool,
    pub positioned: bool,
    pub differential: bool,
    pub speed_kmh: u8,
    pub course_deg: u16,
    pub lbs: LbsInfo,
    /// GK310 variant only.
    pub acc_on: Option<bool>,
}

impl GpsFix {
    pub fn latitude_deg(&self) -> f64 {
        let v = f64::from(self.latitude_raw) / 1_800_000.0;
        if self.south { -v } else { v }
    }

    pub fn longitude_deg(&self) -> f64 {
        let v = f64::from(self.longitude_raw) / 1_800_000.0;
        if self.west { -v } else { v }
    }

    pub fn speed_mps(&self) -> f32 {
        f32::from(self.speed_kmh) * 1000.0 / 3600.0
    }

    /// Parses the common GPS body shared by `gt06GPS`/`gk310GPS` (and the
    /// leading portion of the alarm variants). `gk310` controls whether the
    /// trailing ACC/upload-mode/re-upload-flag bytes are consumed.
    pub fn parse(body: &[u8], gk310: bool) -> Option<(Self, usize)> {
        if body.len() < 18 {
            return None;
        }
        let timestamp = GpsTimestamp {
            year: body[0],
            month: body[1],
            day: body[2],
            hour: body[3],
            minute: body[4],
            second: body[5],
        };
        let satellites = body[6] >> 4;
        let latitude_raw = u32::from_be_bytes([body[7], body[8], body[9], body[10]]);
        let longitude_raw = u32::from_be_bytes([body[11], body[12], body[13], body[14]]);
        let speed_kmh = body[15];
        let course_flags = u16::from_be_bytes([body[16], body[17]]);
        let south = course_flags & 0b0000_0100_0000_0000 == 0;
        let west = course_flags & 0b0000_1000_0000_0000 != 0;
        let positioned = course_flags & 0b0001_0000_0000_0000 != 0;
        let differential = course_flags & 0b0010_0000_0000_0000 != 0;
        let course_deg = course_flags & 0x03FF;

        let mut offset = 18usize;
        if body.len() < offset + 8 {
            return None;
        }
        let mcc = u16::from_be_bytes([body[offset], body[offset + 1]]);
        let mnc = body[offset + 2];
        let lac = u16::from_be_bytes([body[offset + 3], body[offset + 4]]);
        let cell_id = u32::from_be_bytes([0, body[offset + 5], body[offset + 6], body[offset + 7]]);
        offset += 8;

        let acc_on = if gk310 && body.len() > offset {
            let v = body[offset] != 0;
            offset += 1;
            // upload mode + re-upload flag bytes, present but not surfaced.
            if body.len() > offset {
                offset += 1;
            }
            if body.len() > offset {
                offset += 1;
            }
            Some(v)
        } else {
            None
        };

        Some((
            Self {
                timestamp,
                satellites,
                latitude_raw,
                longitude_raw,
                south,
                west,
                positioned,
                differential,
                speed_kmh,
                course_deg,
                lbs: LbsInfo { mcc, mnc, lac, cell_id },
                acc_on,
            },
            offset,
        ))
    }
}

/// Heartbeat/status body. Kept as the raw byte tuple plus named accessors so
/// equality comparison (used to detect a "heartbeat changed" transition) is
/// exact and independent of how many of the bit fields we bother naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusInfo {
    pub raw: [u8; 5],
}

impl StatusInfo {
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < 5 {
            return None;
        }
        let mut raw = [0u8; 5];
        raw.copy_from_slice(&body[0..5]);
        Some(Self { raw })
    }

    pub fn acc_on(&self) -> bool {
        self.raw[0] & 0b0000_0010 != 0
    }

    pub fn armed(&self) -> bool {
        self.raw[0] & 0b0000_0001 != 0
    }

    pub fn charging(&self) -> bool {
        self.raw[0] & 0b0000_0100 != 0
    }

    pub fn alarm_code(&self) -> u8 {
        (self.raw[0] >> 3) & 0b0000_0111
    }

    pub fn voltage_level(&self) -> u8 {
        self.raw[1]
    }

    pub fn gsm_signal(&self) -> u8 {
        self.raw[2]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub server_flag: u32,
    pub message: String,
}

impl CommandResponse {
    /// The single canonical decoder for both `stringInformation` (0x15) and
    /// `serverCommandResponse` (0x21) payloads: `server_flag = be_u32(d[0..4])`,
    /// `message = utf8_lossy(d[5..])` (see DESIGN.md for why this layout was
    /// chosen over the alternative seen for the other protocol code).
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < 5 {
            return None;
        }
        let server_flag = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        let message = String::from_utf8_lossy(&body[5..]).into_owned();
        Some(Self { server_flag, message })
    }
}

/// Device-SN tuple carried by `informationTxPacket` sub-code `0x0A`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnTuple {
    pub imei: String,
    pub imsi: String,
    pub iccid: String,
}

impl DeviceSnTuple {
    pub fn parse(body: &[u8]) -> Option<Self> {
        // sub-code byte, then three 8-byte hex-encoded fields.
        if body.len() < 1 + 24 {
            return None;
        }
        let hex = |s: &[u8]| s.iter().map(|b| format!("{b:02x}")).collect::<String>();
        Some(Self {
            imei: hex(&body[1..9]),
            imsi: hex(&body[9..17]),
            iccid: hex(&body[17..25]),
        })
    }
}

/// Builds the outbound `0x80` server-command payload:
/// `len(msg):1 | server_flag:4 | msg_ascii`.
pub fn encode_server_command(server_flag: u32, msg: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + 4 + msg.len());
    body.push((msg.len() + 4) as u8);
    body.extend_from_slice(&server_flag.to_be_bytes());
    body.extend_from_slice(msg.as_bytes());
    body
}

/// Encodes the `timeCheck` response body: current UTC as six BCD-like bytes.
pub fn encode_time_response(year_rem_100: u8, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Vec<u8> {
    vec![year_rem_100, month, day, hour, minute, second]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_message_parses_imei_and_optional_fields() {
        let body = [0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x23, 0x45];
        let login = LoginMessage::parse(&body).expect("login parses");
        assert_eq!(login.imei_decimal(), "0123456789012345");
        assert_eq!(login.type_id, None);
        assert_eq!(login.time_offset_minutes, None);
    }

    #[test]
    fn login_message_rejects_short_body() {
        assert_eq!(LoginMessage::parse(&[0x01, 0x02]), None);
    }

    #[test]
    fn login_message_combines_bcd_time_offset_bytes() {
        // offset bytes 0x01, 0x38: bcd_offset = (0x01<<4)+(0x38>>4) = 16+3 = 19,
        // h_offset = 0, m_offset = 19, sign bit (0x38 & 0b1000) set -> -19 minutes.
        let mut body = vec![0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x23, 0x45];
        body.extend_from_slice(&[0x00, 0x01]); // type id
        body.extend_from_slice(&[0x01, 0x38]); // time offset
        let login = LoginMessage::parse(&body).expect("login parses");
        assert_eq!(login.time_offset_minutes, Some(-19));
    }

    #[test]
    fn gps_fix_converts_raw_lat_lon_and_speed() {
        // latitude raw 07 D2 E5 C3, longitude raw 22 EE 0A 34, speed 0x32 (50) km/h.
        let mut body = vec![0x23, 0x01, 0x01, 0x0C, 0x00, 0x00]; // date
        body.push(0x0C << 4); // 12 satellites in high nibble
        body.extend_from_slice(&[0x07, 0xD2, 0xE5, 0xC3]); // lat raw
        body.extend_from_slice(&[0x22, 0xEE, 0x0A, 0x34]); // lon raw
        body.push(0x32); // speed kmh
        body.extend_from_slice(&[0b0011_0110, 0x10]); // course/flags: positioned+differential+north+east
        body.extend_from_slice(&[0x00, 0xF0, 0x01, 0x12, 0x34, 0x00, 0x00, 0x01]); // lbs

        let (fix, consumed) = GpsFix::parse(&body, false).expect("gps fix parses");
        assert_eq!(consumed, body.len());
        assert_eq!(fix.latitude_raw, 0x07D2_E5C3);
        assert_eq!(fix.longitude_raw, 0x22EE_0A34);
        let expected_speed = 50.0 * 1000.0 / 3600.0;
        assert!((fix.speed_mps() - expected_speed).abs() < 1e-6);
        assert_eq!(fix.satellites, 12);
    }

    #[test]
    fn gk310_gps_fix_consumes_trailing_acc_byte() {
        let mut body = vec![0x23, 0x01, 0x01, 0x0C, 0x00, 0x00, 0x00];
        body.extend_from_slice(&[0, 0, 0, 1]);
        body.extend_from_slice(&[0, 0, 0, 1]);
        body.push(0);
        body.extend_from_slice(&[0, 0]);
        body.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        body.push(0x01); // acc on
        body.push(0x00); // upload mode
        body.push(0x00); // re-upload flag

        let (fix, consumed) = GpsFix::parse(&body, true).expect("gk310 gps fix parses");
        assert_eq!(consumed, body.len());
        assert_eq!(fix.acc_on, Some(true));
    }

    #[test]
    fn status_info_equality_detects_change() {
        let a = StatusInfo::parse(&[0b0000_0100, 0x44, 0x04, 0x00, 0x01]).unwrap();
        let b = StatusInfo::parse(&[0b0000_0100, 0x44, 0x04, 0x00, 0x01]).unwrap();
        assert_eq!(a, b);

        let c = StatusInfo::parse(&[0b0000_0110, 0x44, 0x04, 0x00, 0x01]).unwrap();
        assert_ne!(a, c);
        assert!(!a.acc_on());
        assert!(c.acc_on());
    }

    #[test]
    fn command_response_decodes_flag_and_message() {
        let mut body = 42u32.to_be_bytes().to_vec();
        body.push(0x00); // separator byte at offset 4, discarded
        body.extend_from_slice(b"OK");
        let resp = CommandResponse::parse(&body).expect("parses");
        assert_eq!(resp.server_flag, 42);
        assert_eq!(resp.message, "OK");
    }

    #[test]
    fn device_sn_tuple_hex_encodes_each_field() {
        let mut body = vec![codes::INFO_TX_DEVICE_SN];
        body.extend_from_slice(&[0x11; 8]);
        body.extend_from_slice(&[0x22; 8]);
        body.extend_from_slice(&[0x33; 8]);
        let sn = DeviceSnTuple::parse(&body).expect("parses");
        assert_eq!(sn.imei, "11".repeat(8));
        assert_eq!(sn.imsi, "22".repeat(8));
        assert_eq!(sn.iccid, "33".repeat(8));
    }

    #[test]
    fn encode_server_command_layout_matches_spec() {
        let encoded = encode_server_command(7, "STATUS#");
        assert_eq!(encoded[0], (7_usize + 4) as u8);
        assert_eq!(u32::from_be_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]), 7);
        assert_eq!(&encoded[5..], b"STATUS#");
    }
}
