use crate::crc::crc16_x25;
use crate::error::FrameError;

/// Upper bound on a single GT06 frame, short or long. Declared lengths past
/// this are rejected as `malformed_frame` rather than allocating unbounded
/// buffers for a corrupt or hostile peer.
pub const MAX_FRAME_SIZE: usize = 4096;

/// A decoded GT06 frame: header/trailer validated and CRC checked, payload
/// split into its three documented parts. Body parsing into a typed
/// [`crate::gt06::message::Gt06Message`] happens one layer up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gt06Frame {
    pub long: bool,
    pub protocol: u8,
    pub body: Vec<u8>,
    pub serial: u16,
}

/// Attempts to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet contain a complete frame (the
/// caller should read more bytes and retry) and `Ok(Some((frame, consumed)))`
/// once one does. Header/trailer/length/CRC violations are `Err` immediately
/// — those never resolve by reading more bytes.
pub fn try_decode(buf: &[u8]) -> Result<Option<(Gt06Frame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let long = match (buf[0], buf[1]) {
        (0x78, 0x78) => false,
        (0x79, 0x79) => true,
        _ => return Err(FrameError::BadHeader),
    };

    let (len, header_len): (usize, usize) = if long {
        if buf.len() < 4 {
            return Ok(None);
        }
        (usize::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
    } else {
        if buf.len() < 3 {
            return Ok(None);
        }
        (usize::from(buf[2]), 3)
    };

    if len < 5 {
        return Err(FrameError::TooShort);
    }

    let total_len = header_len + len + 2;
    if total_len > MAX_FRAME_SIZE {
        return Err(FrameError::LengthOverflow { declared: total_len, max: MAX_FRAME_SIZE });
    }
    if buf.len() < total_len {
        return Ok(None);
    }

    let trailer = &buf[total_len - 2..total_len];
    if trailer != [0x0D, 0x0A] {
        return Err(FrameError::BadTrailer);
    }

    let payload = &buf[header_len..total_len - 2];
    debug_assert_eq!(payload.len(), len);

    let protocol = payload[0];
    let body = payload[1..len - 4].to_vec();
    let serial = u16::from_be_bytes([payload[len - 4], payload[len - 3]]);
    let crc_expected = u16::from_be_bytes([payload[len - 2], payload[len - 1]]);

    let crc_region = &buf[2..total_len - 4];
    let crc_actual = crc16_x25(crc_region);
    if crc_actual != crc_expected {
        return Err(FrameError::CrcMismatch { expected: crc_expected, actual: crc_actual });
    }

    Ok(Some((Gt06Frame { long, protocol, body, serial }, total_len)))
}

/// Encodes a short-frame response with the given protocol byte, body, and
/// echoed serial. Responses are always short-framed regardless of the
/// request's frame form, per the wire contract.
pub fn encode_short(protocol: u8, body: &[u8], serial: u16) -> Vec<u8> {
    let len = 1 + body.len() + 2 + 2;
    let mut payload = Vec::with_capacity(1 + len);
    payload.push(len as u8);
    payload.push(protocol);
    payload.extend_from_slice(body);
    payload.extend_from_slice(&serial.to_be_bytes());
    let crc = crc16_x25(&payload);

    let mut frame = Vec::with_capacity(2 + payload.len() + 4);
    frame.push(0x78);
    frame.push(0x78);
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.push(0x0D);
    frame.push(0x0A);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_frame_bytes() -> Vec<u8> {
        vec![
            0x78, 0x78, 0x0D, 0x01, 0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x23, 0x45, 0x00, 0x01,
            0x8C, 0xDD, 0x0D, 0x0A,
        ]
    }

    #[test]
    fn decodes_complete_short_login_frame() {
        let bytes = login_frame_bytes();
        let (frame, consumed) = try_decode(&bytes).unwrap().expect("complete frame");
        assert_eq!(consumed, bytes.len());
        assert!(!frame.long);
        assert_eq!(frame.protocol, 0x01);
        assert_eq!(
            frame.body,
            vec![0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x23, 0x45]
        );
        assert_eq!(frame.serial, 0x0001);
    }

    #[test]
    fn incomplete_buffer_returns_none_not_error() {
        let bytes = login_frame_bytes();
        for cut in 0..bytes.len() - 1 {
            let partial = &bytes[..cut];
            assert_eq!(try_decode(partial).unwrap(), None, "cut at {cut}");
        }
    }

    #[test]
    fn rejects_bad_header() {
        let mut bytes = login_frame_bytes();
        bytes[1] = 0x77;
        assert_eq!(try_decode(&bytes), Err(FrameError::BadHeader));
    }

    #[test]
    fn rejects_bad_trailer() {
        let mut bytes = login_frame_bytes();
        let last = bytes.len() - 1;
        bytes[last] = 0xFF;
        assert_eq!(try_decode(&bytes), Err(FrameError::BadTrailer));
    }

    #[test]
    fn rejects_crc_mismatch() {
        let mut bytes = login_frame_bytes();
        bytes[14] ^= 0xFF;
        assert!(matches!(try_decode(&bytes), Err(FrameError::CrcMismatch { .. })));
    }

    #[test]
    fn encode_short_round_trips_through_decode() {
        let body = b"hello";
        let encoded = encode_short(0x15, body, 0x0042);
        let (frame, consumed) = try_decode(&encoded).unwrap().expect("complete frame");
        assert_eq!(consumed, encoded.len());
        assert_eq!(frame.protocol, 0x15);
        assert_eq!(frame.body, body);
        assert_eq!(frame.serial, 0x0042);
    }

    #[test]
    fn long_frame_header_and_length_are_parsed() {
        // len = 5 (protocol + 0 body bytes + 2-byte serial + 2-byte crc),
        // long-frame total on-wire length = len + 6.
        let mut bytes = vec![0x79, 0x79, 0x00, 0x05, 0x01, 0x00, 0x01];
        let crc = crc16_x25(&bytes[2..7]);
        bytes.extend_from_slice(&crc.to_be_bytes());
        bytes.extend_from_slice(&[0x0D, 0x0A]);
        let (frame, consumed) = try_decode(&bytes).unwrap().expect("complete frame");
        assert_eq!(consumed, bytes.len());
        assert!(frame.long);
        assert_eq!(frame.protocol, 0x01);
        assert!(frame.body.is_empty());
        assert_eq!(frame.serial, 0x0001);
    }
}
