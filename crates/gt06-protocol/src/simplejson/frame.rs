use crate::error::FrameError;

pub const MAX_FRAME_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleJsonFrame {
    pub protocol: u8,
    pub body: Vec<u8>,
}

/// Decodes `0x99 | protocol:1 | len:2 LE | body(len bytes) | '\n'`.
pub fn try_decode(buf: &[u8]) -> Result<Option<(SimpleJsonFrame, usize)>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != 0x99 {
        return Err(FrameError::BadHeader);
    }
    if buf.len() < 4 {
        return Ok(None);
    }
    let protocol = buf[1];
    let len = usize::from(u16::from_le_bytes([buf[2], buf[3]]));
    let total_len = 4 + len + 1;
    if total_len > MAX_FRAME_SIZE {
        return Err(FrameError::LengthOverflow { declared: total_len, max: MAX_FRAME_SIZE });
    }
    if buf.len() < total_len {
        return Ok(None);
    }
    if buf[total_len - 1] != b'\n' {
        return Err(FrameError::BadTrailer);
    }
    let body = buf[4..total_len - 1].to_vec();
    Ok(Some((SimpleJsonFrame { protocol, body }, total_len)))
}

/// Encodes a SimpleJSON frame (used only for tests/emulation; the gateway
/// never speaks this protocol outbound in production beyond a TCP close).
pub fn encode(protocol: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + body.len() + 1);
    frame.push(0x99);
    frame.push(protocol);
    frame.extend_from_slice(&(body.len() as u16).to_le_bytes());
    frame.extend_from_slice(body);
    frame.push(b'\n');
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips() {
        let body = br#"{"sn_type":"imei","serial":"123456789012345"}"#;
        let encoded = encode(0x01, body);
        let (frame, consumed) = try_decode(&encoded).unwrap().expect("complete frame");
        assert_eq!(consumed, encoded.len());
        assert_eq!(frame.protocol, 0x01);
        assert_eq!(frame.body, body);
    }

    #[test]
    fn incomplete_buffer_returns_none() {
        let encoded = encode(0x02, b"{}");
        for cut in 0..encoded.len() - 1 {
            assert_eq!(try_decode(&encoded[..cut]).unwrap(), None, "cut at {cut}");
        }
    }

    #[test]
    fn rejects_bad_header_byte() {
        let mut encoded = encode(0x01, b"{}");
        encoded[0] = 0x00;
        assert_eq!(try_decode(&encoded), Err(FrameError::BadHeader));
    }

    #[test]
    fn rejects_missing_newline_trailer() {
        let mut encoded = encode(0x01, b"{}");
        let last = encoded.len() - 1;
        encoded[last] = b'x';
        assert_eq!(try_decode(&encoded), Err(FrameError::BadTrailer));
    }
}
