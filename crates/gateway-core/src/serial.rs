//! Normalized serial numbers (NSN) and the registry-assigned tracker id.

use std::fmt;

use serde::Serialize;

/// The 4-bit serial-number type tag packed into an NSN's high bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnType {
    Imei,
    Mac,
    Aid,
    Misc1,
    Misc2,
    /// Any other 4-bit tag value (0–15) not given its own name.
    Other(u8),
}

impl SnType {
    pub fn from_tag(tag: u8) -> Self {
        match tag & 0x0F {
            0 => Self::Imei,
            1 => Self::Mac,
            2 => Self::Aid,
            3 => Self::Misc1,
            4 => Self::Misc2,
            other => Self::Other(other),
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Imei => 0,
            Self::Mac => 1,
            Self::Aid => 2,
            Self::Misc1 => 3,
            Self::Misc2 => 4,
            Self::Other(tag) => tag & 0x0F,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Imei => "imei",
            Self::Mac => "mac",
            Self::Aid => "aid",
            Self::Misc1 => "misc1",
            Self::Misc2 => "misc2",
            Self::Other(_) => "other",
        }
    }
}

impl fmt::Display for SnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 64-bit normalized serial number: high 4 bits are the [`SnType`] tag,
/// low 60 bits are the raw serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nsn(pub u64);

const SERIAL_MASK: u64 = 0x0FFF_FFFF_FFFF_FFFF;

impl Nsn {
    pub fn combine(sn_type: SnType, sn: u64) -> Self {
        Self((sn & SERIAL_MASK) | (u64::from(sn_type.tag()) << 60))
    }

    pub fn split(self) -> (SnType, u64) {
        let tag = (self.0 >> 60) as u8;
        (SnType::from_tag(tag), self.0 & SERIAL_MASK)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Human-readable `<type>:<sn>` form — decimal serial for IMEI, hex
    /// otherwise, matching the upstream convention this format was ported
    /// from.
    pub fn pretty(self) -> String {
        let (sn_type, sn) = self.split();
        match sn_type {
            SnType::Imei => format!("{sn_type}:{sn}"),
            _ => format!("{sn_type}:{sn:x}"),
        }
    }
}

impl fmt::Display for Nsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

/// Registry-assigned primary key, stable for the life of the device row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackerId(pub i64);

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TrackerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_split_are_inverses() {
        let nsn = Nsn::combine(SnType::Imei, 123_456_789_012_345);
        let (sn_type, sn) = nsn.split();
        assert_eq!(sn_type, SnType::Imei);
        assert_eq!(sn, 123_456_789_012_345);
    }

    #[test]
    fn serial_is_masked_to_60_bits_on_combine() {
        let nsn = Nsn::combine(SnType::Mac, u64::MAX);
        let (sn_type, sn) = nsn.split();
        assert_eq!(sn_type, SnType::Mac);
        assert_eq!(sn, SERIAL_MASK);
    }

    #[test]
    fn unrecognized_tag_round_trips_as_other() {
        let nsn = Nsn::combine(SnType::Other(5), 42);
        let (sn_type, sn) = nsn.split();
        assert_eq!(sn_type, SnType::Other(5));
        assert_eq!(sn, 42);
    }

    #[test]
    fn pretty_formats_imei_as_decimal_and_others_as_hex() {
        let imei = Nsn::combine(SnType::Imei, 255);
        assert_eq!(imei.pretty(), "imei:255");
        let mac = Nsn::combine(SnType::Mac, 255);
        assert_eq!(mac.pretty(), "mac:ff");
    }

    #[test]
    fn tag_out_of_range_is_masked_to_four_bits() {
        assert_eq!(SnType::Other(0xFF).tag(), 0x0F);
    }
}
