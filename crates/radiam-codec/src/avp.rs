use crate::diameter::DiameterAvp;
use chrono::{DateTime, TimeZone, Utc};
use radiam_core::{RadiamError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

// Difference between 1970-01-01 and 1900-01-01 in seconds (RFC 868)
const NTP_OFFSET: i64 = 2_208_988_800;

/// Decoded attribute value. One variant per Diameter base type; RADIUS
/// attributes reuse the same variants with their own wire rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AvpValue {
    OctetString(Vec<u8>),
    Utf8String(String),
    DiameterIdentity(String),
    DiameterUri(String),
    IpFilterRule(String),
    Unsigned32(u32),
    Unsigned64(u64),
    Integer32(i32),
    Integer64(i64),
    Float32(f32),
    Float64(f64),
    Address(IpAddr),
    Time(DateTime<Utc>),
    Enumerated(i32),
    Grouped(Vec<DiameterAvp>),
    /// Raw payload of an AVP the dictionary does not know
    Unknown(Vec<u8>),
}

impl AvpValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AvpValue::OctetString(_) => "OctetString",
            AvpValue::Utf8String(_) => "UTF8String",
            AvpValue::DiameterIdentity(_) => "DiameterIdentity",
            AvpValue::DiameterUri(_) => "DiameterURI",
            AvpValue::IpFilterRule(_) => "IPFilterRule",
            AvpValue::Unsigned32(_) => "Unsigned32",
            AvpValue::Unsigned64(_) => "Unsigned64",
            AvpValue::Integer32(_) => "Integer32",
            AvpValue::Integer64(_) => "Integer64",
            AvpValue::Float32(_) => "Float32",
            AvpValue::Float64(_) => "Float64",
            AvpValue::Address(_) => "Address",
            AvpValue::Time(_) => "Time",
            AvpValue::Enumerated(_) => "Enumerated",
            AvpValue::Grouped(_) => "Grouped",
            AvpValue::Unknown(_) => "Unknown",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AvpValue::Utf8String(s)
            | AvpValue::DiameterIdentity(s)
            | AvpValue::DiameterUri(s)
            | AvpValue::IpFilterRule(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            AvpValue::Unsigned32(v) => Some(*v),
            AvpValue::Enumerated(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AvpValue::OctetString(b) | AvpValue::Unknown(b) => Some(b),
            _ => None,
        }
    }
}

fn exact<const N: usize>(code: u32, data: &[u8]) -> Result<[u8; N]> {
    data.try_into().map_err(|_| RadiamError::InvalidAvpValue {
        code,
        reason: format!("expected {N} bytes, got {}", data.len()),
    })
}

fn utf8(code: u32, data: &[u8]) -> Result<String> {
    String::from_utf8(data.to_vec()).map_err(|_| RadiamError::InvalidAvpValue {
        code,
        reason: "invalid utf-8".to_string(),
    })
}

/// Decode a scalar payload. Grouped payloads recurse through the message
/// codec and are handled there.
pub fn decode_scalar(
    code: u32,
    data_type: radiam_dict::AvpDataType,
    data: &[u8],
) -> Result<AvpValue> {
    use radiam_dict::AvpDataType::*;

    let value = match data_type {
        OctetString => AvpValue::OctetString(data.to_vec()),
        Utf8String => AvpValue::Utf8String(utf8(code, data)?),
        DiameterIdentity => AvpValue::DiameterIdentity(utf8(code, data)?),
        DiameterUri => AvpValue::DiameterUri(utf8(code, data)?),
        IpFilterRule => AvpValue::IpFilterRule(utf8(code, data)?),
        Unsigned32 => AvpValue::Unsigned32(u32::from_be_bytes(exact(code, data)?)),
        Unsigned64 => AvpValue::Unsigned64(u64::from_be_bytes(exact(code, data)?)),
        Integer32 => AvpValue::Integer32(i32::from_be_bytes(exact(code, data)?)),
        Integer64 => AvpValue::Integer64(i64::from_be_bytes(exact(code, data)?)),
        Float32 => AvpValue::Float32(f32::from_be_bytes(exact(code, data)?)),
        Float64 => AvpValue::Float64(f64::from_be_bytes(exact(code, data)?)),
        Enumerated => AvpValue::Enumerated(i32::from_be_bytes(exact(code, data)?)),
        Address => AvpValue::Address(decode_diameter_address(code, data)?),
        Time => AvpValue::Time(decode_time(code, data)?),
        Grouped => {
            return Err(RadiamError::InvalidAvpValue {
                code,
                reason: "grouped AVP decoded as scalar".to_string(),
            })
        }
    };
    Ok(value)
}

/// Encode a scalar value into its Diameter payload. Grouped values are
/// encoded by the message codec.
pub fn encode_scalar(value: &AvpValue, out: &mut Vec<u8>) {
    match value {
        AvpValue::OctetString(b) | AvpValue::Unknown(b) => out.extend_from_slice(b),
        AvpValue::Utf8String(s)
        | AvpValue::DiameterIdentity(s)
        | AvpValue::DiameterUri(s)
        | AvpValue::IpFilterRule(s) => out.extend_from_slice(s.as_bytes()),
        AvpValue::Unsigned32(v) => out.extend_from_slice(&v.to_be_bytes()),
        AvpValue::Unsigned64(v) => out.extend_from_slice(&v.to_be_bytes()),
        AvpValue::Integer32(v) => out.extend_from_slice(&v.to_be_bytes()),
        AvpValue::Integer64(v) => out.extend_from_slice(&v.to_be_bytes()),
        AvpValue::Float32(v) => out.extend_from_slice(&v.to_be_bytes()),
        AvpValue::Float64(v) => out.extend_from_slice(&v.to_be_bytes()),
        AvpValue::Enumerated(v) => out.extend_from_slice(&v.to_be_bytes()),
        AvpValue::Address(addr) => encode_diameter_address(addr, out),
        AvpValue::Time(time) => out.extend_from_slice(&encode_time(time)),
        AvpValue::Grouped(_) => unreachable!("grouped values are encoded by the message codec"),
    }
}

// Diameter Address carries a 2-byte address family before the raw address
// (1 = IPv4, 2 = IPv6).
fn decode_diameter_address(code: u32, data: &[u8]) -> Result<IpAddr> {
    if data.len() < 2 {
        return Err(RadiamError::InvalidAvpValue {
            code,
            reason: "address too short".to_string(),
        });
    }
    let family = u16::from_be_bytes([data[0], data[1]]);
    match (family, data.len() - 2) {
        (1, 4) => {
            let octets: [u8; 4] = exact(code, &data[2..])?;
            Ok(IpAddr::from(octets))
        }
        (2, 16) => {
            let octets: [u8; 16] = exact(code, &data[2..])?;
            Ok(IpAddr::from(octets))
        }
        _ => Err(RadiamError::InvalidAvpValue {
            code,
            reason: format!("bad address family {family} / length {}", data.len()),
        }),
    }
}

fn encode_diameter_address(addr: &IpAddr, out: &mut Vec<u8>) {
    match addr {
        IpAddr::V4(v4) => {
            out.extend_from_slice(&1u16.to_be_bytes());
            out.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            out.extend_from_slice(&2u16.to_be_bytes());
            out.extend_from_slice(&v6.octets());
        }
    }
}

/// Diameter Time: u32 seconds since 1900-01-01. Values with the high bit
/// clear belong to the second NTP era (2036-2104) per RFC 2030.
pub fn decode_time(code: u32, data: &[u8]) -> Result<DateTime<Utc>> {
    let raw = u32::from_be_bytes(exact(code, data)?);
    let unix = if raw & 0x8000_0000 != 0 {
        raw as i64 - NTP_OFFSET
    } else {
        raw as i64 + (1i64 << 32) - NTP_OFFSET
    };
    Utc.timestamp_opt(unix, 0)
        .single()
        .ok_or_else(|| RadiamError::InvalidAvpValue {
            code,
            reason: "timestamp out of range".to_string(),
        })
}

pub fn encode_time(time: &DateTime<Utc>) -> [u8; 4] {
    let raw = (time.timestamp() + NTP_OFFSET) as u64 as u32;
    raw.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiam_dict::AvpDataType;

    #[test]
    fn test_scalar_round_trips() {
        let cases = vec![
            (AvpDataType::Unsigned32, AvpValue::Unsigned32(2001)),
            (AvpDataType::Unsigned64, AvpValue::Unsigned64(u64::MAX - 5)),
            (AvpDataType::Integer32, AvpValue::Integer32(-42)),
            (AvpDataType::Integer64, AvpValue::Integer64(-1 << 40)),
            (AvpDataType::Float32, AvpValue::Float32(2.5)),
            (AvpDataType::Float64, AvpValue::Float64(-0.125)),
            (AvpDataType::Enumerated, AvpValue::Enumerated(1)),
            (
                AvpDataType::Utf8String,
                AvpValue::Utf8String("alice".to_string()),
            ),
            (
                AvpDataType::DiameterIdentity,
                AvpValue::DiameterIdentity("host.example.com".to_string()),
            ),
            (
                AvpDataType::OctetString,
                AvpValue::OctetString(vec![0, 1, 2, 0xFF]),
            ),
            (
                AvpDataType::Address,
                AvpValue::Address("10.0.0.1".parse().unwrap()),
            ),
            (
                AvpDataType::Address,
                AvpValue::Address("2001:db8::1".parse().unwrap()),
            ),
        ];

        for (data_type, value) in cases {
            let mut encoded = Vec::new();
            encode_scalar(&value, &mut encoded);
            let decoded = decode_scalar(999, data_type, &encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_time_round_trip() {
        let t = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let encoded = encode_time(&t);
        let decoded = decode_time(55, &encoded).unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn test_time_second_ntp_era() {
        // 2040 is past the 2036 wrap; the encoded value has the high bit clear
        let t = Utc.with_ymd_and_hms(2040, 1, 1, 0, 0, 0).unwrap();
        let encoded = encode_time(&t);
        assert_eq!(encoded[0] & 0x80, 0);
        let decoded = decode_time(55, &encoded).unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn test_bad_lengths_rejected() {
        assert!(decode_scalar(268, AvpDataType::Unsigned32, &[0, 1]).is_err());
        assert!(decode_scalar(257, AvpDataType::Address, &[0, 1, 10]).is_err());
    }
}
