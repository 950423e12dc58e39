use crate::avp::AvpValue;
use crate::obfuscation;
use radiam_core::consts;
use radiam_core::{RadiamError, Result};
use rand::Rng;
use radiam_dict::{AvpDataType, Dictionary, RadiusAvpDef};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Largest attribute payload that fits the one-byte length field
const MAX_ATTR_PAYLOAD: usize = 253;

/// RADIUS attribute with its dictionary-resolved value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiusAvp {
    pub code: u8,
    pub vendor_id: Option<u32>,
    pub tag: Option<u8>,
    pub name: String,
    pub value: AvpValue,
}

/// Complete RADIUS packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiusPacket {
    pub code: u8,
    pub identifier: u8,
    pub authenticator: [u8; 16],
    pub attributes: Vec<RadiusAvp>,
}

fn is_request_code(code: u8) -> bool {
    matches!(
        code,
        consts::RADIUS_ACCESS_REQUEST
            | consts::RADIUS_ACCOUNTING_REQUEST
            | consts::RADIUS_DISCONNECT_REQUEST
            | consts::RADIUS_COA_REQUEST
    )
}

// RADIUS wire rules differ from Diameter for a few types: addresses carry no
// family prefix and timestamps count from 1970.
fn encode_value(value: &AvpValue, out: &mut Vec<u8>) {
    match value {
        AvpValue::Address(IpAddr::V4(v4)) => out.extend_from_slice(&v4.octets()),
        AvpValue::Address(IpAddr::V6(v6)) => out.extend_from_slice(&v6.octets()),
        AvpValue::Time(t) => out.extend_from_slice(&(t.timestamp() as u32).to_be_bytes()),
        other => crate::avp::encode_scalar(other, out),
    }
}

fn decode_value(code: u8, data_type: AvpDataType, data: &[u8]) -> Result<AvpValue> {
    use chrono::TimeZone;

    match data_type {
        AvpDataType::Address => match data.len() {
            4 => {
                let octets: [u8; 4] = data.try_into().unwrap();
                Ok(AvpValue::Address(IpAddr::from(octets)))
            }
            16 => {
                let octets: [u8; 16] = data.try_into().unwrap();
                Ok(AvpValue::Address(IpAddr::from(octets)))
            }
            n => Err(RadiamError::InvalidAvpValue {
                code: code as u32,
                reason: format!("bad address length {n}"),
            }),
        },
        AvpDataType::Time => {
            let raw: [u8; 4] = data.try_into().map_err(|_| RadiamError::InvalidAvpValue {
                code: code as u32,
                reason: "bad timestamp length".to_string(),
            })?;
            let unix = u32::from_be_bytes(raw) as i64;
            chrono::Utc
                .timestamp_opt(unix, 0)
                .single()
                .map(AvpValue::Time)
                .ok_or_else(|| RadiamError::InvalidAvpValue {
                    code: code as u32,
                    reason: "timestamp out of range".to_string(),
                })
        }
        AvpDataType::Grouped => Err(RadiamError::InvalidAvpValue {
            code: code as u32,
            reason: "grouped is not a radius type".to_string(),
        }),
        other => crate::avp::decode_scalar(code as u32, other, data),
    }
}

impl RadiusAvp {
    fn serialize(&self, secret: &[u8], auth: &[u8; 16], dict: &Dictionary) -> Result<Vec<u8>> {
        if matches!(self.value, AvpValue::Grouped(_)) {
            return Err(RadiamError::InvalidAvpValue {
                code: self.code as u32,
                reason: "grouped is not a radius type".to_string(),
            });
        }

        let def = dict.radius_attr(self.vendor_id.unwrap_or(0), self.code);

        let mut payload = Vec::new();
        if let AvpValue::Unknown(raw) = &self.value {
            payload.extend_from_slice(raw);
        } else {
            encode_value(&self.value, &mut payload);
        }

        if let Some(def) = def {
            if def.salted {
                payload = obfuscation::encrypt_salted(&payload, secret, auth, obfuscation::new_salt());
            } else if def.encrypted {
                payload = obfuscation::encrypt_user_password(&payload, secret, auth);
            }
            if def.tagged {
                payload.insert(0, self.tag.unwrap_or(0));
            }
        }

        let mut out = Vec::with_capacity(payload.len() + 8);
        match self.vendor_id {
            Some(vendor_id) => {
                // RFC 2865 §5.26 vendor-specific wrapping
                let inner_len = payload.len() + 2;
                if inner_len + 4 > MAX_ATTR_PAYLOAD {
                    return Err(RadiamError::InvalidAvpValue {
                        code: self.code as u32,
                        reason: "vendor attribute payload too long".to_string(),
                    });
                }
                out.push(consts::RADIUS_ATTR_VENDOR_SPECIFIC);
                out.push((2 + 4 + inner_len) as u8);
                out.extend_from_slice(&vendor_id.to_be_bytes());
                out.push(self.code);
                out.push(inner_len as u8);
                out.extend_from_slice(&payload);
            }
            None => {
                if payload.len() > MAX_ATTR_PAYLOAD {
                    return Err(RadiamError::InvalidAvpValue {
                        code: self.code as u32,
                        reason: "attribute payload too long".to_string(),
                    });
                }
                out.push(self.code);
                out.push((2 + payload.len()) as u8);
                out.extend_from_slice(&payload);
            }
        }
        Ok(out)
    }

    fn build(
        code: u8,
        vendor_id: Option<u32>,
        payload: &[u8],
        secret: &[u8],
        auth: &[u8; 16],
        dict: &Dictionary,
    ) -> Result<Self> {
        let Some(def) = dict.radius_attr(vendor_id.unwrap_or(0), code) else {
            return Ok(Self {
                code,
                vendor_id,
                tag: None,
                name: crate::diameter::UNKNOWN_AVP_NAME.to_string(),
                value: AvpValue::Unknown(payload.to_vec()),
            });
        };

        let mut payload = payload.to_vec();
        let tag = if def.tagged && !payload.is_empty() {
            Some(payload.remove(0))
        } else {
            None
        };

        if def.salted {
            payload = obfuscation::decrypt_salted(&payload, secret, auth).ok_or(
                RadiamError::InvalidAvpValue {
                    code: code as u32,
                    reason: "malformed salted attribute".to_string(),
                },
            )?;
        } else if def.encrypted {
            payload = obfuscation::decrypt_user_password(&payload, secret, auth);
        }

        Ok(Self {
            code,
            vendor_id,
            tag,
            name: def.name.clone(),
            value: decode_value(code, def.data_type, &payload)?,
        })
    }
}

impl RadiusPacket {
    pub fn new(code: u8) -> Self {
        Self {
            code,
            identifier: 0,
            authenticator: [0; 16],
            attributes: Vec::new(),
        }
    }

    /// Response skeleton: same identifier, Proxy-State attributes echoed per
    /// RFC 2865 §5.33.
    pub fn response_to(request: &RadiusPacket, code: u8) -> Self {
        let mut response = Self::new(code);
        response.identifier = request.identifier;
        for attr in &request.attributes {
            if attr.vendor_id.is_none() && attr.code == consts::RADIUS_ATTR_PROXY_STATE {
                response.attributes.push(attr.clone());
            }
        }
        response
    }

    /// Append a dictionary-resolved attribute
    pub fn push(&mut self, dict: &Dictionary, name: &str, value: AvpValue) -> Result<&mut Self> {
        self.push_tagged(dict, name, None, value)
    }

    pub fn push_tagged(
        &mut self,
        dict: &Dictionary,
        name: &str,
        tag: Option<u8>,
        value: AvpValue,
    ) -> Result<&mut Self> {
        let def: &RadiusAvpDef = dict
            .radius_attr_named(name)
            .ok_or_else(|| RadiamError::Dictionary(format!("unknown radius attribute {name}")))?;
        self.attributes.push(RadiusAvp {
            code: def.code,
            vendor_id: (def.vendor_id != 0).then_some(def.vendor_id),
            tag,
            name: def.name.clone(),
            value,
        });
        Ok(self)
    }

    pub fn attribute(&self, name: &str) -> Option<&RadiusAvp> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn str_value(&self, name: &str) -> Option<&str> {
        self.attribute(name)?.value.as_str()
    }

    fn serialize_attributes(
        &self,
        secret: &[u8],
        auth: &[u8; 16],
        dict: &Dictionary,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for attr in &self.attributes {
            // Message-Authenticator is appended by the encoder, never encoded
            // from the attribute list
            if attr.vendor_id.is_none() && attr.code == consts::RADIUS_ATTR_MESSAGE_AUTHENTICATOR {
                continue;
            }
            out.extend_from_slice(&attr.serialize(secret, auth, dict)?);
        }
        Ok(out)
    }

    /// Encode an outgoing request. Access-Request gets a random authenticator;
    /// Accounting/Disconnect/CoA requests get the RFC 2866 computed one. The
    /// authenticator used is stored on the packet for later correlation.
    pub fn encode_request(
        &mut self,
        secret: &str,
        identifier: u8,
        with_message_authenticator: bool,
        dict: &Dictionary,
    ) -> Result<Vec<u8>> {
        self.identifier = identifier;
        self.authenticator = if self.code == consts::RADIUS_ACCESS_REQUEST {
            rand::thread_rng().gen()
        } else {
            [0; 16]
        };

        let mut attrs = self.serialize_attributes(secret.as_bytes(), &self.authenticator, dict)?;
        let ma_offset = if with_message_authenticator {
            attrs.push(consts::RADIUS_ATTR_MESSAGE_AUTHENTICATOR);
            attrs.push(18);
            let offset = attrs.len();
            attrs.extend_from_slice(&[0u8; 16]);
            Some(offset)
        } else {
            None
        };

        let mut buf = self.assemble(&attrs)?;
        if let Some(offset) = ma_offset {
            let mac = obfuscation::message_authenticator(&buf, secret.as_bytes());
            buf[20 + offset..20 + offset + 16].copy_from_slice(&mac);
        }
        if self.code != consts::RADIUS_ACCESS_REQUEST {
            let auth = obfuscation::request_authenticator(&buf, secret.as_bytes());
            buf[4..20].copy_from_slice(&auth);
            self.authenticator = auth;
        }
        Ok(buf)
    }

    /// Encode a response against the originating request's authenticator.
    pub fn encode_response(
        &mut self,
        secret: &str,
        request_authenticator: &[u8; 16],
        with_message_authenticator: bool,
        dict: &Dictionary,
    ) -> Result<Vec<u8>> {
        let mut attrs = self.serialize_attributes(secret.as_bytes(), request_authenticator, dict)?;
        let ma_offset = if with_message_authenticator {
            attrs.push(consts::RADIUS_ATTR_MESSAGE_AUTHENTICATOR);
            attrs.push(18);
            let offset = attrs.len();
            attrs.extend_from_slice(&[0u8; 16]);
            Some(offset)
        } else {
            None
        };

        self.authenticator = *request_authenticator;
        let mut buf = self.assemble(&attrs)?;
        if let Some(offset) = ma_offset {
            let mac = obfuscation::message_authenticator(&buf, secret.as_bytes());
            buf[20 + offset..20 + offset + 16].copy_from_slice(&mac);
        }
        let auth = obfuscation::md5_parts(&[&buf, secret.as_bytes()]);
        buf[4..20].copy_from_slice(&auth);
        self.authenticator = auth;
        Ok(buf)
    }

    fn assemble(&self, attrs: &[u8]) -> Result<Vec<u8>> {
        let length = 20 + attrs.len();
        if length > u16::MAX as usize {
            return Err(RadiamError::MalformedHeader(
                "packet exceeds 65535 bytes".to_string(),
            ));
        }
        let mut buf = Vec::with_capacity(length);
        buf.push(self.code);
        buf.push(self.identifier);
        buf.extend_from_slice(&(length as u16).to_be_bytes());
        buf.extend_from_slice(&self.authenticator);
        buf.extend_from_slice(attrs);
        Ok(buf)
    }

    /// Decode a packet. `request_authenticator` keys attribute decryption for
    /// responses; `None` uses the packet's own authenticator (inbound
    /// requests).
    pub fn decode(
        data: &[u8],
        secret: &str,
        request_authenticator: Option<&[u8; 16]>,
        dict: &Dictionary,
    ) -> Result<Self> {
        if data.len() < 20 {
            return Err(RadiamError::Truncated {
                needed: 20,
                have: data.len(),
            });
        }
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if length < 20 {
            return Err(RadiamError::MalformedHeader(format!(
                "packet length {length} below header size"
            )));
        }
        if data.len() < length {
            return Err(RadiamError::Truncated {
                needed: length,
                have: data.len(),
            });
        }

        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&data[4..20]);
        let key = request_authenticator.unwrap_or(&authenticator);

        let mut attributes = Vec::new();
        let mut offset = 20;
        while offset < length {
            if length - offset < 2 {
                return Err(RadiamError::MalformedHeader(
                    "trailing attribute bytes".to_string(),
                ));
            }
            let attr_type = data[offset];
            let attr_len = data[offset + 1] as usize;
            if attr_len < 2 || offset + attr_len > length {
                return Err(RadiamError::MalformedHeader(format!(
                    "attribute {attr_type}: bad length {attr_len}"
                )));
            }
            let payload = &data[offset + 2..offset + attr_len];

            if attr_type == consts::RADIUS_ATTR_VENDOR_SPECIFIC && payload.len() >= 6 {
                let vendor_id =
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let sub_type = payload[4];
                let sub_len = payload[5] as usize;
                if sub_len < 2 || sub_len - 2 > payload.len() - 6 {
                    return Err(RadiamError::MalformedHeader(format!(
                        "vendor attribute {vendor_id}/{sub_type}: bad length"
                    )));
                }
                attributes.push(RadiusAvp::build(
                    sub_type,
                    Some(vendor_id),
                    &payload[6..6 + sub_len - 2],
                    secret.as_bytes(),
                    key,
                    dict,
                )?);
            } else {
                attributes.push(RadiusAvp::build(
                    attr_type,
                    None,
                    payload,
                    secret.as_bytes(),
                    key,
                    dict,
                )?);
            }
            offset += attr_len;
        }

        Ok(Self {
            code: data[0],
            identifier: data[1],
            authenticator,
            attributes,
        })
    }

    /// Check a response against the request's authenticator (client side).
    pub fn validate_response_authenticator(
        data: &[u8],
        request_authenticator: &[u8; 16],
        secret: &str,
    ) -> bool {
        if data.len() < 20 {
            return false;
        }
        let expected =
            obfuscation::response_authenticator(data, request_authenticator, secret.as_bytes());
        expected == data[4..20]
    }

    /// Check the computed authenticator on inbound non-Access-Request
    /// packets (server side).
    pub fn validate_request_authenticator(data: &[u8], secret: &str) -> bool {
        if data.len() < 20 {
            return false;
        }
        let expected = obfuscation::request_authenticator(data, secret.as_bytes());
        expected == data[4..20]
    }

    /// Verify a Message-Authenticator attribute if present. Returns
    /// `None` when the packet carries none. For responses, pass the
    /// originating request's authenticator.
    pub fn verify_message_authenticator(
        data: &[u8],
        secret: &str,
        request_authenticator: Option<&[u8; 16]>,
    ) -> Option<bool> {
        if data.len() < 20 {
            return Some(false);
        }
        let length = (u16::from_be_bytes([data[2], data[3]]) as usize).min(data.len());

        let mut offset = 20;
        while offset + 2 <= length {
            let attr_type = data[offset];
            let attr_len = data[offset + 1] as usize;
            if attr_len < 2 || offset + attr_len > length {
                return Some(false);
            }
            if attr_type == consts::RADIUS_ATTR_MESSAGE_AUTHENTICATOR && attr_len == 18 {
                let mut scratch = data[..length].to_vec();
                if let Some(req_auth) = request_authenticator {
                    scratch[4..20].copy_from_slice(req_auth);
                }
                scratch[offset + 2..offset + 18].fill(0);
                let expected = obfuscation::message_authenticator(&scratch, secret.as_bytes());
                return Some(expected == data[offset + 2..offset + 18]);
            }
            offset += attr_len;
        }
        None
    }

    pub fn is_request(&self) -> bool {
        is_request_code(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiam_core::consts::*;
    use std::sync::Arc;

    fn dict() -> Arc<Dictionary> {
        Arc::new(Dictionary::base())
    }

    #[test]
    fn test_access_request_round_trip_with_password() {
        let dict = dict();
        let mut packet = RadiusPacket::new(RADIUS_ACCESS_REQUEST);
        packet
            .push(&dict, "User-Name", AvpValue::Utf8String("alice".to_string()))
            .unwrap();
        packet
            .push(
                &dict,
                "User-Password",
                AvpValue::OctetString(b"hunter2!".to_vec()),
            )
            .unwrap();
        packet
            .push(
                &dict,
                "NAS-IP-Address",
                AvpValue::Address("192.0.2.9".parse().unwrap()),
            )
            .unwrap();

        let bytes = packet.encode_request("secret", 42, false, &dict).unwrap();
        assert_eq!(bytes[0], RADIUS_ACCESS_REQUEST);
        assert_eq!(bytes[1], 42);

        // Inbound request decode uses the packet's own authenticator
        let decoded = RadiusPacket::decode(&bytes, "secret", None, &dict).unwrap();
        assert_eq!(decoded.str_value("User-Name"), Some("alice"));
        assert_eq!(
            decoded.attribute("User-Password").unwrap().value,
            AvpValue::OctetString(b"hunter2!".to_vec())
        );
        assert_eq!(
            decoded.attribute("NAS-IP-Address").unwrap().value,
            AvpValue::Address("192.0.2.9".parse().unwrap())
        );
    }

    #[test]
    fn test_response_authenticator_validates() {
        let dict = dict();
        let request_auth: [u8; 16] = rand::random();

        let mut response = RadiusPacket::new(RADIUS_ACCESS_ACCEPT);
        response.identifier = 9;
        response
            .push(&dict, "Class", AvpValue::OctetString(b"ok".to_vec()))
            .unwrap();

        let bytes = response
            .encode_response("secret", &request_auth, false, &dict)
            .unwrap();

        assert!(RadiusPacket::validate_response_authenticator(
            &bytes,
            &request_auth,
            "secret"
        ));
        assert!(!RadiusPacket::validate_response_authenticator(
            &bytes,
            &request_auth,
            "wrong"
        ));
        let other_auth: [u8; 16] = rand::random();
        assert!(!RadiusPacket::validate_response_authenticator(
            &bytes,
            &other_auth,
            "secret"
        ));
    }

    #[test]
    fn test_accounting_request_authenticator() {
        let dict = dict();
        let mut packet = RadiusPacket::new(RADIUS_ACCOUNTING_REQUEST);
        packet
            .push(
                &dict,
                "Acct-Session-Id",
                AvpValue::Utf8String("acct-1".to_string()),
            )
            .unwrap();

        let bytes = packet.encode_request("secret", 1, false, &dict).unwrap();
        assert!(RadiusPacket::validate_request_authenticator(&bytes, "secret"));
        assert!(!RadiusPacket::validate_request_authenticator(&bytes, "nope"));

        // The computed authenticator is stored for correlation
        assert_eq!(&bytes[4..20], &packet.authenticator);
    }

    #[test]
    fn test_message_authenticator_round_trip() {
        let dict = dict();
        let mut packet = RadiusPacket::new(RADIUS_ACCESS_REQUEST);
        packet
            .push(&dict, "User-Name", AvpValue::Utf8String("bob".to_string()))
            .unwrap();

        let bytes = packet.encode_request("secret", 5, true, &dict).unwrap();
        assert_eq!(
            RadiusPacket::verify_message_authenticator(&bytes, "secret", None),
            Some(true)
        );
        assert_eq!(
            RadiusPacket::verify_message_authenticator(&bytes, "other", None),
            Some(false)
        );

        let plain = packet.encode_request("secret", 5, false, &dict).unwrap();
        assert_eq!(
            RadiusPacket::verify_message_authenticator(&plain, "secret", None),
            None
        );
    }

    #[test]
    fn test_tunnel_password_salted_round_trip() {
        let dict = dict();
        let mut packet = RadiusPacket::new(RADIUS_ACCESS_ACCEPT);
        packet
            .push_tagged(
                &dict,
                "Tunnel-Password",
                Some(1),
                AvpValue::OctetString(b"tunnels".to_vec()),
            )
            .unwrap();

        let request_auth: [u8; 16] = rand::random();
        let mut encoder = packet.clone();
        let bytes = encoder
            .encode_response("secret", &request_auth, false, &dict)
            .unwrap();

        let decoded =
            RadiusPacket::decode(&bytes, "secret", Some(&request_auth), &dict).unwrap();
        let attr = decoded.attribute("Tunnel-Password").unwrap();
        assert_eq!(attr.tag, Some(1));
        assert_eq!(attr.value, AvpValue::OctetString(b"tunnels".to_vec()));
    }

    #[test]
    fn test_vendor_specific_round_trip() {
        let dict = Dictionary::from_json(
            r#"{
                "Vendors": [{"VendorId": 9, "VendorName": "Cisco"}],
                "RadiusAvps": [{"VendorId": 9, "Attributes": [
                    {"Code": 1, "Name": "Cisco-AVPair", "Type": "UTF8String"}
                ]}]
            }"#,
        )
        .unwrap();

        let mut packet = RadiusPacket::new(RADIUS_ACCESS_REQUEST);
        packet
            .push(
                &dict,
                "Cisco-AVPair",
                AvpValue::Utf8String("ip:addr-pool=prod".to_string()),
            )
            .unwrap();

        let bytes = packet.encode_request("secret", 3, false, &dict).unwrap();
        let decoded = RadiusPacket::decode(&bytes, "secret", None, &dict).unwrap();
        let attr = decoded.attribute("Cisco-AVPair").unwrap();
        assert_eq!(attr.vendor_id, Some(9));
        assert_eq!(attr.value.as_str(), Some("ip:addr-pool=prod"));
    }

    #[test]
    fn test_unknown_attribute_preserved() {
        let dict = dict();
        let mut packet = RadiusPacket::new(RADIUS_ACCESS_REQUEST);
        packet.attributes.push(RadiusAvp {
            code: 240,
            vendor_id: None,
            tag: None,
            name: crate::diameter::UNKNOWN_AVP_NAME.to_string(),
            value: AvpValue::Unknown(vec![1, 2, 3]),
        });

        let bytes = packet.encode_request("secret", 7, false, &dict).unwrap();
        let decoded = RadiusPacket::decode(&bytes, "secret", None, &dict).unwrap();
        let attr = decoded.attributes.iter().find(|a| a.code == 240).unwrap();
        assert_eq!(attr.value, AvpValue::Unknown(vec![1, 2, 3]));
    }

    #[test]
    fn test_proxy_state_echoed_in_response() {
        let dict = dict();
        let mut request = RadiusPacket::new(RADIUS_ACCESS_REQUEST);
        request
            .push(
                &dict,
                "Proxy-State",
                AvpValue::OctetString(b"hop-1".to_vec()),
            )
            .unwrap();

        let response = RadiusPacket::response_to(&request, RADIUS_ACCESS_ACCEPT);
        assert_eq!(response.identifier, request.identifier);
        assert_eq!(
            response.attribute("Proxy-State").unwrap().value,
            AvpValue::OctetString(b"hop-1".to_vec())
        );
    }

    #[test]
    fn test_malformed_packets_rejected() {
        let dict = dict();
        assert!(matches!(
            RadiusPacket::decode(&[1, 0, 0], "s", None, &dict),
            Err(RadiamError::Truncated { .. })
        ));

        // Length field larger than the datagram
        let mut short = RadiusPacket::new(RADIUS_ACCESS_REQUEST)
            .encode_request("s", 1, false, &dict)
            .unwrap();
        short[3] = 99;
        assert!(RadiusPacket::decode(&short, "s", None, &dict).is_err());
    }
}
