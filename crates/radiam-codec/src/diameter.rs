use crate::avp::{decode_scalar, encode_scalar, AvpValue};
use radiam_core::consts;
use radiam_core::{RadiamError, Result};
use radiam_dict::{AvpDataType, Dictionary};
use serde::{Deserialize, Serialize};

/// Diameter packet header (20 bytes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiameterHeader {
    pub version: u8,
    pub length: u32,
    pub flags: u8,
    pub command_code: u32,
    pub application_id: u32,
    pub hop_by_hop_id: u32,
    pub end_to_end_id: u32,
}

// Header flags
pub const FLAG_REQUEST: u8 = 0x80;
pub const FLAG_PROXIABLE: u8 = 0x40;
pub const FLAG_ERROR: u8 = 0x20;
pub const FLAG_RETRANSMIT: u8 = 0x10;

// AVP flags
pub const AVP_FLAG_VENDOR: u8 = 0x80;
pub const AVP_FLAG_MANDATORY: u8 = 0x40;
pub const AVP_FLAG_PROTECTED: u8 = 0x20;

/// Name given to AVPs the dictionary cannot resolve
pub const UNKNOWN_AVP_NAME: &str = "UNKNOWN";

/// Diameter AVP with its dictionary-resolved value. AVPs the dictionary does
/// not know keep their raw payload and round-trip verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiameterAvp {
    pub code: u32,
    pub flags: u8,
    pub vendor_id: Option<u32>,
    pub name: String,
    pub value: AvpValue,
}

/// Complete Diameter message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiameterMessage {
    pub header: DiameterHeader,
    pub avps: Vec<DiameterAvp>,
}

impl DiameterHeader {
    /// Parse header from bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 20 {
            return Err(RadiamError::Truncated {
                needed: 20,
                have: data.len(),
            });
        }

        let version = data[0];
        if version != 1 {
            return Err(RadiamError::MalformedHeader(format!(
                "unsupported version {version}"
            )));
        }

        let length = u32::from_be_bytes([0, data[1], data[2], data[3]]);
        if length < 20 {
            return Err(RadiamError::MalformedHeader(format!(
                "message length {length} below header size"
            )));
        }

        Ok(Self {
            version,
            length,
            flags: data[4],
            command_code: u32::from_be_bytes([0, data[5], data[6], data[7]]),
            application_id: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            hop_by_hop_id: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            end_to_end_id: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
        })
    }

    /// Serialize header to bytes
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.push(self.version);
        out.extend_from_slice(&self.length.to_be_bytes()[1..4]);
        out.push(self.flags);
        out.extend_from_slice(&self.command_code.to_be_bytes()[1..4]);
        out.extend_from_slice(&self.application_id.to_be_bytes());
        out.extend_from_slice(&self.hop_by_hop_id.to_be_bytes());
        out.extend_from_slice(&self.end_to_end_id.to_be_bytes());
    }

    pub fn is_request(&self) -> bool {
        (self.flags & FLAG_REQUEST) != 0
    }

    pub fn is_answer(&self) -> bool {
        !self.is_request()
    }
}

impl DiameterAvp {
    /// Parse one AVP from the front of `data`, returning it and the padded
    /// length consumed.
    fn parse(data: &[u8], dict: &Dictionary) -> Result<(Self, usize)> {
        if data.len() < 8 {
            return Err(RadiamError::Truncated {
                needed: 8,
                have: data.len(),
            });
        }

        let code = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let flags = data[4];
        let length = u32::from_be_bytes([0, data[5], data[6], data[7]]) as usize;

        let header_len = if (flags & AVP_FLAG_VENDOR) != 0 { 12 } else { 8 };
        if length < header_len {
            return Err(RadiamError::MalformedHeader(format!(
                "avp {code}: length {length} below header size"
            )));
        }
        if data.len() < length {
            return Err(RadiamError::Truncated {
                needed: length,
                have: data.len(),
            });
        }

        let vendor_id = if header_len == 12 {
            Some(u32::from_be_bytes([data[8], data[9], data[10], data[11]]))
        } else {
            None
        };

        let payload = &data[header_len..length];
        let (name, value) = match dict.avp(vendor_id.unwrap_or(0), code) {
            Some(def) => {
                let value = if def.data_type == AvpDataType::Grouped {
                    AvpValue::Grouped(decode_avps(payload, dict)?)
                } else {
                    decode_scalar(code, def.data_type, payload)?
                };
                (def.name.clone(), value)
            }
            None => (
                UNKNOWN_AVP_NAME.to_string(),
                AvpValue::Unknown(payload.to_vec()),
            ),
        };

        let padded = length.div_ceil(4) * 4;
        Ok((
            Self {
                code,
                flags,
                vendor_id,
                name,
                value,
            },
            padded.min(data.len()),
        ))
    }

    /// Serialize AVP including padding
    fn serialize(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::new();
        match &self.value {
            AvpValue::Grouped(children) => {
                for child in children {
                    child.serialize(&mut payload);
                }
            }
            other => encode_scalar(other, &mut payload),
        }

        let header_len = if self.vendor_id.is_some() { 12 } else { 8 };
        let length = header_len + payload.len();

        out.extend_from_slice(&self.code.to_be_bytes());
        let mut flags = self.flags;
        if self.vendor_id.is_some() {
            flags |= AVP_FLAG_VENDOR;
        } else {
            flags &= !AVP_FLAG_VENDOR;
        }
        out.push(flags);
        out.extend_from_slice(&(length as u32).to_be_bytes()[1..4]);
        if let Some(vid) = self.vendor_id {
            out.extend_from_slice(&vid.to_be_bytes());
        }
        out.extend_from_slice(&payload);

        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
}

fn decode_avps(mut data: &[u8], dict: &Dictionary) -> Result<Vec<DiameterAvp>> {
    let mut avps = Vec::new();
    while !data.is_empty() {
        let (avp, consumed) = DiameterAvp::parse(data, dict)?;
        avps.push(avp);
        data = &data[consumed..];
    }
    Ok(avps)
}

impl DiameterMessage {
    /// Build a request with zeroed correlation ids; the peer assigns
    /// hop-by-hop and end-to-end ids on send.
    pub fn request(application_id: u32, command_code: u32) -> Self {
        Self {
            header: DiameterHeader {
                version: 1,
                length: 0,
                flags: FLAG_REQUEST | FLAG_PROXIABLE,
                command_code,
                application_id,
                hop_by_hop_id: 0,
                end_to_end_id: 0,
            },
            avps: Vec::new(),
        }
    }

    /// Build the answer skeleton for a request: same command and ids,
    /// request flag cleared, Session-Id echoed when present.
    pub fn answer_to(request: &DiameterMessage) -> Self {
        let mut answer = Self {
            header: DiameterHeader {
                version: 1,
                length: 0,
                flags: request.header.flags & FLAG_PROXIABLE,
                command_code: request.header.command_code,
                application_id: request.header.application_id,
                hop_by_hop_id: request.header.hop_by_hop_id,
                end_to_end_id: request.header.end_to_end_id,
            },
            avps: Vec::new(),
        };
        if let Some(session_id) = request.avp_named("Session-Id") {
            answer.avps.push(session_id.clone());
        }
        answer
    }

    /// Decode a message; the dictionary drives attribute typing.
    pub fn decode(data: &[u8], dict: &Dictionary) -> Result<Self> {
        let header = DiameterHeader::parse(data)?;
        let length = header.length as usize;
        if data.len() < length {
            return Err(RadiamError::Truncated {
                needed: length,
                have: data.len(),
            });
        }

        let avps = decode_avps(&data[20..length], dict)?;
        Ok(Self { header, avps })
    }

    /// Encode the message; the length field is recomputed, AVP order is
    /// preserved.
    pub fn encode(&self) -> Vec<u8> {
        let mut avp_bytes = Vec::new();
        for avp in &self.avps {
            avp.serialize(&mut avp_bytes);
        }

        let mut out = Vec::with_capacity(20 + avp_bytes.len());
        let mut header = self.header.clone();
        header.length = (20 + avp_bytes.len()) as u32;
        header.serialize(&mut out);
        out.extend_from_slice(&avp_bytes);
        out
    }

    /// Append a dictionary-resolved AVP; the mandatory flag is set, the
    /// vendor flag follows the definition.
    pub fn push(&mut self, dict: &Dictionary, name: &str, value: AvpValue) -> Result<&mut Self> {
        let def = dict
            .avp_named(name)
            .ok_or_else(|| RadiamError::Dictionary(format!("unknown avp name {name}")))?;
        self.avps.push(DiameterAvp {
            code: def.code,
            flags: AVP_FLAG_MANDATORY,
            vendor_id: (def.vendor_id != 0).then_some(def.vendor_id),
            name: def.name.clone(),
            value,
        });
        Ok(self)
    }

    pub fn avp_named(&self, name: &str) -> Option<&DiameterAvp> {
        self.avps.iter().find(|avp| avp.name == name)
    }

    pub fn avp_by_code(&self, code: u32) -> Option<&DiameterAvp> {
        self.avps.iter().find(|avp| avp.code == code)
    }

    pub fn str_value(&self, name: &str) -> Option<&str> {
        self.avp_named(name)?.value.as_str()
    }

    pub fn u32_value(&self, name: &str) -> Option<u32> {
        self.avp_named(name)?.value.as_u32()
    }

    pub fn result_code(&self) -> Option<u32> {
        self.avp_by_code(consts::AVP_RESULT_CODE)?.value.as_u32()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.avp_by_code(consts::AVP_SESSION_ID)?.value.as_str()
    }

    pub fn origin_host(&self) -> Option<&str> {
        self.avp_by_code(consts::AVP_ORIGIN_HOST)?.value.as_str()
    }

    pub fn destination_realm(&self) -> Option<&str> {
        self.avp_by_code(consts::AVP_DESTINATION_REALM)?
            .value
            .as_str()
    }

    pub fn destination_host(&self) -> Option<&str> {
        self.avp_by_code(consts::AVP_DESTINATION_HOST)?
            .value
            .as_str()
    }

    pub fn is_request(&self) -> bool {
        self.header.is_request()
    }
}
