use serde::{Deserialize, Serialize};

/// AVP data type enumeration, shared between Diameter AVPs and RADIUS
/// attributes. The codec switches on this tag; no runtime reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvpDataType {
    OctetString,
    Utf8String,
    DiameterIdentity,
    DiameterUri,
    IpFilterRule,
    Unsigned32,
    Unsigned64,
    Integer32,
    Integer64,
    Float32,
    Float64,
    Grouped,
    Enumerated,
    Time,
    Address,
}

impl AvpDataType {
    /// Resolve a dictionary-file type name
    pub fn from_name(name: &str) -> Option<Self> {
        let t = match name {
            "OctetString" => Self::OctetString,
            "UTF8String" => Self::Utf8String,
            "DiameterIdentity" => Self::DiameterIdentity,
            "DiameterURI" => Self::DiameterUri,
            "IPFilterRule" => Self::IpFilterRule,
            "Unsigned32" => Self::Unsigned32,
            "Unsigned64" => Self::Unsigned64,
            "Integer32" => Self::Integer32,
            "Integer64" => Self::Integer64,
            "Float32" => Self::Float32,
            "Float64" => Self::Float64,
            "Grouped" => Self::Grouped,
            "Enumerated" => Self::Enumerated,
            "Time" => Self::Time,
            "Address" => Self::Address,
            _ => return None,
        };
        Some(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(
            AvpDataType::from_name("UTF8String"),
            Some(AvpDataType::Utf8String)
        );
        assert_eq!(AvpDataType::from_name("Grouped"), Some(AvpDataType::Grouped));
        assert_eq!(AvpDataType::from_name("Bogus"), None);
    }
}
