//! Built-in base-protocol definitions (RFC 6733 / RFC 2865). Always present
//! so that CER/CEA, watchdog and disconnect exchanges resolve without a
//! dictionary file.

use crate::data_type::AvpDataType;
use crate::dictionary::{AvpDef, GroupedChild, GroupedDef, RadiusAvpDef};

fn avp(code: u32, name: &str, data_type: AvpDataType) -> AvpDef {
    AvpDef {
        code,
        vendor_id: 0,
        name: name.to_string(),
        data_type,
        enum_values: None,
        group: None,
    }
}

fn child(name: &str, min_occurs: u32, max_occurs: u32) -> GroupedChild {
    GroupedChild {
        name: name.to_string(),
        min_occurs,
        max_occurs,
    }
}

pub fn base_avps() -> Vec<AvpDef> {
    use AvpDataType::*;

    let mut defs = vec![
        avp(1, "User-Name", Utf8String),
        avp(55, "Event-Timestamp", Time),
        avp(257, "Host-IP-Address", Address),
        avp(258, "Auth-Application-Id", Unsigned32),
        avp(259, "Acct-Application-Id", Unsigned32),
        avp(263, "Session-Id", Utf8String),
        avp(264, "Origin-Host", DiameterIdentity),
        avp(265, "Supported-Vendor-Id", Unsigned32),
        avp(266, "Vendor-Id", Unsigned32),
        avp(267, "Firmware-Revision", Unsigned32),
        avp(268, "Result-Code", Unsigned32),
        avp(269, "Product-Name", Utf8String),
        avp(278, "Origin-State-Id", Unsigned32),
        avp(280, "Proxy-Host", DiameterIdentity),
        avp(281, "Error-Message", Utf8String),
        avp(282, "Route-Record", DiameterIdentity),
        avp(283, "Destination-Realm", DiameterIdentity),
        avp(293, "Destination-Host", DiameterIdentity),
        avp(296, "Origin-Realm", DiameterIdentity),
        avp(33, "Proxy-State", OctetString),
    ];

    let mut disconnect_cause = avp(273, "Disconnect-Cause", Enumerated);
    disconnect_cause.enum_values = Some(
        [
            ("REBOOTING".to_string(), 0),
            ("BUSY".to_string(), 1),
            ("DO_NOT_WANT_TO_TALK_TO_YOU".to_string(), 2),
        ]
        .into_iter()
        .collect(),
    );
    defs.push(disconnect_cause);

    let mut vsa_id = avp(260, "Vendor-Specific-Application-Id", Grouped);
    vsa_id.group = Some(GroupedDef {
        children: vec![
            child("Vendor-Id", 1, 1),
            child("Auth-Application-Id", 0, 1),
            child("Acct-Application-Id", 0, 1),
        ],
    });
    defs.push(vsa_id);

    let mut proxy_info = avp(284, "Proxy-Info", Grouped);
    proxy_info.group = Some(GroupedDef {
        children: vec![child("Proxy-Host", 1, 1), child("Proxy-State", 1, 1)],
    });
    defs.push(proxy_info);

    defs
}

fn radius(code: u8, name: &str, data_type: AvpDataType) -> RadiusAvpDef {
    RadiusAvpDef {
        code,
        vendor_id: 0,
        name: name.to_string(),
        data_type,
        encrypted: false,
        salted: false,
        tagged: false,
        enum_values: None,
    }
}

pub fn base_radius_avps() -> Vec<RadiusAvpDef> {
    use AvpDataType::*;

    let mut defs = vec![
        radius(1, "User-Name", Utf8String),
        radius(4, "NAS-IP-Address", Address),
        radius(5, "NAS-Port", Unsigned32),
        radius(6, "Service-Type", Enumerated),
        radius(8, "Framed-IP-Address", Address),
        radius(18, "Reply-Message", Utf8String),
        radius(25, "Class", OctetString),
        radius(27, "Session-Timeout", Unsigned32),
        radius(30, "Called-Station-Id", Utf8String),
        radius(31, "Calling-Station-Id", Utf8String),
        radius(32, "NAS-Identifier", Utf8String),
        radius(33, "Proxy-State", OctetString),
        radius(40, "Acct-Status-Type", Enumerated),
        radius(44, "Acct-Session-Id", Utf8String),
        radius(80, "Message-Authenticator", OctetString),
    ];

    let mut user_password = radius(2, "User-Password", OctetString);
    user_password.encrypted = true;
    defs.push(user_password);

    let mut tunnel_type = radius(64, "Tunnel-Type", Enumerated);
    tunnel_type.tagged = true;
    defs.push(tunnel_type);

    let mut tunnel_password = radius(69, "Tunnel-Password", OctetString);
    tunnel_password.salted = true;
    tunnel_password.tagged = true;
    defs.push(tunnel_password);

    defs
}
