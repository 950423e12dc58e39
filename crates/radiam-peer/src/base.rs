//! Base-protocol message construction and validation: capabilities exchange,
//! watchdog and disconnect.

use crate::settings::{LocalNode, PeerSettings};
use radiam_codec::{AvpValue, DiameterMessage};
use radiam_core::consts;
use radiam_dict::Dictionary;

/// Relay application; always considered common
const RELAY_APPLICATION_ID: u32 = 0xFFFF_FFFF;

fn push_origin(msg: &mut DiameterMessage, local: &LocalNode, dict: &Dictionary) {
    msg.push(
        dict,
        "Origin-Host",
        AvpValue::DiameterIdentity(local.origin_host.clone()),
    )
    .expect("base dictionary always has Origin-Host");
    msg.push(
        dict,
        "Origin-Realm",
        AvpValue::DiameterIdentity(local.origin_realm.clone()),
    )
    .expect("base dictionary always has Origin-Realm");
}

pub fn build_cer(local: &LocalNode, dict: &Dictionary) -> DiameterMessage {
    let mut cer = DiameterMessage::request(0, consts::CMD_CAPABILITIES_EXCHANGE);
    // CER/CEA are link-local and never proxied
    cer.header.flags = radiam_codec::diameter::FLAG_REQUEST;
    push_origin(&mut cer, local, dict);
    cer.push(dict, "Host-IP-Address", AvpValue::Address(local.host_ip))
        .expect("base dictionary");
    cer.push(dict, "Vendor-Id", AvpValue::Unsigned32(0))
        .expect("base dictionary");
    cer.push(
        dict,
        "Product-Name",
        AvpValue::Utf8String(local.product_name.clone()),
    )
    .expect("base dictionary");
    cer.push(
        dict,
        "Origin-State-Id",
        AvpValue::Unsigned32(local.origin_state_id),
    )
    .expect("base dictionary");
    for app_id in &local.auth_application_ids {
        cer.push(dict, "Auth-Application-Id", AvpValue::Unsigned32(*app_id))
            .expect("base dictionary");
    }
    for app_id in &local.acct_application_ids {
        cer.push(dict, "Acct-Application-Id", AvpValue::Unsigned32(*app_id))
            .expect("base dictionary");
    }
    cer
}

pub fn build_cea(
    cer: &DiameterMessage,
    local: &LocalNode,
    dict: &Dictionary,
    result_code: u32,
) -> DiameterMessage {
    let mut cea = DiameterMessage::answer_to(cer);
    cea.push(dict, "Result-Code", AvpValue::Unsigned32(result_code))
        .expect("base dictionary");
    push_origin(&mut cea, local, dict);
    cea.push(dict, "Host-IP-Address", AvpValue::Address(local.host_ip))
        .expect("base dictionary");
    cea.push(dict, "Vendor-Id", AvpValue::Unsigned32(0))
        .expect("base dictionary");
    cea.push(
        dict,
        "Product-Name",
        AvpValue::Utf8String(local.product_name.clone()),
    )
    .expect("base dictionary");
    for app_id in &local.auth_application_ids {
        cea.push(dict, "Auth-Application-Id", AvpValue::Unsigned32(*app_id))
            .expect("base dictionary");
    }
    for app_id in &local.acct_application_ids {
        cea.push(dict, "Acct-Application-Id", AvpValue::Unsigned32(*app_id))
            .expect("base dictionary");
    }
    cea
}

pub fn build_dwr(local: &LocalNode, dict: &Dictionary) -> DiameterMessage {
    let mut dwr = DiameterMessage::request(0, consts::CMD_DEVICE_WATCHDOG);
    dwr.header.flags = radiam_codec::diameter::FLAG_REQUEST;
    push_origin(&mut dwr, local, dict);
    dwr.push(
        dict,
        "Origin-State-Id",
        AvpValue::Unsigned32(local.origin_state_id),
    )
    .expect("base dictionary");
    dwr
}

pub fn build_dwa(dwr: &DiameterMessage, local: &LocalNode, dict: &Dictionary) -> DiameterMessage {
    let mut dwa = DiameterMessage::answer_to(dwr);
    dwa.push(
        dict,
        "Result-Code",
        AvpValue::Unsigned32(consts::RESULT_CODE_SUCCESS),
    )
    .expect("base dictionary");
    push_origin(&mut dwa, local, dict);
    dwa
}

pub fn build_dpr(local: &LocalNode, dict: &Dictionary, cause: u32) -> DiameterMessage {
    let mut dpr = DiameterMessage::request(0, consts::CMD_DISCONNECT_PEER);
    dpr.header.flags = radiam_codec::diameter::FLAG_REQUEST;
    push_origin(&mut dpr, local, dict);
    dpr.push(dict, "Disconnect-Cause", AvpValue::Enumerated(cause as i32))
        .expect("base dictionary");
    dpr
}

pub fn build_dpa(dpr: &DiameterMessage, local: &LocalNode, dict: &Dictionary) -> DiameterMessage {
    let mut dpa = DiameterMessage::answer_to(dpr);
    dpa.push(
        dict,
        "Result-Code",
        AvpValue::Unsigned32(consts::RESULT_CODE_SUCCESS),
    )
    .expect("base dictionary");
    push_origin(&mut dpa, local, dict);
    dpa
}

/// Protocol-error answer for a request that cannot be served. The E-bit is
/// set for 3xxx protocol errors.
pub fn build_error_answer(
    request: &DiameterMessage,
    local: &LocalNode,
    dict: &Dictionary,
    result_code: u32,
    error_message: &str,
) -> DiameterMessage {
    let mut answer = DiameterMessage::answer_to(request);
    if (3000..4000).contains(&result_code) {
        answer.header.flags |= radiam_codec::diameter::FLAG_ERROR;
    }
    answer
        .push(dict, "Result-Code", AvpValue::Unsigned32(result_code))
        .expect("base dictionary");
    push_origin(&mut answer, local, dict);
    if !error_message.is_empty() {
        answer
            .push(
                dict,
                "Error-Message",
                AvpValue::Utf8String(error_message.to_string()),
            )
            .expect("base dictionary");
    }
    answer
}

fn advertised_applications(msg: &DiameterMessage) -> Vec<u32> {
    let mut apps = Vec::new();
    for avp in &msg.avps {
        match avp.code {
            consts::AVP_AUTH_APPLICATION_ID | consts::AVP_ACCT_APPLICATION_ID => {
                if let Some(app_id) = avp.value.as_u32() {
                    apps.push(app_id);
                }
            }
            260 => {
                // Vendor-Specific-Application-Id: pull the nested app ids
                if let AvpValue::Grouped(children) = &avp.value {
                    for child in children {
                        if matches!(
                            child.code,
                            consts::AVP_AUTH_APPLICATION_ID | consts::AVP_ACCT_APPLICATION_ID
                        ) {
                            if let Some(app_id) = child.value.as_u32() {
                                apps.push(app_id);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    apps
}

/// Capabilities validation for a received CER or CEA: origin-host must match
/// the configured peer and at least one application must be common.
pub fn validate_capabilities(
    msg: &DiameterMessage,
    settings: &PeerSettings,
    local: &LocalNode,
) -> std::result::Result<(), &'static str> {
    match msg.origin_host() {
        Some(host) if host == settings.origin_host => {}
        Some(_) => return Err("origin-host mismatch"),
        None => return Err("missing origin-host"),
    }

    let local_apps: Vec<u32> = local
        .auth_application_ids
        .iter()
        .chain(local.acct_application_ids.iter())
        .copied()
        .collect();
    if local_apps.is_empty() {
        return Ok(());
    }

    let remote_apps = advertised_applications(msg);
    let common = remote_apps
        .iter()
        .any(|app| *app == RELAY_APPLICATION_ID || local_apps.contains(app));
    if common {
        Ok(())
    } else {
        Err("no common application")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> LocalNode {
        let mut local = LocalNode::new("server.example.com", "example.com");
        local.auth_application_ids = vec![4];
        local
    }

    fn settings() -> PeerSettings {
        PeerSettings::new("client", "client.example.com", "127.0.0.1:3868")
    }

    #[test]
    fn test_cer_carries_identity_and_applications() {
        let dict = Dictionary::base();
        let cer = build_cer(&local(), &dict);

        assert!(cer.is_request());
        assert_eq!(cer.header.command_code, consts::CMD_CAPABILITIES_EXCHANGE);
        assert_eq!(cer.origin_host(), Some("server.example.com"));
        assert_eq!(cer.u32_value("Auth-Application-Id"), Some(4));
        assert!(cer.avp_named("Host-IP-Address").is_some());
        assert!(cer.avp_named("Origin-State-Id").is_some());
    }

    #[test]
    fn test_cea_echoes_request_ids() {
        let dict = Dictionary::base();
        let mut cer = build_cer(&local(), &dict);
        cer.header.hop_by_hop_id = 17;
        cer.header.end_to_end_id = 23;

        let cea = build_cea(&cer, &local(), &dict, consts::RESULT_CODE_SUCCESS);
        assert!(!cea.is_request());
        assert_eq!(cea.header.hop_by_hop_id, 17);
        assert_eq!(cea.header.end_to_end_id, 23);
        assert_eq!(cea.result_code(), Some(consts::RESULT_CODE_SUCCESS));
    }

    #[test]
    fn test_validate_capabilities_accepts_matching_peer() {
        let dict = Dictionary::base();
        let mut remote = LocalNode::new("client.example.com", "example.com");
        remote.auth_application_ids = vec![4];
        let cer = build_cer(&remote, &dict);

        assert!(validate_capabilities(&cer, &settings(), &local()).is_ok());
    }

    #[test]
    fn test_validate_capabilities_rejects_wrong_host() {
        let dict = Dictionary::base();
        let mut remote = LocalNode::new("intruder.example.com", "example.com");
        remote.auth_application_ids = vec![4];
        let cer = build_cer(&remote, &dict);

        assert_eq!(
            validate_capabilities(&cer, &settings(), &local()),
            Err("origin-host mismatch")
        );
    }

    #[test]
    fn test_validate_capabilities_rejects_disjoint_applications() {
        let dict = Dictionary::base();
        let mut remote = LocalNode::new("client.example.com", "example.com");
        remote.auth_application_ids = vec![16777251];
        let cer = build_cer(&remote, &dict);

        assert_eq!(
            validate_capabilities(&cer, &settings(), &local()),
            Err("no common application")
        );
    }

    #[test]
    fn test_error_answer_sets_e_bit_for_protocol_errors() {
        let dict = Dictionary::base();
        let mut request = DiameterMessage::request(4, 272);
        request
            .push(
                &dict,
                "Session-Id",
                radiam_codec::AvpValue::Utf8String("s-1".to_string()),
            )
            .unwrap();

        let answer = build_error_answer(&request, &local(), &dict, 3002, "no route");
        assert_ne!(answer.header.flags & radiam_codec::diameter::FLAG_ERROR, 0);
        assert_eq!(answer.result_code(), Some(3002));
        assert_eq!(answer.session_id(), Some("s-1"));
        assert_eq!(answer.str_value("Error-Message"), Some("no route"));

        // 5xxx errors are not protocol errors; the E-bit stays clear
        let answer = build_error_answer(&request, &local(), &dict, 5012, "");
        assert_eq!(answer.header.flags & radiam_codec::diameter::FLAG_ERROR, 0);
        assert!(answer.avp_named("Error-Message").is_none());
    }

    #[test]
    fn test_relay_application_is_always_common() {
        let dict = Dictionary::base();
        let mut remote = LocalNode::new("client.example.com", "example.com");
        remote.auth_application_ids = vec![RELAY_APPLICATION_ID];
        let cer = build_cer(&remote, &dict);

        assert!(validate_capabilities(&cer, &settings(), &local()).is_ok());
    }
}
