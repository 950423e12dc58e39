use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Target selection policy within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutePolicy {
    /// First reachable target in configured order
    FixedOrder,
    /// Monotonic cursor over live targets; not reset by health transitions
    RoundRobin,
    /// Uniform draw over live targets
    Random,
}

/// What to do with a matched request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RouteAction {
    /// Invoke a registered local handler
    LocalHandler { handler: String },
    /// POST the JSON-encoded message to an HTTP endpoint
    RemoteHttp { url: String },
    /// Forward over a Diameter peer group
    PeerGroup {
        peers: Vec<String>,
        policy: RoutePolicy,
    },
    /// Forward to a RADIUS server group
    ServerGroup { group: String },
}

/// Ordered Diameter routing rule: first match on (realm, application) wins.
/// `"*"` matches any realm; a missing application matches all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiameterRoutingRule {
    pub realm: String,
    pub application_id: Option<u32>,
    pub action: RouteAction,
    #[serde(default)]
    pub retry_on_handler_error: bool,
}

impl DiameterRoutingRule {
    pub fn matches(&self, realm: &str, application_id: u32) -> bool {
        (self.realm == "*" || self.realm == realm)
            && self
                .application_id
                .map_or(true, |app| app == application_id)
    }
}

/// Ordered RADIUS routing rule, matched by request code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiusRoutingRule {
    pub code: Option<u8>,
    pub action: RouteAction,
    #[serde(default)]
    pub retry_on_handler_error: bool,
}

impl RadiusRoutingRule {
    pub fn matches(&self, code: u8) -> bool {
        self.code.map_or(true, |c| c == code)
    }
}

/// One upstream RADIUS server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiusServerEntry {
    pub name: String,
    pub ip: IpAddr,
    pub secret: String,
    pub auth_port: u16,
    pub acct_port: u16,
}

impl RadiusServerEntry {
    /// Accounting packets go to the accounting port, everything else to the
    /// authentication port
    pub fn endpoint_for(&self, code: u8) -> SocketAddr {
        let port = if code == radiam_core::consts::RADIUS_ACCOUNTING_REQUEST {
            self.acct_port
        } else {
            self.auth_port
        };
        SocketAddr::new(self.ip, port)
    }
}

/// Ordered set of upstream RADIUS servers with a selection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiusServerGroup {
    pub name: String,
    pub servers: Vec<RadiusServerEntry>,
    pub policy: RoutePolicy,
}

pub fn find_diameter_rule<'a>(
    rules: &'a [DiameterRoutingRule],
    realm: &str,
    application_id: u32,
) -> Option<&'a DiameterRoutingRule> {
    rules
        .iter()
        .find(|rule| rule.matches(realm, application_id))
}

pub fn find_radius_rule<'a>(
    rules: &'a [RadiusRoutingRule],
    code: u8,
) -> Option<&'a RadiusRoutingRule> {
    rules.iter().find(|rule| rule.matches(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(realm: &str, app: Option<u32>, handler: &str) -> DiameterRoutingRule {
        DiameterRoutingRule {
            realm: realm.to_string(),
            application_id: app,
            action: RouteAction::LocalHandler {
                handler: handler.to_string(),
            },
            retry_on_handler_error: false,
        }
    }

    #[test]
    fn test_first_match_wins() {
        let rules = vec![
            rule("example.com", Some(4), "credit"),
            rule("example.com", None, "fallback"),
            rule("*", None, "default"),
        ];

        let hit = find_diameter_rule(&rules, "example.com", 4).unwrap();
        assert!(matches!(&hit.action, RouteAction::LocalHandler { handler } if handler == "credit"));

        let hit = find_diameter_rule(&rules, "example.com", 16777251).unwrap();
        assert!(
            matches!(&hit.action, RouteAction::LocalHandler { handler } if handler == "fallback")
        );

        let hit = find_diameter_rule(&rules, "other.net", 0).unwrap();
        assert!(matches!(&hit.action, RouteAction::LocalHandler { handler } if handler == "default"));
    }

    #[test]
    fn test_no_match_without_wildcard() {
        let rules = vec![rule("example.com", Some(4), "credit")];
        assert!(find_diameter_rule(&rules, "other.net", 4).is_none());
    }

    #[test]
    fn test_radius_rule_by_code() {
        let rules = vec![
            RadiusRoutingRule {
                code: Some(4),
                action: RouteAction::ServerGroup {
                    group: "acct".to_string(),
                },
                retry_on_handler_error: false,
            },
            RadiusRoutingRule {
                code: None,
                action: RouteAction::ServerGroup {
                    group: "auth".to_string(),
                },
                retry_on_handler_error: false,
            },
        ];

        let hit = find_radius_rule(&rules, 4).unwrap();
        assert!(matches!(&hit.action, RouteAction::ServerGroup { group } if group == "acct"));
        let hit = find_radius_rule(&rules, 1).unwrap();
        assert!(matches!(&hit.action, RouteAction::ServerGroup { group } if group == "auth"));
    }

    #[test]
    fn test_server_entry_port_selection() {
        let entry = RadiusServerEntry {
            name: "radius01".to_string(),
            ip: "192.0.2.7".parse().unwrap(),
            secret: "s".to_string(),
            auth_port: 1812,
            acct_port: 1813,
        };
        assert_eq!(entry.endpoint_for(1).port(), 1812);
        assert_eq!(entry.endpoint_for(4).port(), 1813);
    }
}
