// Bootstrap / search-rule object resolution
pub mod bootstrap;

use radiam_core::{RadiamError, Result};
use radiam_router::{DiameterRoutingRule, RadiusRoutingRule, RadiusServerGroup};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use validator::Validate;

pub use bootstrap::{ConfigManager, SearchRule, ENV_CONFIG_BASE};

fn default_log_level() -> String {
    "info".to_string()
}

fn default_diameter_bind() -> String {
    "0.0.0.0:3868".to_string()
}

fn default_auth_bind() -> String {
    "0.0.0.0:1812".to_string()
}

fn default_acct_bind() -> String {
    "0.0.0.0:1813".to_string()
}

fn default_http_bind() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_product_name() -> String {
    "radiam".to_string()
}

fn default_watchdog_secs() -> u64 {
    30
}

fn default_quarantine_secs() -> u64 {
    30
}

fn default_timeout_millis() -> u64 {
    2000
}

fn default_identifier_wait_millis() -> u64 {
    500
}

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[validate(nested)]
    pub diameter: Option<DiameterConfig>,

    #[validate(nested)]
    pub radius: Option<RadiusConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub http: HttpConfig,

    #[serde(default = "default_quarantine_secs")]
    pub quarantine_seconds: u64,

    #[serde(default = "default_timeout_millis")]
    pub request_timeout_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DiameterConfig {
    #[validate(length(min = 1))]
    pub origin_host: String,

    #[validate(length(min = 1))]
    pub origin_realm: String,

    #[serde(default = "default_diameter_bind")]
    pub bind_address: String,

    /// Advertised in Host-IP-Address; defaults to loopback
    pub host_ip: Option<IpAddr>,

    #[serde(default = "default_product_name")]
    pub product_name: String,

    #[serde(default)]
    pub auth_application_ids: Vec<u32>,

    #[serde(default)]
    pub acct_application_ids: Vec<u32>,

    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    #[serde(default)]
    pub routing_rules: Vec<DiameterRoutingRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerPolicyConfig {
    Active,
    Passive,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PeerConfig {
    #[validate(length(min = 1))]
    pub name: String,

    /// Diameter identity the remote presents
    #[validate(length(min = 1))]
    pub diameter_host: String,

    /// Dial target for active peers
    #[serde(default)]
    pub address: String,

    pub connection_policy: PeerPolicyConfig,

    #[serde(default)]
    pub allowed_ingress: Vec<IpAddr>,

    #[serde(default = "default_watchdog_secs")]
    pub watchdog_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RadiusClientConfig {
    #[validate(length(min = 1))]
    pub name: String,

    pub ip: IpAddr,

    #[validate(length(min = 1))]
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RadiusConfig {
    #[serde(default = "default_auth_bind")]
    pub auth_bind: String,

    #[serde(default = "default_acct_bind")]
    pub acct_bind: String,

    #[serde(default)]
    pub clients: Vec<RadiusClientConfig>,

    #[serde(default)]
    pub server_groups: Vec<RadiusServerGroup>,

    #[serde(default)]
    pub routing_rules: Vec<RadiusRoutingRule>,

    #[serde(default = "default_identifier_wait_millis")]
    pub identifier_wait_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind")]
    pub bind: String,

    pub cert_path: Option<String>,
    pub key_path: Option<String>,

    /// Serve plain HTTP instead of TLS; intended for local development
    #[serde(default)]
    pub use_plain_http: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            cert_path: None,
            key_path: None,
            use_plain_http: false,
        }
    }
}

/// Load configuration from a file, with `RADIAM_`-prefixed environment
/// overrides layered on top.
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    let parsed: T = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("RADIAM"))
        .build()
        .map_err(|e| RadiamError::Config(e.to_string()))?
        .try_deserialize()
        .map_err(|e| RadiamError::Config(e.to_string()))?;

    parsed
        .validate()
        .map_err(|e| RadiamError::Config(e.to_string()))?;
    Ok(parsed)
}

/// Load configuration from a JSON string
pub fn load_from_json<T>(json: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    let parsed: T = serde_json::from_str(json).map_err(|e| RadiamError::Config(e.to_string()))?;
    parsed
        .validate()
        .map_err(|e| RadiamError::Config(e.to_string()))?;
    Ok(parsed)
}
