use crate::data_type::AvpDataType;
use crate::standard;
use radiam_core::{RadiamError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Diameter AVP definition
#[derive(Debug, Clone)]
pub struct AvpDef {
    pub code: u32,
    pub vendor_id: u32,
    pub name: String,
    pub data_type: AvpDataType,
    pub enum_values: Option<HashMap<String, i32>>,
    pub group: Option<GroupedDef>,
}

/// Permitted children of a grouped AVP
#[derive(Debug, Clone)]
pub struct GroupedDef {
    pub children: Vec<GroupedChild>,
}

#[derive(Debug, Clone)]
pub struct GroupedChild {
    pub name: String,
    pub min_occurs: u32,
    pub max_occurs: u32,
}

/// RADIUS attribute definition
#[derive(Debug, Clone)]
pub struct RadiusAvpDef {
    pub code: u8,
    pub vendor_id: u32,
    pub name: String,
    pub data_type: AvpDataType,
    pub encrypted: bool,
    pub salted: bool,
    pub tagged: bool,
    pub enum_values: Option<HashMap<String, i32>>,
}

/// Diameter command definition
#[derive(Debug, Clone)]
pub struct CommandDef {
    pub code: u32,
    pub name: String,
    pub request_name: String,
    pub response_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppType {
    Auth,
    Acct,
}

/// Diameter application definition
#[derive(Debug, Clone)]
pub struct ApplicationDef {
    pub code: u32,
    pub name: String,
    pub app_type: AppType,
    pub commands: HashMap<u32, CommandDef>,
}

/// Immutable attribute/command dictionary. Loaded once at startup and shared
/// as `Arc<Dictionary>`; codec operations take it as an argument.
#[derive(Debug, Default)]
pub struct Dictionary {
    avps_by_key: HashMap<(u32, u32), Arc<AvpDef>>,
    avps_by_name: HashMap<String, Arc<AvpDef>>,
    radius_by_key: HashMap<(u32, u8), Arc<RadiusAvpDef>>,
    radius_by_name: HashMap<String, Arc<RadiusAvpDef>>,
    vendors: HashMap<u32, String>,
    applications: HashMap<u32, ApplicationDef>,
}

// ========================================
// JSON file model
// ========================================

#[derive(Debug, Deserialize)]
struct DictionaryJson {
    #[serde(rename = "Version", default)]
    _version: u32,
    #[serde(rename = "Vendors", default)]
    vendors: Vec<VendorJson>,
    #[serde(rename = "Avps", default)]
    avps: Vec<AvpSectionJson>,
    #[serde(rename = "RadiusAvps", default)]
    radius_avps: Vec<RadiusSectionJson>,
    #[serde(rename = "Applications", default)]
    applications: Vec<ApplicationJson>,
}

#[derive(Debug, Deserialize)]
struct VendorJson {
    #[serde(rename = "VendorId")]
    vendor_id: u32,
    #[serde(rename = "VendorName")]
    vendor_name: String,
}

#[derive(Debug, Deserialize)]
struct AvpSectionJson {
    #[serde(rename = "VendorId", default)]
    vendor_id: u32,
    #[serde(rename = "Attributes")]
    attributes: Vec<AttributeJson>,
}

#[derive(Debug, Deserialize)]
struct AttributeJson {
    #[serde(rename = "Code")]
    code: u32,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    data_type: String,
    #[serde(rename = "EnumValues", default)]
    enum_values: Option<HashMap<String, i32>>,
    #[serde(rename = "Group", default)]
    group: Option<GroupJson>,
}

#[derive(Debug, Deserialize)]
struct GroupJson {
    #[serde(rename = "Children", default)]
    children: Vec<GroupChildJson>,
}

#[derive(Debug, Deserialize)]
struct GroupChildJson {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "MinOccurs", default)]
    min_occurs: u32,
    #[serde(rename = "MaxOccurs", default = "default_max_occurs")]
    max_occurs: u32,
}

fn default_max_occurs() -> u32 {
    u32::MAX
}

#[derive(Debug, Deserialize)]
struct RadiusSectionJson {
    #[serde(rename = "VendorId", default)]
    vendor_id: u32,
    #[serde(rename = "Attributes")]
    attributes: Vec<RadiusAttributeJson>,
}

#[derive(Debug, Deserialize)]
struct RadiusAttributeJson {
    #[serde(rename = "Code")]
    code: u8,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    data_type: String,
    #[serde(rename = "Encrypted", default)]
    encrypted: bool,
    #[serde(rename = "Salted", default)]
    salted: bool,
    #[serde(rename = "Tagged", default)]
    tagged: bool,
    #[serde(rename = "EnumValues", default)]
    enum_values: Option<HashMap<String, i32>>,
}

#[derive(Debug, Deserialize)]
struct ApplicationJson {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Code")]
    code: u32,
    #[serde(rename = "AppType")]
    app_type: String,
    #[serde(rename = "Commands", default)]
    commands: Vec<CommandJson>,
}

#[derive(Debug, Deserialize)]
struct CommandJson {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Code")]
    code: u32,
    #[serde(rename = "Request")]
    request: String,
    #[serde(rename = "Response")]
    response: String,
}

impl Dictionary {
    /// Dictionary containing only the built-in base-protocol definitions,
    /// enough to exchange CER/CEA, DWR/DWA and DPR/DPA.
    pub fn base() -> Dictionary {
        let mut dict = Dictionary::default();
        for def in standard::base_avps() {
            // Built-in names are unique by construction
            dict.insert_avp(def).expect("base dictionary is well-formed");
        }
        for def in standard::base_radius_avps() {
            dict.insert_radius_avp(def)
                .expect("base dictionary is well-formed");
        }
        dict
    }

    /// Load a dictionary from its JSON representation, merged over the
    /// built-in base definitions. Duplicate names are rejected.
    pub fn from_json(input: &str) -> Result<Dictionary> {
        let parsed: DictionaryJson =
            serde_json::from_str(input).map_err(|e| RadiamError::Dictionary(e.to_string()))?;

        let mut dict = Dictionary::base();

        for vendor in parsed.vendors {
            dict.vendors.insert(vendor.vendor_id, vendor.vendor_name);
        }

        for section in parsed.avps {
            for attr in section.attributes {
                let data_type = AvpDataType::from_name(&attr.data_type).ok_or_else(|| {
                    RadiamError::Dictionary(format!(
                        "avp {}: unknown type {}",
                        attr.name, attr.data_type
                    ))
                })?;
                dict.insert_avp(AvpDef {
                    code: attr.code,
                    vendor_id: section.vendor_id,
                    name: attr.name,
                    data_type,
                    enum_values: attr.enum_values,
                    group: attr.group.map(|g| GroupedDef {
                        children: g
                            .children
                            .into_iter()
                            .map(|c| GroupedChild {
                                name: c.name,
                                min_occurs: c.min_occurs,
                                max_occurs: c.max_occurs,
                            })
                            .collect(),
                    }),
                })?;
            }
        }

        for section in parsed.radius_avps {
            for attr in section.attributes {
                let data_type = AvpDataType::from_name(&attr.data_type).ok_or_else(|| {
                    RadiamError::Dictionary(format!(
                        "radius attribute {}: unknown type {}",
                        attr.name, attr.data_type
                    ))
                })?;
                dict.insert_radius_avp(RadiusAvpDef {
                    code: attr.code,
                    vendor_id: section.vendor_id,
                    name: attr.name,
                    data_type,
                    encrypted: attr.encrypted,
                    salted: attr.salted,
                    tagged: attr.tagged,
                    enum_values: attr.enum_values,
                })?;
            }
        }

        for app in parsed.applications {
            let app_type = match app.app_type.as_str() {
                "auth" => AppType::Auth,
                "acct" => AppType::Acct,
                other => {
                    return Err(RadiamError::Dictionary(format!(
                        "application {}: unknown AppType {}",
                        app.name, other
                    )))
                }
            };
            let commands = app
                .commands
                .into_iter()
                .map(|c| {
                    (
                        c.code,
                        CommandDef {
                            code: c.code,
                            name: c.name,
                            request_name: c.request,
                            response_name: c.response,
                        },
                    )
                })
                .collect();
            dict.applications.insert(
                app.code,
                ApplicationDef {
                    code: app.code,
                    name: app.name,
                    app_type,
                    commands,
                },
            );
        }

        Ok(dict)
    }

    fn insert_avp(&mut self, def: AvpDef) -> Result<()> {
        if self.avps_by_name.contains_key(&def.name) {
            return Err(RadiamError::Dictionary(format!(
                "duplicate avp name {}",
                def.name
            )));
        }
        let def = Arc::new(def);
        self.avps_by_key
            .insert((def.vendor_id, def.code), Arc::clone(&def));
        self.avps_by_name.insert(def.name.clone(), def);
        Ok(())
    }

    fn insert_radius_avp(&mut self, def: RadiusAvpDef) -> Result<()> {
        if self.radius_by_name.contains_key(&def.name) {
            return Err(RadiamError::Dictionary(format!(
                "duplicate radius attribute name {}",
                def.name
            )));
        }
        let def = Arc::new(def);
        self.radius_by_key
            .insert((def.vendor_id, def.code), Arc::clone(&def));
        self.radius_by_name.insert(def.name.clone(), def);
        Ok(())
    }

    /// Lookup a Diameter AVP definition by (vendor, code)
    pub fn avp(&self, vendor_id: u32, code: u32) -> Option<&AvpDef> {
        self.avps_by_key.get(&(vendor_id, code)).map(Arc::as_ref)
    }

    /// Lookup a Diameter AVP definition by name
    pub fn avp_named(&self, name: &str) -> Option<&AvpDef> {
        self.avps_by_name.get(name).map(Arc::as_ref)
    }

    /// Lookup a RADIUS attribute definition by (vendor, code)
    pub fn radius_attr(&self, vendor_id: u32, code: u8) -> Option<&RadiusAvpDef> {
        self.radius_by_key.get(&(vendor_id, code)).map(Arc::as_ref)
    }

    /// Lookup a RADIUS attribute definition by name
    pub fn radius_attr_named(&self, name: &str) -> Option<&RadiusAvpDef> {
        self.radius_by_name.get(name).map(Arc::as_ref)
    }

    pub fn application(&self, code: u32) -> Option<&ApplicationDef> {
        self.applications.get(&code)
    }

    pub fn command(&self, app_id: u32, code: u32) -> Option<&CommandDef> {
        self.applications.get(&app_id)?.commands.get(&code)
    }

    pub fn vendor_name(&self, vendor_id: u32) -> Option<&str> {
        self.vendors.get(&vendor_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "Version": 1,
        "Vendors": [{"VendorId": 10415, "VendorName": "3GPP"}],
        "Avps": [
            {"VendorId": 0, "Attributes": [
                {"Code": 443, "Name": "Subscription-Id", "Type": "Grouped",
                 "Group": {"Children": [
                     {"Name": "Subscription-Id-Type", "MinOccurs": 1, "MaxOccurs": 1},
                     {"Name": "Subscription-Id-Data", "MinOccurs": 1, "MaxOccurs": 1}
                 ]}},
                {"Code": 450, "Name": "Subscription-Id-Type", "Type": "Enumerated",
                 "EnumValues": {"END_USER_E164": 0, "END_USER_IMSI": 1}},
                {"Code": 444, "Name": "Subscription-Id-Data", "Type": "UTF8String"}
            ]}
        ],
        "RadiusAvps": [
            {"VendorId": 0, "Attributes": [
                {"Code": 102, "Name": "Test-Secret", "Type": "OctetString", "Encrypted": true}
            ]}
        ],
        "Applications": [
            {"Name": "Credit-Control", "Code": 4, "AppType": "auth",
             "Commands": [{"Name": "Credit-Control", "Code": 272, "Request": "CCR", "Response": "CCA"}]}
        ]
    }"#;

    #[test]
    fn test_base_dictionary() {
        let dict = Dictionary::base();
        let origin_host = dict.avp(0, 264).unwrap();
        assert_eq!(origin_host.name, "Origin-Host");
        assert_eq!(origin_host.data_type, AvpDataType::DiameterIdentity);
        assert!(dict.avp_named("Result-Code").is_some());
        assert!(dict.radius_attr_named("User-Password").unwrap().encrypted);
    }

    #[test]
    fn test_from_json() {
        let dict = Dictionary::from_json(SAMPLE).unwrap();

        let sub_id = dict.avp_named("Subscription-Id").unwrap();
        assert_eq!(sub_id.data_type, AvpDataType::Grouped);
        let group = sub_id.group.as_ref().unwrap();
        assert_eq!(group.children.len(), 2);
        assert_eq!(group.children[0].min_occurs, 1);

        let sub_type = dict.avp(0, 450).unwrap();
        assert_eq!(sub_type.enum_values.as_ref().unwrap()["END_USER_IMSI"], 1);

        let app = dict.application(4).unwrap();
        assert_eq!(app.name, "Credit-Control");
        assert_eq!(dict.command(4, 272).unwrap().request_name, "CCR");

        assert_eq!(dict.vendor_name(10415), Some("3GPP"));
        assert!(dict.radius_attr(0, 102).unwrap().encrypted);
    }

    #[test]
    fn test_load_is_idempotent() {
        let first = Dictionary::from_json(SAMPLE).unwrap();
        let second = Dictionary::from_json(SAMPLE).unwrap();

        assert_eq!(first.avps_by_key.len(), second.avps_by_key.len());
        assert_eq!(first.applications.len(), second.applications.len());
        for (key, def) in &first.avps_by_key {
            let other = &second.avps_by_key[key];
            assert_eq!(def.name, other.name);
            assert_eq!(def.data_type, other.data_type);
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let json = r#"{
            "Avps": [{"VendorId": 0, "Attributes": [
                {"Code": 9001, "Name": "Duplicated", "Type": "Unsigned32"},
                {"Code": 9002, "Name": "Duplicated", "Type": "Unsigned32"}
            ]}]
        }"#;
        assert!(Dictionary::from_json(json).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{
            "Avps": [{"VendorId": 0, "Attributes": [
                {"Code": 9001, "Name": "Odd", "Type": "Complex128"}
            ]}]
        }"#;
        assert!(Dictionary::from_json(json).is_err());
    }
}
