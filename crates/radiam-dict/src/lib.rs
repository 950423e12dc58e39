// AVP data type tags
pub mod data_type;

// Dictionary model and JSON loader
pub mod dictionary;

// Built-in base-protocol definitions
pub mod standard;

pub use data_type::AvpDataType;
pub use dictionary::{
    AppType, ApplicationDef, AvpDef, CommandDef, Dictionary, GroupedChild, GroupedDef, RadiusAvpDef,
};
