// Typed attribute values
pub mod avp;

// Diameter message codec
pub mod diameter;

// RADIUS authenticators and attribute hiding
pub mod obfuscation;

// RADIUS packet codec
pub mod radius;

pub use avp::AvpValue;
pub use diameter::{DiameterAvp, DiameterHeader, DiameterMessage};
pub use radius::{RadiusAvp, RadiusPacket};
