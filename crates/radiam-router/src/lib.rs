// Target health and quarantine
pub mod health;

// The routing core
pub mod router;

// Routing rules and server groups
pub mod rules;

pub use health::{HealthTable, TargetHealth};
pub use router::{
    DiameterIngress, RadiusIngress, RadiusRouteParams, Router, RouterSettings,
};
pub use rules::{
    DiameterRoutingRule, RadiusRoutingRule, RadiusServerEntry, RadiusServerGroup, RouteAction,
    RoutePolicy,
};
