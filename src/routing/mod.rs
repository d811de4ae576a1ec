mod matcher;
mod pattern;
mod router;
mod table;

pub use matcher::{HeaderRequirement, MatchingRule};
pub use pattern::{compile_patterns, Pattern, WILDCARD};
pub use router::Router;
pub use table::RoutingTable;
