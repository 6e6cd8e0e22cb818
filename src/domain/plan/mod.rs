// Plan domain module
// Contains the plan document aggregate and its value objects

#![allow(clippy::module_inception)]

pub mod plan;
pub mod value_objects;

// Re-export main types for convenience
pub use plan::{PlanMessage, PlanState};
pub use value_objects::{FieldPath, PathSegment, PlanError, PlanKey};
