//! Tripmesh API Library
//!
//! Task dispatch for a multi-agent trip planner: reliable queues and
//! pub/sub over a shared store, the worker claim loop with retry and
//! dead-lettering, fan-out/fan-in coordination, and the plan and session
//! stores the agents write to.

pub mod agents;
pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
