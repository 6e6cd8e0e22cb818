// Infrastructure layer module
// Contains the shared store, the message broker built on it, the
// repository adapters and the model capability adapter. Follows
// Hexagonal Architecture

pub mod broker;
pub mod capability;
pub mod repositories;
pub mod store;
