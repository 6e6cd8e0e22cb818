// Repository implementations (data access layer)
// Adapters that implement domain repository interfaces

pub mod memory_state_repository;
pub mod postgres_state_repository;
pub mod store_session_repository;

pub use memory_state_repository::MemoryStateRepository;
pub use postgres_state_repository::PostgresStateRepository;
pub use store_session_repository::StoreSessionRepository;
