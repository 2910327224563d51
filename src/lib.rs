pub mod config;
pub mod container;
pub mod csrf;
pub mod error;
pub mod openapi;
pub mod rate_limit;
pub mod routes;
pub mod security;
pub mod session;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use config::{load_config, ProcessConfig};
pub use container::AppState;
pub use security::SecurityHeaders;
