pub mod core;
pub mod detection;
pub mod jobs;
pub mod proxy;
pub mod scraping;
pub mod server;

// --- Primary exports ---
pub use self::core::types;
pub use self::core::AppState;
pub use self::core::Config;
pub use self::server::build_router;
