//! Push Receiver
//!
//! HTTP endpoint that accepts pushes from `push-agent` into a staging
//! directory and publishes the staged state as a snapshot.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::AppConfig;
pub use routes::create_router;
pub use state::AppState;
