//! # Minstrel Server
//!
//! The service layer: resolver orchestration (query → cached track →
//! provider chain), YAML configuration, and the axum HTTP boundary with
//! the streaming `/stream` endpoint and the JSON metadata/admin endpoints.

pub mod config;
pub mod resolver;
pub mod server;

pub use config::{Config, ConfigError};
pub use resolver::Resolver;
pub use server::{router, serve, AppState, ServerError};
