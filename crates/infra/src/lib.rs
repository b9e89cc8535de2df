//! Infrastructure layer: configuration, persistence, and the background
//! machinery (agent runner, render queue).

pub mod config;
pub mod error;
pub mod jobs;
pub mod postgres;
pub mod render;
pub mod runner;
pub mod users;

pub use config::{AppConfig, ConfigError};
pub use error::StoreError;
