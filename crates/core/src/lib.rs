//! `productify-core`: shared identifiers and the domain error model.
//!
//! This crate has no IO and no async; everything above it depends on it.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{JobId, ProjectId, UserId};
