//! # Hopper Config
//!
//! Configuration management for the Hopper job queue and trigger layer.

mod error;
mod loader;
pub mod priority;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
