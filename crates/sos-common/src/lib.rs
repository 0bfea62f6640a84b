//! SOS Common - Shared types and utilities
//!
//! This crate provides the error definitions, configuration structures and
//! value types used by the content cache and the daemon hosting it.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CacheConfig, Config, LoggingConfig, ServiceConfig};
pub use error::{Error, Result};
pub use types::*;
