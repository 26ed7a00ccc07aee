//! # Service Container
//!
//! Configuration plus every subsystem instance, wired once at startup and
//! shared by the handlers and background routines.

pub mod config;
pub mod services;

pub use config::{ConfigError, NodeConfig};
pub use services::ServiceContainer;
