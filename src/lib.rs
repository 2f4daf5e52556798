// Core infrastructure modules
pub mod core;

// Application configuration
pub mod config;

pub use crate::core::db::{ConnectionConfig, Gateway, ParamValue, QueryText, Row};
pub use crate::core::{GatewayError, Result};
pub use rusqlite::types::Value;
pub use rusqlite::{params, params_from_iter};
