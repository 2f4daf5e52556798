/// Core Module for dbgate
///
/// This module contains the error taxonomy and the database gateway built
/// on top of it.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{GatewayError, Result};
