/// Database Module
///
/// This module provides the gateway and the pieces it is built from,
/// organized into focused submodules.
///
/// ## Architecture
///
/// - **Connection Configuration** (`connection.rs`): opaque connection parameters and the open routine
/// - **Query Input** (`query.rs`): query arguments, result rows and driver error classification
/// - **Gateway** (`gateway.rs`): connection-per-call statement execution
///
/// ## Error Handling
///
/// Every gateway operation reports failures as a `GatewayError`; no driver
/// error type crosses this module's public surface.
pub mod connection;
pub mod gateway;
pub mod query;

pub use connection::{ConnectionConfig, ParamValue};
pub use gateway::Gateway;
pub use query::{QueryText, Row};
