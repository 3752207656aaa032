//! PostgreSQL connection management for CareBill Engine
//!
//! Provides the shared connection pool, environment-driven configuration,
//! and the common database error type used by every service crate. Schema
//! files live with the services that own them.

pub mod config;
pub mod connection;
pub mod error;

pub use config::*;
pub use connection::*;
pub use error::*;
