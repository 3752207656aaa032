//! # Billing Service
//!
//! Visit billing for CareBill Engine. Aggregates heterogeneous charge
//! sources (room and board, materials, medications, procedures, lab
//! orders, flat service fees) into itemized billing records, and handles
//! discounts, insurance coverage and partial payments for them.
//!
//! Charges are always re-derived from the clinical source tables rather
//! than accumulated incrementally, so the bill tracks the records as they
//! stand at calculation time.
//!
//! - `charges`: per-source charge queries and line item builders
//! - `discharge`: visit-type-aware aggregation and discharge summaries
//! - `service`: billing record creation, update and recalculation
//! - `payment`: payment recording and settlement status transitions
//! - `query`: read-only assembly for display and receipt printing
//! - `handlers`: axum handlers exposing the above over HTTP

pub mod charges;
pub mod discharge;
pub mod error;
pub mod handlers;
pub mod models;
pub mod payment;
pub mod query;
pub mod service;

pub use charges::*;
pub use discharge::*;
pub use error::*;
pub use handlers::*;
pub use models::*;
pub use payment::*;
pub use query::*;
pub use service::*;
