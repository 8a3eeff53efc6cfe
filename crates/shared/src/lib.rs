//! Billtrack Shared Library
//!
//! Small pieces used by more than one crate: database pool construction,
//! migrations, and opaque token generation (invoice-number suffixes and
//! project tracking codes).

pub mod db;
pub mod token;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use token::{invoice_number_suffix, tracking_code};
