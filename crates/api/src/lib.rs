// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Billtrack API Library
//!
//! HTTP surface for the invoice and payment lifecycle: admin invoice
//! management, billing functions, the Stripe webhook endpoint, and the
//! client tracking portal.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
