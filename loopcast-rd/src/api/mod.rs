//! HTTP control API
//!
//! Operator commands map one-to-one onto coordinator operations; read-only
//! views (history, queue, catalog, settings) go straight to the stores.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, run, AppContext};
