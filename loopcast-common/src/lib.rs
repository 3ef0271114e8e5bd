//! # LoopCast Common Library
//!
//! Shared code for the LoopCast rotation daemon and its companion tools:
//! - Database initialization and schema
//! - Event types (RotationEvent enum)
//! - Configuration loading and root folder resolution
//! - Time and byte-size helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod human_size;
pub mod time;

pub use error::{Error, Result};
pub use events::RotationEvent;
