//! LoopCast rotation daemon library
//!
//! Keeps a single well-known media file fed to an external looping player:
//! selects items from a catalog, downloads the next one in the background
//! within a storage budget, and swaps it into place near the end of the
//! current one.

pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod playback;
pub mod probe;
pub mod retry;
pub mod state;
pub mod swap;

pub use error::{Error, Result};
