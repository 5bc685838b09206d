//! Offline caching shell for the DevCard site.
//!
//! The shell pre-caches a versioned asset manifest, purges stale cache
//! generations when a new version activates, and answers page requests
//! cache-first with a network fallback.

pub mod cache;
pub mod config;
pub mod http;
pub mod logging;
pub mod shell;

pub use config::Config;
pub use shell::OfflineShell;
