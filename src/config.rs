//! Configuration values for routers and applications.
//!
//! Both structs deserialize with serde defaults, so an embedding program can
//! load them from whatever format it already uses and pass them in
//! explicitly.

use serde::Deserialize;
use std::time::Duration;

/// Matching behaviour of a single [`Router`](crate::router::Router).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouterOptions {
    /// Compare literal path segments case-sensitively.
    pub case_sensitive: bool,
    /// Treat a trailing slash as significant.
    pub strict: bool,
    /// Keep the parent router's params visible inside this router.
    pub merge_params: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub max_connections: usize,
    pub keep_alive_secs: u64,
    /// Largest request body accepted, in bytes. Larger bodies get a 413.
    pub max_body_size: usize,
    /// Longest request line or header line accepted, in bytes.
    pub max_header_size: usize,
    pub max_headers: usize,
    pub router: RouterOptions,
}

impl AppConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_connections: 256,
            keep_alive_secs: 5,
            max_body_size: 2 * 1024 * 1024, // 2MB
            max_header_size: 8 * 1024,
            max_headers: 100,
            router: RouterOptions::default(),
        }
    }
}
