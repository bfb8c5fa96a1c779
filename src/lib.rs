//! Moltbot Gateway Library
//!
//! A reverse proxy that fronts the Moltbot control panel and injects a
//! token-relay script into outgoing HTML responses, so the panel's
//! authentication token survives page loads via the URL and browser storage.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
