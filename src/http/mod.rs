//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! client request
//!     → server.rs (Axum setup, trace / request ID / limit / timeout layers)
//!     → proxy handler (re-target URI at the upstream, forward)
//!     → rewrite.rs (inject token relay into HTML replies)
//!     → Send to client
//! ```

pub mod request;
pub mod rewrite;
pub mod server;

pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use server::HttpServer;
