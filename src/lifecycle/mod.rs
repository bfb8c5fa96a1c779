//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Init observability → Start watcher → Serve
//!
//! Shutdown (shutdown.rs):
//!     SIGINT/SIGTERM → broadcast trigger → stop accepting → drain → exit
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
