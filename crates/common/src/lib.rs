//! marimo dev common library
//!
//! Shared data model for the development server and the E2E harness:
//! the mount configuration injected into pages, the proxy route table,
//! and a named registry with environment-driven allow/deny lists.

pub mod error;
pub mod mount;
pub mod registry;
pub mod routes;

pub use error::{Error, Result};
pub use mount::{Mode, MountConfig};
pub use registry::{NameFilter, Registry};
pub use routes::{ProxyRoute, RouteTable};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default port of the backend notebook server
pub const DEFAULT_SERVER_PORT: u16 = 2718;

/// Default host of the backend notebook server
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
