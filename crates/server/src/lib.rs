//! marimo frontend dev server
//!
//! Serves the locally bundled frontend against a running marimo backend:
//! page navigations are reconciled with the backend's own rendering, API and
//! WebSocket traffic is proxied with the origin rewritten.

pub mod config;
pub mod html;
pub mod pages;
pub mod proxy;
pub mod reconcile;
pub mod server;
pub mod ws_proxy;

pub use config::{ConfigOverrides, DevServerConfig, NodeEnv, PageMode};
pub use html::{DocumentMerger, MergeReport, MergeRule};
pub use reconcile::{HtmlReconciler, Outcome, ReconciledPage};
pub use server::DevServer;
