//! marimo widget E2E harness
//!
//! Drives the components notebook (and any YAML scenario) through Playwright:
//! - Spawns `marimo run` per notebook, or targets an already running server
//! - Runs each scenario as one generated Playwright script
//! - Derives expected widget outputs from a model of each widget kind
//! - Compares screenshots against stored baselines
//!
//! # Layout
//!
//! ```text
//! TestRunner
//!   ├── scenario_registry() -> Registry<TestSpec>   built-in + YAML
//!   ├── ServerHandle::spawn(app)                     one per notebook
//!   ├── PlaywrightHandle::run_scenario(spec, url)    one node process
//!   └── VisualTester::compare(screenshot)            baseline diff
//! ```

pub mod components;
pub mod error;
pub mod locator;
pub mod oracle;
pub mod playwright;
pub mod runner;
pub mod server;
pub mod spec;
pub mod visual;

pub use error::{E2eError, E2eResult};
pub use locator::Locator;
pub use runner::TestRunner;
pub use spec::{TestSpec, TestStep};
