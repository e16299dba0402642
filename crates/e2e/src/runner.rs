//! Main test runner that orchestrates servers, Playwright, and visual regression

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use marimo_dev_common::Registry;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::components::register_builtin;
use crate::error::{E2eError, E2eResult};
use crate::playwright::{PlaywrightConfig, PlaywrightHandle, ScenarioRun, StepResult};
use crate::server::{self, ServerConfig, ServerHandle};
use crate::spec::TestSpec;
use crate::visual::{VisualConfig, VisualTester};

/// Registry group for scenarios; `MARIMO_E2E_SCENARIOS_ALLOWLIST`/`_DENYLIST` filter it
pub const SCENARIO_GROUP: &str = "marimo.e2e.scenarios";

/// Built-in scenarios plus YAML scenarios found under `specs_dir`
pub fn scenario_registry(specs_dir: &Path) -> E2eResult<Registry<TestSpec>> {
    let mut registry = Registry::new(SCENARIO_GROUP);
    register_builtin(&mut registry)?;

    let discovered = TestSpec::load_all(specs_dir)?
        .into_iter()
        .map(|spec| (spec.name.clone(), spec));
    registry.extend_discovered(discovered);

    Ok(registry)
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub skipped: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub visual_diffs: Vec<VisualDiffResult>,
    pub error: Option<String>,
}

impl TestResult {
    fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            skipped: true,
            attempts: 0,
            duration_ms: 0,
            steps: vec![],
            visual_diffs: vec![],
            error: None,
        }
    }

    fn failed(name: &str, err: E2eError) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            skipped: false,
            attempts: 0,
            duration_ms: 0,
            steps: vec![],
            visual_diffs: vec![],
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualDiffResult {
    pub name: String,
    pub matches: bool,
    pub diff_percent: f64,
    pub diff_image_path: Option<String>,
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Main E2E test runner
pub struct TestRunner {
    server_config: ServerConfig,

    /// Externally managed server; no processes are spawned when set
    base_url: Option<String>,

    playwright: PlaywrightHandle,
    visual: VisualTester,
    output_dir: PathBuf,

    /// Extra attempts for scenarios that do not set their own
    retries: u32,

    /// Bounds concurrently running parallel scenarios
    slots: Semaphore,

    /// One server per notebook, started on first use
    servers: Mutex<HashMap<String, ServerHandle>>,

    registry: Registry<TestSpec>,
}

impl TestRunner {
    /// Create a test runner with default configuration
    pub fn new() -> E2eResult<Self> {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a test runner with custom configuration
    pub fn with_config(config: RunnerConfig) -> E2eResult<Self> {
        let registry = scenario_registry(&config.specs_dir)?;
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: RunnerConfig, registry: Registry<TestSpec>) -> E2eResult<Self> {
        let playwright = PlaywrightHandle::new(config.playwright)?;
        let visual = VisualTester::new(config.visual)?;

        Ok(Self {
            server_config: config.server,
            base_url: config.base_url,
            playwright,
            visual,
            output_dir: config.output_dir,
            retries: config.retries,
            slots: Semaphore::new(config.workers.max(1)),
            servers: Mutex::new(HashMap::new()),
            registry,
        })
    }

    pub fn registry(&self) -> &Registry<TestSpec> {
        &self.registry
    }

    /// Stop every spawned server
    pub async fn stop_servers(&self) {
        let servers: Vec<(String, ServerHandle)> = self.servers.lock().await.drain().collect();
        for (app, mut handle) in servers {
            if let Err(e) = handle.shutdown().await {
                warn!("Failed to stop marimo server for {}: {}", app, e);
            }
        }
    }

    /// Base URL serving the scenario's notebook
    async fn server_for(&self, spec: &TestSpec) -> E2eResult<String> {
        if let Some(base_url) = &self.base_url {
            return Ok(base_url.clone());
        }
        let app = spec.app.as_deref().ok_or_else(|| {
            E2eError::SpecParse(format!("{}: no app and no --base-url given", spec.name))
        })?;

        let mut servers = self.servers.lock().await;
        if let Some(handle) = servers.get(app) {
            return Ok(handle.base_url().to_string());
        }

        let handle = ServerHandle::spawn(&self.server_config, app).await?;
        let base_url = handle.base_url().to_string();
        servers.insert(app.to_string(), handle);
        Ok(base_url)
    }

    /// Run every registered scenario
    pub async fn run_all(&self) -> E2eResult<TestSuiteResult> {
        let specs: Vec<TestSpec> = self.registry.get_all().into_iter().cloned().collect();
        self.run_specs(&specs).await
    }

    /// Run scenarios carrying a tag
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<TestSuiteResult> {
        let specs: Vec<TestSpec> = self
            .registry
            .get_all()
            .into_iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .cloned()
            .collect();
        self.run_specs(&specs).await
    }

    /// Run scenarios by name
    pub async fn run_named(&self, names: &[String]) -> E2eResult<TestSuiteResult> {
        let specs = names
            .iter()
            .map(|name| self.registry.get(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        self.run_specs(&specs).await
    }

    /// Run a list of scenarios. Parallel ones share the worker slots, the
    /// rest run one at a time afterwards.
    pub async fn run_specs(&self, specs: &[TestSpec]) -> E2eResult<TestSuiteResult> {
        let started_at = Utc::now();
        let start = Instant::now();

        if specs.iter().any(|s| !s.skip) {
            PlaywrightHandle::check_installed()?;
        }
        self.visual.clean_diffs()?;

        info!("Running {} scenario(s)...", specs.len());

        let (parallel, sequential): (Vec<_>, Vec<_>) =
            specs.iter().enumerate().partition(|(_, s)| s.parallel);

        let mut results: Vec<(usize, TestResult)> =
            join_all(parallel.into_iter().map(|(i, spec)| async move {
                let _slot = self.slots.acquire().await.ok();
                (i, self.run_spec(spec).await)
            }))
            .await;

        for (i, spec) in sequential {
            results.push((i, self.run_spec(spec).await));
        }
        results.sort_by_key(|(i, _)| *i);
        let results: Vec<TestResult> = results.into_iter().map(|(_, r)| r).collect();

        let skipped = results.iter().filter(|r| r.skipped).count();
        let failed = results.iter().filter(|r| !r.success).count();
        let passed = results.len() - skipped - failed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        Ok(TestSuiteResult {
            started_at,
            total: specs.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            results,
        })
    }

    /// Run a single scenario, retrying failed attempts
    pub async fn run_spec(&self, spec: &TestSpec) -> TestResult {
        if spec.skip {
            info!("- {} (skipped)", spec.name);
            return TestResult::skipped(&spec.name);
        }

        let start = Instant::now();
        debug!("Running scenario: {}", spec.name);

        let base_url = match self.server_for(spec).await {
            Ok(base_url) => base_url,
            Err(e) => {
                error!("✗ {} - {}", spec.name, e);
                return TestResult::failed(&spec.name, e);
            }
        };
        let app_url = server::app_url(&base_url, spec.query.as_deref());

        let retries = spec.retries.unwrap_or(self.retries);
        let mut outcome = self.playwright.run_scenario(spec, &app_url, 0).await;
        let mut attempts = 1;
        while !passed(&outcome) && attempts <= retries {
            warn!("Retrying {} (attempt {} of {})", spec.name, attempts + 1, retries + 1);
            outcome = self.playwright.run_scenario(spec, &app_url, attempts).await;
            attempts += 1;
        }

        let (steps, mut test_error, screenshots) = match outcome {
            Ok(run) => {
                let screenshots = run.screenshots();
                (run.steps, run.error, screenshots)
            }
            Err(e) => (vec![], Some(e.to_string()), vec![]),
        };

        let mut visual_diffs = Vec::new();
        if spec.visual_regression && test_error.is_none() {
            for path in &screenshots {
                match self.visual.compare(path, Some(spec.visual_threshold)) {
                    Ok(diff) => {
                        if !diff.matches {
                            test_error = Some(format!(
                                "Visual regression in '{}': {:.2}% pixels differ",
                                diff.name, diff.diff_percent
                            ));
                        }
                        visual_diffs.push(VisualDiffResult {
                            name: diff.name,
                            matches: diff.matches,
                            diff_percent: diff.diff_percent,
                            diff_image_path: diff
                                .diff_image_path
                                .map(|p| p.to_string_lossy().to_string()),
                        });
                    }
                    Err(E2eError::BaselineNotFound(_)) => {
                        info!(
                            "No baseline for '{}' - create one with --update-baselines",
                            path.display()
                        );
                    }
                    Err(e) => {
                        test_error = Some(format!("Visual comparison error: {}", e));
                    }
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = test_error.is_none();
        match &test_error {
            None => info!("✓ {} ({} ms)", spec.name, duration_ms),
            Some(e) => error!("✗ {} - {}", spec.name, e),
        }

        TestResult {
            name: spec.name.clone(),
            success,
            skipped: false,
            attempts,
            duration_ms,
            steps,
            visual_diffs,
            error: test_error,
        }
    }

    /// Replace baselines with the screenshots of the last run
    pub fn update_baselines(&self) -> E2eResult<usize> {
        let mut updated = 0;
        for entry in std::fs::read_dir(self.playwright.screenshot_dir())? {
            let path = entry?.path();
            if path.extension().map(|e| e == "png").unwrap_or(false) {
                self.visual.update_baseline(&path)?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Write results to `test-results.json` in the output directory
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;

        let path = self.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

fn passed(outcome: &E2eResult<ScenarioRun>) -> bool {
    matches!(outcome, Ok(run) if run.success())
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub server: ServerConfig,
    pub playwright: PlaywrightConfig,
    pub visual: VisualConfig,
    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,
    pub base_url: Option<String>,
    pub workers: usize,
    pub retries: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            playwright: PlaywrightConfig::default(),
            visual: VisualConfig::default(),
            specs_dir: PathBuf::from("tests/e2e/specs"),
            output_dir: PathBuf::from("test-results"),
            base_url: None,
            workers: 4,
            retries: 0,
        }
    }
}
