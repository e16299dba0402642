//! Playwright browser automation
//!
//! Each scenario becomes one Node script: a single page, steps awaited in
//! order. The script prints one marker line with a JSON report that tells
//! which step failed and how long each step took.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};
use crate::locator::{js_string, Locator};
use crate::spec::{TestSpec, TestStep};

/// Prefix of the report line printed by generated scripts
const RESULT_MARKER: &str = "__E2E_RESULT__";

/// Playwright browser handle
pub struct PlaywrightHandle {
    /// Directory for screenshots
    screenshot_dir: PathBuf,

    browser: Browser,

    headless: bool,

    /// `NODE_PATH` for resolving `playwright` from the temp script directory
    node_path: Option<PathBuf>,

    /// Upper bound on one scenario attempt
    scenario_timeout: Duration,

    result_line: Regex,
    ansi_escape: Regex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::Playwright(format!("unknown browser: {}", other))),
        }
    }
}

/// Result of executing a test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
}

/// One attempt of a scenario
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    /// Executed steps, ending at the failed one
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

impl ScenarioRun {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.steps
            .iter()
            .filter_map(|s| s.screenshot_path.clone())
            .collect()
    }
}

/// Report printed by the generated script
#[derive(Debug, Deserialize)]
struct ScriptReport {
    success: bool,
    #[serde(default)]
    failed_step: Option<usize>,
    #[serde(default)]
    timings: Vec<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl PlaywrightHandle {
    /// Create a new Playwright handle
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        std::fs::create_dir_all(&config.screenshot_dir)?;
        // Scripts run from a tempdir, so relative paths would land there
        let screenshot_dir = std::fs::canonicalize(&config.screenshot_dir)?;

        let result_line = Regex::new(&format!(r"(?m)^{} (\{{.*\}})\s*$", RESULT_MARKER))
            .map_err(|e| E2eError::Playwright(e.to_string()))?;
        let ansi_escape =
            Regex::new(r"\x1b\[[0-9;]*m").map_err(|e| E2eError::Playwright(e.to_string()))?;

        Ok(Self {
            screenshot_dir,
            browser: config.browser,
            headless: config.headless,
            node_path: config.node_path,
            scenario_timeout: config.scenario_timeout,
            result_line,
            ansi_escape,
        })
    }

    /// Check if Playwright is installed
    pub fn check_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }

    pub fn screenshot_path(&self, name: &str) -> PathBuf {
        self.screenshot_dir.join(format!("{}.png", name))
    }

    /// Run one attempt of `spec` against `app_url`. `attempt` counts from 0.
    pub async fn run_scenario(
        &self,
        spec: &TestSpec,
        app_url: &str,
        attempt: u32,
    ) -> E2eResult<ScenarioRun> {
        let script = self.build_script(spec, app_url, attempt);
        let report = self.run_script(&script).await?;
        Ok(self.collect_steps(spec, report))
    }

    /// Build the Playwright script for a scenario
    pub fn build_script(&self, spec: &TestSpec, app_url: &str, attempt: u32) -> String {
        let mut script = String::new();

        script.push_str(&format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');
const {{ expect: baseExpect }} = require('@playwright/test');

const expect = baseExpect.configure({{ timeout: {timeout} }});

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
  page.setDefaultTimeout({timeout});
  const timings = [];
  let currentStep = 0;
  let stepStart = Date.now();
  const begin = (index) => {{ currentStep = index; stepStart = Date.now(); }};
  const done = () => {{ timings.push(Date.now() - stepStart); }};

  try {{
"#,
            browser = self.browser.as_str(),
            headless = self.headless,
            width = spec.viewport.width,
            height = spec.viewport.height,
            timeout = spec.expect_timeout_ms,
        ));

        for (i, step) in spec.steps.iter().enumerate() {
            let label = step.name().replace(['\n', '\r'], " ");
            script.push_str(&format!("\n    // Step {}: {}\n", i + 1, label));
            script.push_str(&format!("    begin({});\n", i));
            script.push_str(&self.step_to_js(step, i, app_url, attempt));
            script.push_str("\n    done();\n");
        }

        script.push_str(&format!(
            r#"
    console.log('{marker} ' + JSON.stringify({{ success: true, timings }}));
  }} catch (error) {{
    console.log('{marker} ' + JSON.stringify({{ success: false, failed_step: currentStep, timings, error: error.message }}));
    process.exitCode = 1;
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            marker = RESULT_MARKER
        ));

        script
    }

    /// Convert a step to JavaScript code
    fn step_to_js(&self, step: &TestStep, step_index: usize, app_url: &str, attempt: u32) -> String {
        let loc = |l: &Locator| l.to_js("page");

        match step {
            TestStep::Navigate { url, wait_for } => {
                let mut js = format!(
                    "    await page.goto({});",
                    js_string(&resolve_url(app_url, url))
                );
                if attempt > 0 {
                    js.push_str("\n    await page.reload();");
                }
                if let Some(target) = wait_for {
                    js.push_str(&format!("\n    await {}.waitFor();", loc(target)));
                }
                js
            }
            TestStep::Reload => "    await page.reload();".to_string(),
            TestStep::Click { target, timeout_ms } => match timeout_ms {
                Some(timeout) => {
                    format!("    await {}.click({{ timeout: {} }});", loc(target), timeout)
                }
                None => format!("    await {}.click();", loc(target)),
            },
            TestStep::Fill { target, value } => {
                format!("    await {}.fill({});", loc(target), js_string(value))
            }
            TestStep::Type {
                target,
                text,
                delay_ms,
            } => format!(
                "    await {}.pressSequentially({}, {{ delay: {} }});",
                loc(target),
                js_string(text),
                delay_ms.unwrap_or(50)
            ),
            TestStep::Press { target, key } => match target {
                Some(target) => format!("    await {}.press({});", loc(target), js_string(key)),
                None => format!("    await page.keyboard.press({});", js_string(key)),
            },
            TestStep::Blur { target } => format!("    await {}.blur();", loc(target)),
            TestStep::SelectOption { target, label } => format!(
                "    await {}.selectOption({{ label: {} }});",
                loc(target),
                js_string(label)
            ),
            TestStep::DragTo {
                target,
                destination,
            } => format!("    await {}.dragTo({});", loc(target), loc(destination)),
            TestStep::Wait {
                target,
                timeout_ms,
                state,
            } => format!(
                "    await {}.waitFor({{ state: '{}', timeout: {} }});",
                loc(target),
                state.as_str(),
                timeout_ms
            ),
            TestStep::Sleep { ms } => format!("    await page.waitForTimeout({});", ms),
            TestStep::Assert {
                target,
                visible,
                text,
                inner_text,
                contains,
                value,
                count,
            } => {
                let target = loc(target);
                let mut assertions = Vec::new();

                match visible {
                    Some(true) => {
                        assertions.push(format!("    await expect({}).toBeVisible();", target))
                    }
                    Some(false) => {
                        assertions.push(format!("    await expect({}).not.toBeVisible();", target))
                    }
                    None => {}
                }
                if let Some(text) = text {
                    assertions.push(format!(
                        "    await expect({}).toHaveText({});",
                        target,
                        js_string(text)
                    ));
                }
                if let Some(text) = inner_text {
                    assertions.push(format!(
                        "    await expect({}).toHaveText({}, {{ useInnerText: true }});",
                        target,
                        js_string(text)
                    ));
                }
                if let Some(text) = contains {
                    assertions.push(format!(
                        "    await expect({}).toContainText({});",
                        target,
                        js_string(text)
                    ));
                }
                if let Some(value) = value {
                    assertions.push(format!(
                        "    await expect({}).toHaveValue({});",
                        target,
                        js_string(value)
                    ));
                }
                if let Some(count) = count {
                    assertions.push(format!("    await expect({}).toHaveCount({});", target, count));
                }
                if assertions.is_empty() {
                    assertions.push(format!("    await expect({}).toBeAttached();", target));
                }

                assertions.join("\n")
            }
            TestStep::Screenshot {
                name,
                target,
                full_page,
            } => {
                let path = self.screenshot_path(name);
                let path = js_string(&path.to_string_lossy());
                match target {
                    Some(target) => {
                        format!("    await {}.screenshot({{ path: {} }});", loc(target), path)
                    }
                    None => format!(
                        "    await page.screenshot({{ path: {}, fullPage: {} }});",
                        path, full_page
                    ),
                }
            }
            TestStep::Hover { target } => format!("    await {}.hover();", loc(target)),
            TestStep::Focus { target } => format!("    await {}.focus();", loc(target)),
            TestStep::Check { target } => format!("    await {}.check();", loc(target)),
            TestStep::Uncheck { target } => format!("    await {}.uncheck();", loc(target)),
            TestStep::Evaluate { script, expected } => {
                let mut js = format!(
                    "    const result_{} = await page.evaluate(() => {{ {} }});",
                    step_index, script
                );
                if let Some(expected) = expected {
                    js.push_str(&format!(
                        r#"
    if (JSON.stringify(result_{i}) !== JSON.stringify({expected})) {{
      throw new Error('evaluate returned ' + JSON.stringify(result_{i}) + ', expected ' + JSON.stringify({expected}));
    }}"#,
                        i = step_index,
                        expected = expected
                    ));
                }
                js
            }
            TestStep::Log { message } => {
                format!("    console.log({});", js_string(&format!("[TEST] {}", message)))
            }
        }
    }

    /// Execute a script with node and parse its report line
    async fn run_script(&self, script: &str) -> E2eResult<ScriptReport> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("scenario.js");
        std::fs::write(&script_path, script)?;

        debug!("Running Playwright script: {}", script_path.display());

        let mut cmd = TokioCommand::new("node");
        cmd.arg(&script_path)
            .current_dir(temp_dir.path())
            .kill_on_drop(true);
        if let Some(node_path) = &self.node_path {
            cmd.env("NODE_PATH", node_path);
        }

        let output = tokio::time::timeout(self.scenario_timeout, cmd.output())
            .await
            .map_err(|_| {
                E2eError::Playwright(format!(
                    "scenario timed out after {}s",
                    self.scenario_timeout.as_secs()
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| l.starts_with("[TEST]")) {
            info!("{}", line);
        }

        match self.parse_report(&stdout)? {
            Some(report) => Ok(report),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(E2eError::Playwright(format!(
                    "Script exited with {} without a report:\nstdout: {}\nstderr: {}",
                    output.status, stdout, stderr
                )))
            }
        }
    }

    fn parse_report(&self, stdout: &str) -> E2eResult<Option<ScriptReport>> {
        match self.result_line.captures_iter(stdout).last() {
            Some(captures) => {
                let mut report: ScriptReport = serde_json::from_str(&captures[1])?;
                report.error = report
                    .error
                    .map(|e| self.ansi_escape.replace_all(&e, "").into_owned());
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    fn collect_steps(&self, spec: &TestSpec, report: ScriptReport) -> ScenarioRun {
        let executed = if report.success {
            spec.steps.len()
        } else {
            report
                .failed_step
                .map(|i| i + 1)
                .unwrap_or(report.timings.len())
                .min(spec.steps.len())
        };

        let mut steps = Vec::with_capacity(executed);
        let mut error = None;

        for (i, step) in spec.steps.iter().take(executed).enumerate() {
            let failed = !report.success && i + 1 == executed;
            let step_error = if failed {
                Some(report.error.clone().unwrap_or_else(|| "unknown error".to_string()))
            } else {
                None
            };
            let screenshot_path = match step {
                TestStep::Screenshot { name, .. } if !failed => Some(self.screenshot_path(name)),
                _ => None,
            };
            if failed {
                error = Some(
                    E2eError::StepFailed {
                        step: step.name(),
                        reason: step_error.clone().unwrap_or_default(),
                    }
                    .to_string(),
                );
            }

            steps.push(StepResult {
                success: !failed,
                step_name: step.name(),
                duration_ms: report.timings.get(i).copied().unwrap_or(0),
                error: step_error,
                screenshot_path,
            });
        }

        if !report.success && error.is_none() {
            error = Some(report.error.unwrap_or_else(|| "unknown error".to_string()));
        }

        ScenarioRun { steps, error }
    }
}

/// Resolve a step URL against the app URL. `/` (or empty) is the app itself.
pub fn resolve_url(app_url: &str, url: &str) -> String {
    if url.is_empty() || url == "/" {
        return app_url.to_string();
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }

    let origin_end = app_url
        .find("://")
        .and_then(|scheme_end| {
            app_url[scheme_end + 3..]
                .find(['/', '?'])
                .map(|i| scheme_end + 3 + i)
        })
        .unwrap_or(app_url.len());
    let origin = &app_url[..origin_end];

    if url.starts_with('/') {
        format!("{}{}", origin, url)
    } else {
        format!("{}/{}", origin, url)
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub screenshot_dir: PathBuf,
    pub browser: Browser,
    pub headless: bool,
    pub node_path: Option<PathBuf>,
    pub scenario_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            browser: Browser::Chromium,
            headless: true,
            node_path: None,
            scenario_timeout: Duration::from_secs(120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(dir: &std::path::Path) -> PlaywrightHandle {
        PlaywrightHandle::new(PlaywrightConfig {
            screenshot_dir: dir.to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    fn scenario() -> TestSpec {
        TestSpec::new(
            "number",
            vec![
                TestStep::Navigate {
                    url: "/".to_string(),
                    wait_for: None,
                },
                TestStep::Fill {
                    target: Locator::css("input").within(Locator::test_id("marimo-plugin-number-input")),
                    value: "5".to_string(),
                },
                TestStep::Blur {
                    target: Locator::css("input")
                        .within(Locator::test_id("marimo-plugin-number-input"))
                        .first(),
                },
                TestStep::Assert {
                    target: Locator::text("The element's current value is 5"),
                    visible: Some(true),
                    text: None,
                    inner_text: None,
                    contains: None,
                    value: None,
                    count: None,
                },
                TestStep::Screenshot {
                    name: "components-number".to_string(),
                    target: None,
                    full_page: false,
                },
            ],
        )
    }

    #[test]
    fn test_script_awaits_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let pw = handle(dir.path());
        let script = pw.build_script(&scenario(), "http://127.0.0.1:2718/?file=components.py", 0);

        let goto = script.find("page.goto(\"http://127.0.0.1:2718/?file=components.py\")").unwrap();
        let fill = script
            .find(r#"page.getByTestId("marimo-plugin-number-input").locator("input").fill("5")"#)
            .unwrap();
        let blur = script.find(".first().blur()").unwrap();
        let assert = script
            .find(r#"expect(page.getByText("The element's current value is 5")).toBeVisible()"#)
            .unwrap();
        assert!(goto < fill && fill < blur && blur < assert);
        assert!(!script.contains("page.reload()"));
        assert!(script.contains("components-number.png"));
    }

    #[test]
    fn test_relative_screenshot_dir_is_made_absolute() {
        let pw = handle(std::path::Path::new("target/test-screenshots"));
        let path = pw.screenshot_path("components-number");
        assert!(path.is_absolute());
        assert!(path.ends_with("target/test-screenshots/components-number.png"));

        let script = pw.build_script(&scenario(), "http://127.0.0.1:2718", 0);
        assert!(script.contains(&*js_string(&path.to_string_lossy())));
    }

    #[test]
    fn test_bare_assert_requires_element() {
        let dir = tempfile::tempdir().unwrap();
        let pw = handle(dir.path());
        let spec = TestSpec::from_yaml(
            r#"
name: bare assert
steps:
  - action: assert
    target:
      test_id: marimo-plugin-slider
"#,
        )
        .unwrap();

        let script = pw.build_script(&spec, "http://127.0.0.1:2718", 0);
        assert!(script
            .contains(r#"await expect(page.getByTestId("marimo-plugin-slider")).toBeAttached();"#));
    }

    #[test]
    fn test_retry_reloads_after_navigation() {
        let dir = tempfile::tempdir().unwrap();
        let pw = handle(dir.path());
        let script = pw.build_script(&scenario(), "http://127.0.0.1:2718", 1);
        let goto = script.find("page.goto(").unwrap();
        let reload = script.find("page.reload()").unwrap();
        assert!(goto < reload);
    }

    #[test]
    fn test_parse_failure_report() {
        let dir = tempfile::tempdir().unwrap();
        let pw = handle(dir.path());
        let stdout = "[TEST] starting\n__E2E_RESULT__ {\"success\":false,\"failed_step\":3,\"timings\":[120,40,15],\"error\":\"\\u001b[31mTimed out 5000ms\\u001b[39m\"}\n";

        let report = pw.parse_report(stdout).unwrap().unwrap();
        let run = pw.collect_steps(&scenario(), report);

        assert!(!run.success());
        assert_eq!(run.steps.len(), 4);
        assert!(run.steps[..3].iter().all(|s| s.success));
        assert_eq!(run.steps[3].error.as_deref(), Some("Timed out 5000ms"));
        assert!(run.screenshots().is_empty());
    }

    #[test]
    fn test_parse_success_report() {
        let dir = tempfile::tempdir().unwrap();
        let pw = handle(dir.path());
        let stdout = "__E2E_RESULT__ {\"success\":true,\"timings\":[1,2,3,4,5]}\n";

        let report = pw.parse_report(stdout).unwrap().unwrap();
        let run = pw.collect_steps(&scenario(), report);

        assert!(run.success());
        assert_eq!(run.steps.len(), 5);
        assert_eq!(run.screenshots(), vec![dir.path().join("components-number.png")]);
        assert!(pw.parse_report("no marker here").unwrap().is_none());
    }

    #[test]
    fn test_resolve_url() {
        let app = "http://127.0.0.1:2718/?file=components.py";
        assert_eq!(resolve_url(app, "/"), app);
        assert_eq!(resolve_url(app, "/api/status"), "http://127.0.0.1:2718/api/status");
        assert_eq!(resolve_url("http://localhost:3000", "about"), "http://localhost:3000/about");
        assert_eq!(resolve_url(app, "https://example.com/x"), "https://example.com/x");
    }
}
