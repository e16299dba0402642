//! Declarative YAML scenarios

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{E2eError, E2eResult};
use crate::locator::Locator;

/// A complete scenario parsed from YAML or built in code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport size for the browser
    #[serde(default = "default_viewport")]
    pub viewport: Viewport,

    /// Notebook served for this scenario; `None` uses the runner's base URL
    #[serde(default)]
    pub app: Option<String>,

    /// Query string appended to the app URL, without the leading `?`
    #[serde(default)]
    pub query: Option<String>,

    /// Safe to run concurrently with other scenarios
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Declared but not run
    #[serde(default)]
    pub skip: bool,

    /// Extra attempts after a failure; `None` uses the runner default
    #[serde(default)]
    pub retries: Option<u32>,

    /// Timeout for each assertion
    #[serde(default = "default_expect_timeout")]
    pub expect_timeout_ms: u64,

    /// Steps to execute in order
    pub steps: Vec<TestStep>,

    /// Whether this scenario includes visual regression
    #[serde(default)]
    pub visual_regression: bool,

    /// Threshold for visual diff (0.0 - 100.0 percent)
    #[serde(default = "default_threshold")]
    pub visual_threshold: f64,
}

fn default_viewport() -> Viewport {
    Viewport { width: 1280, height: 720 }
}

fn default_threshold() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_expect_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A single step in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a URL relative to the app URL
    Navigate {
        url: String,
        #[serde(default)]
        wait_for: Option<Locator>,
    },

    Reload,

    Click {
        target: Locator,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Replace an input's value
    Fill { target: Locator, value: String },

    /// Type text with keyboard simulation
    Type {
        target: Locator,
        text: String,
        #[serde(default)]
        delay_ms: Option<u64>,
    },

    Press {
        #[serde(default)]
        target: Option<Locator>,
        key: String,
    },

    /// Move focus away, committing inputs that update on blur
    Blur { target: Locator },

    /// Choose a `<select>` option by its label
    SelectOption { target: Locator, label: String },

    /// Drag an element onto another
    DragTo { target: Locator, destination: Locator },

    /// Wait for an element to reach a state
    Wait {
        target: Locator,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep { ms: u64 },

    /// Assert something about an element
    Assert {
        target: Locator,
        #[serde(default)]
        visible: Option<bool>,
        /// Full text match on `textContent`
        #[serde(default)]
        text: Option<String>,
        /// Full text match on the rendered `innerText`
        #[serde(default)]
        inner_text: Option<String>,
        #[serde(default)]
        contains: Option<String>,
        /// Input value
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        count: Option<usize>,
    },

    Screenshot {
        name: String,
        #[serde(default)]
        target: Option<Locator>,
        #[serde(default)]
        full_page: bool,
    },

    Hover { target: Locator },

    Focus { target: Locator },

    Check { target: Locator },

    Uncheck { target: Locator },

    /// Evaluate a function body in the page
    Evaluate {
        script: String,
        #[serde(default)]
        expected: Option<serde_json::Value>,
    },

    /// Log a message (for debugging)
    Log { message: String },
}

fn default_wait_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

impl TestStep {
    /// Short label used in logs and results
    pub fn name(&self) -> String {
        match self {
            TestStep::Navigate { url, .. } => format!("navigate:{}", url),
            TestStep::Reload => "reload".to_string(),
            TestStep::Click { target, .. } => format!("click:{}", target),
            TestStep::Fill { target, .. } => format!("fill:{}", target),
            TestStep::Type { target, .. } => format!("type:{}", target),
            TestStep::Press { key, .. } => format!("press:{}", key),
            TestStep::Blur { target } => format!("blur:{}", target),
            TestStep::SelectOption { target, label } => format!("select:{}={}", target, label),
            TestStep::DragTo { target, destination } => {
                format!("drag:{}->{}", target, destination)
            }
            TestStep::Wait { target, .. } => format!("wait:{}", target),
            TestStep::Sleep { ms } => format!("sleep:{}ms", ms),
            TestStep::Assert { target, .. } => format!("assert:{}", target),
            TestStep::Screenshot { name, .. } => format!("screenshot:{}", name),
            TestStep::Hover { target } => format!("hover:{}", target),
            TestStep::Focus { target } => format!("focus:{}", target),
            TestStep::Check { target } => format!("check:{}", target),
            TestStep::Uncheck { target } => format!("uncheck:{}", target),
            TestStep::Evaluate { .. } => "evaluate".to_string(),
            TestStep::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }
}

impl TestSpec {
    /// Scenario with defaults for everything but name and steps
    pub fn new(name: &str, steps: Vec<TestStep>) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            tags: Vec::new(),
            viewport: default_viewport(),
            app: None,
            query: None,
            parallel: true,
            skip: false,
            retries: None,
            expect_timeout_ms: default_expect_timeout(),
            steps,
            visual_regression: false,
            visual_threshold: default_threshold(),
        }
    }

    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();
        if !dir.exists() {
            return Ok(specs);
        }

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let spec = Self::from_file(entry.path())?;
            specs.push(spec);
        }

        Ok(specs)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// Screenshot names this scenario produces
    pub fn screenshot_names(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                TestStep::Screenshot { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("scenario name is empty".to_string()));
        }
        if self.steps.is_empty() && !self.skip {
            return Err(E2eError::SpecParse(format!("{}: no steps", self.name)));
        }
        if !(0.0..=100.0).contains(&self.visual_threshold) {
            return Err(E2eError::SpecParse(format!(
                "{}: visual_threshold must be within 0-100",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_widget_scenario() {
        let yaml = r#"
name: checkbox
description: Toggling a checkbox twice restores its value
tags:
  - basic
app: components.py
steps:
  - action: navigate
    url: /
  - action: select_option
    target:
      css: select
      within:
        css: .marimo-cell
        nth: 1
    label: checkbox
  - action: click
    target:
      text: check me
  - action: assert
    target:
      text: The element's current value is True
    visible: true
  - action: screenshot
    name: components-checkbox
"#;
        let spec = TestSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "checkbox");
        assert_eq!(spec.app.as_deref(), Some("components.py"));
        assert!(spec.parallel);
        assert!(!spec.skip);
        assert_eq!(spec.steps.len(), 5);
        assert_eq!(spec.screenshot_names(), vec!["components-checkbox".to_string()]);
        assert_eq!(spec.steps[1].name(), "select:css=.marimo-cell >> nth=1 >> css=select=checkbox");
    }

    #[test]
    fn test_parse_visual_regression_spec() {
        let yaml = r#"
name: read-only-view
visual_regression: true
visual_threshold: 1.0
retries: 2
query: mode=read
viewport:
  width: 1920
  height: 1080
steps:
  - action: navigate
    url: /
  - action: wait
    target:
      css: .marimo-cell
      first: true
  - action: screenshot
    name: read-only-full
    full_page: true
"#;
        let spec = TestSpec::from_yaml(yaml).unwrap();
        assert!(spec.visual_regression);
        assert_eq!(spec.visual_threshold, 1.0);
        assert_eq!(spec.viewport.width, 1920);
        assert_eq!(spec.retries, Some(2));
        assert_eq!(spec.query.as_deref(), Some("mode=read"));
    }

    #[test]
    fn test_empty_scenario_is_rejected() {
        let yaml = "name: nothing\nsteps: []\n";
        assert!(TestSpec::from_yaml(yaml).is_err());

        let yaml = "name: later\nskip: true\nsteps: []\n";
        assert!(TestSpec::from_yaml(yaml).unwrap().skip);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let yaml = r#"
name: bad
steps:
  - action: teleport
    target:
      css: body
"#;
        assert!(TestSpec::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_all_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "name: second\nsteps:\n  - action: reload\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.yml"),
            "name: first\nsteps:\n  - action: sleep\n    ms: 10\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let specs = TestSpec::load_all(dir.path()).unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
