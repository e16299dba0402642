//! Dev HTML reconciler
//!
//! Produces the document served to the developer's browser: the locally
//! bundled shell, combined with state borrowed from a live backend.

use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use marimo_dev_common::{Error, MountConfig, Result};

use crate::config::{DevServerConfig, PageMode};
use crate::html::DocumentMerger;
use crate::pages;

pub const BASE_URL_MARKER: &str = "{{ base_url }}";
pub const TITLE_MARKER: &str = "{{ title }}";
pub const FILENAME_MARKER: &str = "{{ filename }}";
pub const MOUNT_CONFIG_MARKER: &str = "{{ mount_config }}";

/// Path the backend redirects to when a token is required
const LOGIN_PATH: &str = "/auth/login";

/// How a page was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passthrough,
    InBrowserRuntime,
    Merged { transplanted: usize },
    UpstreamUnreachable,
    UnsupportedAuthMode,
}

/// Document ready to be served
#[derive(Debug, Clone)]
pub struct ReconciledPage {
    pub html: String,
    pub outcome: Outcome,
}

pub struct HtmlReconciler {
    mode: PageMode,
    client: reqwest::Client,
    backend_url: String,
    backend_host: String,
    backend_port: u16,
    version: String,
    merger: DocumentMerger,
}

impl HtmlReconciler {
    pub fn new(config: &DevServerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.backend.fetch_timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {}", e)))?;

        Ok(Self {
            mode: config.page_mode(),
            client,
            backend_url: config.backend_url(),
            backend_host: config.backend.host.clone(),
            backend_port: config.backend.port,
            version: config.marimo_version.clone(),
            merger: DocumentMerger::with_default_rules()?,
        })
    }

    pub fn mode(&self) -> PageMode {
        self.mode
    }

    /// Produce the page for `original_url` (path and query of the browser request).
    ///
    /// Never fails: backend problems are rendered as diagnostic pages.
    pub async fn reconcile(&self, shell_html: &str, original_url: &str) -> ReconciledPage {
        match self.mode {
            PageMode::Passthrough => ReconciledPage {
                html: shell_html.to_string(),
                outcome: Outcome::Passthrough,
            },
            PageMode::InBrowserRuntime => ReconciledPage {
                html: self.substitute_markers(shell_html, original_url),
                outcome: Outcome::InBrowserRuntime,
            },
            PageMode::Proxied => self.reconcile_with_backend(shell_html, original_url).await,
        }
    }

    /// In-browser runtime: fill the page markers without a backend
    fn substitute_markers(&self, shell_html: &str, original_url: &str) -> String {
        let mount = MountConfig::for_in_browser_runtime(original_url, &self.version);
        let mount_json = match mount.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize mount config: {}", e);
                "{}".to_string()
            }
        };

        shell_html
            .replace(BASE_URL_MARKER, "")
            .replace(TITLE_MARKER, "marimo")
            .replace(FILENAME_MARKER, &mount.filename)
            .replace(MOUNT_CONFIG_MARKER, &mount_json)
    }

    async fn reconcile_with_backend(&self, shell_html: &str, original_url: &str) -> ReconciledPage {
        match self.fetch_server_page(original_url).await {
            Ok(server_html) => {
                let report = self.merger.merge(shell_html, &server_html);
                debug!("Reconciled {} ({} elements)", original_url, report.transplanted);
                ReconciledPage {
                    html: report.html,
                    outcome: Outcome::Merged {
                        transplanted: report.transplanted,
                    },
                }
            }
            Err(Error::UnsupportedAuthMode(detail)) => {
                warn!("Backend requires authentication: {}", detail);
                ReconciledPage {
                    html: pages::unsupported_auth_page(self.backend_port),
                    outcome: Outcome::UnsupportedAuthMode,
                }
            }
            Err(e) => {
                warn!("Backend page unavailable: {}", e);
                ReconciledPage {
                    html: pages::server_not_running_page(
                        &self.backend_host,
                        self.backend_port,
                        &e.to_string(),
                    ),
                    outcome: Outcome::UpstreamUnreachable,
                }
            }
        }
    }

    /// Fetch the backend's rendering of the same URL
    async fn fetch_server_page(&self, original_url: &str) -> Result<String> {
        let path = if original_url.starts_with('/') {
            original_url.to_string()
        } else {
            format!("/{}", original_url)
        };
        let url = format!("{}{}", self.backend_url, path);
        info!("Fetching server page {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/html")
            .send()
            .await
            .map_err(|e| Error::UpstreamUnreachable {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let final_path = response.url().path().to_string();

        if status == reqwest::StatusCode::UNAUTHORIZED || final_path.starts_with(LOGIN_PATH) {
            return Err(Error::UnsupportedAuthMode(format!(
                "{} answered {} at {}",
                url, status, final_path
            )));
        }

        if !status.is_success() {
            return Err(Error::UpstreamUnreachable {
                url,
                reason: format!("status {}", status),
            });
        }

        let body = response.text().await.map_err(|e| Error::UpstreamUnreachable {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        if is_login_page(&body) {
            return Err(Error::UnsupportedAuthMode(format!("{} rendered a login form", url)));
        }

        Ok(body)
    }
}

/// A password form without any notebook mount state
pub fn is_login_page(html: &str) -> bool {
    let doc = Html::parse_document(html);
    let select_any = |css: &str| {
        Selector::parse(css)
            .map(|selector| {
                let found = doc.select(&selector).next().is_some();
                found
            })
            .unwrap_or(false)
    };

    let has_password_input = select_any(r#"input[type="password"]"#);
    let has_notebook_state =
        select_any("marimo-mode") || html.contains("__MARIMO_MOUNT_CONFIG__");

    has_password_input && !has_notebook_state
}
