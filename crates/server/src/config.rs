//! Dev server configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use marimo_dev_common::{RouteTable, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT};

/// How pages are produced for the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    /// Documentation tooling serves its own shell; pages pass through untouched
    Passthrough,
    /// Notebook runs client-side; the mount config is injected into the shell
    InBrowserRuntime,
    /// Shell is reconciled against the page rendered by the backend
    Proxied,
}

/// `NODE_ENV` equivalent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEnv {
    #[default]
    Development,
    Production,
    Test,
}

impl FromStr for NodeEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(NodeEnv::Development),
            "production" | "prod" => Ok(NodeEnv::Production),
            "test" => Ok(NodeEnv::Test),
            other => Err(format!("unknown NODE_ENV: {}", other)),
        }
    }
}

/// Dev server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevServerConfig {
    /// Address the dev server listens on
    pub listen: String,

    /// Backend notebook server
    pub backend: BackendConfig,

    /// Directory holding the bundled `index.html` shell and static assets
    pub frontend_dir: PathBuf,

    /// Serve the in-browser runtime instead of proxying a backend
    pub pyodide: bool,

    /// Documentation tooling context; pages are returned unmodified
    pub storybook: bool,

    /// Version reported in the mount config
    pub marimo_version: String,

    pub node_env: NodeEnv,

    /// Bundle analysis upload token. Never serialized or logged.
    #[serde(skip)]
    pub codecov_token: Option<String>,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            backend: BackendConfig::default(),
            frontend_dir: PathBuf::from("frontend"),
            pyodide: false,
            storybook: false,
            marimo_version: "latest".to_string(),
            node_env: NodeEnv::Development,
            codecov_token: None,
        }
    }
}

/// Backend notebook server location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,

    /// Timeout for the page fetch made on every page load
    pub fetch_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            fetch_timeout_secs: 10,
        }
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub frontend_dir: Option<PathBuf>,
    pub pyodide: Option<String>,
    pub storybook: bool,
    pub lifecycle_script: Option<String>,
    pub marimo_version: Option<String>,
    pub node_env: Option<String>,
    pub codecov_token: Option<String>,
}

impl DevServerConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Layer command line / environment values over the file config
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> anyhow::Result<()> {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if let Some(host) = overrides.server_host.filter(|h| !h.trim().is_empty()) {
            self.backend.host = host;
        }
        if let Some(port) = overrides.server_port {
            self.backend.port = port;
        }
        if let Some(dir) = overrides.frontend_dir {
            self.frontend_dir = dir;
        }
        if let Some(flag) = overrides.pyodide {
            self.pyodide = env_flag(&flag);
        }
        if overrides.storybook || is_storybook_script(overrides.lifecycle_script.as_deref()) {
            self.storybook = true;
        }
        if let Some(version) = overrides.marimo_version.filter(|v| !v.trim().is_empty()) {
            self.marimo_version = version;
        }
        if let Some(env) = overrides.node_env {
            self.node_env = env.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(token) = overrides.codecov_token.filter(|t| !t.trim().is_empty()) {
            self.codecov_token = Some(token);
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listen.parse()?)
    }

    pub fn page_mode(&self) -> PageMode {
        if self.storybook {
            PageMode::Passthrough
        } else if self.pyodide {
            PageMode::InBrowserRuntime
        } else {
            PageMode::Proxied
        }
    }

    /// Base URL of the backend, e.g. `http://127.0.0.1:2718`
    pub fn backend_url(&self) -> String {
        format!("http://{}:{}", self.backend.host, self.backend.port)
    }

    pub fn route_table(&self) -> RouteTable {
        RouteTable::default_for(&self.backend.host, self.backend.port)
    }

    pub fn shell_path(&self) -> PathBuf {
        self.frontend_dir.join("index.html")
    }
}

/// Set environment flag: any non-empty value except `0` and `false`
pub fn env_flag(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "" | "0" | "false")
}

/// The package-manager lifecycle script names the documentation tool
fn is_storybook_script(script: Option<&str>) -> bool {
    script.map(|s| s.contains("storybook")).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DevServerConfig::default();
        assert_eq!(config.backend.port, 2718);
        assert_eq!(config.backend_url(), "http://127.0.0.1:2718");
        assert_eq!(config.page_mode(), PageMode::Proxied);
        assert_eq!(config.shell_path(), PathBuf::from("frontend/index.html"));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = DevServerConfig::default();
        config
            .apply_overrides(ConfigOverrides {
                server_host: Some("localhost".to_string()),
                server_port: Some(2719),
                marimo_version: Some("0.9.0".to_string()),
                node_env: Some("production".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.backend_url(), "http://localhost:2719");
        assert_eq!(config.marimo_version, "0.9.0");
        assert_eq!(config.node_env, NodeEnv::Production);
        assert_eq!(
            config.route_table().match_path("/ws").unwrap().target,
            "ws://localhost:2719"
        );
    }

    #[test]
    fn test_page_mode_priority() {
        let mut config = DevServerConfig::default();
        config
            .apply_overrides(ConfigOverrides {
                pyodide: Some("true".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.page_mode(), PageMode::InBrowserRuntime);

        config
            .apply_overrides(ConfigOverrides {
                pyodide: Some("False".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.page_mode(), PageMode::Proxied);

        config
            .apply_overrides(ConfigOverrides {
                pyodide: Some("on".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.page_mode(), PageMode::InBrowserRuntime);

        config
            .apply_overrides(ConfigOverrides {
                lifecycle_script: Some("storybook dev -p 6006".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.page_mode(), PageMode::Passthrough);
    }

    #[test]
    fn test_invalid_node_env_is_rejected() {
        let mut config = DevServerConfig::default();
        let result = config.apply_overrides(ConfigOverrides {
            node_env: Some("staging".to_string()),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marimo-dev.toml");
        std::fs::write(
            &path,
            r#"
listen = "0.0.0.0:3100"
frontend_dir = "web/dist"

[backend]
port = 2800
"#,
        )
        .unwrap();

        let config = DevServerConfig::load(&path).unwrap();
        assert_eq!(config.listen, "0.0.0.0:3100");
        assert_eq!(config.backend.port, 2800);
        assert_eq!(config.backend.host, "127.0.0.1");
        assert_eq!(config.backend.fetch_timeout_secs, 10);
        assert!(config.codecov_token.is_none());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = DevServerConfig::load(Path::new("/nonexistent/marimo-dev.toml")).unwrap();
        assert_eq!(config.listen, "127.0.0.1:3000");
    }

    #[test]
    fn test_env_flag() {
        assert!(env_flag("true"));
        assert!(env_flag("1"));
        assert!(env_flag("on"));
        assert!(env_flag("yes"));
        assert!(!env_flag("false"));
        assert!(!env_flag("FALSE"));
        assert!(!env_flag("0"));
        assert!(!env_flag(""));
        assert!(!env_flag("  "));
    }
}
