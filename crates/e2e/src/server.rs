//! Backend management - spawning and health checking `marimo run`

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

/// Time between SIGTERM and kill
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Handle to a running notebook server process
pub struct ServerHandle {
    child: Child,
    pub app: String,
    pub base_url: String,
    pub port: u16,
}

impl ServerHandle {
    /// Serve `app` (a notebook file under `apps_dir`) in run mode
    pub async fn spawn(config: &ServerConfig, app: &str) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base_url = format!("http://{}:{}", config.host, port);

        info!("Spawning marimo server for {} on port {}", app, port);

        let mut cmd = Command::new(&config.marimo_bin);
        cmd.arg("run")
            .arg(app)
            .args(["--headless", "--no-token"])
            .args(["--host", &config.host])
            .args(["--port", &port.to_string()])
            .args(&config.extra_args)
            .current_dir(&config.apps_dir);

        cmd.stdout(Stdio::null()).stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!(
                "Failed to spawn {}: {}",
                config.marimo_bin.display(),
                e
            ))
        })?;

        let mut handle = ServerHandle {
            child,
            app: app.to_string(),
            base_url: base_url.clone(),
            port,
        };

        if let Err(e) = handle.wait_for_healthy(config.startup_timeout).await {
            let _ = handle.shutdown().await;
            return Err(e);
        }

        info!("marimo server is healthy at {}", base_url);
        Ok(handle)
    }

    /// Wait for the server to respond to health checks
    async fn wait_for_healthy(&mut self, timeout_duration: Duration) -> E2eResult<()> {
        let health_url = format!("{}/health", self.base_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(E2eError::ServerStartup(format!(
                    "marimo exited with {} before becoming healthy",
                    status
                )));
            }

            match client.get(&health_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Health check returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for marimo server to start...");
                    }
                    // Connection refused is expected while the server is starting
                    if !e.is_connect() {
                        warn!("Health check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(E2eError::ServerHealthCheck(attempts))
    }

    /// Get the base URL for this server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Send SIGTERM; false when no signal was delivered
    fn terminate(&self) -> bool {
        info!("Stopping marimo server for {} (pid: {})", self.app, self.child.id());
        send_sigterm(self.child.id())
    }

    fn force_kill(&mut self) -> E2eResult<()> {
        if !self.exited() {
            self.child.kill()?;
        }
        self.child.wait()?;
        Ok(())
    }

    /// Stop the server without blocking the async runtime
    pub async fn shutdown(&mut self) -> E2eResult<()> {
        if self.exited() {
            return Ok(());
        }
        if self.terminate() {
            let deadline = Instant::now() + STOP_GRACE;
            while Instant::now() < deadline {
                if self.exited() {
                    return Ok(());
                }
                sleep(Duration::from_millis(50)).await;
            }
        }
        self.force_kill()
    }

    /// Stop the server, blocking the current thread for at most the grace period
    pub fn stop(&mut self) -> E2eResult<()> {
        if self.exited() {
            return Ok(());
        }
        if self.terminate() {
            let deadline = Instant::now() + STOP_GRACE;
            while Instant::now() < deadline {
                if self.exited() {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
        self.force_kill()
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> bool {
    false
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Configuration for spawning notebook servers
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `marimo` executable
    pub marimo_bin: PathBuf,

    /// Directory containing the notebook files
    pub apps_dir: PathBuf,

    pub host: String,

    /// Port to listen on (None = find free port)
    pub port: Option<u16>,

    /// Timeout for server startup
    pub startup_timeout: Duration,

    /// Appended to the `marimo run` command line
    pub extra_args: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            marimo_bin: PathBuf::from("marimo"),
            apps_dir: PathBuf::from("frontend/e2e-tests/py"),
            host: marimo_dev_common::DEFAULT_SERVER_HOST.to_string(),
            port: None,
            startup_timeout: Duration::from_secs(30),
            extra_args: Vec::new(),
        }
    }
}

/// App URL for a server base URL and an optional query string
pub fn app_url(base_url: &str, query: Option<&str>) -> String {
    let base = base_url.trim_end_matches('/');
    match query.map(|q| q.trim_start_matches('?')).filter(|q| !q.is_empty()) {
        Some(query) => format!("{}/?{}", base, query),
        None => format!("{}/", base),
    }
}

/// Find a free port to use
fn find_free_port() -> E2eResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_free_port() {
        let port1 = find_free_port().unwrap();
        let port2 = find_free_port().unwrap();

        assert!(port1 > 1024);
        assert!(port2 > 1024);
    }

    #[test]
    fn test_app_url() {
        assert_eq!(app_url("http://127.0.0.1:2718", None), "http://127.0.0.1:2718/");
        assert_eq!(
            app_url("http://127.0.0.1:2718/", Some("?mode=read")),
            "http://127.0.0.1:2718/?mode=read"
        );
        assert_eq!(app_url("http://localhost:3000", Some("")), "http://localhost:3000/");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_terminates_process() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let mut handle = ServerHandle {
            child,
            app: "components.py".to_string(),
            base_url: "http://127.0.0.1:0".to_string(),
            port: 0,
        };

        let started = Instant::now();
        handle.shutdown().await.unwrap();
        assert!(handle.exited());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_startup() {
        let config = ServerConfig {
            marimo_bin: PathBuf::from("/nonexistent/marimo"),
            apps_dir: std::env::temp_dir(),
            startup_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let result = ServerHandle::spawn(&config, "components.py").await;
        assert!(matches!(result, Err(E2eError::ServerStartup(_))));
    }
}
