use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use marimo_dev_server::{ConfigOverrides, DevServer, DevServerConfig, NodeEnv};

/// marimo frontend dev server
#[derive(Parser, Debug)]
#[command(name = "marimo-dev-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "marimo-dev.toml")]
    config: PathBuf,

    /// Port the dev server listens on
    #[arg(long, env = "DEV_PORT")]
    port: Option<u16>,

    /// Port of the marimo backend
    #[arg(long, env = "SERVER_PORT")]
    server_port: Option<u16>,

    /// Host of the marimo backend
    #[arg(long, env = "HOST")]
    server_host: Option<String>,

    /// Directory with the bundled index.html and assets
    #[arg(long)]
    frontend_dir: Option<PathBuf>,

    /// Serve the in-browser runtime instead of proxying a backend
    #[arg(long, env = "PYODIDE")]
    pyodide: Option<String>,

    /// Pass pages through untouched (documentation tooling)
    #[arg(long)]
    storybook: bool,

    #[arg(long, env = "npm_lifecycle_script", hide = true)]
    lifecycle_script: Option<String>,

    /// Version written into the mount config
    #[arg(long, env = "VITE_MARIMO_VERSION")]
    marimo_version: Option<String>,

    #[arg(long, env = "NODE_ENV")]
    node_env: Option<String>,

    /// Bundle analysis upload token
    #[arg(long, env = "CODECOV_TOKEN", hide_env_values = true)]
    codecov_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = DevServerConfig::load(&args.config)?;
    let listen = args.port.map(|port| {
        let host = config
            .listen
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        format!("{}:{}", host, port)
    });
    config.apply_overrides(ConfigOverrides {
        listen,
        server_host: args.server_host,
        server_port: args.server_port,
        frontend_dir: args.frontend_dir,
        pyodide: args.pyodide,
        storybook: args.storybook,
        lifecycle_script: args.lifecycle_script,
        marimo_version: args.marimo_version,
        node_env: args.node_env,
        codecov_token: args.codecov_token,
    })?;

    init_tracing(config.node_env);

    info!(
        "Starting marimo dev server (backend: {}, frontend: {}, version: {}, bundle analysis: {})",
        config.backend_url(),
        config.frontend_dir.display(),
        config.marimo_version,
        if config.codecov_token.is_some() { "enabled" } else { "disabled" },
    );

    let addr = config.listen_addr()?;
    DevServer::new(config)?.serve(addr).await
}

fn init_tracing(node_env: NodeEnv) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if node_env == NodeEnv::Production {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
