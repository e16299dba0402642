//! Dev server router
//!
//! Proxied prefixes go to the backend, page navigations get the reconciled
//! shell, and everything else is served from the frontend directory.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State, WebSocketUpgrade},
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use marimo_dev_common::{ProxyRoute, RouteTable};

use crate::config::{DevServerConfig, PageMode};
use crate::proxy::HttpProxy;
use crate::reconcile::{HtmlReconciler, Outcome};
use crate::ws_proxy::WsProxy;

/// Dev server handle
#[derive(Clone)]
pub struct DevServer {
    state: Arc<DevServerState>,
}

struct DevServerState {
    config: DevServerConfig,
    routes: RouteTable,
    reconciler: HtmlReconciler,
    http_proxy: HttpProxy,
    static_files: ServeDir,
}

impl DevServer {
    pub fn new(config: DevServerConfig) -> anyhow::Result<Self> {
        let routes = config.route_table();
        Self::with_routes(config, routes)
    }

    /// Build with an explicit route table
    pub fn with_routes(config: DevServerConfig, routes: RouteTable) -> anyhow::Result<Self> {
        let reconciler = HtmlReconciler::new(&config)?;
        let http_proxy = HttpProxy::new()?;
        let static_files = ServeDir::new(&config.frontend_dir);

        Ok(Self {
            state: Arc::new(DevServerState {
                config,
                routes,
                reconciler,
                http_proxy,
                static_files,
            }),
        })
    }

    pub fn routes(&self) -> &RouteTable {
        &self.state.routes
    }

    /// Create router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/__dev/health", get(health_handler))
            .fallback(dispatch_handler)
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the dev server
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        let config = &self.state.config;
        info!("Dev server starting on http://{}", addr);
        match config.page_mode() {
            PageMode::Proxied => info!("Proxying marimo server at {}", config.backend_url()),
            PageMode::InBrowserRuntime => info!("Serving in-browser runtime (no backend)"),
            PageMode::Passthrough => info!("Documentation tooling context; pages pass through"),
        }
        for route in self.state.routes.routes() {
            debug!(
                "route {} -> {}{}",
                route.prefix,
                route.target,
                if route.websocket { " (ws)" } else { "" }
            );
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(state): State<Arc<DevServerState>>) -> impl IntoResponse {
    let mode = match state.reconciler.mode() {
        PageMode::Passthrough => "passthrough",
        PageMode::InBrowserRuntime => "in-browser-runtime",
        PageMode::Proxied => "proxied",
    };
    Json(serde_json::json!({
        "status": "ok",
        "service": "marimo-dev-server",
        "mode": mode,
        "backend": state.config.backend_url(),
    }))
}

async fn dispatch_handler(State(state): State<Arc<DevServerState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();

    if let Some(route) = state.routes.match_path(&path).cloned() {
        if route.websocket {
            return websocket_proxy(state, route, req).await;
        }
        return state.http_proxy.forward(&route, req).await;
    }

    if is_page_request(req.method(), &path) {
        return page_handler(state, req).await;
    }

    match state.static_files.clone().oneshot(req).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

async fn websocket_proxy(state: Arc<DevServerState>, route: ProxyRoute, req: Request) -> Response {
    let (mut parts, _body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| route.prefix.clone());
    let proxy = WsProxy::new(&route, &path_and_query, &parts.headers);

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            warn!("{} is a WebSocket route but the request is not an upgrade", path_and_query);
            return rejection.into_response();
        }
    };

    let protocols = proxy.requested_protocols();
    upgrade
        .protocols(protocols)
        .on_upgrade(move |socket| async move {
            let upstream = proxy.upstream_url().to_string();
            if let Err(e) = proxy.bridge(socket).await {
                warn!("WebSocket proxy to {} failed: {}", upstream, e);
            }
        })
}

async fn page_handler(state: Arc<DevServerState>, req: Request) -> Response {
    let original_url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let shell_path = state.config.shell_path();
    let shell = match tokio::fs::read_to_string(&shell_path).await {
        Ok(shell) => shell,
        Err(e) => {
            error!("Failed to read HTML shell {}: {}", shell_path.display(), e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("HTML shell not found at {}: {}", shell_path.display(), e),
            )
                .into_response();
        }
    };

    let page = state.reconciler.reconcile(&shell, &original_url).await;
    match &page.outcome {
        Outcome::Merged { transplanted } => {
            debug!("Served {} ({} server elements)", original_url, transplanted)
        }
        outcome => debug!("Served {} ({:?})", original_url, outcome),
    }

    (
        [(header::CACHE_CONTROL, "no-store")],
        Html(page.html),
    )
        .into_response()
}

/// Navigations get the reconciled shell: `/`, extension-less paths, `*.html`
pub fn is_page_request(method: &Method, path: &str) -> bool {
    if method != Method::GET && method != Method::HEAD {
        return false;
    }
    if path == "/" || path.ends_with(".html") {
        return true;
    }
    let last_segment = path.rsplit('/').next().unwrap_or("");
    !last_segment.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_page_request() {
        assert!(is_page_request(&Method::GET, "/"));
        assert!(is_page_request(&Method::GET, "/index.html"));
        assert!(is_page_request(&Method::GET, "/notebooks/intro"));
        assert!(!is_page_request(&Method::GET, "/assets/index-abc.js"));
        assert!(!is_page_request(&Method::GET, "/favicon.ico"));
        assert!(!is_page_request(&Method::POST, "/"));
    }
}
