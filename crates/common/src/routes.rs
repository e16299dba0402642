//! Static proxy route table
//!
//! Maps URL path prefixes on the dev server to the backend notebook server.
//! Built once at startup and never mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Plain HTTP prefixes forwarded to the backend
pub const HTTP_PREFIXES: &[&str] = &["/api", "/auth", "/@file", "/custom.css"];

/// Prefixes upgraded to WebSocket connections on the backend
pub const WEBSOCKET_PREFIXES: &[&str] = &["/ws", "/ws_sync", "/lsp", "/terminal/ws"];

/// A single prefix -> upstream mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRoute {
    /// Path prefix, always starting with `/`
    pub prefix: String,

    /// Upstream base URL (`http://` or `ws://`)
    pub target: String,

    /// Whether requests on this prefix are upgraded to WebSocket
    #[serde(default)]
    pub websocket: bool,
}

impl ProxyRoute {
    pub fn http(prefix: &str, target: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            target: target.to_string(),
            websocket: false,
        }
    }

    pub fn websocket(prefix: &str, target: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            target: target.to_string(),
            websocket: true,
        }
    }

    /// Whether a request path falls under this route
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// Full upstream URL for a request path (with query)
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.target.trim_end_matches('/'), path_and_query)
    }

    /// Origin header value the backend accepts as same-origin
    pub fn origin(&self) -> String {
        let target = self.target.trim_end_matches('/');
        if let Some(rest) = target.strip_prefix("ws://") {
            format!("http://{}", rest)
        } else if let Some(rest) = target.strip_prefix("wss://") {
            format!("https://{}", rest)
        } else {
            target.to_string()
        }
    }

    /// `host:port` authority of the upstream
    pub fn authority(&self) -> &str {
        let target = self.target.trim_end_matches('/');
        target
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(target)
    }
}

/// Immutable prefix table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<ProxyRoute>,
}

impl RouteTable {
    /// Build a table, rejecting malformed prefixes and targets
    pub fn new(routes: Vec<ProxyRoute>) -> Result<Self> {
        for route in &routes {
            if !route.prefix.starts_with('/') {
                return Err(Error::InvalidConfig(format!(
                    "route prefix must start with '/': {}",
                    route.prefix
                )));
            }

            let scheme_ok = if route.websocket {
                route.target.starts_with("ws://") || route.target.starts_with("wss://")
            } else {
                route.target.starts_with("http://") || route.target.starts_with("https://")
            };
            if !scheme_ok {
                return Err(Error::InvalidConfig(format!(
                    "route {} has target with wrong scheme: {}",
                    route.prefix, route.target
                )));
            }
        }

        Ok(Self { routes })
    }

    /// The standard table pointing at a backend on `host:port`
    pub fn default_for(host: &str, port: u16) -> Self {
        let http_target = format!("http://{}:{}", host, port);
        let ws_target = format!("ws://{}:{}", host, port);

        let routes = HTTP_PREFIXES
            .iter()
            .map(|prefix| ProxyRoute::http(prefix, &http_target))
            .chain(
                WEBSOCKET_PREFIXES
                    .iter()
                    .map(|prefix| ProxyRoute::websocket(prefix, &ws_target)),
            )
            .collect();

        Self { routes }
    }

    /// Find the route for a path; the longest matching prefix wins
    pub fn match_path(&self, path: &str) -> Option<&ProxyRoute> {
        self.routes
            .iter()
            .rev()
            .filter(|route| route.matches(path))
            .max_by_key(|route| route.prefix.len())
    }

    pub fn routes(&self) -> &[ProxyRoute] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_contents() {
        let table = RouteTable::default_for("127.0.0.1", 2718);
        assert_eq!(table.routes().len(), 8);

        let api = table.match_path("/api/kernel/run").unwrap();
        assert_eq!(api.prefix, "/api");
        assert!(!api.websocket);
        assert_eq!(api.target, "http://127.0.0.1:2718");

        let css = table.match_path("/custom.css").unwrap();
        assert!(!css.websocket);

        let file = table.match_path("/@file/12-abc.png").unwrap();
        assert_eq!(file.prefix, "/@file");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = RouteTable::default_for("localhost", 2718);

        let sync = table.match_path("/ws_sync?file=a.py").unwrap();
        assert_eq!(sync.prefix, "/ws_sync");
        assert!(sync.websocket);

        let ws = table.match_path("/ws?session_id=s_1").unwrap();
        assert_eq!(ws.prefix, "/ws");

        let terminal = table.match_path("/terminal/ws").unwrap();
        assert_eq!(terminal.prefix, "/terminal/ws");
        assert_eq!(terminal.target, "ws://localhost:2718");
    }

    #[test]
    fn test_duplicate_prefix_first_entry_wins() {
        let table = RouteTable::new(vec![
            ProxyRoute::http("/api", "http://primary:2718"),
            ProxyRoute::http("/api", "http://secondary:2718"),
        ])
        .unwrap();
        assert_eq!(table.match_path("/api/status").unwrap().target, "http://primary:2718");
    }

    #[test]
    fn test_unmatched_paths() {
        let table = RouteTable::default_for("localhost", 2718);
        assert!(table.match_path("/").is_none());
        assert!(table.match_path("/src/main.tsx").is_none());
        assert!(table.match_path("/terminal").is_none());
    }

    #[test]
    fn test_upstream_url_and_origin() {
        let route = ProxyRoute::websocket("/lsp", "ws://127.0.0.1:2718/");
        assert_eq!(route.upstream_url("/lsp/copilot"), "ws://127.0.0.1:2718/lsp/copilot");
        assert_eq!(route.origin(), "http://127.0.0.1:2718");
        assert_eq!(route.authority(), "127.0.0.1:2718");

        let route = ProxyRoute::http("/api", "https://notebooks.internal");
        assert_eq!(route.origin(), "https://notebooks.internal");
        assert_eq!(route.authority(), "notebooks.internal");
    }

    #[test]
    fn test_rejects_malformed_routes() {
        let err = RouteTable::new(vec![ProxyRoute::http("api", "http://localhost:1")]);
        assert!(matches!(err, Err(Error::InvalidConfig(_))));

        let err = RouteTable::new(vec![ProxyRoute::websocket("/ws", "http://localhost:1")]);
        assert!(matches!(err, Err(Error::InvalidConfig(_))));

        let ok = RouteTable::new(vec![ProxyRoute::http("/api", "http://localhost:1")]);
        assert!(ok.is_ok());
    }
}
