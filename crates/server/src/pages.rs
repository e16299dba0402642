//! Diagnostic pages served instead of a broken notebook

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>{title}</title>
    <style>
      body {{ font-family: system-ui, sans-serif; max-width: 44rem; margin: 4rem auto; line-height: 1.5; }}
      pre {{ background: #f4f4f5; padding: 0.75rem 1rem; border-radius: 6px; }}
      .detail {{ color: #71717a; font-size: 0.875rem; }}
    </style>
  </head>
  <body>
{body}
  </body>
</html>
"#
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Shown when the backend cannot be reached
pub fn server_not_running_page(host: &str, port: u16, reason: &str) -> String {
    let body = format!(
        r#"    <h1>marimo server is not running</h1>
    <p>The dev server could not load the page from <code>http://{host}:{port}</code>.</p>
    <p>Start the backend in another terminal:</p>
    <pre>marimo edit --no-token --headless --port {port}</pre>
    <p>To use another port, restart the dev server with <code>SERVER_PORT</code> set to it.</p>
    <p class="detail">{reason}</p>"#,
        host = escape(host),
        port = port,
        reason = escape(reason),
    );
    page("marimo server is not running", &body)
}

/// Shown when the backend asks for a login the dev server cannot drive
pub fn unsupported_auth_page(port: u16) -> String {
    let body = format!(
        r#"    <h1>Token authentication is not supported in dev mode</h1>
    <p>The marimo server answered with a login page. Restart it without authentication:</p>
    <pre>marimo edit --no-token --headless --port {port}</pre>"#,
        port = port,
    );
    page("marimo dev: authentication not supported", &body)
}
