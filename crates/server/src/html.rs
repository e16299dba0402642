//! Document merge for dev HTML reconciliation
//!
//! Every [`MergeRule`] names a selector: shell elements matching any rule are
//! detached, and copies of the server elements matching any rule are appended
//! to the end of the shell `<head>` in server document order. The result goes
//! through the html5ever serializer.

use std::collections::HashSet;

use ego_tree::{NodeId, NodeRef, Tree};
use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, warn};

use marimo_dev_common::Error;

/// Selector whose matches are transplanted from the server page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRule {
    pub selector: String,

    /// Warn when either document has no match
    pub expected: bool,
}

impl MergeRule {
    pub fn expected(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            expected: true,
        }
    }

    pub fn optional(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            expected: false,
        }
    }
}

/// Title, filename tag, every style, and inline scripts.
///
/// Scripts with `src` stay with the shell: they load the locally bundled app.
pub fn default_rules() -> Vec<MergeRule> {
    vec![
        MergeRule::expected("title"),
        MergeRule::expected("marimo-filename"),
        MergeRule::optional("style"),
        MergeRule::optional("script:not([src])"),
    ]
}

/// Result of merging a server page into the shell
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub html: String,

    /// Server elements appended to the shell head
    pub transplanted: usize,

    /// Shell elements dropped
    pub removed: usize,

    /// Expected selectors with no match on one side
    pub missing: Vec<String>,
}

pub struct DocumentMerger {
    rules: Vec<(MergeRule, Selector)>,
    head: Selector,
}

impl DocumentMerger {
    pub fn new(rules: Vec<MergeRule>) -> Result<Self, Error> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let selector = Selector::parse(&rule.selector).map_err(|e| {
                    Error::InvalidConfig(format!("bad merge selector '{}': {}", rule.selector, e))
                })?;
                Ok((rule, selector))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let head = Selector::parse("head")
            .map_err(|e| Error::InvalidConfig(format!("head selector: {}", e)))?;

        Ok(Self { rules, head })
    }

    pub fn with_default_rules() -> Result<Self, Error> {
        Self::new(default_rules())
    }

    fn matches_any(&self, element: &ElementRef<'_>) -> bool {
        self.rules.iter().any(|(_, selector)| selector.matches(element))
    }

    /// Merge `server_html` into `shell_html`
    pub fn merge(&self, shell_html: &str, server_html: &str) -> MergeReport {
        let mut shell = Html::parse_document(shell_html);
        let server = Html::parse_document(server_html);

        let mut missing = Vec::new();
        for (rule, selector) in &self.rules {
            if !rule.expected {
                continue;
            }
            if server.select(selector).next().is_none() {
                warn!("Server page has no <{}> element; keeping shell without it", rule.selector);
                missing.push(rule.selector.clone());
            } else if shell.select(selector).next().is_none() {
                warn!("Shell has no <{}> element; appending the server's", rule.selector);
                missing.push(rule.selector.clone());
            }
        }

        let removed = self.outermost_matches(&shell);
        let transplanted = self.outermost_matches(&server);

        for id in &removed {
            if let Some(mut node) = shell.tree.get_mut(*id) {
                node.detach();
            }
        }

        // html5ever always synthesizes a head
        let head = match shell.select(&self.head).next() {
            Some(head) => head.id(),
            None => shell.root_element().id(),
        };
        for id in &transplanted {
            if let Some(node) = server.tree.get(*id) {
                graft(&mut shell.tree, head, node);
            }
        }

        let html = format!("<!DOCTYPE html>\n{}", serialize_element(shell.root_element()));

        debug!(
            "Merged server page: {} transplanted, {} removed",
            transplanted.len(),
            removed.len()
        );

        MergeReport {
            html,
            transplanted: transplanted.len(),
            removed: removed.len(),
            missing,
        }
    }

    /// Outermost elements matching a rule, in document order
    fn outermost_matches(&self, doc: &Html) -> Vec<NodeId> {
        let mut taken = HashSet::new();
        let mut ids = Vec::new();

        for node in doc.root_element().descendants() {
            let Some(element) = ElementRef::wrap(node) else {
                continue;
            };
            if !self.matches_any(&element) {
                continue;
            }
            if element.ancestors().any(|ancestor| taken.contains(&ancestor.id())) {
                continue;
            }
            taken.insert(element.id());
            ids.push(element.id());
        }

        ids
    }
}

/// Deep-copy `source` from another tree as the last child of `parent`
fn graft(tree: &mut Tree<Node>, parent: NodeId, source: NodeRef<'_, Node>) {
    let Some(mut parent) = tree.get_mut(parent) else {
        return;
    };
    let copy = parent.append(source.value().clone()).id();
    for child in source.children() {
        graft(tree, copy, child);
    }
}

/// Serialize with scripting enabled so `<noscript>` content stays markup
fn serialize_element(element: ElementRef<'_>) -> String {
    let opts = SerializeOpts {
        scripting_enabled: true,
        traversal_scope: TraversalScope::IncludeNode,
        create_missing_parent: false,
    };
    let mut buf = Vec::new();
    if let Err(e) = serialize(&mut buf, &element, opts) {
        warn!("Failed to serialize merged document: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHELL: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>{{ title }}</title>
    <marimo-filename hidden>{{ filename }}</marimo-filename>
    <style>body { background: red; }</style>
    <script>window.__MARIMO_MOUNT_CONFIG__ = '{{ mount_config }}';</script>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.tsx"></script>
  </body>
</html>"#;

    const SERVER: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <title>components</title>
    <marimo-filename hidden>components.py</marimo-filename>
    <style title="marimo-custom">.cell { color: blue; }</style>
    <script type="module" crossorigin src="/assets/index-abc123.js"></script>
    <script data-marimo="true">window.__MARIMO_MOUNT_CONFIG__ = {"mode":"read"};</script>
  </head>
  <body><div id="root"></div></body>
</html>"#;

    fn merger() -> DocumentMerger {
        DocumentMerger::with_default_rules().unwrap()
    }

    #[test]
    fn test_merge_replaces_title_and_filename() {
        let report = merger().merge(SHELL, SERVER);
        let doc = Html::parse_document(&report.html);

        let titles: Vec<String> = doc
            .select(&Selector::parse("title").unwrap())
            .map(|t| t.text().collect())
            .collect();
        assert_eq!(titles, vec!["components".to_string()]);

        let filenames: Vec<String> = doc
            .select(&Selector::parse("marimo-filename").unwrap())
            .map(|t| t.text().collect())
            .collect();
        assert_eq!(filenames, vec!["components.py".to_string()]);
        assert!(report.missing.is_empty());
    }

    #[test]
    fn test_merge_swaps_styles_and_inline_scripts() {
        let report = merger().merge(SHELL, SERVER);

        assert!(report.html.starts_with("<!DOCTYPE html>\n"));
        assert!(!report.html.contains("background: red"));
        assert!(report.html.contains(".cell { color: blue; }"));
        assert!(!report.html.contains("{{ mount_config }}"));
        assert!(report.html.contains(r#"{"mode":"read"}"#));
        assert_eq!(report.transplanted, 4);
        assert_eq!(report.removed, 4);
    }

    #[test]
    fn test_merge_keeps_shell_module_script_and_drops_server_bundle() {
        let report = merger().merge(SHELL, SERVER);
        assert!(report.html.contains(r#"src="/src/main.tsx""#));
        assert!(!report.html.contains("/assets/index-abc123.js"));
    }

    #[test]
    fn test_transplanted_elements_land_in_head() {
        let report = merger().merge(SHELL, SERVER);
        let head_end = report.html.find("</head>").unwrap();
        let style_at = report.html.find(".cell { color: blue; }").unwrap();
        assert!(style_at < head_end);
    }

    #[test]
    fn test_missing_elements_are_not_fatal() {
        let server = "<html><head><style>p{}</style></head><body></body></html>";
        let report = merger().merge(SHELL, server);

        assert_eq!(report.missing, vec!["title".to_string(), "marimo-filename".to_string()]);
        assert!(report.html.contains("p{}"));
        assert!(!report.html.contains("<title>"));
    }

    #[test]
    fn test_text_is_escaped_outside_raw_elements() {
        let shell = "<html><head></head><body><p>a &lt; b</p></body></html>";
        let report = merger().merge(shell, "<html><head></head><body></body></html>");
        assert!(report.html.contains("<p>a &lt; b</p>"));
    }

    #[test]
    fn test_noscript_and_svg_survive_merge() {
        let shell = r##"<!DOCTYPE html>
<html>
  <head>
    <title>{{ title }}</title>
    <noscript><link rel="stylesheet" href="/a.css"></noscript>
  </head>
  <body>
    <svg><use xlink:href="#icon"></use></svg>
  </body>
</html>"##;
        let report = merger().merge(shell, SERVER);

        assert!(report.html.contains(r#"<noscript><link rel="stylesheet" href="/a.css"></noscript>"#));
        assert!(report.html.contains(r##"xlink:href="#icon""##));
        assert!(!report.html.contains("&lt;link"));
    }

    #[test]
    fn test_transplanted_script_is_not_escaped() {
        let server = r#"<html><head><script>if (a < b && c) { go(); }</script></head></html>"#;
        let report = merger().merge(SHELL, server);
        assert!(report.html.contains("if (a < b && c) { go(); }"));
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let result = DocumentMerger::new(vec![MergeRule::optional("script[")]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
