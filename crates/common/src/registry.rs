//! Named registry with environment-driven allow/deny lists
//!
//! Each registry belongs to a dotted group such as `marimo.e2e.scenarios`.
//! The group maps to two environment variables, e.g.
//! `MARIMO_E2E_SCENARIOS_ALLOWLIST` and `MARIMO_E2E_SCENARIOS_DENYLIST`,
//! holding comma separated names matched case-insensitively.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};

/// Allow/deny filter over entry names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameFilter {
    allow: Option<Vec<String>>,
    deny: Vec<String>,
}

impl NameFilter {
    /// Build a filter from explicit lists. `None` allows every name not denied.
    pub fn new(allow: Option<&str>, deny: Option<&str>) -> Self {
        Self {
            allow: allow.map(split_names).filter(|names| !names.is_empty()),
            deny: deny.map(split_names).unwrap_or_default(),
        }
    }

    /// Read `<GROUP>_ALLOWLIST` / `<GROUP>_DENYLIST` from the environment
    pub fn from_env(group: &str) -> Self {
        let prefix = env_prefix(group);
        let allow = std::env::var(format!("{}_ALLOWLIST", prefix)).ok();
        let deny = std::env::var(format!("{}_DENYLIST", prefix)).ok();
        Self::new(allow.as_deref(), deny.as_deref())
    }

    /// Denylist wins over allowlist
    pub fn is_allowed(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        if self.deny.contains(&name) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.contains(&name),
            None => true,
        }
    }
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Environment variable prefix for a group: `marimo.e2e.scenarios` -> `MARIMO_E2E_SCENARIOS`
pub fn env_prefix(group: &str) -> String {
    group.replace(['.', '-'], "_").to_uppercase()
}

/// Registry of named values within a group
pub struct Registry<T> {
    group: String,
    filter: NameFilter,
    entries: BTreeMap<String, T>,
}

impl<T> Registry<T> {
    /// Create a registry whose filter is read from the environment
    pub fn new(group: &str) -> Self {
        Self::with_filter(group, NameFilter::from_env(group))
    }

    pub fn with_filter(group: &str, filter: NameFilter) -> Self {
        Self {
            group: group.to_string(),
            filter,
            entries: BTreeMap::new(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Register a value. Names rejected by the filter are silently ignored.
    pub fn register(&mut self, name: &str, value: T) {
        if !self.filter.is_allowed(name) {
            debug!("{}: ignoring '{}' (not allowed)", self.group, name);
            return;
        }
        self.entries.insert(name.to_string(), value);
    }

    /// Remove and return a value
    pub fn unregister(&mut self, name: &str) -> Option<T> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Result<&T> {
        if !self.filter.is_allowed(name) {
            return Err(Error::NotAllowed {
                group: self.group.clone(),
                name: name.to_string(),
            });
        }
        self.entries
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("{} in group {}", name, self.group)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn get_all(&self) -> Vec<&T> {
        self.entries.values().collect()
    }

    /// Merge externally discovered entries.
    ///
    /// The filter applies as for `register`; explicitly registered names are kept.
    pub fn extend_discovered<I>(&mut self, discovered: I)
    where
        I: IntoIterator<Item = (String, T)>,
    {
        for (name, value) in discovered {
            if self.entries.contains_key(&name) {
                debug!("{}: '{}' already registered, skipping discovered entry", self.group, name);
                continue;
            }
            self.register(&name, value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Registry(group={}, names={:?})", self.group, self.names())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry<String> {
        Registry::with_filter("marimo.test.group", NameFilter::default())
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = registry();
        registry.register("test", "value".to_string());
        assert_eq!(registry.get("test").unwrap(), "value");
    }

    #[test]
    fn test_unregister() {
        let mut registry = registry();
        registry.register("test", "value".to_string());
        assert_eq!(registry.unregister("test").as_deref(), Some("value"));
        assert!(matches!(registry.get("test"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_names_and_get_all() {
        let mut registry = registry();
        registry.register("test1", "value1".to_string());
        registry.register("test2", "value2".to_string());
        assert_eq!(registry.names(), vec!["test1", "test2"]);
        assert_eq!(registry.get_all(), vec!["value1", "value2"]);
    }

    #[test]
    fn test_debug_output_names_group_and_entries() {
        let mut registry = registry();
        registry.register("test", "value".to_string());
        let repr = format!("{:?}", registry);
        assert!(repr.contains("Registry"));
        assert!(repr.contains("test"));
    }

    #[test]
    fn test_allowlist() {
        let filter = NameFilter::new(Some("test1,test2"), None);
        let mut registry = Registry::with_filter("marimo.test.group", filter);

        registry.register("test1", "value1");
        assert_eq!(*registry.get("test1").unwrap(), "value1");

        registry.register("test3", "value3");
        assert!(!registry.names().contains(&"test3"));
        assert!(matches!(registry.get("test3"), Err(Error::NotAllowed { .. })));
    }

    #[test]
    fn test_denylist() {
        let filter = NameFilter::new(None, Some("test2,test3"));
        let mut registry = Registry::with_filter("marimo.test.group", filter);

        registry.register("test1", "value1");
        assert_eq!(*registry.get("test1").unwrap(), "value1");

        registry.register("test2", "value2");
        assert!(!registry.names().contains(&"test2"));
        assert!(matches!(registry.get("test2"), Err(Error::NotAllowed { .. })));
    }

    #[test]
    fn test_denylist_wins_over_allowlist() {
        let filter = NameFilter::new(Some("test1,test2"), Some("test2,test3"));
        let mut registry = Registry::with_filter("marimo.test.group", filter);

        registry.register("test1", "value1");
        registry.register("test2", "value2");
        registry.register("test4", "value4");
        assert_eq!(registry.names(), vec!["test1"]);
    }

    #[test]
    fn test_case_insensitive() {
        let filter = NameFilter::new(Some("Test1,TEST2"), Some("TEST3,test4"));
        let mut registry = Registry::with_filter("marimo.test.group", filter);

        registry.register("test1", 1);
        registry.register("TEST2", 2);
        registry.register("Test3", 3);
        registry.register("TEST4", 4);
        assert_eq!(registry.names(), vec!["TEST2", "test1"]);
    }

    #[test]
    fn test_filter_from_env() {
        std::env::set_var("MARIMO_REGISTRY_ENV_CASE_ALLOWLIST", "alpha, beta");
        std::env::set_var("MARIMO_REGISTRY_ENV_CASE_DENYLIST", "beta");

        let filter = NameFilter::from_env("marimo.registry.env-case");
        assert!(filter.is_allowed("ALPHA"));
        assert!(!filter.is_allowed("beta"));
        assert!(!filter.is_allowed("gamma"));
    }

    #[test]
    fn test_extend_discovered_keeps_registered_and_filters() {
        let filter = NameFilter::new(None, Some("denied"));
        let mut registry = Registry::with_filter("marimo.test.group", filter);
        registry.register("test1", "value1".to_string());

        registry.extend_discovered(vec![
            ("test1".to_string(), "discovered1".to_string()),
            ("ep1".to_string(), "ep_value1".to_string()),
            ("denied".to_string(), "nope".to_string()),
        ]);

        assert_eq!(registry.get("test1").unwrap(), "value1");
        assert_eq!(registry.get("ep1").unwrap(), "ep_value1");
        assert!(!registry.contains("denied"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix("marimo.e2e.scenarios"), "MARIMO_E2E_SCENARIOS");
        assert_eq!(env_prefix("marimo.cell.executor"), "MARIMO_CELL_EXECUTOR");
    }
}
