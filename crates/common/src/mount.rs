//! Mount configuration injected into pages for the in-browser runtime

use serde::{Deserialize, Serialize};
use url::Url;

/// Page mode the client runtime starts in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Read,
    #[default]
    Edit,
}

impl Mode {
    /// Derive the mode from a request URL (absolute or path + query).
    ///
    /// `mode=read` in the query selects read mode; anything else is edit.
    pub fn from_url(original_url: &str) -> Self {
        let parsed = Url::parse(original_url)
            .or_else(|_| Url::parse("http://localhost/").and_then(|base| base.join(original_url)));

        match parsed {
            Ok(url) => {
                let read = url
                    .query_pairs()
                    .any(|(key, value)| key == "mode" && value == "read");
                if read {
                    Mode::Read
                } else {
                    Mode::Edit
                }
            }
            Err(_) => Mode::Edit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Read => "read",
            Mode::Edit => "edit",
        }
    }
}

/// Payload consumed once by the client runtime on page load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountConfig {
    pub filename: String,
    pub mode: Mode,
    pub version: String,
    pub config: serde_json::Value,
    pub config_overrides: serde_json::Value,
    pub app_config: serde_json::Value,
    pub server_token: String,
}

impl MountConfig {
    /// Build the record served in in-browser runtime mode.
    ///
    /// No backend exists in that mode, so every config object is empty and
    /// the notebook file is chosen by the client.
    pub fn for_in_browser_runtime(original_url: &str, version: &str) -> Self {
        Self {
            filename: String::new(),
            mode: Mode::from_url(original_url),
            version: version.to_string(),
            config: empty_object(),
            config_overrides: empty_object(),
            app_config: empty_object(),
            server_token: String::new(),
        }
    }

    /// Serialize for textual substitution into an HTML template
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_url() {
        assert_eq!(Mode::from_url("/?mode=read"), Mode::Read);
        assert_eq!(Mode::from_url("/?file=a.py&mode=read"), Mode::Read);
        assert_eq!(Mode::from_url("http://localhost:3000/?mode=read"), Mode::Read);
        assert_eq!(Mode::from_url("/?mode=edit"), Mode::Edit);
        assert_eq!(Mode::from_url("/"), Mode::Edit);
        assert_eq!(Mode::from_url(""), Mode::Edit);
    }

    #[test]
    fn test_mount_config_uses_camel_case_keys() {
        let config = MountConfig::for_in_browser_runtime("/?mode=read", "0.9.1");
        let json: serde_json::Value = serde_json::from_str(&config.to_json().unwrap()).unwrap();

        assert_eq!(json["mode"], "read");
        assert_eq!(json["version"], "0.9.1");
        assert_eq!(json["filename"], "");
        assert_eq!(json["serverToken"], "");
        assert!(json["configOverrides"].as_object().unwrap().is_empty());
        assert!(json["appConfig"].as_object().unwrap().is_empty());
        assert!(json.get("config_overrides").is_none());
    }

    #[test]
    fn test_mount_config_round_trips() {
        let config = MountConfig::for_in_browser_runtime("/", "latest");
        let parsed: MountConfig = serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.mode, Mode::Edit);
    }
}
