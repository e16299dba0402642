//! Element locators
//!
//! A [`Locator`] names one element (or a set of elements) on the page the way
//! a user finds it: by ARIA role, visible text, test id, or CSS as a last
//! resort. Locators compile to Playwright locator expressions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::E2eError;

/// What a locator matches on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Css(String),
    Role {
        role: String,
        name: Option<String>,
        exact: bool,
    },
    Text {
        text: String,
        exact: bool,
    },
    TestId(String),
}

/// Which match to keep when several elements match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    First,
    Last,
    Nth(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LocatorDef", into = "LocatorDef")]
pub struct Locator {
    pub target: Target,
    pub within: Option<Box<Locator>>,
    pub pick: Option<Pick>,
}

impl Locator {
    fn from_target(target: Target) -> Self {
        Self {
            target,
            within: None,
            pick: None,
        }
    }

    pub fn css(selector: &str) -> Self {
        Self::from_target(Target::Css(selector.to_string()))
    }

    pub fn role(role: &str) -> Self {
        Self::from_target(Target::Role {
            role: role.to_string(),
            name: None,
            exact: false,
        })
    }

    /// Role with an accessible name
    pub fn role_named(role: &str, name: &str, exact: bool) -> Self {
        Self::from_target(Target::Role {
            role: role.to_string(),
            name: Some(name.to_string()),
            exact,
        })
    }

    /// Substring, case-insensitive text match
    pub fn text(text: &str) -> Self {
        Self::from_target(Target::Text {
            text: text.to_string(),
            exact: false,
        })
    }

    pub fn exact_text(text: &str) -> Self {
        Self::from_target(Target::Text {
            text: text.to_string(),
            exact: true,
        })
    }

    pub fn test_id(id: &str) -> Self {
        Self::from_target(Target::TestId(id.to_string()))
    }

    /// Scope this locator to matches inside `parent`
    pub fn within(mut self, parent: Locator) -> Self {
        self.within = Some(Box::new(parent));
        self
    }

    pub fn first(mut self) -> Self {
        self.pick = Some(Pick::First);
        self
    }

    pub fn last(mut self) -> Self {
        self.pick = Some(Pick::Last);
        self
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.pick = Some(Pick::Nth(index));
        self
    }

    /// Playwright expression rooted at `root` (usually `page`)
    pub fn to_js(&self, root: &str) -> String {
        let base = match &self.within {
            Some(parent) => parent.to_js(root),
            None => root.to_string(),
        };

        let mut expr = match &self.target {
            Target::Css(selector) => format!("{}.locator({})", base, js_string(selector)),
            Target::Role { role, name, exact } => match name {
                Some(name) => format!(
                    "{}.getByRole({}, {{ name: {}, exact: {} }})",
                    base,
                    js_string(role),
                    js_string(name),
                    exact
                ),
                None => format!("{}.getByRole({})", base, js_string(role)),
            },
            Target::Text { text, exact } => {
                if *exact {
                    format!("{}.getByText({}, {{ exact: true }})", base, js_string(text))
                } else {
                    format!("{}.getByText({})", base, js_string(text))
                }
            }
            Target::TestId(id) => format!("{}.getByTestId({})", base, js_string(id)),
        };

        match self.pick {
            Some(Pick::First) => expr.push_str(".first()"),
            Some(Pick::Last) => expr.push_str(".last()"),
            Some(Pick::Nth(index)) => expr.push_str(&format!(".nth({})", index)),
            None => {}
        }
        expr
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.within {
            write!(f, "{} >> ", parent)?;
        }
        match &self.target {
            Target::Css(selector) => write!(f, "css={}", selector)?,
            Target::Role { role, name, .. } => match name {
                Some(name) => write!(f, "role={}[name={:?}]", role, name)?,
                None => write!(f, "role={}", role)?,
            },
            Target::Text { text, .. } => write!(f, "text={:?}", text)?,
            Target::TestId(id) => write!(f, "test_id={}", id)?,
        }
        match self.pick {
            Some(Pick::First) => write!(f, " >> first"),
            Some(Pick::Last) => write!(f, " >> last"),
            Some(Pick::Nth(index)) => write!(f, " >> nth={}", index),
            None => Ok(()),
        }
    }
}

/// JavaScript string literal
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// YAML form: exactly one of `css`, `role`, `text`, `test_id`, plus modifiers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocatorDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    exact: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    within: Option<Box<Locator>>,
    #[serde(default, skip_serializing_if = "is_false")]
    first: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    last: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nth: Option<usize>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl TryFrom<LocatorDef> for Locator {
    type Error = E2eError;

    fn try_from(def: LocatorDef) -> Result<Self, Self::Error> {
        let target = match (def.css, def.role, def.text, def.test_id) {
            (Some(css), None, None, None) => Target::Css(css),
            (None, Some(role), None, None) => Target::Role {
                role,
                name: def.name,
                exact: def.exact,
            },
            (None, None, Some(text), None) => Target::Text {
                text,
                exact: def.exact,
            },
            (None, None, None, Some(id)) => Target::TestId(id),
            _ => {
                return Err(E2eError::InvalidLocator(
                    "exactly one of css, role, text, test_id is required".to_string(),
                ))
            }
        };

        let pick = match (def.first, def.last, def.nth) {
            (false, false, None) => None,
            (true, false, None) => Some(Pick::First),
            (false, true, None) => Some(Pick::Last),
            (false, false, Some(index)) => Some(Pick::Nth(index)),
            _ => {
                return Err(E2eError::InvalidLocator(
                    "first, last and nth are mutually exclusive".to_string(),
                ))
            }
        };

        Ok(Self {
            target,
            within: def.within,
            pick,
        })
    }
}

impl From<Locator> for LocatorDef {
    fn from(locator: Locator) -> Self {
        let mut def = LocatorDef {
            within: locator.within,
            ..Default::default()
        };
        match locator.target {
            Target::Css(css) => def.css = Some(css),
            Target::Role { role, name, exact } => {
                def.role = Some(role);
                def.name = name;
                def.exact = exact;
            }
            Target::Text { text, exact } => {
                def.text = Some(text);
                def.exact = exact;
            }
            Target::TestId(id) => def.test_id = Some(id),
        }
        match locator.pick {
            Some(Pick::First) => def.first = true,
            Some(Pick::Last) => def.last = true,
            Some(Pick::Nth(index)) => def.nth = Some(index),
            None => {}
        }
        def
    }
}
