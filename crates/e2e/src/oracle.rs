//! Expected widget output
//!
//! Models what a notebook renders after each interaction so scenarios assert
//! computed values instead of hand-copied literals. Values print the way the
//! notebook prints them: `True`/`False`, `None`, comma-joined selections.

use std::fmt;

use crate::error::{E2eError, E2eResult};

/// Template every widget demo cell renders its value into
pub const OUTPUT_PREFIX: &str = "The element's current value is ";

/// Text shown by an output cell for `value`
pub fn output_text(value: &str) -> String {
    format!("{}{}", OUTPUT_PREFIX, value)
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetValue {
    None,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl fmt::Display for WidgetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidgetValue::None => write!(f, "None"),
            WidgetValue::Bool(true) => write!(f, "True"),
            WidgetValue::Bool(false) => write!(f, "False"),
            WidgetValue::Int(n) => write!(f, "{}", n),
            WidgetValue::Text(s) => write!(f, "{}", s),
            WidgetValue::List(items) => write!(f, "{}", items.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    Button,
    Checkbox,
    Switch,
    Dropdown,
    Multiselect,
    Number,
    Radio,
    Slider { start: i64, stop: i64, step: i64 },
    Text,
    TextArea,
    /// ISO date input
    Date,
    FileButton,
    FileArea,
    /// Wraps a text area; the value only changes on submit
    Form,
}

impl WidgetKind {
    fn initial_value(&self) -> WidgetValue {
        match self {
            WidgetKind::Button => WidgetValue::Int(0),
            WidgetKind::Checkbox | WidgetKind::Switch => WidgetValue::Bool(false),
            WidgetKind::Dropdown => WidgetValue::None,
            WidgetKind::Multiselect => WidgetValue::List(Vec::new()),
            WidgetKind::Number => WidgetValue::Int(1),
            WidgetKind::Radio => WidgetValue::Text("a".to_string()),
            WidgetKind::Slider { start, .. } => WidgetValue::Int(*start),
            WidgetKind::Text | WidgetKind::TextArea => WidgetValue::Text(String::new()),
            WidgetKind::Date
            | WidgetKind::FileButton
            | WidgetKind::FileArea
            | WidgetKind::Form => WidgetValue::None,
        }
    }
}

/// One widget's value as the notebook sees it
#[derive(Debug, Clone)]
pub struct WidgetModel {
    kind: WidgetKind,
    value: WidgetValue,
    /// Form contents not yet submitted
    pending: Option<WidgetValue>,
}

impl WidgetModel {
    pub fn new(kind: WidgetKind) -> Self {
        Self {
            kind,
            value: kind.initial_value(),
            pending: None,
        }
    }

    pub fn kind(&self) -> WidgetKind {
        self.kind
    }

    pub fn value(&self) -> &WidgetValue {
        &self.value
    }

    /// Expected output cell text
    pub fn output(&self) -> String {
        output_text(&self.value.to_string())
    }

    /// Value as it appears inside a JSON output tree
    pub fn json(&self) -> JsonTree {
        match (&self.kind, &self.value) {
            (_, WidgetValue::None) => JsonTree::Null,
            (_, WidgetValue::Bool(b)) => JsonTree::Bool(*b),
            (_, WidgetValue::Int(n)) => JsonTree::Number(*n),
            (WidgetKind::Date, WidgetValue::Text(s)) => JsonTree::Raw(s.clone()),
            (_, WidgetValue::Text(s)) => JsonTree::String(s.clone()),
            (_, WidgetValue::List(items)) => {
                JsonTree::Array(items.iter().map(|i| JsonTree::String(i.clone())).collect())
            }
        }
    }

    pub fn click(&mut self) -> E2eResult<()> {
        self.value = match (self.kind, &self.value) {
            (WidgetKind::Button, WidgetValue::Int(n)) => WidgetValue::Int(n + 1),
            (WidgetKind::Checkbox | WidgetKind::Switch, WidgetValue::Bool(b)) => {
                WidgetValue::Bool(!b)
            }
            _ => return Err(self.unsupported("click")),
        };
        Ok(())
    }

    /// Choose an option of a dropdown, radio group or multiselect
    pub fn select(&mut self, option: &str) -> E2eResult<()> {
        match self.kind {
            WidgetKind::Dropdown | WidgetKind::Radio => {
                self.value = WidgetValue::Text(option.to_string())
            }
            WidgetKind::Multiselect => {
                if let WidgetValue::List(items) = &mut self.value {
                    if !items.iter().any(|i| i == option) {
                        items.push(option.to_string());
                    }
                }
            }
            _ => return Err(self.unsupported("select")),
        }
        Ok(())
    }

    /// Fill a text-like input. Text and number inputs commit on blur, which
    /// scenarios always perform before asserting.
    pub fn fill(&mut self, text: &str) -> E2eResult<()> {
        match self.kind {
            WidgetKind::Text | WidgetKind::TextArea | WidgetKind::Date => {
                self.value = WidgetValue::Text(text.to_string())
            }
            WidgetKind::Number => {
                let n = text
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| E2eError::Oracle(format!("'{}' is not a number", text)))?;
                self.value = WidgetValue::Int(n);
            }
            WidgetKind::Form => self.pending = Some(WidgetValue::Text(text.to_string())),
            _ => return Err(self.unsupported("fill")),
        }
        Ok(())
    }

    /// Drop the slider thumb on the middle of its track
    pub fn drag_to_track_center(&mut self) -> E2eResult<()> {
        match self.kind {
            WidgetKind::Slider { start, stop, step } if step > 0 => {
                let steps = ((stop - start) as f64 / 2.0 / step as f64).round() as i64;
                self.value = WidgetValue::Int(start + steps * step);
                Ok(())
            }
            _ => Err(self.unsupported("drag")),
        }
    }

    pub fn submit(&mut self) -> E2eResult<()> {
        match self.kind {
            WidgetKind::Form => {
                if let Some(pending) = self.pending.take() {
                    self.value = pending;
                }
                Ok(())
            }
            _ => Err(self.unsupported("submit")),
        }
    }

    fn unsupported(&self, interaction: &str) -> E2eError {
        E2eError::Oracle(format!("{:?} does not support {}", self.kind, interaction))
    }
}

/// A single value rendered by several views
#[derive(Debug, Clone)]
pub struct SharedBinding {
    value: WidgetValue,
    views: usize,
}

impl SharedBinding {
    pub fn new(initial: WidgetValue, views: usize) -> Self {
        Self { value: initial, views }
    }

    pub fn views(&self) -> usize {
        self.views
    }

    /// Edit through one view
    pub fn set_from(&mut self, view: usize, value: WidgetValue) -> E2eResult<()> {
        self.check_view(view)?;
        self.value = value;
        Ok(())
    }

    /// Value displayed by a view
    pub fn view(&self, view: usize) -> E2eResult<&WidgetValue> {
        self.check_view(view)?;
        Ok(&self.value)
    }

    fn check_view(&self, view: usize) -> E2eResult<()> {
        if view >= self.views {
            return Err(E2eError::Oracle(format!(
                "view {} out of range ({} views)",
                view, self.views
            )));
        }
        Ok(())
    }
}

/// JSON value as the output viewer shows it
#[derive(Debug, Clone, PartialEq)]
pub enum JsonTree {
    Null,
    Bool(bool),
    Number(i64),
    String(String),
    /// Printed verbatim, e.g. dates
    Raw(String),
    Array(Vec<JsonTree>),
    /// Entries in insertion order
    Object(Vec<(String, JsonTree)>),
}

impl JsonTree {
    pub fn string(s: &str) -> Self {
        JsonTree::String(s.to_string())
    }

    pub fn object(entries: Vec<(&str, JsonTree)>) -> Self {
        JsonTree::Object(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    /// `innerText` of the rendered viewer: one line per entry, containers
    /// headed by their item count.
    pub fn inner_text(&self) -> String {
        let mut out = String::new();
        self.write_inner_text(&mut out);
        out
    }

    fn write_inner_text(&self, out: &mut String) {
        match self {
            JsonTree::Null => out.push_str("null"),
            JsonTree::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            JsonTree::Number(n) => out.push_str(&n.to_string()),
            JsonTree::String(s) => out.push_str(&serde_json::Value::String(s.clone()).to_string()),
            JsonTree::Raw(s) => out.push_str(s),
            JsonTree::Array(items) if items.is_empty() => out.push_str("[]"),
            JsonTree::Array(items) => {
                out.push('[');
                out.push_str(&item_count(items.len()));
                out.push('\n');
                for (index, item) in items.iter().enumerate() {
                    out.push_str(&format!("{}:", index));
                    item.write_inner_text(out);
                    out.push('\n');
                }
                out.push(']');
            }
            JsonTree::Object(entries) if entries.is_empty() => out.push_str("{}"),
            JsonTree::Object(entries) => {
                out.push('{');
                out.push_str(&item_count(entries.len()));
                out.push('\n');
                for (key, value) in entries {
                    out.push_str(&serde_json::Value::String(key.clone()).to_string());
                    out.push(':');
                    value.write_inner_text(out);
                    out.push('\n');
                }
                out.push('}');
            }
        }
    }
}

fn item_count(n: usize) -> String {
    if n == 1 {
        "1 Item".to_string()
    } else {
        format!("{} Items", n)
    }
}

/// Row-selectable table; the output cell shows the selected rows
#[derive(Debug, Clone)]
pub struct TableSelection {
    rows: Vec<JsonTree>,
    selected: Vec<usize>,
}

impl TableSelection {
    pub fn new(rows: Vec<JsonTree>) -> Self {
        Self {
            rows,
            selected: Vec::new(),
        }
    }

    /// Header checkbox: select every row, or clear when all are selected
    pub fn toggle_all(&mut self) {
        if self.selected.len() == self.rows.len() {
            self.selected.clear();
        } else {
            self.selected = (0..self.rows.len()).collect();
        }
    }

    pub fn toggle_row(&mut self, row: usize) -> E2eResult<()> {
        if row >= self.rows.len() {
            return Err(E2eError::Oracle(format!(
                "row {} out of range ({} rows)",
                row,
                self.rows.len()
            )));
        }
        match self.selected.iter().position(|&r| r == row) {
            Some(pos) => {
                self.selected.remove(pos);
            }
            None => self.selected.push(row),
        }
        Ok(())
    }

    pub fn value(&self) -> JsonTree {
        JsonTree::Array(self.selected.iter().map(|&r| self.rows[r].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(WidgetKind::Checkbox, "False")]
    #[test_case(WidgetKind::Switch, "False")]
    #[test_case(WidgetKind::Dropdown, "None")]
    #[test_case(WidgetKind::Slider { start: 1, stop: 10, step: 1 }, "1")]
    #[test_case(WidgetKind::Button, "0")]
    #[test_case(WidgetKind::Number, "1")]
    #[test_case(WidgetKind::Multiselect, "")]
    #[test_case(WidgetKind::FileArea, "None")]
    fn test_initial_output(kind: WidgetKind, expected: &str) {
        assert_eq!(WidgetModel::new(kind).output(), output_text(expected));
    }

    #[test_case(WidgetKind::Checkbox)]
    #[test_case(WidgetKind::Switch)]
    fn test_double_toggle_restores_value(kind: WidgetKind) {
        let mut model = WidgetModel::new(kind);
        let initial = model.value().clone();
        model.click().unwrap();
        assert_eq!(model.value(), &WidgetValue::Bool(true));
        model.click().unwrap();
        assert_eq!(model.value(), &initial);
    }

    #[test]
    fn test_multiselect_accumulates_in_order() {
        let mut model = WidgetModel::new(WidgetKind::Multiselect);
        model.select("b").unwrap();
        assert_eq!(model.output(), "The element's current value is b");
        model.select("c").unwrap();
        assert_eq!(model.output(), "The element's current value is b, c");
    }

    #[test]
    fn test_form_waits_for_submit() {
        let mut form = WidgetModel::new(WidgetKind::Form);
        form.fill("something!").unwrap();
        assert_eq!(form.value(), &WidgetValue::None);
        form.submit().unwrap();
        assert_eq!(form.value(), &WidgetValue::Text("something!".to_string()));
    }

    #[test]
    fn test_slider_drag_to_center() {
        let mut slider = WidgetModel::new(WidgetKind::Slider { start: 1, stop: 10, step: 1 });
        slider.drag_to_track_center().unwrap();
        assert_eq!(slider.value(), &WidgetValue::Int(6));
    }

    #[test]
    fn test_unsupported_interaction() {
        let mut dropdown = WidgetModel::new(WidgetKind::Dropdown);
        assert!(dropdown.click().is_err());
        assert!(WidgetModel::new(WidgetKind::Number).fill("five").is_err());
    }

    #[test]
    fn test_shared_binding_views_stay_in_sync() {
        let mut binding = SharedBinding::new(WidgetValue::Text(String::new()), 2);
        binding.set_from(0, WidgetValue::Text("hello".to_string())).unwrap();
        assert_eq!(binding.view(1).unwrap(), &WidgetValue::Text("hello".to_string()));
        binding.set_from(1, WidgetValue::Text("world".to_string())).unwrap();
        assert_eq!(binding.view(0).unwrap(), &WidgetValue::Text("world".to_string()));
        assert!(binding.view(2).is_err());
    }

    fn office_rows() -> Vec<JsonTree> {
        vec![
            JsonTree::object(vec![
                ("first_name", JsonTree::string("Michael")),
                ("last_name", JsonTree::string("Scott")),
            ]),
            JsonTree::object(vec![
                ("first_name", JsonTree::string("Dwight")),
                ("last_name", JsonTree::string("Schrute")),
            ]),
        ]
    }

    #[test]
    fn test_table_selection_rendering() {
        let mut table = TableSelection::new(office_rows());
        table.toggle_all();
        assert_eq!(
            table.value().inner_text(),
            "[2 Items\n0:{2 Items\n\"first_name\":\"Michael\"\n\"last_name\":\"Scott\"\n}\n1:{2 Items\n\"first_name\":\"Dwight\"\n\"last_name\":\"Schrute\"\n}\n]"
        );

        table.toggle_row(0).unwrap();
        assert_eq!(
            table.value().inner_text(),
            "[1 Item\n0:{2 Items\n\"first_name\":\"Dwight\"\n\"last_name\":\"Schrute\"\n}\n]"
        );
    }

    #[test]
    fn test_nested_dictionary_rendering() {
        let tree = JsonTree::object(vec![
            ("slider", JsonTree::Number(1)),
            ("text", JsonTree::string("something!")),
            (
                "array",
                JsonTree::Array(vec![JsonTree::Number(2), JsonTree::Number(0), JsonTree::Number(1)]),
            ),
        ]);
        assert_eq!(
            tree.inner_text(),
            "{3 Items\n\"slider\":1\n\"text\":\"something!\"\n\"array\":[3 Items\n0:2\n1:0\n2:1\n]\n}"
        );
    }

    #[test]
    fn test_raw_values_are_unquoted() {
        let tree = JsonTree::object(vec![
            ("name", JsonTree::string("hi again marimo")),
            ("date", JsonTree::Raw("2020-04-20".to_string())),
        ]);
        assert_eq!(
            tree.inner_text(),
            "{2 Items\n\"name\":\"hi again marimo\"\n\"date\":2020-04-20\n}"
        );
    }
}
