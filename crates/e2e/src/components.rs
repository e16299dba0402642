//! Built-in widget suite for the `components.py` notebook
//!
//! Every scenario opens the notebook, picks a widget from a demo cell's
//! `<select>`, drives it and checks the output cell. Expected outputs come
//! from the widget models in [`crate::oracle`].

use marimo_dev_common::Registry;

use crate::error::E2eResult;
use crate::locator::Locator;
use crate::oracle::{JsonTree, SharedBinding, TableSelection, WidgetKind, WidgetModel, WidgetValue};
use crate::spec::{TestSpec, TestStep};

/// Notebook the suite runs against
pub const COMPONENTS_APP: &str = "components.py";

/// Cell holding the basic widget picker
const BASIC_PICKER_CELL: usize = 1;
/// Cell holding the composite widget picker
const COMPLEX_PICKER_CELL: usize = 4;
const BASIC_WIDGET_CELL: usize = 2;
const TABLE_OUTPUT_CELL: usize = 3;
const COMPLEX_OUTPUT_CELL: usize = 6;

fn cell(index: usize) -> Locator {
    Locator::css(".marimo-cell").nth(index)
}

fn json_output(cell_index: usize) -> Locator {
    Locator::css(".marimo-json-output").within(cell(cell_index)).first()
}

/// Screenshot name derived from a scenario name
fn screenshot_name(scenario: &str) -> String {
    let mut slug = String::new();
    for c in scenario.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    format!("components-{}", slug.trim_matches('-'))
}

struct ScenarioBuilder {
    spec: TestSpec,
}

impl ScenarioBuilder {
    fn new(name: &str) -> Self {
        let mut spec = TestSpec::new(
            name,
            vec![TestStep::Navigate {
                url: "/".to_string(),
                wait_for: None,
            }],
        );
        spec.app = Some(COMPONENTS_APP.to_string());
        spec.tags = vec!["components".to_string()];
        Self { spec }
    }

    fn push(&mut self, step: TestStep) {
        self.spec.steps.push(step);
    }

    fn select_basic(&mut self, label: &str) {
        self.select_option(Locator::css("select").within(cell(BASIC_PICKER_CELL)), label);
    }

    fn select_complex(&mut self, label: &str) {
        self.select_option(Locator::css("select").within(cell(COMPLEX_PICKER_CELL)), label);
    }

    fn select_option(&mut self, target: Locator, label: &str) {
        self.push(TestStep::SelectOption {
            target,
            label: label.to_string(),
        });
    }

    fn click(&mut self, target: &Locator) {
        self.push(TestStep::Click {
            target: target.clone(),
            timeout_ms: None,
        });
    }

    fn fill(&mut self, target: &Locator, value: &str) {
        self.push(TestStep::Fill {
            target: target.clone(),
            value: value.to_string(),
        });
    }

    fn blur(&mut self, target: &Locator) {
        self.push(TestStep::Blur {
            target: target.clone(),
        });
    }

    fn drag_to(&mut self, target: &Locator, destination: Locator) {
        self.push(TestStep::DragTo {
            target: target.clone(),
            destination,
        });
    }

    fn assert(&mut self, target: &Locator) -> &mut TestStep {
        self.push(TestStep::Assert {
            target: target.clone(),
            visible: None,
            text: None,
            inner_text: None,
            contains: None,
            value: None,
            count: None,
        });
        let last = self.spec.steps.len() - 1;
        &mut self.spec.steps[last]
    }

    fn expect_visible(&mut self, target: &Locator) {
        if let TestStep::Assert { visible, .. } = self.assert(target) {
            *visible = Some(true);
        }
    }

    fn expect_hidden(&mut self, target: &Locator) {
        if let TestStep::Assert { visible, .. } = self.assert(target) {
            *visible = Some(false);
        }
    }

    fn expect_count(&mut self, target: &Locator, n: usize) {
        if let TestStep::Assert { count, .. } = self.assert(target) {
            *count = Some(n);
        }
    }

    fn expect_value(&mut self, target: &Locator, expected: &WidgetValue) {
        let expected = expected.to_string();
        if let TestStep::Assert { value, .. } = self.assert(target) {
            *value = Some(expected);
        }
    }

    fn expect_inner_text(&mut self, target: &Locator, tree: &JsonTree) {
        let expected = tree.inner_text();
        if let TestStep::Assert { inner_text, .. } = self.assert(target) {
            *inner_text = Some(expected);
        }
    }

    /// The output cell shows the model's current value
    fn verify_output(&mut self, model: &WidgetModel) {
        self.expect_visible(&Locator::text(&model.output()));
    }

    fn skip(mut self) -> Self {
        self.spec.skip = true;
        self
    }

    fn build(mut self) -> TestSpec {
        let name = screenshot_name(&self.spec.name);
        self.push(TestStep::Screenshot {
            name,
            target: None,
            full_page: false,
        });
        self.spec
    }
}

fn read_only_view() -> E2eResult<TestSpec> {
    let mut s = ScenarioBuilder::new("page renders read only view in read mode");
    s.spec.description = "Run mode hides the filename and editing controls".to_string();

    s.expect_hidden(&Locator::text(COMPONENTS_APP).last());
    s.expect_count(&Locator::css("#save-button"), 0);
    s.expect_visible(&Locator::text("UI Elements").within(Locator::css("h1")));
    Ok(s.build())
}

fn button() -> E2eResult<TestSpec> {
    let mut model = WidgetModel::new(WidgetKind::Button);
    let mut s = ScenarioBuilder::new("button");
    s.select_basic("button");
    let element = Locator::text("click me").within(Locator::css("button"));

    s.expect_visible(&element);
    s.verify_output(&model);
    s.click(&element);
    model.click()?;
    s.verify_output(&model);
    Ok(s.build())
}

/// Boolean widgets: two toggles return to the start value
fn toggle(name: &str, kind: WidgetKind, element: Locator) -> E2eResult<TestSpec> {
    let mut model = WidgetModel::new(kind);
    let mut s = ScenarioBuilder::new(name);
    s.select_basic(name);

    s.expect_visible(&element);
    s.verify_output(&model);
    for _ in 0..2 {
        s.click(&element);
        model.click()?;
        s.verify_output(&model);
    }
    Ok(s.build())
}

fn date() -> E2eResult<TestSpec> {
    let mut model = WidgetModel::new(WidgetKind::Date);
    let mut s = ScenarioBuilder::new("date");
    s.select_basic("date");
    let element = Locator::role("textbox");

    s.expect_visible(&element);
    s.fill(&element, "2020-01-20");
    model.fill("2020-01-20")?;
    s.verify_output(&model);
    Ok(s.skip().build())
}

fn dropdown() -> E2eResult<TestSpec> {
    let mut model = WidgetModel::new(WidgetKind::Dropdown);
    let mut s = ScenarioBuilder::new("dropdown");
    s.select_basic("dropdown");
    let element = Locator::role("combobox").within(cell(BASIC_WIDGET_CELL));

    s.expect_visible(&element);
    s.verify_output(&model);
    s.select_option(element, "b");
    model.select("b")?;
    s.verify_output(&model);
    Ok(s.build())
}

/// File widgets render an empty value until something is uploaded
fn file_widget(name: &str, kind: WidgetKind, element: Locator) -> E2eResult<TestSpec> {
    let model = WidgetModel::new(kind);
    let mut s = ScenarioBuilder::new(name);
    s.select_basic(name);

    s.expect_visible(&element);
    s.verify_output(&model);
    Ok(s.build())
}

fn multiselect() -> E2eResult<TestSpec> {
    let mut model = WidgetModel::new(WidgetKind::Multiselect);
    let mut s = ScenarioBuilder::new("multiselect");
    s.select_basic("multiselect");
    let opener = Locator::css("marimo-multiselect div svg").last();

    s.expect_visible(&opener);
    s.verify_output(&model);
    for option in ["b", "c"] {
        s.click(&opener);
        s.click(&Locator::exact_text(option));
        model.select(option)?;
        s.verify_output(&model);
    }
    Ok(s.build())
}

fn number() -> E2eResult<TestSpec> {
    let mut model = WidgetModel::new(WidgetKind::Number);
    let mut s = ScenarioBuilder::new("number");
    s.select_basic("number");
    let element = Locator::css("input").within(Locator::test_id("marimo-plugin-number-input"));

    s.expect_visible(&element);
    s.verify_output(&model);
    s.fill(&element, "5");
    s.blur(&element.clone().first());
    model.fill("5")?;
    s.verify_output(&model);
    Ok(s.build())
}

fn radio() -> E2eResult<TestSpec> {
    let mut model = WidgetModel::new(WidgetKind::Radio);
    let mut s = ScenarioBuilder::new("radio");
    s.select_basic("radio");
    let option = |label: &str| Locator::text(label).within(Locator::role("radiogroup"));

    s.expect_visible(&option("a"));
    s.verify_output(&model);
    s.click(&option("b"));
    model.select("b")?;
    s.verify_output(&model);
    Ok(s.build())
}

fn slider() -> E2eResult<TestSpec> {
    let mut model = WidgetModel::new(WidgetKind::Slider {
        start: 1,
        stop: 10,
        step: 1,
    });
    let mut s = ScenarioBuilder::new("slider");
    s.select_basic("slider");
    let element = Locator::role("slider");

    s.expect_visible(&element);
    s.verify_output(&model);
    s.drag_to(&element, Locator::test_id("track"));
    model.drag_to_track_center()?;
    s.verify_output(&model);
    Ok(s.build())
}

fn office_rows() -> Vec<JsonTree> {
    [("Michael", "Scott"), ("Dwight", "Schrute")]
        .into_iter()
        .map(|(first, last)| {
            JsonTree::object(vec![
                ("first_name", JsonTree::string(first)),
                ("last_name", JsonTree::string(last)),
            ])
        })
        .collect()
}

fn table() -> E2eResult<TestSpec> {
    let mut selection = TableSelection::new(office_rows());
    let mut s = ScenarioBuilder::new("table");
    s.select_basic("table");
    let output = json_output(TABLE_OUTPUT_CELL);

    s.expect_visible(&Locator::text("Michael"));

    // Header checkbox selects every row
    s.click(&Locator::role("checkbox").first());
    selection.toggle_all();
    s.expect_inner_text(&output, &selection.value());

    // First row's checkbox
    s.click(&Locator::role("checkbox").nth(1));
    selection.toggle_row(0)?;
    s.expect_inner_text(&output, &selection.value());
    Ok(s.build())
}

fn text_input(name: &str, kind: WidgetKind) -> E2eResult<TestSpec> {
    let mut model = WidgetModel::new(kind);
    let mut s = ScenarioBuilder::new(name);
    s.select_basic(name);
    let element = Locator::role("textbox");

    s.expect_visible(&element);
    s.fill(&element, "hello");
    s.blur(&element.clone().first());
    model.fill("hello")?;
    s.verify_output(&model);
    Ok(s.build())
}

fn complex_array() -> E2eResult<TestSpec> {
    let mut text = WidgetModel::new(WidgetKind::Text);
    let mut slider = WidgetModel::new(WidgetKind::Slider {
        start: 0,
        stop: 10,
        step: 1,
    });
    let mut date = WidgetModel::new(WidgetKind::Date);
    let mut s = ScenarioBuilder::new("complex - array");
    s.select_complex("array");

    let textbox = Locator::role("textbox").first();
    let slider_thumb = Locator::role("slider");
    let date_input = Locator::role("textbox").last();
    s.expect_visible(&textbox);
    s.expect_visible(&slider_thumb);
    s.expect_visible(&date_input);

    s.fill(&textbox, "hi marimo");
    text.fill("hi marimo")?;
    s.drag_to(&slider_thumb, Locator::test_id("track").first());
    slider.drag_to_track_center()?;
    s.fill(&date_input, "2020-01-20");
    date.fill("2020-01-20")?;

    let expected = JsonTree::Array(vec![text.json(), slider.json(), date.json()]);
    s.expect_inner_text(&json_output(COMPLEX_OUTPUT_CELL), &expected);
    Ok(s.skip().build())
}

fn complex_batch() -> E2eResult<TestSpec> {
    let mut name = WidgetModel::new(WidgetKind::Text);
    let mut date = WidgetModel::new(WidgetKind::Date);
    let mut s = ScenarioBuilder::new("complex - batch");
    s.select_complex("batch");

    let textbox = Locator::role("textbox").first();
    let date_input = Locator::role("textbox").last();
    s.expect_visible(&textbox);
    s.expect_visible(&date_input);

    s.fill(&textbox, "hi again marimo");
    name.fill("hi again marimo")?;
    s.fill(&date_input, "2020-04-20");
    date.fill("2020-04-20")?;

    let expected = JsonTree::object(vec![("name", name.json()), ("date", date.json())]);
    s.expect_inner_text(&json_output(COMPLEX_OUTPUT_CELL), &expected);
    Ok(s.skip().build())
}

fn complex_dictionary() -> E2eResult<TestSpec> {
    let slider = WidgetModel::new(WidgetKind::Slider {
        start: 1,
        stop: 10,
        step: 1,
    });
    let mut text = WidgetModel::new(WidgetKind::Text);
    let mut counters = vec![WidgetModel::new(WidgetKind::Button); 3];
    let mut s = ScenarioBuilder::new("complex - dictionary");
    s.select_complex("dictionary");

    let textbox = Locator::role("textbox").first();
    let buttons = Locator::text("click here").within(Locator::css("button:visible"));
    s.expect_visible(&textbox);
    s.expect_count(&buttons, counters.len());

    s.fill(&textbox, "something!");
    text.fill("something!")?;
    for _ in 0..2 {
        s.click(&buttons.clone().first());
        counters[0].click()?;
    }
    s.click(&buttons.clone().last());
    counters[2].click()?;

    let expected = JsonTree::object(vec![
        ("slider", slider.json()),
        ("text", text.json()),
        ("array", JsonTree::Array(counters.iter().map(WidgetModel::json).collect())),
    ]);
    s.expect_inner_text(&json_output(COMPLEX_OUTPUT_CELL), &expected);
    Ok(s.build())
}

fn complex_form() -> E2eResult<TestSpec> {
    let mut form = WidgetModel::new(WidgetKind::Form);
    let mut s = ScenarioBuilder::new("complex - form");
    s.select_complex("form");
    let textarea = Locator::css("textarea:visible");

    s.expect_visible(&textarea);
    s.verify_output(&form);
    s.fill(&textarea, "something!");
    form.fill("something!")?;
    // Unchanged until submit
    s.verify_output(&form);

    s.click(&Locator::text("Submit").within(Locator::css("button:visible")));
    form.submit()?;
    s.verify_output(&form);
    Ok(s.build())
}

/// Two text inputs and two number inputs bound to the same values
fn complex_reused(name: &str, label: &str) -> E2eResult<TestSpec> {
    let mut s = ScenarioBuilder::new(name);
    s.select_complex(label);

    let textbox = Locator::test_id("marimo-plugin-text-input");
    let number = Locator::css("input").within(Locator::test_id("marimo-plugin-number-input"));
    let mut text_value = SharedBinding::new(WidgetValue::Text(String::new()), 2);
    let mut number_value = SharedBinding::new(WidgetValue::Int(1), 2);

    s.expect_count(&textbox, text_value.views());
    s.expect_count(&number, number_value.views());

    for (edited, other, text, n) in [(0, 1, "hello", 5), (1, 0, "world", 10)] {
        let pick = |locator: &Locator, view: usize| {
            if view == 0 {
                locator.clone().first()
            } else {
                locator.clone().last()
            }
        };

        s.fill(&pick(&textbox, edited), text);
        text_value.set_from(edited, WidgetValue::Text(text.to_string()))?;
        s.fill(&pick(&number, edited), &n.to_string());
        s.blur(&pick(&number, edited));
        number_value.set_from(edited, WidgetValue::Int(n))?;

        s.expect_value(&pick(&textbox, other), text_value.view(other)?);
        s.expect_value(&pick(&number, other), number_value.view(other)?);
    }
    Ok(s.build())
}

/// The full suite in declaration order
pub fn component_suite() -> E2eResult<Vec<TestSpec>> {
    Ok(vec![
        read_only_view()?,
        button()?,
        toggle("checkbox", WidgetKind::Checkbox, Locator::text("check me"))?,
        date()?,
        dropdown()?,
        file_widget(
            "file button",
            WidgetKind::FileButton,
            Locator::role_named("button", "Upload", true),
        )?,
        file_widget(
            "file area",
            WidgetKind::FileArea,
            Locator::text("Drag and drop files here"),
        )?,
        file_widget(
            "file area single",
            WidgetKind::FileArea,
            Locator::text("Drag and drop a file here"),
        )?,
        multiselect()?,
        number()?,
        radio()?,
        slider()?,
        toggle("switch", WidgetKind::Switch, Locator::role("switch"))?,
        table()?,
        text_input("text", WidgetKind::Text)?,
        text_input("text_area", WidgetKind::TextArea)?,
        complex_array()?,
        complex_batch()?,
        complex_dictionary()?,
        complex_form()?,
        complex_reused("complex - reused in json", "reused-in-json")?,
        complex_reused("complex - reused in markdown", "reused-in-markdown")?,
    ])
}

/// Register the suite under its scenario names
pub fn register_builtin(registry: &mut Registry<TestSpec>) -> E2eResult<()> {
    for spec in component_suite()? {
        let name = spec.name.clone();
        registry.register(&name, spec);
    }
    Ok(())
}
