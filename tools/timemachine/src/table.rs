//! Display table builder.
//!
//! Column-oriented: each [`Column`] owns its values, so moving or hiding a
//! column never touches row data. Labels, titles and notes are [`CellText`],
//! which is either escaped plain text or caller-supplied HTML.

use crate::errors::{StepFailure, TimeMachineError};
use crate::pipeline::recorder::PipelineRecorder;
use crate::recordable::Recordable;
use crate::render::{escape_html, Renderable};
use crate::step::{bind, BoundArgs, Signature, Step};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const TABLE_METHODS: [&str; 15] = [
    "tab_header",
    "tab_spanner",
    "tab_source_note",
    "tab_stubhead",
    "cols_label",
    "cols_move",
    "cols_move_to_start",
    "cols_move_to_end",
    "cols_hide",
    "cols_unhide",
    "cols_align",
    "fmt_number",
    "sub_missing",
    "opt_stylize",
    "opt_all_caps",
];

pub const STYLE_COLORS: [&str; 6] = ["blue", "cyan", "pink", "green", "red", "gray"];

const HEADER: Signature = Signature::new(&["title", "subtitle"]);
const SPANNER: Signature = Signature::new(&["label", "columns"]);
const SOURCE_NOTE: Signature = Signature::new(&["source_note"]);
const STUBHEAD: Signature = Signature::new(&["label"]);
const LABELS: Signature = Signature::with_var_keyword(&[]);
const MOVE: Signature = Signature::new(&["columns", "after"]);
const COLUMNS: Signature = Signature::new(&["columns"]);
const ALIGN: Signature = Signature::new(&["align", "columns"]);
const NUMBER: Signature = Signature::new(&["columns", "decimals", "use_seps"]);
const MISSING: Signature = Signature::new(&["columns", "missing_text"]);
const STYLIZE: Signature = Signature::new(&["style", "color"]);
const ALL_CAPS: Signature = Signature::new(&["all_caps"]);
const CONSTRUCT: Signature = Signature::new(&["data", "rowname_col"]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellText {
    Plain(String),
    Html(String),
}

impl CellText {
    /// Plain strings, or `{"html": "..."}` for raw markup.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(Self::Plain(text.clone())),
            Value::Object(map) if map.len() == 1 => match map.iter().next() {
                Some((key, Value::String(text))) if key == "html" => Some(Self::Html(text.clone())),
                Some((key, Value::String(text))) if key == "plain" => {
                    Some(Self::Plain(text.clone()))
                }
                _ => None,
            },
            _ => None,
        }
    }

    pub fn to_markup(&self) -> String {
        match self {
            Self::Plain(text) => escape_html(text),
            Self::Html(markup) => markup.clone(),
        }
    }

    pub fn to_plain(&self) -> String {
        match self {
            Self::Plain(text) => text.clone(),
            Self::Html(markup) => strip_tags(markup),
        }
    }
}

/// Argument payload marking `markup` as raw HTML.
pub fn html(markup: &str) -> Value {
    json!({ "html": markup })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    /// Numbers right, everything else left.
    #[default]
    Auto,
    Left,
    Center,
    Right,
}

impl Align {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::Auto),
            "left" => Some(Self::Left),
            "center" => Some(Self::Center),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberFormat {
    pub decimals: u32,
    pub use_seps: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub label: CellText,
    pub values: Vec<Value>,
    pub hidden: bool,
    pub align: Align,
    pub number_format: Option<NumberFormat>,
    pub missing_text: Option<String>,
}

impl Column {
    fn new(name: String, values: Vec<Value>) -> Self {
        Self {
            label: CellText::Plain(name.clone()),
            name,
            values,
            hidden: false,
            align: Align::Auto,
            number_format: None,
            missing_text: None,
        }
    }

    pub fn formatted(&self, row: usize) -> String {
        match self.values.get(row) {
            None | Some(Value::Null) => self.missing_text.clone().unwrap_or_default(),
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(number)) => match (self.number_format, number.as_f64()) {
                (Some(format), Some(value)) => format_number(value, format),
                _ => number.to_string(),
            },
            Some(other) => other.to_string(),
        }
    }

    fn resolved_align(&self) -> Align {
        match self.align {
            Align::Auto if self.values.iter().any(Value::is_number) => Align::Right,
            Align::Auto => Align::Left,
            explicit => explicit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub title: CellText,
    pub subtitle: Option<CellText>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spanner {
    pub label: CellText,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stylize {
    pub style: u8,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    pub stylize: Option<Stylize>,
    pub all_caps: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub header: Option<Header>,
    pub stub: Option<String>,
    pub stubhead: Option<CellText>,
    pub spanners: Vec<Spanner>,
    pub columns: Vec<Column>,
    pub row_count: usize,
    pub source_notes: Vec<CellText>,
    pub options: TableOptions,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, StepFailure> {
        for (position, name) in columns.iter().enumerate() {
            if columns[..position].contains(name) {
                return Err(StepFailure::new(format!("duplicate column name '{name}'")));
            }
        }

        let mut values = vec![Vec::with_capacity(rows.len()); columns.len()];
        for (row_index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(StepFailure::new(format!(
                    "row {row_index} has {} values but there are {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            for (column, value) in values.iter_mut().zip(row.iter()) {
                column.push(value.clone());
            }
        }

        Ok(Self {
            header: None,
            stub: None,
            stubhead: None,
            spanners: Vec::new(),
            columns: columns
                .into_iter()
                .zip(values)
                .map(|(name, values)| Column::new(name, values))
                .collect(),
            row_count: rows.len(),
            source_notes: Vec::new(),
            options: TableOptions::default(),
        })
    }

    /// Use `name` as the row-label stub: rendered first, as row headers.
    pub fn with_stub(mut self, name: &str) -> Result<Self, StepFailure> {
        self.position(name)?;
        self.stub = Some(name.to_string());
        Ok(self)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    /// Visible columns in display order, stub first.
    pub fn display_columns(&self) -> Vec<&Column> {
        let stub = self
            .stub
            .as_deref()
            .and_then(|name| self.column(name))
            .filter(|column| !column.hidden);
        stub.into_iter()
            .chain(
                self.columns
                    .iter()
                    .filter(|column| !column.hidden && Some(column.name.as_str()) != self.stub.as_deref()),
            )
            .collect()
    }

    fn position(&self, name: &str) -> Result<usize, StepFailure> {
        self.columns
            .iter()
            .position(|column| column.name == name)
            .ok_or_else(|| StepFailure::new(format!("column '{name}' does not exist")))
    }

    fn check_columns(&self, names: &[String]) -> Result<(), StepFailure> {
        for name in names {
            self.position(name)?;
        }
        Ok(())
    }

    fn columns_or_all(&self, names: Option<Vec<String>>) -> Result<Vec<String>, StepFailure> {
        match names {
            Some(names) => {
                self.check_columns(&names)?;
                Ok(names)
            }
            None => Ok(self.columns.iter().map(|column| column.name.clone()).collect()),
        }
    }

    fn for_columns(&mut self, names: &[String], mut f: impl FnMut(&mut Column)) {
        for column in self.columns.iter_mut().filter(|column| names.contains(&column.name)) {
            f(column);
        }
    }

    /// Removes `names` (validated) and returns them in the order given.
    fn take_columns(&mut self, names: &[String]) -> Result<Vec<Column>, StepFailure> {
        self.check_columns(names)?;
        let mut taken = Vec::with_capacity(names.len());
        for name in names {
            if let Some(position) = self.columns.iter().position(|column| &column.name == name) {
                taken.push(self.columns.remove(position));
            }
        }
        Ok(taken)
    }

    fn spanner_of(&self, name: &str) -> Option<usize> {
        self.spanners
            .iter()
            .position(|spanner| spanner.columns.iter().any(|column| column == name))
    }

    fn tab_header(&mut self, args: &BoundArgs<'_>) -> Result<(), StepFailure> {
        let title = cell_text(args, "title")?;
        let subtitle = match args.optional("subtitle") {
            Some(value) => Some(
                CellText::from_value(value)
                    .ok_or_else(|| StepFailure::new("tab_header() argument 'subtitle' must be text"))?,
            ),
            None => None,
        };
        self.header = Some(Header { title, subtitle });
        Ok(())
    }

    fn tab_spanner(&mut self, args: &BoundArgs<'_>) -> Result<(), StepFailure> {
        let label = cell_text(args, "label")?;
        let columns = args.required_names("columns")?;
        if columns.is_empty() {
            return Err(StepFailure::new("tab_spanner() needs at least one column"));
        }
        self.check_columns(&columns)?;
        for name in &columns {
            if let Some(existing) = self.spanner_of(name) {
                return Err(StepFailure::new(format!(
                    "column '{name}' already belongs to spanner '{}'",
                    self.spanners[existing].label.to_plain()
                )));
            }
        }
        self.spanners.push(Spanner { label, columns });
        Ok(())
    }

    fn cols_label(&mut self, args: &BoundArgs<'_>) -> Result<(), StepFailure> {
        if args.extra().is_empty() {
            return Err(StepFailure::new("cols_label() needs at least one column=label pair"));
        }
        let mut labels = Vec::with_capacity(args.extra().len());
        for (name, value) in args.extra() {
            let position = self.position(name)?;
            let label = CellText::from_value(value).ok_or_else(|| {
                StepFailure::new(format!("cols_label() label for '{name}' must be text"))
            })?;
            labels.push((position, label));
        }
        for (position, label) in labels {
            self.columns[position].label = label;
        }
        Ok(())
    }

    fn cols_move(&mut self, args: &BoundArgs<'_>) -> Result<(), StepFailure> {
        let names = args.required_names("columns")?;
        let after = args.required_str("after")?.to_string();
        if names.contains(&after) {
            return Err(StepFailure::new(format!(
                "cols_move() cannot move column '{after}' after itself"
            )));
        }
        self.position(&after)?;
        let moved = self.take_columns(&names)?;
        let anchor = self.position(&after)?;
        for (offset, column) in moved.into_iter().enumerate() {
            self.columns.insert(anchor + 1 + offset, column);
        }
        Ok(())
    }

    fn cols_move_to(&mut self, args: &BoundArgs<'_>, to_start: bool) -> Result<(), StepFailure> {
        let names = args.required_names("columns")?;
        let moved = self.take_columns(&names)?;
        if to_start {
            let rest = std::mem::replace(&mut self.columns, moved);
            self.columns.extend(rest);
        } else {
            self.columns.extend(moved);
        }
        Ok(())
    }

    fn cols_set_hidden(&mut self, args: &BoundArgs<'_>, hidden: bool) -> Result<(), StepFailure> {
        let names = args.required_names("columns")?;
        self.check_columns(&names)?;
        self.for_columns(&names, |column| column.hidden = hidden);
        Ok(())
    }

    fn cols_align(&mut self, args: &BoundArgs<'_>) -> Result<(), StepFailure> {
        let raw = args.optional_str("align")?.unwrap_or("left");
        let align = Align::parse(raw).ok_or_else(|| {
            StepFailure::new(format!(
                "cols_align() align must be one of auto, left, center, right; got '{raw}'"
            ))
        })?;
        let names = self.columns_or_all(args.optional_names("columns")?)?;
        self.for_columns(&names, |column| column.align = align);
        Ok(())
    }

    fn fmt_number(&mut self, args: &BoundArgs<'_>) -> Result<(), StepFailure> {
        let names = args.required_names("columns")?;
        self.check_columns(&names)?;
        let decimals = args.optional_u64("decimals")?.unwrap_or(2);
        if decimals > 12 {
            return Err(StepFailure::new("fmt_number() decimals must be at most 12"));
        }
        let format = NumberFormat {
            decimals: decimals as u32,
            use_seps: args.optional_bool("use_seps")?.unwrap_or(true),
        };
        self.for_columns(&names, |column| column.number_format = Some(format));
        Ok(())
    }

    fn sub_missing(&mut self, args: &BoundArgs<'_>) -> Result<(), StepFailure> {
        let names = self.columns_or_all(args.optional_names("columns")?)?;
        let text = args.optional_str("missing_text")?.unwrap_or("---").to_string();
        self.for_columns(&names, |column| column.missing_text = Some(text.clone()));
        Ok(())
    }

    fn opt_stylize(&mut self, args: &BoundArgs<'_>) -> Result<(), StepFailure> {
        let style = args.optional_u64("style")?.unwrap_or(1);
        if !(1..=6).contains(&style) {
            return Err(StepFailure::new(format!(
                "opt_stylize() style must be between 1 and 6; got {style}"
            )));
        }
        let color = args.optional_str("color")?.unwrap_or("blue");
        if !STYLE_COLORS.contains(&color) {
            return Err(StepFailure::new(format!(
                "opt_stylize() color must be one of {}; got '{color}'",
                STYLE_COLORS.join(", ")
            )));
        }
        self.options.stylize = Some(Stylize {
            style: style as u8,
            color: color.to_string(),
        });
        Ok(())
    }

    fn markup(&self) -> String {
        let columns = self.display_columns();
        let width = columns.len().max(1);
        let mut classes = vec!["tm-table".to_string()];
        if let Some(stylize) = &self.options.stylize {
            classes.push(format!("tm-style-{}", stylize.style));
            classes.push(format!("tm-color-{}", stylize.color));
        }
        if self.options.all_caps {
            classes.push("tm-all-caps".to_string());
        }

        let mut out = format!("<table class=\"{}\">\n<thead>\n", classes.join(" "));
        if let Some(header) = &self.header {
            out.push_str(&format!(
                "<tr class=\"tm-title\"><th colspan=\"{width}\">{}</th></tr>\n",
                header.title.to_markup()
            ));
            if let Some(subtitle) = &header.subtitle {
                out.push_str(&format!(
                    "<tr class=\"tm-subtitle\"><th colspan=\"{width}\">{}</th></tr>\n",
                    subtitle.to_markup()
                ));
            }
        }

        if !self.spanners.is_empty() {
            out.push_str("<tr class=\"tm-spanners\">");
            for (label, span) in self.spanner_groups(&columns) {
                let label = label.map(CellText::to_markup).unwrap_or_default();
                if span > 1 {
                    out.push_str(&format!("<th colspan=\"{span}\">{label}</th>"));
                } else {
                    out.push_str(&format!("<th>{label}</th>"));
                }
            }
            out.push_str("</tr>\n");
        }

        out.push_str("<tr class=\"tm-labels\">");
        for column in &columns {
            let label = if self.is_stub(column) {
                self.stubhead.as_ref().map(CellText::to_markup).unwrap_or_default()
            } else {
                column.label.to_markup()
            };
            out.push_str(&format!(
                "<th style=\"text-align: {}\">{label}</th>",
                column.resolved_align().as_str()
            ));
        }
        out.push_str("</tr>\n</thead>\n<tbody>\n");

        for row in 0..self.row_count {
            out.push_str("<tr>");
            for column in &columns {
                let cell = escape_html(&column.formatted(row));
                let align = column.resolved_align().as_str();
                if self.is_stub(column) {
                    out.push_str(&format!(
                        "<th scope=\"row\" style=\"text-align: {align}\">{cell}</th>"
                    ));
                } else {
                    out.push_str(&format!("<td style=\"text-align: {align}\">{cell}</td>"));
                }
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</tbody>\n");

        if !self.source_notes.is_empty() {
            out.push_str("<tfoot>\n");
            for note in &self.source_notes {
                out.push_str(&format!(
                    "<tr class=\"tm-source-note\"><td colspan=\"{width}\">{}</td></tr>\n",
                    note.to_markup()
                ));
            }
            out.push_str("</tfoot>\n");
        }
        out.push_str("</table>");
        out
    }

    fn plain_text(&self) -> String {
        let columns = self.display_columns();
        let labels = columns
            .iter()
            .map(|column| {
                let label = if self.is_stub(column) {
                    self.stubhead.as_ref().map(CellText::to_plain).unwrap_or_default()
                } else {
                    column.label.to_plain()
                };
                if self.options.all_caps {
                    label.to_uppercase()
                } else {
                    label
                }
            })
            .collect::<Vec<_>>();
        let cells = (0..self.row_count)
            .map(|row| columns.iter().map(|column| column.formatted(row)).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let widths = columns
            .iter()
            .enumerate()
            .map(|(index, _)| {
                cells
                    .iter()
                    .map(|row| text_width(&row[index]))
                    .chain(std::iter::once(text_width(&labels[index])))
                    .max()
                    .unwrap_or(0)
            })
            .collect::<Vec<_>>();
        let total = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);

        let mut lines = Vec::new();
        if let Some(header) = &self.header {
            lines.push(pad(&header.title.to_plain(), total, Align::Center));
            if let Some(subtitle) = &header.subtitle {
                lines.push(pad(&subtitle.to_plain(), total, Align::Center));
            }
        }

        if !self.spanners.is_empty() {
            let mut parts = Vec::new();
            let mut start = 0;
            for (label, span) in self.spanner_groups(&columns) {
                let group_width = widths[start..start + span].iter().sum::<usize>() + 2 * (span - 1);
                let text = label.map(CellText::to_plain).unwrap_or_default();
                parts.push(pad(&text, group_width, Align::Center));
                start += span;
            }
            lines.push(parts.join("  "));
        }

        lines.push(join_row(&labels, &widths, &columns));
        lines.push("-".repeat(total));
        for row in &cells {
            lines.push(join_row(row, &widths, &columns));
        }
        for note in &self.source_notes {
            lines.push(note.to_plain());
        }

        lines
            .into_iter()
            .map(|line| line.trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Consecutive display columns sharing a spanner, as `(label, span)`.
    fn spanner_groups(&self, columns: &[&Column]) -> Vec<(Option<&CellText>, usize)> {
        let mut groups: Vec<(Option<usize>, usize)> = Vec::new();
        for column in columns {
            let spanner = if self.is_stub(column) {
                None
            } else {
                self.spanner_of(&column.name)
            };
            match groups.last_mut() {
                Some((last, span)) if spanner.is_some() && *last == spanner => *span += 1,
                _ => groups.push((spanner, 1)),
            }
        }
        groups
            .into_iter()
            .map(|(spanner, span)| (spanner.map(|index| &self.spanners[index].label), span))
            .collect()
    }

    fn is_stub(&self, column: &Column) -> bool {
        self.stub.as_deref() == Some(column.name.as_str())
    }
}

impl Renderable for Table {
    fn render_markup(&self) -> Option<String> {
        Some(self.markup())
    }

    fn render_plain_text(&self) -> Option<String> {
        Some(self.plain_text())
    }

    fn render_structured(&self) -> Option<Value> {
        serde_json::to_value(self).ok()
    }

    fn kind_name(&self) -> &'static str {
        "table"
    }
}

impl Recordable for Table {
    /// `data` is `{"columns": [...], "rows": [[...], ...]}`; `rowname_col` picks the stub.
    fn construct(args: &[Value], kwargs: &BTreeMap<String, Value>) -> Result<Self, StepFailure> {
        let step = Step {
            method: "Table".to_string(),
            args: args.to_vec(),
            kwargs: kwargs.clone(),
        };
        let bound = bind(&step, &CONSTRUCT)?;
        let data = bound.required("data")?;
        let columns = data
            .get("columns")
            .and_then(Value::as_array)
            .ok_or_else(|| StepFailure::new("table data needs a 'columns' list"))?
            .iter()
            .map(|name| {
                name.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| StepFailure::new("column names must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let rows = match data.get("rows") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(rows)) => rows
                .iter()
                .map(|row| {
                    row.as_array()
                        .cloned()
                        .ok_or_else(|| StepFailure::new("each table row must be a list"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(StepFailure::new("table 'rows' must be a list of lists")),
        };

        let table = Table::new(columns, rows)?;
        match bound.optional_str("rowname_col")? {
            Some(stub) => table.with_stub(stub),
            None => Ok(table),
        }
    }

    fn supported_methods() -> &'static [&'static str] {
        &TABLE_METHODS
    }

    fn apply(&mut self, step: &Step) -> Result<(), StepFailure> {
        match step.method.as_str() {
            "tab_header" => self.tab_header(&bind(step, &HEADER)?),
            "tab_spanner" => self.tab_spanner(&bind(step, &SPANNER)?),
            "tab_source_note" => {
                let note = cell_text(&bind(step, &SOURCE_NOTE)?, "source_note")?;
                self.source_notes.push(note);
                Ok(())
            }
            "tab_stubhead" => {
                let label = cell_text(&bind(step, &STUBHEAD)?, "label")?;
                if self.stub.is_none() {
                    return Err(StepFailure::new("tab_stubhead() needs a table built with rowname_col"));
                }
                self.stubhead = Some(label);
                Ok(())
            }
            "cols_label" => self.cols_label(&bind(step, &LABELS)?),
            "cols_move" => self.cols_move(&bind(step, &MOVE)?),
            "cols_move_to_start" => self.cols_move_to(&bind(step, &COLUMNS)?, true),
            "cols_move_to_end" => self.cols_move_to(&bind(step, &COLUMNS)?, false),
            "cols_hide" => self.cols_set_hidden(&bind(step, &COLUMNS)?, true),
            "cols_unhide" => self.cols_set_hidden(&bind(step, &COLUMNS)?, false),
            "cols_align" => self.cols_align(&bind(step, &ALIGN)?),
            "fmt_number" => self.fmt_number(&bind(step, &NUMBER)?),
            "sub_missing" => self.sub_missing(&bind(step, &MISSING)?),
            "opt_stylize" => self.opt_stylize(&bind(step, &STYLIZE)?),
            "opt_all_caps" => {
                let args = bind(step, &ALL_CAPS)?;
                self.options.all_caps = args.optional_bool("all_caps")?.unwrap_or(true);
                Ok(())
            }
            other => Err(StepFailure::new(format!("table has no method {other}()"))),
        }
    }

    fn annotate(&mut self, markup: &str) {
        self.source_notes.push(CellText::Html(markup.to_string()));
    }
}

/// Typed builders over `PipelineRecorder<Table>`. Label arguments accept plain
/// strings or [`html`] payloads.
pub trait TableSteps: Sized {
    fn tab_header(&mut self, title: Value, subtitle: Option<Value>) -> Result<&mut Self, TimeMachineError>;
    fn tab_spanner(&mut self, label: Value, columns: &[&str]) -> Result<&mut Self, TimeMachineError>;
    fn tab_source_note(&mut self, note: Value) -> Result<&mut Self, TimeMachineError>;
    fn tab_stubhead(&mut self, label: Value) -> Result<&mut Self, TimeMachineError>;
    fn cols_label(&mut self, labels: &[(&str, Value)]) -> Result<&mut Self, TimeMachineError>;
    fn cols_move(&mut self, columns: &[&str], after: &str) -> Result<&mut Self, TimeMachineError>;
    fn cols_move_to_start(&mut self, columns: &[&str]) -> Result<&mut Self, TimeMachineError>;
    fn cols_move_to_end(&mut self, columns: &[&str]) -> Result<&mut Self, TimeMachineError>;
    fn cols_hide(&mut self, columns: &[&str]) -> Result<&mut Self, TimeMachineError>;
    fn cols_unhide(&mut self, columns: &[&str]) -> Result<&mut Self, TimeMachineError>;
    fn cols_align(&mut self, align: Align, columns: Option<&[&str]>) -> Result<&mut Self, TimeMachineError>;
    fn fmt_number(&mut self, columns: &[&str], decimals: u32) -> Result<&mut Self, TimeMachineError>;
    fn sub_missing(&mut self, columns: Option<&[&str]>, missing_text: &str) -> Result<&mut Self, TimeMachineError>;
    fn opt_stylize(&mut self, style: u8, color: &str) -> Result<&mut Self, TimeMachineError>;
    fn opt_all_caps(&mut self, all_caps: bool) -> Result<&mut Self, TimeMachineError>;
}

impl TableSteps for PipelineRecorder<Table> {
    fn tab_header(&mut self, title: Value, subtitle: Option<Value>) -> Result<&mut Self, TimeMachineError> {
        let mut step = Step::new("tab_header").kwarg("title", title);
        if let Some(subtitle) = subtitle {
            step = step.kwarg("subtitle", subtitle);
        }
        self.record(step)
    }

    fn tab_spanner(&mut self, label: Value, columns: &[&str]) -> Result<&mut Self, TimeMachineError> {
        self.record(
            Step::new("tab_spanner")
                .kwarg("label", label)
                .kwarg("columns", json!(columns)),
        )
    }

    fn tab_source_note(&mut self, note: Value) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("tab_source_note").kwarg("source_note", note))
    }

    fn tab_stubhead(&mut self, label: Value) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("tab_stubhead").kwarg("label", label))
    }

    fn cols_label(&mut self, labels: &[(&str, Value)]) -> Result<&mut Self, TimeMachineError> {
        let step = labels
            .iter()
            .fold(Step::new("cols_label"), |step, (name, label)| {
                step.kwarg(*name, label.clone())
            });
        self.record(step)
    }

    fn cols_move(&mut self, columns: &[&str], after: &str) -> Result<&mut Self, TimeMachineError> {
        self.record(
            Step::new("cols_move")
                .kwarg("columns", json!(columns))
                .kwarg("after", after),
        )
    }

    fn cols_move_to_start(&mut self, columns: &[&str]) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("cols_move_to_start").kwarg("columns", json!(columns)))
    }

    fn cols_move_to_end(&mut self, columns: &[&str]) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("cols_move_to_end").kwarg("columns", json!(columns)))
    }

    fn cols_hide(&mut self, columns: &[&str]) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("cols_hide").kwarg("columns", json!(columns)))
    }

    fn cols_unhide(&mut self, columns: &[&str]) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("cols_unhide").kwarg("columns", json!(columns)))
    }

    fn cols_align(&mut self, align: Align, columns: Option<&[&str]>) -> Result<&mut Self, TimeMachineError> {
        let mut step = Step::new("cols_align").kwarg("align", align.as_str());
        if let Some(columns) = columns {
            step = step.kwarg("columns", json!(columns));
        }
        self.record(step)
    }

    fn fmt_number(&mut self, columns: &[&str], decimals: u32) -> Result<&mut Self, TimeMachineError> {
        self.record(
            Step::new("fmt_number")
                .kwarg("columns", json!(columns))
                .kwarg("decimals", decimals),
        )
    }

    fn sub_missing(&mut self, columns: Option<&[&str]>, missing_text: &str) -> Result<&mut Self, TimeMachineError> {
        let mut step = Step::new("sub_missing").kwarg("missing_text", missing_text);
        if let Some(columns) = columns {
            step = step.kwarg("columns", json!(columns));
        }
        self.record(step)
    }

    fn opt_stylize(&mut self, style: u8, color: &str) -> Result<&mut Self, TimeMachineError> {
        self.record(
            Step::new("opt_stylize")
                .kwarg("style", style)
                .kwarg("color", color),
        )
    }

    fn opt_all_caps(&mut self, all_caps: bool) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("opt_all_caps").kwarg("all_caps", all_caps))
    }
}

fn cell_text(args: &BoundArgs<'_>, name: &str) -> Result<CellText, StepFailure> {
    let value = args.required(name)?;
    CellText::from_value(value).ok_or_else(|| {
        StepFailure::new(format!(
            "argument '{name}' must be a string or {{\"html\": ...}}"
        ))
    })
}

pub fn format_number(value: f64, format: NumberFormat) -> String {
    let fixed = format!("{:.*}", format.decimals as usize, value);
    if !format.use_seps {
        return fixed;
    }
    let (sign, unsigned) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };
    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

fn strip_tags(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut tag = String::new();
    let mut in_tag = false;
    for ch in markup.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                if name == "br" {
                    out.push(' ');
                }
            }
            _ if in_tag => tag.push(ch),
            _ => out.push(ch),
        }
    }
    out.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&deg;", "°")
        .replace("&amp;", "&")
}

fn text_width(text: &str) -> usize {
    text.chars().count()
}

fn pad(text: &str, width: usize, align: Align) -> String {
    let gap = width.saturating_sub(text_width(text));
    match align {
        Align::Right => format!("{}{text}", " ".repeat(gap)),
        Align::Center => {
            let left = gap / 2;
            format!("{}{text}{}", " ".repeat(left), " ".repeat(gap - left))
        }
        Align::Left | Align::Auto => format!("{text}{}", " ".repeat(gap)),
    }
}

fn join_row(cells: &[String], widths: &[usize], columns: &[&Column]) -> String {
    cells
        .iter()
        .zip(widths)
        .zip(columns)
        .map(|((cell, width), column)| pad(cell, *width, column.resolved_align()))
        .collect::<Vec<_>>()
        .join("  ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn air() -> Table {
        Table::new(
            vec![
                "Ozone".to_string(),
                "Temp".to_string(),
                "Month".to_string(),
                "Day".to_string(),
            ],
            vec![
                vec![json!(41), json!(67), json!(5), json!(1)],
                vec![Value::Null, json!(72), json!(5), json!(2)],
            ],
        )
        .expect("table")
    }

    fn apply(table: &mut Table, step: Step) {
        table.apply(&step).expect("apply");
    }

    #[test]
    fn construct_validates_shape() {
        let data = json!({"columns": ["a", "b"], "rows": [[1, 2], [3]]});
        let err = Table::construct(&[data], &BTreeMap::new()).expect_err("ragged");
        assert!(err.0.contains("row 1 has 1 values"));

        let data = json!({"columns": ["a", "a"], "rows": []});
        let err = Table::construct(&[data], &BTreeMap::new()).expect_err("duplicate");
        assert!(err.0.contains("duplicate column name 'a'"));

        let mut kwargs = BTreeMap::new();
        kwargs.insert("data".to_string(), json!({"columns": ["name", "v"], "rows": [["x", 1]]}));
        kwargs.insert("rowname_col".to_string(), json!("name"));
        let table = Table::construct(&[], &kwargs).expect("stubbed");
        assert_eq!(table.stub.as_deref(), Some("name"));
        assert_eq!(table.row_count, 1);
    }

    #[test]
    fn column_moves_follow_requested_order() {
        let mut table = air();
        apply(&mut table, Step::new("cols_move_to_start").arg(json!(["Month", "Day"])));
        assert_eq!(table.column_names(), vec!["Month", "Day", "Ozone", "Temp"]);

        apply(&mut table, Step::new("cols_move_to_end").arg("Month"));
        assert_eq!(table.column_names(), vec!["Day", "Ozone", "Temp", "Month"]);

        apply(&mut table, Step::new("cols_move").arg("Day").arg("Temp"));
        assert_eq!(table.column_names(), vec!["Ozone", "Temp", "Day", "Month"]);

        let err = table
            .apply(&Step::new("cols_move").arg(json!(["Day"])).arg("Day"))
            .expect_err("self anchor");
        assert!(err.0.contains("after itself"));
        let err = table
            .apply(&Step::new("cols_move_to_start").arg("Wind"))
            .expect_err("unknown");
        assert!(err.0.contains("column 'Wind' does not exist"));
    }

    #[test]
    fn spanners_reject_overlap_and_group_in_markup() {
        let mut table = air();
        apply(
            &mut table,
            Step::new("tab_spanner").arg("Time").arg(json!(["Month", "Day"])),
        );
        let err = table
            .apply(&Step::new("tab_spanner").arg("Again").arg("Day"))
            .expect_err("overlap");
        assert!(err.0.contains("already belongs to spanner 'Time'"));

        let markup = table.render_markup().expect("markup");
        assert!(markup.contains("<th colspan=\"2\">Time</th>"));
        let text = table.render_plain_text().expect("text");
        assert!(text.lines().next().unwrap_or_default().contains("Time"));
    }

    #[test]
    fn labels_accept_html_and_plain_text_strips_it() {
        let mut table = air();
        apply(
            &mut table,
            Step::new("cols_label")
                .kwarg("Ozone", html("Ozone,<br>ppbV"))
                .kwarg("Temp", "Temp <F>"),
        );
        let markup = table.render_markup().expect("markup");
        assert!(markup.contains("Ozone,<br>ppbV"));
        assert!(markup.contains("Temp &lt;F&gt;"));
        let text = table.render_plain_text().expect("text");
        assert!(text.contains("Ozone, ppbV"));
        assert!(text.contains("Temp <F>"));

        let err = table
            .apply(&Step::new("cols_label"))
            .expect_err("no pairs");
        assert!(err.0.contains("at least one"));
    }

    #[test]
    fn formatting_and_missing_values() {
        let mut table = Table::new(
            vec!["v".to_string()],
            vec![vec![json!(1234567.891)], vec![Value::Null], vec![json!(-0.5)]],
        )
        .expect("table");
        apply(&mut table, Step::new("fmt_number").arg("v").kwarg("decimals", 1));
        apply(&mut table, Step::new("sub_missing").kwarg("missing_text", "n/a"));
        let column = table.column("v").expect("column");
        assert_eq!(column.formatted(0), "1,234,567.9");
        assert_eq!(column.formatted(1), "n/a");
        assert_eq!(column.formatted(2), "-0.5");

        assert_eq!(
            format_number(1000.0, NumberFormat { decimals: 0, use_seps: false }),
            "1000"
        );
        assert_eq!(
            format_number(999.999, NumberFormat { decimals: 2, use_seps: true }),
            "1,000.00"
        );
    }

    #[test]
    fn hide_align_and_options() {
        let mut table = air();
        apply(&mut table, Step::new("cols_hide").arg(json!(["Month"])));
        assert_eq!(table.display_columns().len(), 3);
        apply(&mut table, Step::new("cols_unhide").arg("Month"));
        assert_eq!(table.display_columns().len(), 4);

        apply(&mut table, Step::new("cols_align").arg("center").arg("Temp"));
        assert_eq!(table.column("Temp").expect("temp").align, Align::Center);
        let err = table
            .apply(&Step::new("cols_align").arg("diagonal"))
            .expect_err("bad align");
        assert!(err.0.contains("diagonal"));

        apply(&mut table, Step::new("opt_stylize").kwarg("color", "pink").kwarg("style", 2));
        apply(&mut table, Step::new("opt_all_caps"));
        let markup = table.render_markup().expect("markup");
        assert!(markup.contains("tm-style-2 tm-color-pink tm-all-caps"));
        assert!(table
            .apply(&Step::new("opt_stylize").kwarg("style", 9))
            .is_err());
        assert!(table
            .apply(&Step::new("opt_stylize").kwarg("color", "teal"))
            .is_err());
    }

    #[test]
    fn stubhead_requires_a_stub() {
        let mut table = air();
        let err = table
            .apply(&Step::new("tab_stubhead").arg("Row"))
            .expect_err("no stub");
        assert!(err.0.contains("rowname_col"));

        let mut stubbed = air().with_stub("Day").expect("stub");
        apply(&mut stubbed, Step::new("tab_stubhead").arg("Day of month"));
        assert_eq!(stubbed.display_columns()[0].name, "Day");
        let markup = stubbed.render_markup().expect("markup");
        assert!(markup.contains("<th scope=\"row\""));
        assert!(markup.contains("Day of month"));
    }

    #[test]
    fn header_notes_and_annotation_render_in_all_forms() {
        let mut table = air();
        apply(
            &mut table,
            Step::new("tab_header")
                .arg("New York Air Quality")
                .kwarg("subtitle", "May 1973"),
        );
        apply(&mut table, Step::new("tab_source_note").arg("Source: airquality"));
        table.annotate("<input type=\"range\">");

        let markup = table.render_markup().expect("markup");
        assert!(markup.contains("<tr class=\"tm-title\"><th colspan=\"4\">New York Air Quality</th></tr>"));
        assert!(markup.contains("<input type=\"range\">"));
        let text = table.render_plain_text().expect("text");
        assert!(text.contains("May 1973"));
        assert!(text.contains("Source: airquality"));
        let payload = table.render_structured().expect("json");
        assert_eq!(payload["header"]["title"]["plain"], "New York Air Quality");
        assert_eq!(payload["source_notes"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn unknown_keyword_is_a_step_failure() {
        let mut table = air();
        let err = table
            .apply(&Step::new("tab_header").kwarg("headline", "x"))
            .expect_err("unknown kwarg");
        assert!(err.0.contains("unexpected keyword argument 'headline'"));
    }
}
