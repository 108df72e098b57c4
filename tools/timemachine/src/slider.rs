//! Step selector used to pick a snapshot and to annotate rendered tables.

use crate::errors::TimeMachineError;
use crate::render::{escape_html, Renderable};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const BAR_WIDTH: i64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSlider {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
    pub value: i64,
    pub label: String,
}

impl StepSlider {
    pub fn new(
        start: i64,
        stop: i64,
        step: i64,
        label: impl Into<String>,
    ) -> Result<Self, TimeMachineError> {
        if step <= 0 {
            return Err(TimeMachineError::InvalidArgument(format!(
                "slider step must be positive; got {step}"
            )));
        }
        if stop < start {
            return Err(TimeMachineError::InvalidArgument(format!(
                "slider stop ({stop}) is below start ({start})"
            )));
        }
        let mut slider = Self {
            start,
            stop,
            step,
            value: start,
            label: label.into(),
        };
        slider.set_value(stop);
        Ok(slider)
    }

    /// One position per snapshot of a pipeline with `step_count` steps, parked on the last.
    pub fn for_steps(step_count: usize, label: impl Into<String>) -> Self {
        let stop = i64::try_from(step_count).unwrap_or(i64::MAX);
        Self {
            start: 0,
            stop,
            step: 1,
            value: stop,
            label: label.into(),
        }
    }

    /// Clamps into `[start, stop]` and snaps down onto the step grid.
    pub fn set_value(&mut self, value: i64) -> i64 {
        let clamped = value.clamp(self.start, self.stop);
        self.value = self.start + (clamped - self.start) / self.step * self.step;
        self.value
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.set_value(value);
        self
    }

    pub fn advance(&mut self) -> i64 {
        self.set_value(self.value.saturating_add(self.step))
    }

    pub fn retreat(&mut self) -> i64 {
        self.set_value(self.value.saturating_sub(self.step))
    }

    pub fn at_start(&self) -> bool {
        self.value == self.start
    }

    pub fn at_end(&self) -> bool {
        self.value.saturating_add(self.step) > self.stop
    }

    fn bar(&self) -> String {
        let span = self.stop - self.start;
        if span == 0 {
            return "#".to_string();
        }
        let width = span.min(BAR_WIDTH);
        let filled = (self.value - self.start) * width / span;
        format!(
            "{}{}",
            "#".repeat(filled as usize),
            "-".repeat((width - filled) as usize)
        )
    }
}

impl Renderable for StepSlider {
    fn render_markup(&self) -> Option<String> {
        Some(format!(
            "<div class=\"tm-slider\"><label>{label} <input type=\"range\" min=\"{}\" max=\"{}\" step=\"{}\" value=\"{}\"></label><output>{}/{}</output></div>",
            self.start,
            self.stop,
            self.step,
            self.value,
            self.value,
            self.stop,
            label = escape_html(&self.label),
        ))
    }

    fn render_plain_text(&self) -> Option<String> {
        Some(format!(
            "{} [{}] {}/{}",
            self.label,
            self.bar(),
            self.value,
            self.stop
        ))
    }

    fn render_structured(&self) -> Option<Value> {
        serde_json::to_value(self).ok()
    }

    fn kind_name(&self) -> &'static str {
        "slider"
    }
}

#[cfg(test)]
mod tests {
    use super::StepSlider;
    use crate::render::Renderable;

    #[test]
    fn values_clamp_and_snap_to_the_grid() {
        let mut slider = StepSlider::new(0, 10, 3, "Step").expect("slider");
        assert_eq!(slider.value, 9);
        assert_eq!(slider.set_value(7), 6);
        assert_eq!(slider.set_value(-4), 0);
        assert!(slider.at_start());
        assert_eq!(slider.advance(), 3);
        assert_eq!(slider.set_value(99), 9);
        assert!(slider.at_end());
        assert_eq!(slider.retreat(), 6);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(StepSlider::new(0, 5, 0, "Step").is_err());
        assert!(StepSlider::new(5, 0, 1, "Step").is_err());
    }

    #[test]
    fn renders_bar_and_range_input() {
        let slider = StepSlider::for_steps(6, "Step").with_value(2);
        assert_eq!(slider.render_plain_text().as_deref(), Some("Step [##----] 2/6"));
        let markup = slider.render_markup().expect("markup");
        assert!(markup.contains("<input type=\"range\" min=\"0\" max=\"6\" step=\"1\" value=\"2\">"));

        let empty = StepSlider::for_steps(0, "Step");
        assert_eq!(empty.render_plain_text().as_deref(), Some("Step [#] 0/0"));
    }

    #[test]
    fn wide_ranges_scale_the_bar() {
        let slider = StepSlider::for_steps(100, "Step").with_value(50);
        let text = slider.render_plain_text().expect("text");
        assert!(text.starts_with("Step [##########----------]"));
    }
}
