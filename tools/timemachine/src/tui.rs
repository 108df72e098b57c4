use crate::errors::TimeMachineError;
use crate::render::Renderable;
use crate::slider::StepSlider;
use crate::step::Step;
use ratatui::backend::TestBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};
use ratatui::Terminal;

/// Everything one frame shows: the slider, the selected snapshot and the step list.
#[derive(Debug, Clone)]
pub struct FrameView<'a> {
    pub title: String,
    pub slider: &'a StepSlider,
    pub snapshot_text: String,
    pub steps: &'a [Step],
    pub fingerprints: &'a [String],
}

/// Step list rows; row 0 is the initial snapshot.
pub fn step_lines(steps: &[Step], fingerprints: &[String]) -> Vec<String> {
    std::iter::once("initial".to_string())
        .chain(steps.iter().map(Step::summary))
        .enumerate()
        .map(|(index, label)| match fingerprints.get(index) {
            Some(fingerprint) => {
                let short = fingerprint.chars().take(8).collect::<String>();
                format!("{index:>3} {label} [{short}]")
            }
            None => format!("{index:>3} {label}"),
        })
        .collect()
}

pub fn render_frame(view: &FrameView<'_>, width: u16, height: u16) -> Result<String, TimeMachineError> {
    let backend = TestBackend::new(width, height);
    let mut terminal = Terminal::new(backend).map_err(|e| TimeMachineError::Io(e.to_string()))?;
    let current = usize::try_from(view.slider.value - view.slider.start).unwrap_or(0);
    let slider_text = view.slider.render_plain_text().unwrap_or_default();
    let rows = step_lines(view.steps, view.fingerprints);

    terminal
        .draw(|frame| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(3), Constraint::Min(3)])
                .split(frame.area());
            let body = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(chunks[1]);

            frame.render_widget(
                Paragraph::new(slider_text.clone())
                    .block(Block::default().borders(Borders::ALL).title(view.title.clone())),
                chunks[0],
            );

            frame.render_widget(
                Paragraph::new(view.snapshot_text.clone())
                    .wrap(Wrap { trim: false })
                    .block(Block::default().borders(Borders::ALL).title("Snapshot")),
                body[0],
            );

            let items = rows
                .iter()
                .enumerate()
                .map(|(index, row)| {
                    if index == current {
                        ListItem::new(Line::from(Span::styled(
                            format!(">{row}"),
                            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                        )))
                    } else {
                        ListItem::new(Line::from(format!(" {row}")))
                    }
                })
                .collect::<Vec<_>>();
            frame.render_widget(
                List::new(items).block(Block::default().borders(Borders::ALL).title("Steps")),
                body[1],
            );
        })
        .map_err(|e| TimeMachineError::Io(e.to_string()))?;

    let mut out = String::new();
    let buffer = terminal.backend().buffer();
    for y in 0..height {
        for x in 0..width {
            out.push_str(buffer[(x, y)].symbol());
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{render_frame, step_lines, FrameView};
    use crate::slider::StepSlider;
    use crate::step::Step;

    #[test]
    fn step_lines_start_with_the_initial_snapshot() {
        let steps = vec![Step::new("append_text").arg("ab"), Step::new("upper")];
        let lines = step_lines(&steps, &["0123456789abcdef".to_string()]);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "  0 initial [01234567]");
        assert_eq!(lines[1], "  1 append_text(\"ab\")");
        assert_eq!(lines[2], "  2 upper()");
    }

    #[test]
    fn frame_shows_slider_snapshot_and_selected_step() {
        let steps = vec![Step::new("append_text").arg("ab"), Step::new("upper")];
        let slider = StepSlider::for_steps(steps.len(), "Step").with_value(1);
        let frame = render_frame(
            &FrameView {
                title: "text (collected)".to_string(),
                slider: &slider,
                snapshot_text: "ab".to_string(),
                steps: &steps,
                fingerprints: &[],
            },
            80,
            12,
        )
        .expect("frame");
        assert!(frame.contains("text (collected)"));
        assert!(frame.contains("Step [#-] 1/2"));
        assert!(frame.contains("Snapshot"));
        assert!(frame.contains(">  1 append_text(\"ab\")"));
        assert_eq!(frame.lines().count(), 12);
    }
}
