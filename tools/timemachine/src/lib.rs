pub mod config;
pub mod errors;
pub mod fsm;
pub mod log_retention;
pub mod logging;
pub mod pipeline;
pub mod recordable;
pub mod render;
pub mod runtime;
pub mod slider;
pub mod step;
pub mod table;
pub mod text;
pub mod tui;
pub mod types;

pub use errors::{StepFailure, TimeMachineError};
pub use pipeline::recorder::PipelineRecorder;
pub use pipeline::shared::SharedRecorder;
pub use recordable::Recordable;
pub use render::{Capability, Renderable, RenderedView, CAPABILITY_PRIORITY};
pub use step::Step;

use clap::{error::ErrorKind, Parser, ValueEnum};
use config::{load_config, AppConfig, CliOverrides};
use logging::{structured_fallback_line, JsonlLogger};
use pipeline::recording::{build_recorder, load_pipeline, AnyRecorder};
use runtime::ProductionRuntime;
use serde_json::json;
use slider::StepSlider;
use std::path::PathBuf;
use tui::{render_frame, step_lines, FrameView};
use types::OutputFormat;

#[derive(Debug, Clone, Parser)]
#[command(name = "timemachine")]
#[command(about = "Replay a recorded pipeline and render any intermediate snapshot")]
pub struct Cli {
    /// Pipeline file (TOML) describing the target and its steps.
    #[arg(long)]
    pub pipeline: PathBuf,
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Snapshot index; 0 is the initial object. Defaults to the last snapshot.
    #[arg(long, allow_negative_numbers = true)]
    pub step: Option<i64>,
    #[arg(long, value_enum)]
    pub format: Option<CliFormat>,
    #[arg(long, default_value_t = false)]
    pub all: bool,
    #[arg(long, default_value_t = false)]
    pub list_steps: bool,
    #[arg(long, default_value_t = false)]
    pub frame: bool,
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub log: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub no_annotation: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliFormat {
    Auto,
    Markup,
    Text,
    Json,
}

impl From<CliFormat> for OutputFormat {
    fn from(value: CliFormat) -> Self {
        match value {
            CliFormat::Auto => OutputFormat::Auto,
            CliFormat::Markup => OutputFormat::Markup,
            CliFormat::Text => OutputFormat::Text,
            CliFormat::Json => OutputFormat::Json,
        }
    }
}

pub fn run() -> Result<i32, TimeMachineError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    runtime: &ProductionRuntime,
) -> Result<i32, TimeMachineError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                runtime.terminal.write_line(error.to_string().trim_end())?;
                return Ok(0);
            }
            _ => return Err(TimeMachineError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        format: cli.format.map(Into::into),
        no_annotation: cli.no_annotation,
        log_path: cli.log.clone(),
    };
    let cfg = load_config(&overrides, runtime.file_system.as_ref())?;

    let file = load_pipeline(&cli.pipeline, runtime.file_system.as_ref())?;
    let logger = cfg.logging.path.as_ref().map(|path| {
        let mut logger = JsonlLogger::new(path);
        logger.max_payload_bytes = cfg.logging.max_payload_bytes;
        logger.budget_bytes = cfg.logging.budget_bytes;
        logger
    });
    let mut recorder = build_recorder(&file, &cfg.recorder.allowed_methods, logger)?;
    recorder.collect()?;

    if cli.list_steps {
        for line in step_lines(recorder.steps(), &recorder.fingerprints()) {
            runtime.terminal.write_line(&line)?;
        }
        return Ok(0);
    }

    let requested = cli.step.unwrap_or(i64::MAX);
    let selected = recorder.clamp_index(requested);

    if cli.frame {
        let frame = draw_frame(&recorder, &cfg, selected)?;
        runtime.terminal.draw(&frame)?;
        return Ok(0);
    }

    let rendered = if cli.all {
        render_every_snapshot(&mut recorder, &cfg)?
    } else {
        render_snapshot(&mut recorder, &cfg, selected)?
    };

    match &cli.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                runtime.file_system.create_dir_all(parent)?;
            }
            runtime.file_system.write_string(path, &rendered)?;
            let message = format!("wrote {}", path.display());
            if runtime.terminal.stdout_is_tty() {
                runtime.terminal.write_line(&message)?;
            } else {
                runtime.terminal.write_line(&structured_fallback_line(
                    recorder.phase().as_str(),
                    selected,
                    &message,
                ))?;
            }
        }
        None => runtime.terminal.write_line(&rendered)?,
    }
    Ok(0)
}

fn slider_for(recorder: &AnyRecorder, cfg: &AppConfig, index: usize) -> StepSlider {
    StepSlider::for_steps(recorder.steps().len(), cfg.render.slider_label.clone())
        .with_value(i64::try_from(index).unwrap_or(i64::MAX))
}

fn render_snapshot(
    recorder: &mut AnyRecorder,
    cfg: &AppConfig,
    index: usize,
) -> Result<String, TimeMachineError> {
    if cfg.render.annotate {
        let slider = slider_for(recorder, cfg, index);
        recorder.set_annotation(slider.render_markup());
    }
    let index = i64::try_from(index).unwrap_or(i64::MAX);
    let view = match cfg.render.format.capability() {
        Some(capability) => recorder.render_as(index, capability)?,
        None => recorder.render(index)?,
    };
    Ok(view.to_text())
}

fn render_every_snapshot(
    recorder: &mut AnyRecorder,
    cfg: &AppConfig,
) -> Result<String, TimeMachineError> {
    let count = recorder.snapshot_count();
    if cfg.render.format == OutputFormat::Json {
        let mut payloads = Vec::with_capacity(count);
        for index in 0..count {
            let view = recorder.render_as(index as i64, Capability::StructuredPayload)?;
            if let RenderedView::Structured(payload) = view {
                payloads.push(json!({"index": index, "payload": payload}));
            }
        }
        return serde_json::to_string_pretty(&payloads)
            .map_err(|e| TimeMachineError::Io(e.to_string()));
    }

    let mut blocks = Vec::with_capacity(count);
    for index in 0..count {
        let body = render_snapshot(recorder, cfg, index)?;
        blocks.push(format!("--- snapshot {index} ---\n{body}"));
    }
    Ok(blocks.join("\n"))
}

fn draw_frame(
    recorder: &AnyRecorder,
    cfg: &AppConfig,
    index: usize,
) -> Result<String, TimeMachineError> {
    let slider = slider_for(recorder, cfg, index);
    let position = i64::try_from(index).unwrap_or(i64::MAX);
    let snapshot_text = match recorder.render_as(position, Capability::PlainText) {
        Ok(view) => view.to_text(),
        Err(TimeMachineError::NoRenderableRepresentation(_)) => recorder.render(position)?.to_text(),
        Err(error) => return Err(error),
    };
    let fingerprints = recorder.fingerprints();
    render_frame(
        &FrameView {
            title: format!("{} ({})", recorder.kind().as_str(), recorder.phase().as_str()),
            slider: &slider,
            snapshot_text,
            steps: recorder.steps(),
            fingerprints: &fingerprints,
        },
        cfg.render.frame_width,
        cfg.render.frame_height,
    )
}
