use crate::errors::TimeMachineError;
use crate::logging::{DEFAULT_LOG_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use crate::types::OutputFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MIN_FRAME_WIDTH: u16 = 20;
pub const MIN_FRAME_HEIGHT: u16 = 8;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub format: Option<OutputFormat>,
    pub no_annotation: bool,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub recorder: RecorderConfig,
    pub render: RenderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Empty means every method the target supports.
    pub allowed_methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderConfig {
    pub format: OutputFormat,
    pub annotate: bool,
    pub slider_label: String,
    pub frame_width: u16,
    pub frame_height: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            recorder: RecorderConfig {
                allowed_methods: Vec::new(),
            },
            render: RenderConfig {
                format: OutputFormat::Auto,
                annotate: true,
                slider_label: "Step".to_string(),
                frame_width: 100,
                frame_height: 30,
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_LOG_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    recorder: Option<PartialRecorderConfig>,
    render: Option<PartialRenderConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialRecorderConfig {
    allowed_methods: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialRenderConfig {
    format: Option<OutputFormat>,
    annotate: Option<bool>,
    slider_label: Option<String>,
    frame_width: Option<u16>,
    frame_height: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    fs: &dyn FileSystem,
) -> Result<AppConfig, TimeMachineError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        cfg = parse_config(&file_contents)?;
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Parses a config file over the defaults without validating it.
pub fn parse_config(contents: &str) -> Result<AppConfig, TimeMachineError> {
    let partial: PartialAppConfig =
        toml::from_str(contents).map_err(|e| TimeMachineError::ConfigParse(e.to_string()))?;
    let mut cfg = AppConfig::default();
    merge_partial_config(&mut cfg, partial);
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(recorder) = partial.recorder {
        if let Some(allowed_methods) = recorder.allowed_methods {
            cfg.recorder.allowed_methods = allowed_methods;
        }
    }

    if let Some(render) = partial.render {
        if let Some(value) = render.format {
            cfg.render.format = value;
        }
        if let Some(value) = render.annotate {
            cfg.render.annotate = value;
        }
        if let Some(value) = render.slider_label {
            cfg.render.slider_label = value;
        }
        if let Some(value) = render.frame_width {
            cfg.render.frame_width = value;
        }
        if let Some(value) = render.frame_height {
            cfg.render.frame_height = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.path {
            cfg.logging.path = Some(path);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(format) = overrides.format {
        cfg.render.format = format;
    }
    if overrides.no_annotation {
        cfg.render.annotate = false;
    }
    if let Some(path) = &overrides.log_path {
        cfg.logging.path = Some(path.clone());
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), TimeMachineError> {
    if cfg
        .recorder
        .allowed_methods
        .iter()
        .any(|method| method.trim().is_empty())
    {
        return Err(TimeMachineError::InvalidConfig(
            "recorder.allowed_methods must not contain empty names".to_string(),
        ));
    }

    if cfg.render.slider_label.trim().is_empty() {
        return Err(TimeMachineError::InvalidConfig(
            "render.slider_label must not be empty".to_string(),
        ));
    }

    if cfg.render.frame_width < MIN_FRAME_WIDTH || cfg.render.frame_height < MIN_FRAME_HEIGHT {
        return Err(TimeMachineError::InvalidConfig(format!(
            "render frame must be at least {MIN_FRAME_WIDTH}x{MIN_FRAME_HEIGHT}"
        )));
    }

    if cfg.logging.max_payload_bytes == 0 {
        return Err(TimeMachineError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }

    if cfg.logging.budget_bytes < cfg.logging.max_payload_bytes as u64 {
        return Err(TimeMachineError::InvalidConfig(
            "logging.budget_bytes must be at least logging.max_payload_bytes".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_config, parse_config, AppConfig, CliOverrides};
    use crate::errors::TimeMachineError;
    use crate::runtime::FakeFileSystem;
    use crate::types::OutputFormat;
    use std::path::PathBuf;

    #[test]
    fn defaults_apply_without_a_file() {
        let cfg = load_config(&CliOverrides::default(), &FakeFileSystem::default()).expect("cfg");
        assert_eq!(cfg, AppConfig::default());
        assert!(cfg.render.annotate);
    }

    #[test]
    fn partial_file_merges_over_defaults_then_cli_wins() {
        let fs = FakeFileSystem::with_file(
            "/cfg/timemachine.toml",
            "[render]\nformat = \"markup\"\nslider_label = \"Stage\"\n\n[recorder]\nallowed_methods = [\"tab_header\"]\n",
        );
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/cfg/timemachine.toml")),
            format: Some(OutputFormat::Json),
            no_annotation: true,
            log_path: Some(PathBuf::from("/logs/run.jsonl")),
        };
        let cfg = load_config(&overrides, &fs).expect("cfg");
        assert_eq!(cfg.render.format, OutputFormat::Json);
        assert_eq!(cfg.render.slider_label, "Stage");
        assert_eq!(cfg.render.frame_width, 100);
        assert!(!cfg.render.annotate);
        assert_eq!(cfg.recorder.allowed_methods, vec!["tab_header".to_string()]);
        assert_eq!(cfg.logging.path, Some(PathBuf::from("/logs/run.jsonl")));
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        let err = parse_config("[render]\ncolour = \"blue\"\n").expect_err("unknown key");
        assert!(matches!(err, TimeMachineError::ConfigParse(_)));

        let fs = FakeFileSystem::with_file("/c.toml", "[render]\nframe_width = 5\n");
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/c.toml")),
            ..CliOverrides::default()
        };
        let err = load_config(&overrides, &fs).expect_err("too narrow");
        assert!(matches!(err, TimeMachineError::InvalidConfig(message) if message.contains("frame")));

        let fs = FakeFileSystem::with_file("/c.toml", "[logging]\nbudget_bytes = 10\n");
        assert!(load_config(&overrides, &fs).is_err());
    }

    #[test]
    fn missing_config_file_is_an_io_error() {
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/nope.toml")),
            ..CliOverrides::default()
        };
        let err = load_config(&overrides, &FakeFileSystem::default()).expect_err("missing");
        assert!(matches!(err, TimeMachineError::Io(_)));
    }
}
