//! WR-002: Launch config parsing, validation and workspace override.
//!
//! `wanrun.yaml` is optional; every field has a default. Validation checks
//! structural constraints only:
//! - program argv must not be empty
//! - probe timeouts must be positive and the GPU pattern must compile
//! - file extensions must be bare (no leading dot, no glob metacharacters)
//! - generation floats must be finite, ratios within `[0, 1]`, counts positive
//! - `cfg_skip_mode` and `slg.mode` must name a known mode

use super::error::LaunchError;
use super::types::*;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable overriding the workspace base directory.
pub const WORKSPACE_ENV: &str = "WANRUN_WORKSPACE";

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a launch config file from disk.
pub fn parse_config_file(path: &Path) -> Result<LaunchConfig, LaunchError> {
    let content = std::fs::read_to_string(path).map_err(|e| LaunchError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_config(&content)
}

/// Parse a launch config from a string.
pub fn parse_config(yaml: &str) -> Result<LaunchConfig, LaunchError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| LaunchError::Config(format!("YAML parse error: {}", e)))
}

/// Load and validate, or fall back to defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<LaunchConfig, LaunchError> {
    let config = match path {
        Some(p) => parse_config_file(p)?,
        None => LaunchConfig::default(),
    };
    check_config(&config)?;
    Ok(config)
}

/// Run [`validate_config`] and fold any errors into one `Config` error.
pub fn check_config(config: &LaunchConfig) -> Result<(), LaunchError> {
    let errors = validate_config(config);
    if errors.is_empty() {
        return Ok(());
    }
    let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    Err(LaunchError::Config(joined.join("; ")))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &LaunchConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.program.argv.is_empty() || config.program.argv[0].trim().is_empty() {
        errors.push(ValidationError {
            message: "program.argv must name the inference program".to_string(),
        });
    }

    let probes = &config.probes;
    if probes.gpu_timeout_secs == 0 {
        errors.push(ValidationError {
            message: "probes.gpu_timeout_secs must be positive".to_string(),
        });
    }
    if probes.compile_timeout_secs == 0 {
        errors.push(ValidationError {
            message: "probes.compile_timeout_secs must be positive".to_string(),
        });
    }
    if let Err(e) = regex::Regex::new(&probes.gpu_pattern) {
        errors.push(ValidationError {
            message: format!("probes.gpu_pattern is not a valid regex: {}", e),
        });
    }

    for (field, ext) in [
        ("workspace.weights_ext", &config.workspace.weights_ext),
        ("workspace.t5_ext", &config.workspace.t5_ext),
    ] {
        if ext.is_empty() || ext.starts_with('.') || ext.contains(['*', '?', '[', ']', '/']) {
            errors.push(ValidationError {
                message: format!("{} must be a bare extension, got \"{}\"", field, ext),
            });
        }
    }

    validate_generation(&config.generation, &mut errors);

    errors
}

const CFG_SKIP_MODES: [&str; 6] = ["none", "early", "late", "middle", "early_late", "alternate"];
const SLG_MODES: [&str; 2] = ["original", "uncond"];

fn validate_generation(g: &GenerationSettings, errors: &mut Vec<ValidationError>) {
    let mut push = |message: String| errors.push(ValidationError { message });

    let floats = [
        ("generation.lora_multiplier", Some(g.lora_multiplier)),
        (
            "generation.lora_multiplier_high_noise",
            Some(g.lora_multiplier_high_noise),
        ),
        ("generation.guidance_scale", g.guidance_scale),
        (
            "generation.guidance_scale_high_noise",
            g.guidance_scale_high_noise,
        ),
        ("generation.flow_shift", g.flow_shift),
        ("generation.slg.scale", Some(g.slg.scale)),
    ];
    for (field, value) in floats {
        if value.is_some_and(|v| !v.is_finite()) {
            push(format!("{} must be finite", field));
        }
    }

    let ratios = [
        ("generation.timestep_boundary", g.timestep_boundary),
        ("generation.cfg_apply_ratio", g.cfg_apply_ratio),
        ("generation.slg.start", Some(g.slg.start)),
        ("generation.slg.end", Some(g.slg.end)),
    ];
    for (field, value) in ratios {
        if value.is_some_and(|v| !(0.0..=1.0).contains(&v)) {
            push(format!("{} must be within [0, 1]", field));
        }
    }
    if g.slg.start > g.slg.end {
        push("generation.slg.start must not exceed generation.slg.end".to_string());
    }

    let counts = [
        ("generation.video_size height", g.video_size.map(|s| s[0])),
        ("generation.video_size width", g.video_size.map(|s| s[1])),
        ("generation.video_length", g.video_length),
        ("generation.fps", g.fps),
        ("generation.infer_steps", g.infer_steps),
    ];
    for (field, value) in counts {
        if value == Some(0) {
            push(format!("{} must be positive", field));
        }
    }

    if !CFG_SKIP_MODES.contains(&g.cfg_skip_mode.as_str()) {
        push(format!(
            "generation.cfg_skip_mode must be one of {}, got \"{}\"",
            CFG_SKIP_MODES.join(", "),
            g.cfg_skip_mode
        ));
    }
    if let Some(ref mode) = g.slg.mode {
        if !SLG_MODES.contains(&mode.as_str()) {
            push(format!(
                "generation.slg.mode must be one of {}, got \"{}\"",
                SLG_MODES.join(", "),
                mode
            ));
        }
    }
}

/// Pick the workspace base: CLI flag, then environment, then config file.
/// Relative bases are made absolute against the current directory.
pub fn resolve_base(
    cli: Option<&Path>,
    env: Option<OsString>,
    config_base: &Path,
) -> Result<PathBuf, LaunchError> {
    let base = match (cli, env) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(v)) if !v.is_empty() => PathBuf::from(v),
        _ => config_base.to_path_buf(),
    };
    std::path::absolute(&base).map_err(|e| LaunchError::Io { path: base, source: e })
}

/// Build the immutable layout for this run.
pub fn build_layout(
    config: &LaunchConfig,
    cli_base: Option<&Path>,
    env: Option<OsString>,
) -> Result<WorkspaceLayout, LaunchError> {
    let base = resolve_base(cli_base, env, &config.workspace.base)?;
    Ok(WorkspaceLayout {
        base,
        ..config.workspace.clone()
    })
}
