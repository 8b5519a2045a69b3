//! WR-001: Launcher data model.
//!
//! Launch config (YAML), workspace layout, resolved artifacts, capabilities,
//! execution plans, run states and provenance events. Everything that flows
//! between pipeline stages is defined here and is immutable once built.

use crate::provenance::hasher;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Launch config (wanrun.yaml)
// ============================================================================

/// Root of the optional `wanrun.yaml` launch config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Where models and LoRA weights live
    #[serde(default)]
    pub workspace: WorkspaceLayout,

    /// External inference program
    #[serde(default)]
    pub program: ProgramSettings,

    /// Capability probe commands and timeouts
    #[serde(default)]
    pub probes: ProbeSettings,

    /// Generation defaults shared by every preset
    #[serde(default)]
    pub generation: GenerationSettings,
}

// ============================================================================
// Workspace layout
// ============================================================================

/// Directory layout of a training/inference workspace.
///
/// Subdirectories are relative to `base` (an absolute subdirectory replaces
/// it, following `Path::join`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceLayout {
    #[serde(default = "default_base")]
    pub base: PathBuf,

    #[serde(default = "default_dit_dir")]
    pub dit_dir: PathBuf,

    #[serde(default = "default_dit_high_dir")]
    pub dit_high_dir: PathBuf,

    #[serde(default = "default_vae_dir")]
    pub vae_dir: PathBuf,

    #[serde(default = "default_t5_dir")]
    pub t5_dir: PathBuf,

    #[serde(default = "default_lora_low_dir")]
    pub lora_low_dir: PathBuf,

    #[serde(default = "default_lora_high_dir")]
    pub lora_high_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Extension of DiT, VAE and LoRA weight files
    #[serde(default = "default_weights_ext")]
    pub weights_ext: String,

    /// Extension of the T5 text encoder checkpoint
    #[serde(default = "default_t5_ext")]
    pub t5_ext: String,
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self {
            base: default_base(),
            dit_dir: default_dit_dir(),
            dit_high_dir: default_dit_high_dir(),
            vae_dir: default_vae_dir(),
            t5_dir: default_t5_dir(),
            lora_low_dir: default_lora_low_dir(),
            lora_high_dir: default_lora_high_dir(),
            output_dir: default_output_dir(),
            weights_ext: default_weights_ext(),
            t5_ext: default_t5_ext(),
        }
    }
}

impl WorkspaceLayout {
    /// Directory searched for a slot.
    pub fn slot_dir(&self, slot: ArtifactSlot) -> PathBuf {
        let rel = match slot {
            ArtifactSlot::Dit => &self.dit_dir,
            ArtifactSlot::DitHigh => &self.dit_high_dir,
            ArtifactSlot::Vae => &self.vae_dir,
            ArtifactSlot::T5 => &self.t5_dir,
            ArtifactSlot::LoraLow => &self.lora_low_dir,
            ArtifactSlot::LoraHigh => &self.lora_high_dir,
        };
        self.base.join(rel)
    }

    /// File extension expected in a slot's directory.
    pub fn slot_ext(&self, slot: ArtifactSlot) -> &str {
        match slot {
            ArtifactSlot::T5 => &self.t5_ext,
            _ => &self.weights_ext,
        }
    }

    /// Root under which each preset gets its own output directory.
    pub fn output_root(&self) -> PathBuf {
        self.base.join(&self.output_dir)
    }
}

fn default_base() -> PathBuf {
    PathBuf::from("/workspace")
}

fn default_dit_dir() -> PathBuf {
    PathBuf::from("models/diffusion_models")
}

fn default_dit_high_dir() -> PathBuf {
    PathBuf::from("models/diffusion_models_high_noise")
}

fn default_vae_dir() -> PathBuf {
    PathBuf::from("models/vae")
}

fn default_t5_dir() -> PathBuf {
    PathBuf::from("models/text_encoders")
}

fn default_lora_low_dir() -> PathBuf {
    PathBuf::from("loras/low_noise")
}

fn default_lora_high_dir() -> PathBuf {
    PathBuf::from("loras/high_noise")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_weights_ext() -> String {
    "safetensors".to_string()
}

fn default_t5_ext() -> String {
    "pth".to_string()
}

// ============================================================================
// Program, probes, generation
// ============================================================================

/// How the external inference program is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSettings {
    /// Program and leading arguments, e.g. `[python, wan_generate_video.py]`
    #[serde(default = "default_program_argv")]
    pub argv: Vec<String>,

    /// Working directory for the launch (the musubi-tuner checkout)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for ProgramSettings {
    fn default() -> Self {
        Self {
            argv: default_program_argv(),
            working_dir: None,
        }
    }
}

fn default_program_argv() -> Vec<String> {
    vec!["python".to_string(), "wan_generate_video.py".to_string()]
}

/// Trial commands used to detect optional capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Command printing the GPU model name
    #[serde(default = "default_gpu_query")]
    pub gpu_query: Vec<String>,

    /// Regex the GPU query output must match
    #[serde(default = "default_gpu_pattern")]
    pub gpu_pattern: String,

    #[serde(default = "default_gpu_timeout_secs")]
    pub gpu_timeout_secs: u64,

    /// Command that exercises just-in-time compilation once
    #[serde(default = "default_compile_trial")]
    pub compile_trial: Vec<String>,

    #[serde(default = "default_compile_timeout_secs")]
    pub compile_timeout_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            gpu_query: default_gpu_query(),
            gpu_pattern: default_gpu_pattern(),
            gpu_timeout_secs: default_gpu_timeout_secs(),
            compile_trial: default_compile_trial(),
            compile_timeout_secs: default_compile_timeout_secs(),
        }
    }
}

fn default_gpu_query() -> Vec<String> {
    vec![
        "nvidia-smi".to_string(),
        "--query-gpu=name".to_string(),
        "--format=csv,noheader".to_string(),
    ]
}

fn default_gpu_pattern() -> String {
    "H100".to_string()
}

fn default_gpu_timeout_secs() -> u64 {
    30
}

fn default_compile_trial() -> Vec<String> {
    vec![
        "python".to_string(),
        "-c".to_string(),
        "import torch; f = torch.compile(lambda x: x * 2); f(torch.ones(8, device='cuda'))"
            .to_string(),
    ]
}

fn default_compile_timeout_secs() -> u64 {
    60
}

/// Generation parameters. `Option` fields left unset fall back to the preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_task")]
    pub task: String,

    #[serde(default = "default_prompt")]
    pub prompt: String,

    #[serde(default)]
    pub negative_prompt: Option<String>,

    #[serde(default = "default_multiplier")]
    pub lora_multiplier: f64,

    #[serde(default = "default_multiplier")]
    pub lora_multiplier_high_noise: f64,

    /// `[height, width]`; replaces the preset's size
    #[serde(default)]
    pub video_size: Option<[u32; 2]>,

    /// Frames; replaces the preset's length
    #[serde(default)]
    pub video_length: Option<u32>,

    #[serde(default)]
    pub fps: Option<u32>,

    #[serde(default)]
    pub infer_steps: Option<u32>,

    #[serde(default)]
    pub guidance_scale: Option<f64>,

    #[serde(default)]
    pub guidance_scale_high_noise: Option<f64>,

    #[serde(default)]
    pub flow_shift: Option<f64>,

    /// Switch point between the high- and low-noise models, in `[0, 1]`
    #[serde(default)]
    pub timestep_boundary: Option<f64>,

    #[serde(default = "default_sample_solver")]
    pub sample_solver: String,

    /// `none` leaves CFG on for every step
    #[serde(default = "default_cfg_skip_mode")]
    pub cfg_skip_mode: String,

    #[serde(default)]
    pub cfg_apply_ratio: Option<f64>,

    #[serde(default)]
    pub slg: SkipLayerGuidance,

    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_vae_dtype")]
    pub vae_dtype: String,

    /// DiT blocks offloaded to CPU (0 keeps everything in VRAM)
    #[serde(default)]
    pub blocks_to_swap: u32,

    #[serde(default)]
    pub offload_inactive_dit: bool,

    #[serde(default)]
    pub vae_cache_cpu: bool,

    #[serde(default)]
    pub cpu_noise: bool,

    #[serde(default = "default_output_type")]
    pub output_type: String,

    #[serde(default)]
    pub trim_tail_frames: u32,

    #[serde(default)]
    pub no_metadata: bool,
}

/// Skip layer guidance. Inactive unless `layers` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipLayerGuidance {
    /// Comma-separated block indices, e.g. `"7,8,9"`
    #[serde(default)]
    pub layers: Option<String>,

    #[serde(default = "default_slg_scale")]
    pub scale: f64,

    #[serde(default)]
    pub start: f64,

    #[serde(default = "default_slg_end")]
    pub end: f64,

    /// `original` or `uncond`
    #[serde(default)]
    pub mode: Option<String>,
}

impl Default for SkipLayerGuidance {
    fn default() -> Self {
        Self {
            layers: None,
            scale: default_slg_scale(),
            start: 0.0,
            end: default_slg_end(),
            mode: None,
        }
    }
}

fn default_slg_scale() -> f64 {
    3.0
}

fn default_slg_end() -> f64 {
    0.3
}

fn default_cfg_skip_mode() -> String {
    "none".to_string()
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            task: default_task(),
            prompt: default_prompt(),
            negative_prompt: None,
            lora_multiplier: default_multiplier(),
            lora_multiplier_high_noise: default_multiplier(),
            video_size: None,
            video_length: None,
            fps: None,
            infer_steps: None,
            guidance_scale: None,
            guidance_scale_high_noise: None,
            flow_shift: None,
            timestep_boundary: None,
            sample_solver: default_sample_solver(),
            cfg_skip_mode: default_cfg_skip_mode(),
            cfg_apply_ratio: None,
            slg: SkipLayerGuidance::default(),
            device: default_device(),
            vae_dtype: default_vae_dtype(),
            blocks_to_swap: 0,
            offload_inactive_dit: false,
            vae_cache_cpu: false,
            cpu_noise: false,
            output_type: default_output_type(),
            trim_tail_frames: 0,
            no_metadata: false,
        }
    }
}

fn default_task() -> String {
    "t2v-A14B".to_string()
}

fn default_prompt() -> String {
    "A cinematic video of a person walking through a garden at sunset".to_string()
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_sample_solver() -> String {
    "unipc".to_string()
}

fn default_device() -> String {
    "cuda".to_string()
}

fn default_vae_dtype() -> String {
    "bfloat16".to_string()
}

fn default_output_type() -> String {
    "video".to_string()
}

// ============================================================================
// Artifacts
// ============================================================================

/// Logical artifact slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSlot {
    Dit,
    DitHigh,
    Vae,
    T5,
    LoraLow,
    LoraHigh,
}

impl ArtifactSlot {
    /// Resolution order.
    pub const ALL: [ArtifactSlot; 6] = [
        Self::Dit,
        Self::DitHigh,
        Self::Vae,
        Self::T5,
        Self::LoraLow,
        Self::LoraHigh,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Dit => "dit",
            Self::DitHigh => "dit_high",
            Self::Vae => "vae",
            Self::T5 => "t5",
            Self::LoraLow => "lora_low",
            Self::LoraHigh => "lora_high",
        }
    }

    pub fn is_mandatory(self) -> bool {
        !matches!(self, Self::DitHigh | Self::LoraHigh)
    }
}

impl fmt::Display for ArtifactSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolution result for one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Present(PathBuf),
    Absent,
}

/// Slot → artifact, in resolution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedArtifacts {
    entries: IndexMap<ArtifactSlot, Artifact>,
}

impl ResolvedArtifacts {
    pub fn insert(&mut self, slot: ArtifactSlot, artifact: Artifact) {
        self.entries.insert(slot, artifact);
    }

    /// Path of a present artifact; `None` when absent or never resolved.
    pub fn path(&self, slot: ArtifactSlot) -> Option<&Path> {
        match self.entries.get(&slot) {
            Some(Artifact::Present(p)) => Some(p.as_path()),
            _ => None,
        }
    }

    pub fn is_present(&self, slot: ArtifactSlot) -> bool {
        self.path(slot).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactSlot, &Artifact)> {
        self.entries.iter()
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Optional capability detected by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    GpuMatch,
    AccelCompileOk,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Self::GpuMatch => "gpu_match",
            Self::AccelCompileOk => "accel_compile_ok",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Independent capability flags. Default is everything absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet {
    pub gpu_match: bool,
    pub accel_compile_ok: bool,
}

impl CapabilitySet {
    pub fn has(&self, cap: Capability) -> bool {
        match cap {
            Capability::GpuMatch => self.gpu_match,
            Capability::AccelCompileOk => self.accel_compile_ok,
        }
    }

    pub fn set(&mut self, cap: Capability, present: bool) {
        match cap {
            Capability::GpuMatch => self.gpu_match = present,
            Capability::AccelCompileOk => self.accel_compile_ok = present,
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// One flag with zero or more values (`--fp8`, `--seed 42`, `--video_size 480 832`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanFlag {
    pub flag: String,
    pub values: Vec<String>,
}

impl PlanFlag {
    pub fn switch(flag: &str) -> Self {
        Self {
            flag: flag.to_string(),
            values: Vec::new(),
        }
    }

    pub fn value(flag: &str, value: impl Into<String>) -> Self {
        Self {
            flag: flag.to_string(),
            values: vec![value.into()],
        }
    }
}

/// Concrete invocation of the external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Preset the plan was built from
    pub preset: String,

    /// Program and leading arguments
    pub program: Vec<String>,

    pub working_dir: Option<PathBuf>,

    /// Ordered flags passed after `program`
    pub flags: Vec<PlanFlag>,

    pub output_dir: PathBuf,

    pub seed: u64,

    /// Degraded-mode and fallback notices raised while planning
    pub notices: Vec<String>,
}

impl ExecutionPlan {
    /// Flags flattened into argv form.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for f in &self.flags {
            args.push(f.flag.clone());
            args.extend(f.values.iter().cloned());
        }
        args
    }

    /// Full argv: program followed by flags.
    pub fn command_line(&self) -> Vec<String> {
        let mut argv = self.program.clone();
        argv.extend(self.args());
        argv
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.flag == flag)
    }

    pub fn flag_values(&self, flag: &str) -> Option<&[String]> {
        self.flags
            .iter()
            .find(|f| f.flag == flag)
            .map(|f| f.values.as_slice())
    }

    /// BLAKE3 fingerprint over everything that determines the invocation.
    pub fn fingerprint(&self) -> String {
        let seed = self.seed.to_string();
        let output = self.output_dir.to_string_lossy();
        let argv = self.command_line();
        let mut parts: Vec<&str> = vec![self.preset.as_str(), seed.as_str(), output.as_ref()];
        parts.extend(argv.iter().map(String::as_str));
        hasher::hash_components(&parts)
    }
}

// ============================================================================
// Run state machine
// ============================================================================

/// Stage of a single run. Forward-only; `Succeeded` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Resolving,
    Probing,
    Planning,
    Launching,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Resolving, Probing) | (Probing, Planning) | (Planning, Launching) => true,
            (Launching, Succeeded) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolving => write!(f, "RESOLVING"),
            Self::Probing => write!(f, "PROBING"),
            Self::Planning => write!(f, "PLANNING"),
            Self::Launching => write!(f, "LAUNCHING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// How a launch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Succeeded {
        output_dir: PathBuf,
    },
    Failed {
        /// `-1` when the program was killed by a signal
        exit_code: i32,
        interrupted: bool,
    },
}

impl LaunchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn terminal_state(&self) -> RunState {
        if self.succeeded() {
            RunState::Succeeded
        } else {
            RunState::Failed
        }
    }
}

/// Summary of a pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub fingerprint: String,
    pub output_dir: PathBuf,
    /// `None` for dry runs
    pub outcome: Option<LaunchOutcome>,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Event appended to `<output>/events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        wanrun_version: String,
        preset: String,
    },
    StateEntered {
        run_id: String,
        state: String,
    },
    ArtifactResolved {
        slot: String,
        path: Option<String>,
    },
    CapabilityProbed {
        capability: String,
        present: bool,
        detail: String,
    },
    PlanBuilt {
        run_id: String,
        fingerprint: String,
        seed: u64,
        notices: Vec<String>,
    },
    LaunchCompleted {
        run_id: String,
        exit_code: i32,
        interrupted: bool,
        duration_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ============================================================================
// Tests
// ============================================================================
