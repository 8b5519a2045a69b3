//! WR-005: Plan generation — artifacts + capabilities + preset → flags.
//!
//! Policy:
//! - `accel_compile_ok` adds `--compile`; without it the stable subset is used
//! - `gpu_match` adds `--fp8_fast` and flash3 attention; otherwise sdpa
//! - conservative mode drops every acceleration flag and clamps resolution
//! - no high-noise LoRA → every high-noise LoRA flag is omitted (degraded mode)
//! - generation settings override the preset's size, length, steps and guidance;
//!   optional sampling, SLG, memory and output flags appear only when set
//!
//! Pure function of its inputs: same inputs, byte-identical plan.

use super::error::LaunchError;
use super::presets::Preset;
use super::types::*;
use std::path::Path;

/// Flags that only make sense with a high-noise LoRA.
pub const HIGH_NOISE_LORA_FLAGS: [&str; 3] = [
    "--lora_weight_high_noise",
    "--lora_multiplier_high_noise",
    "--guidance_scale_high_noise",
];

/// Just-in-time compilation toggle.
pub const COMPILE_FLAG: &str = "--compile";

/// `cfg_skip_mode` value that emits no flag.
pub const CFG_SKIP_NONE: &str = "none";

/// Conservative-mode resolution and frame rate.
const CONSERVATIVE_SIZE: (u32, u32) = (512, 512);
const CONSERVATIVE_FPS: u32 = 16;

/// Everything the planner needs for one invocation.
pub struct PlanInput<'a> {
    pub artifacts: &'a ResolvedArtifacts,
    pub capabilities: CapabilitySet,
    pub preset: &'a Preset,
    pub generation: &'a GenerationSettings,
    pub program: &'a ProgramSettings,
    pub output_root: &'a Path,
    pub seed: u64,
    pub conservative: bool,
}

/// Fetch a mandatory artifact or fail before any plan exists.
fn require(artifacts: &ResolvedArtifacts, slot: ArtifactSlot) -> Result<&Path, LaunchError> {
    artifacts
        .path(slot)
        .ok_or_else(|| LaunchError::UnresolvedArtifact(slot.name().to_string()))
}

/// Python-style float rendering: `1` → `1.0`, `0.75` → `0.75`.
fn fmt_float(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

/// Build the execution plan.
pub fn plan(input: &PlanInput) -> Result<ExecutionPlan, LaunchError> {
    let a = input.artifacts;
    let g = input.generation;
    let p = input.preset;
    let caps = input.capabilities;

    let dit = require(a, ArtifactSlot::Dit)?;
    let vae = require(a, ArtifactSlot::Vae)?;
    let t5 = require(a, ArtifactSlot::T5)?;
    let lora_low = require(a, ArtifactSlot::LoraLow)?;
    let lora_high = a.path(ArtifactSlot::LoraHigh);

    let output_dir = input.output_root.join(p.name);
    let mut notices = Vec::new();
    let mut flags = Vec::new();

    flags.push(PlanFlag::value("--task", g.task.clone()));
    flags.push(PlanFlag::value("--save_path", path_str(&output_dir)));
    flags.push(PlanFlag::value("--prompt", g.prompt.clone()));

    // Models
    flags.push(PlanFlag::value("--dit", path_str(dit)));
    if let Some(dit_high) = a.path(ArtifactSlot::DitHigh) {
        flags.push(PlanFlag::value("--dit_high_noise", path_str(dit_high)));
    }
    flags.push(PlanFlag::value("--vae", path_str(vae)));
    flags.push(PlanFlag::value("--t5", path_str(t5)));

    // LoRA
    flags.push(PlanFlag::value("--lora_weight", path_str(lora_low)));
    flags.push(PlanFlag::value("--lora_multiplier", fmt_float(g.lora_multiplier)));
    match lora_high {
        Some(path) => {
            flags.push(PlanFlag::value("--lora_weight_high_noise", path_str(path)));
            flags.push(PlanFlag::value(
                "--lora_multiplier_high_noise",
                fmt_float(g.lora_multiplier_high_noise),
            ));
        }
        None => notices.push(
            "no high-noise LoRA found: running low-noise LoRA only (degraded mode)".to_string(),
        ),
    }

    // Generation
    if let Some(ref negative) = g.negative_prompt {
        flags.push(PlanFlag::value("--negative_prompt", negative.clone()));
    }
    let ((height, width), fps) = if input.conservative {
        if g.video_size.is_some() || g.fps.is_some() {
            notices.push(format!(
                "conservative mode: requested size/fps replaced by {}x{} at {} fps",
                CONSERVATIVE_SIZE.0, CONSERVATIVE_SIZE.1, CONSERVATIVE_FPS
            ));
        }
        (CONSERVATIVE_SIZE, CONSERVATIVE_FPS)
    } else {
        let [h, w] = g.video_size.unwrap_or([p.height, p.width]);
        ((h, w), g.fps.unwrap_or(p.fps))
    };
    flags.push(PlanFlag {
        flag: "--video_size".to_string(),
        values: vec![height.to_string(), width.to_string()],
    });
    let video_length = g.video_length.unwrap_or(p.video_length);
    flags.push(PlanFlag::value("--video_length", video_length.to_string()));
    flags.push(PlanFlag::value("--fps", fps.to_string()));
    flags.push(PlanFlag::value("--seed", input.seed.to_string()));
    let infer_steps = g.infer_steps.unwrap_or(p.infer_steps);
    flags.push(PlanFlag::value("--infer_steps", infer_steps.to_string()));
    let guidance = g.guidance_scale.unwrap_or(p.guidance_scale);
    flags.push(PlanFlag::value("--guidance_scale", fmt_float(guidance)));
    if lora_high.is_some() {
        let guidance_high = g
            .guidance_scale_high_noise
            .unwrap_or(p.guidance_scale_high_noise);
        flags.push(PlanFlag::value(
            "--guidance_scale_high_noise",
            fmt_float(guidance_high),
        ));
    }
    if let Some(shift) = g.flow_shift {
        flags.push(PlanFlag::value("--flow_shift", fmt_float(shift)));
    }
    if let Some(boundary) = g.timestep_boundary {
        flags.push(PlanFlag::value("--timestep_boundary", fmt_float(boundary)));
    }

    // Sampling
    flags.push(PlanFlag::value("--sample_solver", g.sample_solver.clone()));
    if g.cfg_skip_mode != CFG_SKIP_NONE {
        flags.push(PlanFlag::value("--cfg_skip_mode", g.cfg_skip_mode.clone()));
    }
    if let Some(ratio) = g.cfg_apply_ratio {
        flags.push(PlanFlag::value("--cfg_apply_ratio", fmt_float(ratio)));
    }
    push_skip_layer_guidance(&mut flags, &g.slg);

    // Runtime
    flags.push(PlanFlag::value("--device", g.device.clone()));
    flags.push(PlanFlag::value("--vae_dtype", g.vae_dtype.clone()));
    push_acceleration(&mut flags, &mut notices, caps, input.conservative);
    if g.blocks_to_swap > 0 {
        flags.push(PlanFlag::value("--blocks_to_swap", g.blocks_to_swap.to_string()));
    }
    for (enabled, flag) in [
        (g.offload_inactive_dit, "--offload_inactive_dit"),
        (g.vae_cache_cpu, "--vae_cache_cpu"),
        (g.cpu_noise, "--cpu_noise"),
    ] {
        if enabled {
            flags.push(PlanFlag::switch(flag));
        }
    }

    // Output
    flags.push(PlanFlag::value("--output_type", g.output_type.clone()));
    if g.trim_tail_frames > 0 {
        flags.push(PlanFlag::value(
            "--trim_tail_frames",
            g.trim_tail_frames.to_string(),
        ));
    }
    if g.no_metadata {
        flags.push(PlanFlag::switch("--no_metadata"));
    }

    Ok(ExecutionPlan {
        preset: p.name.to_string(),
        program: input.program.argv.clone(),
        working_dir: input.program.working_dir.clone(),
        flags,
        output_dir,
        seed: input.seed,
        notices,
    })
}

/// SLG flags, all or nothing depending on `layers`.
fn push_skip_layer_guidance(flags: &mut Vec<PlanFlag>, slg: &SkipLayerGuidance) {
    let layers = match slg.layers.as_deref().map(str::trim) {
        Some(l) if !l.is_empty() => l,
        _ => return,
    };
    flags.push(PlanFlag::value("--slg_layers", layers));
    flags.push(PlanFlag::value("--slg_scale", fmt_float(slg.scale)));
    flags.push(PlanFlag::value("--slg_start", fmt_float(slg.start)));
    flags.push(PlanFlag::value("--slg_end", fmt_float(slg.end)));
    if let Some(ref mode) = slg.mode {
        flags.push(PlanFlag::value("--slg_mode", mode.clone()));
    }
}

/// FP8, attention and compile flags.
fn push_acceleration(
    flags: &mut Vec<PlanFlag>,
    notices: &mut Vec<String>,
    caps: CapabilitySet,
    conservative: bool,
) {
    if conservative {
        flags.push(PlanFlag::value("--attn_mode", "torch"));
        notices.push("conservative mode: FP8, fast attention and compilation disabled".to_string());
        return;
    }

    flags.push(PlanFlag::switch("--fp8"));
    flags.push(PlanFlag::switch("--fp8_scaled"));
    let gpu_match = caps.has(Capability::GpuMatch);
    if gpu_match {
        flags.push(PlanFlag::switch("--fp8_fast"));
    }
    flags.push(PlanFlag::switch("--fp8_t5"));

    if gpu_match {
        flags.push(PlanFlag::value("--attn_mode", "flash3"));
    } else {
        flags.push(PlanFlag::value("--attn_mode", "sdpa"));
        notices.push("GPU does not match the tuned model: fp8_fast and flash3 disabled".to_string());
    }

    if caps.has(Capability::AccelCompileOk) {
        flags.push(PlanFlag::switch(COMPILE_FLAG));
    } else {
        notices.push("compile trial failed or was skipped: using stable flag set".to_string());
    }
}
