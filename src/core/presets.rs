//! WR-006: Named generation presets.

use super::error::LaunchError;
use indexmap::IndexMap;

/// Resolution, length and sampling settings for one kind of run.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub height: u32,
    pub width: u32,
    /// Frames
    pub video_length: u32,
    pub fps: u32,
    pub infer_steps: u32,
    pub guidance_scale: f64,
    /// Only emitted when a high-noise LoRA is present
    pub guidance_scale_high_noise: f64,
}

/// Built-in presets, in display order.
pub fn builtin() -> IndexMap<&'static str, Preset> {
    let presets = [
        Preset {
            name: "basic",
            description: "480p quick check of a freshly trained LoRA",
            height: 480,
            width: 832,
            video_length: 81,
            fps: 16,
            infer_steps: 30,
            guidance_scale: 3.0,
            guidance_scale_high_noise: 4.0,
        },
        Preset {
            name: "high-quality",
            description: "480p with more sampling steps and 24 fps",
            height: 480,
            width: 832,
            video_length: 81,
            fps: 24,
            infer_steps: 50,
            guidance_scale: 3.5,
            guidance_scale_high_noise: 4.0,
        },
        Preset {
            name: "ultra-hd",
            description: "720p final render",
            height: 720,
            width: 1280,
            video_length: 81,
            fps: 24,
            infer_steps: 40,
            guidance_scale: 3.0,
            guidance_scale_high_noise: 4.0,
        },
        Preset {
            name: "batch",
            description: "short low-step clips for seed and prompt sweeps",
            height: 480,
            width: 832,
            video_length: 49,
            fps: 16,
            infer_steps: 20,
            guidance_scale: 3.0,
            guidance_scale_high_noise: 3.5,
        },
    ];
    presets.into_iter().map(|p| (p.name, p)).collect()
}

/// Look up a preset by name.
pub fn find(name: &str) -> Result<Preset, LaunchError> {
    builtin()
        .shift_remove(name)
        .ok_or_else(|| LaunchError::UnknownPreset(name.to_string()))
}
