//! WR-017: CLI — one linear run, no subcommands.

use crate::core::error::LaunchError;
use crate::core::executor;
use crate::core::parser;
use crate::core::presets::{self, Preset};
use crate::core::types::{ExecutionPlan, GenerationSettings, LaunchOutcome, RunReport};
use crate::provenance::eventlog;
use clap::Args;
use std::io::BufRead;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Workspace base directory (overrides $WANRUN_WORKSPACE and the config file)
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Launch config (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Generation preset
    #[arg(short, long, default_value = "basic")]
    pub preset: String,

    /// Text prompt
    #[arg(long)]
    pub prompt: Option<String>,

    /// Negative prompt
    #[arg(long)]
    pub negative_prompt: Option<String>,

    /// Random seed (random when omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Low-noise LoRA multiplier
    #[arg(long)]
    pub lora_multiplier: Option<f64>,

    /// High-noise LoRA multiplier
    #[arg(long)]
    pub lora_multiplier_high_noise: Option<f64>,

    /// Video size, replacing the preset's
    #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"])]
    pub video_size: Option<Vec<u32>>,

    /// Frames, replacing the preset's
    #[arg(long)]
    pub video_length: Option<u32>,

    /// Frame rate, replacing the preset's
    #[arg(long)]
    pub fps: Option<u32>,

    /// Sampling steps, replacing the preset's
    #[arg(long)]
    pub infer_steps: Option<u32>,

    /// CFG scale for the low-noise model
    #[arg(long)]
    pub guidance_scale: Option<f64>,

    /// CFG scale for the high-noise model (needs a high-noise LoRA)
    #[arg(long)]
    pub guidance_scale_high_noise: Option<f64>,

    /// High/low-noise model switch point (0.0-1.0)
    #[arg(long)]
    pub timestep_boundary: Option<f64>,

    /// CFG skip strategy: none, early, late, middle, early_late, alternate
    #[arg(long)]
    pub cfg_skip_mode: Option<String>,

    /// Ratio of steps that apply CFG
    #[arg(long)]
    pub cfg_apply_ratio: Option<f64>,

    /// Skip layer guidance block indices, e.g. "7,8,9"
    #[arg(long)]
    pub slg_layers: Option<String>,

    #[arg(long)]
    pub slg_scale: Option<f64>,

    #[arg(long)]
    pub slg_start: Option<f64>,

    #[arg(long)]
    pub slg_end: Option<f64>,

    /// SLG mode: original or uncond
    #[arg(long)]
    pub slg_mode: Option<String>,

    /// Offload the inactive DiT to CPU
    #[arg(long)]
    pub offload_inactive_dit: bool,

    /// Cache VAE features on CPU
    #[arg(long)]
    pub vae_cache_cpu: bool,

    /// Generate noise on CPU
    #[arg(long)]
    pub cpu_noise: bool,

    /// Frames to trim from the end of the video
    #[arg(long)]
    pub trim_tail_frames: Option<u32>,

    /// Do not save generation metadata
    #[arg(long)]
    pub no_metadata: bool,

    /// Disable FP8, fast attention and compilation; 512x512 at 16 fps
    #[arg(long)]
    pub conservative: bool,

    /// Skip capability probes and use the stable flag set
    #[arg(long)]
    pub no_probe: bool,

    /// Print the plan and command without launching
    #[arg(long)]
    pub dry_run: bool,

    /// Wait for Enter before launching
    #[arg(long)]
    pub confirm: bool,

    /// Do not write <output>/events.jsonl
    #[arg(long)]
    pub no_event_log: bool,

    /// List presets with example command lines and exit
    #[arg(long)]
    pub list_presets: bool,
}

/// Run the launcher.
pub fn run(args: LaunchArgs) -> Result<(), String> {
    if args.list_presets {
        print_presets();
        return Ok(());
    }

    let config = parser::load_config(args.config.as_deref()).map_err(|e| e.to_string())?;
    let layout = parser::build_layout(
        &config,
        args.workspace.as_deref(),
        std::env::var_os(parser::WORKSPACE_ENV),
    )
    .map_err(|e| e.to_string())?;
    let preset = presets::find(&args.preset).map_err(|e| e.to_string())?;

    let mut launch = config;
    launch.generation = apply_overrides(launch.generation, &args);
    parser::check_config(&launch).map_err(|e| e.to_string())?;
    let seed = args.seed.unwrap_or_else(eventlog::random_seed);

    let confirm = args.confirm && !args.dry_run;
    let review = |plan: &ExecutionPlan| {
        print_plan(plan);
        !confirm || ask_to_launch()
    };

    let cfg = executor::RunConfig {
        layout: &layout,
        launch: &launch,
        preset: &preset,
        seed,
        conservative: args.conservative,
        probe: !args.no_probe,
        dry_run: args.dry_run,
        event_log: !args.no_event_log,
        review: &review,
    };

    let report = executor::run(&cfg).map_err(|e| e.to_string())?;
    summarize(&report)
}

/// CLI values win over the config file.
fn apply_overrides(mut generation: GenerationSettings, args: &LaunchArgs) -> GenerationSettings {
    if let Some(ref prompt) = args.prompt {
        generation.prompt.clone_from(prompt);
    }
    if let Some(ref negative) = args.negative_prompt {
        generation.negative_prompt = Some(negative.clone());
    }
    if let Some(m) = args.lora_multiplier {
        generation.lora_multiplier = m;
    }
    if let Some(m) = args.lora_multiplier_high_noise {
        generation.lora_multiplier_high_noise = m;
    }
    if let Some(&[height, width]) = args.video_size.as_deref() {
        generation.video_size = Some([height, width]);
    }
    generation.video_length = args.video_length.or(generation.video_length);
    generation.fps = args.fps.or(generation.fps);
    generation.infer_steps = args.infer_steps.or(generation.infer_steps);
    generation.guidance_scale = args.guidance_scale.or(generation.guidance_scale);
    generation.guidance_scale_high_noise = args
        .guidance_scale_high_noise
        .or(generation.guidance_scale_high_noise);
    generation.timestep_boundary = args.timestep_boundary.or(generation.timestep_boundary);
    if let Some(ref mode) = args.cfg_skip_mode {
        generation.cfg_skip_mode.clone_from(mode);
    }
    generation.cfg_apply_ratio = args.cfg_apply_ratio.or(generation.cfg_apply_ratio);

    let slg = &mut generation.slg;
    if let Some(ref layers) = args.slg_layers {
        slg.layers = Some(layers.clone());
    }
    if let Some(ref mode) = args.slg_mode {
        slg.mode = Some(mode.clone());
    }
    slg.scale = args.slg_scale.unwrap_or(slg.scale);
    slg.start = args.slg_start.unwrap_or(slg.start);
    slg.end = args.slg_end.unwrap_or(slg.end);

    generation.offload_inactive_dit |= args.offload_inactive_dit;
    generation.vae_cache_cpu |= args.vae_cache_cpu;
    generation.cpu_noise |= args.cpu_noise;
    generation.no_metadata |= args.no_metadata;
    if let Some(n) = args.trim_tail_frames {
        generation.trim_tail_frames = n;
    }
    generation
}

/// Print the final pass/fail line; a failed launch becomes an error.
fn summarize(report: &RunReport) -> Result<(), String> {
    println!();
    match &report.outcome {
        None => {
            println!("Dry run: not launched. Plan {}", report.fingerprint);
            Ok(())
        }
        Some(LaunchOutcome::Succeeded { output_dir }) => {
            println!(
                "SUCCEEDED: output in {} ({:.1}s, run {})",
                output_dir.display(),
                report.total_duration.as_secs_f64(),
                report.run_id
            );
            Ok(())
        }
        Some(LaunchOutcome::Failed {
            exit_code,
            interrupted,
        }) => {
            println!(
                "FAILED: exit code {} after {:.1}s (run {}); partial output left in {}",
                exit_code,
                report.total_duration.as_secs_f64(),
                report.run_id,
                report.output_dir.display()
            );
            println!("Re-run with --no-probe or --conservative to use the stable flag set.");
            let err = if *interrupted {
                LaunchError::Interrupted
            } else {
                LaunchError::ExternalProcess {
                    exit_code: *exit_code,
                }
            };
            Err(err.to_string())
        }
    }
}

/// Display a plan to stdout.
fn print_plan(plan: &ExecutionPlan) {
    println!();
    println!(
        "Plan: {} (seed {}, {} flags)",
        plan.preset,
        plan.seed,
        plan.flags.len()
    );
    for f in &plan.flags {
        if f.values.is_empty() {
            println!("  {}", f.flag);
        } else {
            let values: Vec<String> = f.values.iter().map(|v| shell_quote(v)).collect();
            println!("  {} {}", f.flag, values.join(" "));
        }
    }
    for notice in &plan.notices {
        println!("  note: {}", notice);
    }
    println!("  fingerprint: {}", plan.fingerprint());
    println!();
    println!("Command:");
    println!("{}", render_command(&plan.command_line(), plan.working_dir.as_deref()));
}

/// Render argv as a copy-pasteable shell line.
fn render_command(argv: &[String], cwd: Option<&Path>) -> String {
    let line: Vec<String> = argv.iter().map(|a| shell_quote(a)).collect();
    match cwd {
        Some(dir) => format!("cd {} && {}", shell_quote(&dir.to_string_lossy()), line.join(" ")),
        None => line.join(" "),
    }
}

/// Single-quote an argument for POSIX shells when it needs quoting.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Block until the operator presses Enter. Anything starting with `n` declines.
fn ask_to_launch() -> bool {
    println!();
    println!("Press Enter to launch, or type 'n' to abort.");
    let stdin = std::io::stdin();
    let mut line = String::new();
    match stdin.lock().read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => !line.trim().to_ascii_lowercase().starts_with('n'),
    }
}

/// Example command line for a preset.
fn example_command(preset: &Preset) -> String {
    format!(
        "wanrun --preset {} --prompt 'A video of CHARACTER walking in a garden' --seed 42",
        preset.name
    )
}

fn print_presets() {
    println!("Presets:");
    for preset in presets::builtin().values() {
        println!(
            "  {:<13} {}x{} {} frames @ {} fps, {} steps, cfg {}/{}  {}",
            preset.name,
            preset.width,
            preset.height,
            preset.video_length,
            preset.fps,
            preset.infer_steps,
            preset.guidance_scale,
            preset.guidance_scale_high_noise,
            preset.description
        );
        println!("      {}", example_command(preset));
    }
    println!();
    println!("Workspace: --workspace DIR or ${}", parser::WORKSPACE_ENV);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: LaunchArgs,
    }

    fn parse(argv: &[&str]) -> LaunchArgs {
        let mut full = vec!["wanrun"];
        full.extend_from_slice(argv);
        TestCli::parse_from(full).args
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), b"weights").unwrap();
    }

    /// Workspace with mandatory artifacts and a config whose program is `stub`.
    fn workspace(stub: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        touch(&base.join("models/diffusion_models"), "low.safetensors");
        touch(&base.join("models/vae"), "vae.safetensors");
        touch(&base.join("models/text_encoders"), "umt5.pth");
        touch(&base.join("loras/low_noise"), "char.safetensors");
        let config = base.join("wanrun.yaml");
        std::fs::write(&config, format!("program:\n  argv: [{}]\n", stub)).unwrap();
        (dir, config)
    }

    #[test]
    fn test_wr017_parse_defaults() {
        let args = parse(&[]);
        assert_eq!(args.preset, "basic");
        assert!(args.seed.is_none());
        assert!(!args.dry_run);
    }

    #[test]
    fn test_wr017_parse_flags() {
        let args = parse(&[
            "--preset", "ultra-hd", "--seed", "7", "--conservative", "--no-probe",
            "--lora-multiplier", "0.8",
        ]);
        assert_eq!(args.preset, "ultra-hd");
        assert_eq!(args.seed, Some(7));
        assert!(args.conservative);
        assert!(args.no_probe);
        assert_eq!(args.lora_multiplier, Some(0.8));
    }

    #[test]
    fn test_wr017_apply_overrides() {
        let args = parse(&["--prompt", "a red fox", "--negative-prompt", "blurry"]);
        let g = apply_overrides(GenerationSettings::default(), &args);
        assert_eq!(g.prompt, "a red fox");
        assert_eq!(g.negative_prompt.as_deref(), Some("blurry"));
        assert_eq!(g.lora_multiplier, 1.0);
    }

    #[test]
    fn test_wr017_generation_overrides() {
        let args = parse(&[
            "--video-size", "720", "1280", "--infer-steps", "20", "--guidance-scale", "4.5",
            "--cfg-skip-mode", "late", "--slg-layers", "7,8", "--slg-end", "0.5",
            "--offload-inactive-dit", "--trim-tail-frames", "3", "--no-metadata",
        ]);
        let base = GenerationSettings {
            fps: Some(30),
            cpu_noise: true,
            ..GenerationSettings::default()
        };
        let g = apply_overrides(base, &args);
        assert_eq!(g.video_size, Some([720, 1280]));
        assert_eq!(g.infer_steps, Some(20));
        assert_eq!(g.guidance_scale, Some(4.5));
        assert_eq!(g.fps, Some(30), "config value kept when the flag is absent");
        assert_eq!(g.cfg_skip_mode, "late");
        assert_eq!(g.slg.layers.as_deref(), Some("7,8"));
        assert_eq!(g.slg.end, 0.5);
        assert_eq!(g.slg.scale, 3.0);
        assert!(g.offload_inactive_dit);
        assert!(g.cpu_noise, "config switch stays on");
        assert!(g.no_metadata);
        assert_eq!(g.trim_tail_frames, 3);
    }

    #[test]
    fn test_wr017_video_size_needs_two_values() {
        let result = TestCli::try_parse_from(["wanrun", "--video-size", "720"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_wr017_invalid_override_rejected_before_launch() {
        let (dir, _) = workspace("\"true\"");
        let marker = dir.path().join("launched");
        let config = dir.path().join("touch.yaml");
        std::fs::write(
            &config,
            format!("program:\n  argv: [sh, -c, \"touch {}\"]\n", marker.display()),
        )
        .unwrap();
        let ws = dir.path().to_string_lossy().to_string();
        let cfg = config.to_string_lossy().to_string();

        for (flag, value, field) in [
            ("--lora-multiplier", "NaN", "generation.lora_multiplier must be finite"),
            (
                "--lora-multiplier-high-noise",
                "inf",
                "generation.lora_multiplier_high_noise must be finite",
            ),
            ("--cfg-apply-ratio", "2", "generation.cfg_apply_ratio must be within"),
            ("--slg-mode", "inverse", "generation.slg.mode must be one of"),
        ] {
            let err = run(parse(&["-w", &ws, "-c", &cfg, "--no-probe", flag, value]))
                .unwrap_err();
            assert!(err.contains(field), "{flag}: {err}");
        }
        assert!(!marker.exists());
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn test_wr017_summarize_interrupted() {
        let report = RunReport {
            run_id: "r-test".to_string(),
            state: crate::core::types::RunState::Failed,
            fingerprint: "blake3:00".to_string(),
            output_dir: PathBuf::from("/ws/output/basic"),
            outcome: Some(LaunchOutcome::Failed {
                exit_code: -1,
                interrupted: true,
            }),
            total_duration: std::time::Duration::from_millis(500),
        };
        let err = summarize(&report).unwrap_err();
        assert_eq!(err, LaunchError::Interrupted.to_string());

        let report = RunReport {
            outcome: Some(LaunchOutcome::Failed {
                exit_code: 3,
                interrupted: false,
            }),
            ..report
        };
        assert!(summarize(&report).unwrap_err().contains("exit code 3"));
    }

    #[test]
    fn test_wr017_shell_quote() {
        assert_eq!(shell_quote("--fp8"), "--fp8");
        assert_eq!(shell_quote("/ws/models/dit.safetensors"), "/ws/models/dit.safetensors");
        assert_eq!(shell_quote("a fox"), "'a fox'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_wr017_render_command_with_cwd() {
        let argv = vec!["python".to_string(), "gen.py".to_string(), "a b".to_string()];
        assert_eq!(
            render_command(&argv, Some(Path::new("/opt/musubi"))),
            "cd /opt/musubi && python gen.py 'a b'"
        );
    }

    #[test]
    fn test_wr017_list_presets() {
        run(parse(&["--list-presets"])).unwrap();
    }

    #[test]
    fn test_wr017_example_command() {
        let p = presets::find("batch").unwrap();
        assert!(example_command(&p).contains("--preset batch"));
    }

    #[test]
    fn test_wr017_unknown_preset() {
        let (dir, config) = workspace("\"true\"");
        let ws = dir.path().to_string_lossy().to_string();
        let cfg = config.to_string_lossy().to_string();
        let err = run(parse(&["-w", &ws, "-c", &cfg, "--preset", "8k"])).unwrap_err();
        assert!(err.contains("unknown preset"));
    }

    #[test]
    fn test_wr017_run_success() {
        let (dir, config) = workspace("\"true\"");
        let ws = dir.path().to_string_lossy().to_string();
        let cfg = config.to_string_lossy().to_string();
        run(parse(&["-w", &ws, "-c", &cfg, "--no-probe", "--seed", "1"])).unwrap();
        assert!(dir.path().join("output/basic/events.jsonl").exists());
    }

    #[test]
    fn test_wr017_run_failure_reports_exit_code() {
        let (dir, config) = workspace("\"false\"");
        let ws = dir.path().to_string_lossy().to_string();
        let cfg = config.to_string_lossy().to_string();
        let err = run(parse(&["-w", &ws, "-c", &cfg, "--no-probe", "--no-event-log"]))
            .unwrap_err();
        assert!(err.contains("exit code 1"), "{err}");
        assert!(!dir.path().join("output/basic/events.jsonl").exists());
    }

    #[test]
    fn test_wr017_run_missing_artifact() {
        let (dir, config) = workspace("\"true\"");
        std::fs::remove_dir_all(dir.path().join("models/text_encoders")).unwrap();
        let ws = dir.path().to_string_lossy().to_string();
        let cfg = config.to_string_lossy().to_string();
        let err = run(parse(&["-w", &ws, "-c", &cfg, "--no-probe"])).unwrap_err();
        assert!(err.contains("missing mandatory artifact 't5'"), "{err}");
    }

    #[test]
    fn test_wr017_dry_run() {
        let (dir, config) = workspace("\"false\"");
        let ws = dir.path().to_string_lossy().to_string();
        let cfg = config.to_string_lossy().to_string();
        run(parse(&["-w", &ws, "-c", &cfg, "--no-probe", "--dry-run", "--confirm"])).unwrap();
        assert!(!dir.path().join("output").exists());
    }
}
