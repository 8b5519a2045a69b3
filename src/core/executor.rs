//! WR-012: Executor — the launch pipeline.
//!
//! resolve → probe → plan → review → launch, one stage at a time:
//! `Resolving → Probing → Planning → Launching → {Succeeded, Failed}`.
//! Resolution failures stop the run before anything touches the disk; the
//! output directory is only created once launching starts.

use super::error::LaunchError;
use super::planner::{self, PlanInput};
use super::presets::Preset;
use super::probe;
use super::resolver;
use super::types::*;
use crate::provenance::eventlog::{self, EventBuffer};
use crate::transport::{self, AttachedExit};
use std::path::PathBuf;
use std::time::Instant;

/// Configuration for one run.
pub struct RunConfig<'a> {
    pub layout: &'a WorkspaceLayout,
    pub launch: &'a LaunchConfig,
    pub preset: &'a Preset,
    pub seed: u64,
    /// Drop every acceleration flag
    pub conservative: bool,
    /// Skip capability probes (all capabilities absent)
    pub probe: bool,
    /// Stop after planning
    pub dry_run: bool,
    /// Write `<output>/events.jsonl`
    pub event_log: bool,
    /// Called with the finished plan; returning false declines the launch
    pub review: &'a dyn Fn(&ExecutionPlan) -> bool,
}

/// Forward-only run state tracker.
struct Pipeline {
    state: RunState,
    events: EventBuffer,
}

impl Pipeline {
    fn new(run_id: &str) -> Self {
        let mut events = EventBuffer::new(run_id);
        events.record(RunEvent::StateEntered {
            run_id: run_id.to_string(),
            state: RunState::Resolving.to_string(),
        });
        Self {
            state: RunState::Resolving,
            events,
        }
    }

    fn advance(&mut self, next: RunState) -> Result<(), LaunchError> {
        if !self.state.can_advance_to(next) {
            return Err(LaunchError::StateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        let run_id = self.events.run_id().to_string();
        self.events.record(RunEvent::StateEntered {
            run_id,
            state: next.to_string(),
        });
        Ok(())
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            let _ = self.advance(RunState::Failed);
        }
    }
}

/// Execute the pipeline.
pub fn run(cfg: &RunConfig) -> Result<RunReport, LaunchError> {
    let start = Instant::now();
    let run_id = eventlog::generate_run_id();
    let mut pipeline = Pipeline::new(&run_id);
    pipeline.events.record(RunEvent::RunStarted {
        run_id: run_id.clone(),
        wanrun_version: env!("CARGO_PKG_VERSION").to_string(),
        preset: cfg.preset.name.to_string(),
    });

    let result = run_stages(cfg, &mut pipeline);
    if result.is_err() {
        pipeline.fail();
    }
    let (plan_fingerprint, output_dir, outcome) = result?;

    Ok(RunReport {
        run_id,
        state: pipeline.state,
        fingerprint: plan_fingerprint,
        output_dir,
        outcome,
        total_duration: start.elapsed(),
    })
}

type StageResult = (String, PathBuf, Option<LaunchOutcome>);

fn run_stages(cfg: &RunConfig, pipeline: &mut Pipeline) -> Result<StageResult, LaunchError> {
    // Resolving
    println!("Resolving artifacts under {}", cfg.layout.base.display());
    let artifacts = resolver::resolve(cfg.layout)?;
    for (slot, artifact) in artifacts.iter() {
        let path = match artifact {
            Artifact::Present(p) => {
                println!("  {:<9} {}", slot.name(), p.display());
                Some(p.to_string_lossy().to_string())
            }
            Artifact::Absent => {
                println!("  {:<9} (absent)", slot.name());
                None
            }
        };
        pipeline.events.record(RunEvent::ArtifactResolved {
            slot: slot.name().to_string(),
            path,
        });
    }

    // Probing
    pipeline.advance(RunState::Probing)?;
    let capabilities = if cfg.probe {
        println!("Probing capabilities...");
        let (caps, reports) = probe::probe_all(&cfg.launch.probes);
        for r in reports {
            let mark = if r.present { "yes" } else { "no" };
            println!("  {:<16} {} ({})", r.capability.name(), mark, r.detail);
            pipeline.events.record(RunEvent::CapabilityProbed {
                capability: r.capability.name().to_string(),
                present: r.present,
                detail: r.detail,
            });
        }
        caps
    } else {
        println!("Probing skipped: assuming no optional capabilities");
        CapabilitySet::default()
    };

    // Planning
    pipeline.advance(RunState::Planning)?;
    let output_root = cfg.layout.output_root();
    let plan = planner::plan(&PlanInput {
        artifacts: &artifacts,
        capabilities,
        preset: cfg.preset,
        generation: &cfg.launch.generation,
        program: &cfg.launch.program,
        output_root: &output_root,
        seed: cfg.seed,
        conservative: cfg.conservative,
    })?;
    let fingerprint = plan.fingerprint();
    let output_dir = plan.output_dir.clone();
    pipeline.events.record(RunEvent::PlanBuilt {
        run_id: pipeline.events.run_id().to_string(),
        fingerprint: fingerprint.clone(),
        seed: plan.seed,
        notices: plan.notices.clone(),
    });

    let approved = (cfg.review)(&plan);
    if cfg.dry_run {
        return Ok((fingerprint, output_dir, None));
    }
    if !approved {
        return Err(LaunchError::Declined);
    }

    // Launching
    pipeline.advance(RunState::Launching)?;
    let launch_start = Instant::now();
    let launched = launch(plan);
    let outcome = match launched {
        Ok(outcome) => outcome,
        Err(e) => {
            // The output dir may already exist; record the failure there.
            pipeline.fail();
            flush_events(cfg, pipeline, &output_dir);
            return Err(e);
        }
    };

    let (exit_code, interrupted) = match outcome {
        LaunchOutcome::Succeeded { .. } => (0, false),
        LaunchOutcome::Failed {
            exit_code,
            interrupted,
        } => (exit_code, interrupted),
    };
    pipeline.events.record(RunEvent::LaunchCompleted {
        run_id: pipeline.events.run_id().to_string(),
        exit_code,
        interrupted,
        duration_seconds: launch_start.elapsed().as_secs_f64(),
    });
    pipeline.advance(outcome.terminal_state())?;
    flush_events(cfg, pipeline, &output_dir);

    Ok((fingerprint, output_dir, Some(outcome)))
}

fn flush_events(cfg: &RunConfig, pipeline: &mut Pipeline, output_dir: &std::path::Path) {
    if !cfg.event_log || !output_dir.is_dir() {
        return;
    }
    if let Err(e) = pipeline.events.flush(output_dir) {
        eprintln!("warning: event log not written: {}", e);
    }
}

/// Launch the external program for a plan and wait for it.
///
/// Consumes the plan. The output directory is created first (existing is
/// fine). A non-zero exit is a `Failed` outcome, not an error; nothing the
/// program wrote is removed.
pub fn launch(plan: ExecutionPlan) -> Result<LaunchOutcome, LaunchError> {
    std::fs::create_dir_all(&plan.output_dir).map_err(|e| LaunchError::Io {
        path: plan.output_dir.clone(),
        source: e,
    })?;

    let argv = plan.command_line();
    let exit = transport::exec_attached(&argv, plan.working_dir.as_deref())
        .map_err(LaunchError::Spawn)?;

    Ok(outcome_of(exit, plan.output_dir))
}

/// Only a clean zero exit succeeds; an interrupt is a failure with code -1.
fn outcome_of(exit: AttachedExit, output_dir: PathBuf) -> LaunchOutcome {
    match exit {
        AttachedExit::Exited(0) => LaunchOutcome::Succeeded { output_dir },
        other => LaunchOutcome::Failed {
            exit_code: other.code(),
            interrupted: other == AttachedExit::Interrupted,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::presets;
    use std::cell::Cell;
    use std::path::Path;

    fn touch(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), b"weights").unwrap();
    }

    /// Workspace with every mandatory artifact and only the low-noise LoRA.
    fn low_noise_only_workspace(base: &Path) -> WorkspaceLayout {
        let layout = WorkspaceLayout {
            base: base.to_path_buf(),
            ..WorkspaceLayout::default()
        };
        touch(&layout.slot_dir(ArtifactSlot::Dit), "wan2.2_t2v_low_noise_14B.safetensors");
        touch(&layout.slot_dir(ArtifactSlot::Vae), "wan_2.1_vae.safetensors");
        touch(&layout.slot_dir(ArtifactSlot::T5), "models_t5_umt5-xxl-enc-bf16.pth");
        touch(&layout.slot_dir(ArtifactSlot::LoraLow), "character-000005.safetensors");
        touch(&layout.slot_dir(ArtifactSlot::LoraLow), "character-000010.safetensors");
        layout
    }

    /// Launch config whose program is `stub` and whose probes report
    /// a matching GPU but a failing compile trial.
    fn stub_config(stub: &[&str]) -> LaunchConfig {
        LaunchConfig {
            program: ProgramSettings {
                argv: stub.iter().map(|s| s.to_string()).collect(),
                working_dir: None,
            },
            probes: ProbeSettings {
                gpu_query: vec!["echo".to_string(), "NVIDIA H100 80GB HBM3".to_string()],
                gpu_pattern: "H100".to_string(),
                gpu_timeout_secs: 5,
                compile_trial: vec!["false".to_string()],
                compile_timeout_secs: 5,
            },
            ..LaunchConfig::default()
        }
    }

    fn run_with(
        layout: &WorkspaceLayout,
        launch: &LaunchConfig,
        dry_run: bool,
        review: &dyn Fn(&ExecutionPlan) -> bool,
    ) -> Result<RunReport, LaunchError> {
        let preset = presets::find("basic").unwrap();
        run(&RunConfig {
            layout,
            launch,
            preset: &preset,
            seed: 42,
            conservative: false,
            probe: true,
            dry_run,
            event_log: true,
            review,
        })
    }

    #[test]
    fn test_wr012_end_to_end_success() {
        let dir = tempfile::tempdir().unwrap();
        let layout = low_noise_only_workspace(dir.path());
        let launch_cfg = stub_config(&["true"]);

        let seen: Cell<Option<ExecutionPlan>> = Cell::new(None);
        let review = |plan: &ExecutionPlan| {
            seen.set(Some(plan.clone()));
            true
        };
        let report = run_with(&layout, &launch_cfg, false, &review).unwrap();

        let expected_out = dir.path().join("output").join("basic");
        assert_eq!(report.state, RunState::Succeeded);
        assert_eq!(
            report.outcome,
            Some(LaunchOutcome::Succeeded {
                output_dir: expected_out.clone()
            })
        );
        assert_eq!(report.output_dir, expected_out);
        assert!(expected_out.is_dir());

        let plan = seen.take().unwrap();
        assert!(!plan.has_flag(planner::COMPILE_FLAG), "compile probe failed");
        for flag in planner::HIGH_NOISE_LORA_FLAGS {
            assert!(!plan.has_flag(flag));
        }
        assert!(plan
            .flag_values("--lora_weight")
            .unwrap()[0]
            .ends_with("character-000010.safetensors"));
        assert_eq!(report.fingerprint, plan.fingerprint());
    }

    #[test]
    fn test_wr012_end_to_end_failure_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let layout = low_noise_only_workspace(dir.path());
        let launch_cfg = stub_config(&["false"]);

        let report = run_with(&layout, &launch_cfg, false, &|_| true).unwrap();
        assert_eq!(report.state, RunState::Failed);
        assert_eq!(
            report.outcome,
            Some(LaunchOutcome::Failed {
                exit_code: 1,
                interrupted: false
            })
        );
        // Nothing is cleaned up after a failure.
        assert!(dir.path().join("output/basic").is_dir());
    }

    #[test]
    fn test_wr012_event_log_written() {
        let dir = tempfile::tempdir().unwrap();
        let layout = low_noise_only_workspace(dir.path());
        let launch_cfg = stub_config(&["true"]);
        run_with(&layout, &launch_cfg, false, &|_| true).unwrap();

        let log = std::fs::read_to_string(dir.path().join("output/basic/events.jsonl")).unwrap();
        let states: Vec<String> = log
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
            .filter(|v| v["event"] == "state_entered")
            .map(|v| v["state"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            states,
            vec!["RESOLVING", "PROBING", "PLANNING", "LAUNCHING", "SUCCEEDED"]
        );
        let compile_probe = log
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
            .find(|v| v["capability"] == "accel_compile_ok")
            .unwrap();
        assert_eq!(compile_probe["present"], false);
        assert!(log.contains("launch_completed"));
    }

    #[test]
    fn test_wr012_missing_mandatory_stops_before_planning() {
        let dir = tempfile::tempdir().unwrap();
        let layout = low_noise_only_workspace(dir.path());
        std::fs::remove_dir_all(layout.slot_dir(ArtifactSlot::Vae)).unwrap();
        let launch_cfg = stub_config(&["true"]);

        let reviewed = Cell::new(false);
        let review = |_: &ExecutionPlan| {
            reviewed.set(true);
            true
        };
        let err = run_with(&layout, &launch_cfg, false, &review).unwrap_err();
        assert_eq!(err.missing_slot(), Some("vae"));
        assert!(!reviewed.get(), "planner output must never be produced");
        assert!(!dir.path().join("output").exists(), "no side effects");
    }

    #[test]
    fn test_wr012_dry_run_does_not_launch() {
        let dir = tempfile::tempdir().unwrap();
        let layout = low_noise_only_workspace(dir.path());
        // Would fail if launched.
        let launch_cfg = stub_config(&["false"]);

        let report = run_with(&layout, &launch_cfg, true, &|_| true).unwrap();
        assert_eq!(report.state, RunState::Planning);
        assert!(report.outcome.is_none());
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn test_wr012_declined_review() {
        let dir = tempfile::tempdir().unwrap();
        let layout = low_noise_only_workspace(dir.path());
        let marker = dir.path().join("launched");
        let script = format!("touch {}", marker.display());
        let launch_cfg = stub_config(&["sh", "-c", &script]);

        let err = run_with(&layout, &launch_cfg, false, &|_| false).unwrap_err();
        assert!(matches!(err, LaunchError::Declined));
        assert!(!marker.exists());
    }

    #[test]
    fn test_wr012_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = low_noise_only_workspace(dir.path());
        let launch_cfg = stub_config(&["/nonexistent/wan_generate_video"]);

        let err = run_with(&layout, &launch_cfg, false, &|_| true).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn(_)));
        let log = std::fs::read_to_string(dir.path().join("output/basic/events.jsonl")).unwrap();
        assert!(log.contains("FAILED"));
    }

    #[test]
    fn test_wr012_launch_receives_plan_args() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let args_file = dir.path().join("args.txt");
        let script = format!("printf '%s\\n' \"$@\" > {}", args_file.display());
        let plan = ExecutionPlan {
            preset: "basic".to_string(),
            program: vec!["sh".to_string(), "-c".to_string(), script, "stub".to_string()],
            working_dir: None,
            flags: vec![
                PlanFlag::value("--prompt", "a fox, in the snow"),
                PlanFlag::switch("--fp8"),
            ],
            output_dir: out.clone(),
            seed: 1,
            notices: vec![],
        };

        let outcome = launch(plan).unwrap();
        assert!(outcome.succeeded());
        let args = std::fs::read_to_string(&args_file).unwrap();
        let lines: Vec<_> = args.lines().collect();
        assert_eq!(lines, vec!["--prompt", "a fox, in the snow", "--fp8"]);
    }

    #[test]
    fn test_wr012_launch_output_dir_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output/basic");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("previous.mp4"), b"x").unwrap();
        let plan = ExecutionPlan {
            preset: "basic".to_string(),
            program: vec!["true".to_string()],
            working_dir: None,
            flags: vec![],
            output_dir: out.clone(),
            seed: 1,
            notices: vec![],
        };
        assert!(launch(plan).unwrap().succeeded());
        assert!(out.join("previous.mp4").exists());
    }

    #[test]
    fn test_wr012_outcome_of_exit() {
        let out = PathBuf::from("/ws/output/basic");
        assert_eq!(
            outcome_of(AttachedExit::Exited(0), out.clone()),
            LaunchOutcome::Succeeded {
                output_dir: out.clone()
            }
        );
        let interrupted = outcome_of(AttachedExit::Interrupted, out.clone());
        assert_eq!(
            interrupted,
            LaunchOutcome::Failed {
                exit_code: -1,
                interrupted: true
            }
        );
        assert_eq!(interrupted.terminal_state(), RunState::Failed);
        assert_eq!(
            outcome_of(AttachedExit::Signaled, out.clone()),
            LaunchOutcome::Failed {
                exit_code: -1,
                interrupted: false
            }
        );
        assert_eq!(
            outcome_of(AttachedExit::Exited(2), out),
            LaunchOutcome::Failed {
                exit_code: 2,
                interrupted: false
            }
        );
    }

    #[test]
    fn test_wr012_pipeline_rejects_backward() {
        let mut p = Pipeline::new("r-test");
        p.advance(RunState::Probing).unwrap();
        assert!(p.advance(RunState::Resolving).is_err());
        p.fail();
        assert_eq!(p.state, RunState::Failed);
        assert!(p.advance(RunState::Succeeded).is_err());
    }

    #[test]
    fn test_wr012_probe_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let layout = low_noise_only_workspace(dir.path());
        let mut launch_cfg = stub_config(&["true"]);
        launch_cfg.probes.compile_trial = vec!["true".to_string()];
        let preset = presets::find("basic").unwrap();
        let plan_seen: Cell<bool> = Cell::new(false);
        let review = |plan: &ExecutionPlan| {
            plan_seen.set(plan.has_flag(planner::COMPILE_FLAG));
            true
        };
        let report = run(&RunConfig {
            layout: &layout,
            launch: &launch_cfg,
            preset: &preset,
            seed: 7,
            conservative: false,
            probe: false,
            dry_run: true,
            event_log: false,
            review: &review,
        })
        .unwrap();
        assert!(!plan_seen.get(), "no probe means no compile flag");
        assert_eq!(report.output_dir, dir.path().join("output/basic"));
    }
}
