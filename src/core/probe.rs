//! WR-004: Best-effort capability probing.
//!
//! Each capability gets one trial command under a hard timeout. A spawn
//! error, non-zero exit, timeout or output mismatch all mean "absent";
//! nothing in here can fail the pipeline.

use super::types::*;
use crate::transport;
use regex::Regex;
use std::time::Duration;

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub capability: Capability,
    pub present: bool,
    /// Matched output, or why the capability is considered absent
    pub detail: String,
}

/// A single trial: command, timeout, and an optional stdout pattern.
struct Trial<'a> {
    argv: &'a [String],
    timeout: Duration,
    expect: Option<&'a Regex>,
}

/// Run a trial. `Ok(detail)` means the capability is present.
fn run_trial(trial: &Trial) -> Result<String, String> {
    let out = transport::exec_bounded(trial.argv, trial.timeout)?;
    if !out.success() {
        let stderr = out.stderr.lines().last().unwrap_or("").trim().to_string();
        return Err(format!("exit code {}: {}", out.exit_code, stderr));
    }
    match trial.expect {
        Some(re) => out
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| re.is_match(line))
            .map(str::to_string)
            .ok_or_else(|| format!("no match for /{}/ in {:?}", re, out.stdout.trim())),
        None => Ok("ok".to_string()),
    }
}

fn report(capability: Capability, result: Result<String, String>) -> ProbeReport {
    match result {
        Ok(detail) => ProbeReport {
            capability,
            present: true,
            detail,
        },
        Err(detail) => ProbeReport {
            capability,
            present: false,
            detail,
        },
    }
}

/// Does the installed GPU match the configured model pattern?
pub fn probe_gpu(settings: &ProbeSettings) -> ProbeReport {
    let result = Regex::new(&settings.gpu_pattern)
        .map_err(|e| format!("invalid gpu pattern: {}", e))
        .and_then(|re| {
            run_trial(&Trial {
                argv: &settings.gpu_query,
                timeout: Duration::from_secs(settings.gpu_timeout_secs),
                expect: Some(&re),
            })
        });
    report(Capability::GpuMatch, result)
}

/// Does a minimal just-in-time compilation succeed in this environment?
pub fn probe_compile(settings: &ProbeSettings) -> ProbeReport {
    let result = run_trial(&Trial {
        argv: &settings.compile_trial,
        timeout: Duration::from_secs(settings.compile_timeout_secs),
        expect: None,
    });
    report(Capability::AccelCompileOk, result)
}

/// Probe every capability. Order does not affect the result.
pub fn probe_all(settings: &ProbeSettings) -> (CapabilitySet, Vec<ProbeReport>) {
    let reports = vec![probe_gpu(settings), probe_compile(settings)];
    let mut caps = CapabilitySet::default();
    for r in &reports {
        caps.set(r.capability, r.present);
    }
    (caps, reports)
}
