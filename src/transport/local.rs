//! WR-010: Local process execution.
//!
//! Two modes:
//! - bounded: captured output, hard timeout, child killed on expiry (probes)
//! - attached: inherited stdio, no timeout, Ctrl-C kills the child (launch)

use super::{AttachedExit, ExecOutput};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Single-threaded runtime for one blocking wait.
fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start process runtime: {}", e))
}

fn split_argv(argv: &[String]) -> Result<(&String, &[String]), String> {
    argv.split_first()
        .ok_or_else(|| "empty command line".to_string())
}

/// Run a command with captured output, killing it if it outlives `timeout`.
pub fn exec_bounded(argv: &[String], timeout: Duration) -> Result<ExecOutput, String> {
    let (program, args) = split_argv(argv)?;
    let rt = runtime()?;

    rt.block_on(async {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", program, e))?;

        // On timeout the future (and the child inside it) is dropped, which kills it.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ExecOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => Err(format!("wait error: {}", e)),
            Err(_) => Err(format!(
                "{} timed out after {:.1}s",
                program,
                timeout.as_secs_f64()
            )),
        }
    })
}

/// Run a command attached to this terminal and wait for it.
pub fn exec_attached(argv: &[String], cwd: Option<&Path>) -> Result<AttachedExit, String> {
    attached_until(argv, cwd, async {
        // No handler could be installed: only the child's exit ends the wait.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
}

/// Wait for the child or `interrupt`, whichever finishes first. On interrupt
/// the child is killed.
fn attached_until<F>(
    argv: &[String],
    cwd: Option<&Path>,
    interrupt: F,
) -> Result<AttachedExit, String>
where
    F: Future<Output = ()>,
{
    let (program, args) = split_argv(argv)?;
    let rt = runtime()?;

    rt.block_on(async {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", program, e))?;

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| format!("wait error: {}", e))?;
                Ok(match status.code() {
                    Some(code) => AttachedExit::Exited(code),
                    None => AttachedExit::Signaled,
                })
            }
            () = interrupt => {
                let _ = child.kill().await;
                Ok(AttachedExit::Interrupted)
            }
        }
    })
}
