//! WR-010: Process transport — bounded trial runs and the attached launch.

pub mod local;

pub use local::{exec_attached, exec_bounded};

/// Output from a bounded (captured) command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// How an attached command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachedExit {
    Exited(i32),
    /// Killed by a signal it did not handle
    Signaled,
    /// Operator pressed Ctrl-C; the child was killed
    Interrupted,
}

impl AttachedExit {
    /// Exit code, `-1` when there is none.
    pub fn code(self) -> i32 {
        match self {
            Self::Exited(c) => c,
            Self::Signaled | Self::Interrupted => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wr010_exec_output_success() {
        let ok = ExecOutput { exit_code: 0, stdout: "ok".into(), stderr: "".into() };
        assert!(ok.success());
        let fail = ExecOutput { exit_code: 1, stdout: "".into(), stderr: "err".into() };
        assert!(!fail.success());
        let sig = ExecOutput { exit_code: -1, stdout: "".into(), stderr: "".into() };
        assert!(!sig.success());
    }

    #[test]
    fn test_wr010_attached_exit_code() {
        assert_eq!(AttachedExit::Exited(0).code(), 0);
        assert_eq!(AttachedExit::Exited(2).code(), 2);
        assert_eq!(AttachedExit::Signaled.code(), -1);
        assert_eq!(AttachedExit::Interrupted.code(), -1);
    }
}
