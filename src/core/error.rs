//! WR-007: Launcher error taxonomy.
//!
//! Probe failures never appear here: they are absorbed by `probe` and turned
//! into absent capabilities.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal pipeline errors.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("missing mandatory artifact '{slot}': no *.{ext} file in {}", .searched.display())]
    MissingMandatoryArtifact {
        slot: String,
        ext: String,
        searched: PathBuf,
    },
    #[error("plan references unresolved mandatory artifact '{0}'")]
    UnresolvedArtifact(String),
    #[error("unknown preset '{0}' (see --list-presets)")]
    UnknownPreset(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot start external program: {0}")]
    Spawn(String),
    #[error("external program failed with exit code {exit_code}")]
    ExternalProcess { exit_code: i32 },
    #[error("external program interrupted")]
    Interrupted,
    #[error("launch declined by operator")]
    Declined,
    #[error("illegal run state transition {from} -> {to}")]
    StateTransition { from: String, to: String },
}

impl LaunchError {
    /// Name of the missing slot for either missing-artifact error.
    pub fn missing_slot(&self) -> Option<&str> {
        match self {
            Self::MissingMandatoryArtifact { slot, .. } | Self::UnresolvedArtifact(slot) => {
                Some(slot)
            }
            _ => None,
        }
    }
}
