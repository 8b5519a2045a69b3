//! wanrun — launcher for Wan video generation.
//!
//! Resolves model and LoRA weights by naming convention, probes optional
//! acceleration support, and runs the external inference program with a
//! fallback-safe flag set.

pub mod cli;
pub mod core;
pub mod provenance;
pub mod transport;
