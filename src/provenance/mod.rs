//! Provenance — run event log and plan fingerprints.

pub mod eventlog;
pub mod hasher;
