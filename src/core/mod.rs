//! Core launch logic — types, config, resolution, probing, planning, execution.

pub mod error;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod presets;
pub mod probe;
pub mod resolver;
pub mod types;
