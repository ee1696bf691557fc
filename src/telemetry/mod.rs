//! # Telemetry Module
//!
//! Turns the sensor's text output into structured records.
//!
//! This module handles:
//! - Grouping lines into terminator-delimited blocks
//! - Parsing blocks into [`SensorSnapshot`] records
//! - The JSON shape of a snapshot (upload body and queue file entries)

pub mod assembler;
pub mod parser;
pub mod snapshot;

pub use assembler::{Block, BlockAssembler};
pub use parser::BlockParser;
pub use snapshot::{AxisPercentiles, AxisStats, SensorSnapshot};
