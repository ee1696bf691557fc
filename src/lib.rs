//! # Sensor Bridge Library
//!
//! Reads telemetry text from a sensor board over serial and delivers it to an
//! object store.
//!
//! This library provides the pieces of the bridge: assembling and parsing
//! telemetry blocks, a latest-state cache with a read-only HTTP view, and a
//! durable offline queue with a retry loop for uploads made while the uplink
//! is down.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod ingest;
pub mod queue;
pub mod serial;
pub mod status;
pub mod telemetry;
pub mod upload;
