//! `forge-worker` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod orchestrator;
pub mod termination;
pub mod uploader;
