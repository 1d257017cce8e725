//! Push a single file (or a zipped folder) to a dataset-hosting hub.

pub mod archive;
pub mod cli;
pub mod client;
pub mod error;
pub mod upload;
