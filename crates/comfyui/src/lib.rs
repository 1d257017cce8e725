//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, WebSocket connection handling with
//! bearer-token auth, HTTP API wrappers, a completion wait with an
//! optional timeout, and [`generator::ComfyGenerator`] which drives one
//! prompt from submission to downloaded images.

pub mod api;
pub mod client;
pub mod endpoint;
pub mod generator;
pub mod messages;
pub mod processor;
pub mod ready;
