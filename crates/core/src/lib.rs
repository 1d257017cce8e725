pub mod canonical;
pub mod error;
pub mod identity;
pub mod imaging;
pub mod job;
pub mod transport;
pub mod types;
pub mod workflow;
