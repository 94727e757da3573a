//! npud - RK3588 NPU inference server
//!
//! Accepts binary inference requests over TCP, dispatches them to a
//! hardware-accelerated (or simulated) NPU engine, and returns binary
//! results. One length-prefixed frame in, one frame out, per connection.
//!
//! # Modules
//!
//! - `frame` - length-prefixed wire codec
//! - `model` - model lifecycle: load, runtime init, release
//! - `engine` - inference engine, hardware or simulated backend
//! - `server` - TCP listener and per-connection workers
//! - `diag` - startup NPU capability probe (informational)
//! - `metrics` - Prometheus metrics
//! - `config` - server configuration, immutable after startup

pub mod config;
pub mod diag;
pub mod engine;
pub mod frame;
pub mod metrics;
pub mod model;
pub mod server;

// Re-export commonly used types at crate root for convenience
pub use config::ServerConfig;
pub use engine::{EngineState, InferenceEngine, MismatchPolicy};
pub use frame::ProtocolError;
pub use model::ModelHandle;
pub use server::NpuServer;
