//! Inference engine
//!
//! Capability-polymorphic over two backends: a hardware-accelerated engine
//! backed by a loaded NPU model, and a simulated engine used whenever no
//! real model is available. All inference calls funnel through one mutex,
//! so execution is logically sequential even though request I/O stays
//! concurrent.

mod hardware;
mod simulated;

pub use hardware::HardwareEngine;
pub use simulated::SimulatedEngine;

use std::fmt;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::warn;

use crate::config::ServerConfig;
use crate::diag::NpuCapabilities;
use crate::metrics::{INFERENCE_DURATION, INFERENCE_ERRORS_TOTAL};

/// Lifecycle state of the engine's model resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No model resource exists yet
    Unloaded,
    /// Model container loaded, runtime not yet up
    Loaded,
    /// Model loaded and NPU runtime ready
    Initialized,
    /// Running without a real model
    Simulated,
    /// Model resource released (terminal)
    Released,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Unloaded => "unloaded",
            EngineState::Loaded => "loaded",
            EngineState::Initialized => "initialized",
            EngineState::Simulated => "simulated",
            EngineState::Released => "released",
        };
        f.write_str(s)
    }
}

/// Configured policy for request buffers whose byte count does not match
/// the model's input shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Fail the request (the client sees an empty response frame)
    RejectOnMismatch,
    /// Run the inference on the raw buffer as-is
    BestEffortReinterpret,
}

/// Failure of a single inference call. Never escapes the engine: `run`
/// converts it to an empty response.
#[derive(Debug)]
pub enum InferenceError {
    /// Input byte count does not match the model's fixed input shape
    ShapeMismatch { expected: usize, received: usize },
    /// Hardware path invoked without an initialized runtime
    RuntimeNotInitialized,
}

impl InferenceError {
    /// Short stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::ShapeMismatch { .. } => "shape_mismatch",
            InferenceError::RuntimeNotInitialized => "runtime_not_initialized",
        }
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::ShapeMismatch { expected, received } => write!(
                f,
                "input is {} bytes, model expects {}",
                received, expected
            ),
            InferenceError::RuntimeNotInitialized => {
                write!(f, "NPU runtime is not initialized")
            }
        }
    }
}

impl std::error::Error for InferenceError {}

/// The two engine variants
pub enum Backend {
    /// Real NPU inference against a loaded model
    Hardware(HardwareEngine),
    /// Synthetic output, no hardware computation
    Simulated(SimulatedEngine),
}

impl Backend {
    /// Simulated backend with the configured output size and delay
    pub fn simulated(config: &ServerConfig) -> Self {
        Backend::Simulated(SimulatedEngine::new(
            config.simulated_output_elems,
            config.simulated_delay,
        ))
    }

    async fn run(&mut self, input: &[u8]) -> Result<Vec<u8>, InferenceError> {
        match self {
            Backend::Hardware(hw) => hw.run(input),
            Backend::Simulated(sim) => Ok(sim.run(input).await),
        }
    }

    fn state(&self) -> EngineState {
        match self {
            Backend::Hardware(hw) => hw.state(),
            Backend::Simulated(_) => EngineState::Simulated,
        }
    }
}

/// Shared inference engine.
///
/// The mutex around the backend is the single serialization point for all
/// workers: the accelerator context is not assumed safe for simultaneous
/// invocation.
pub struct InferenceEngine {
    backend: Mutex<Backend>,
    state: EngineState,
}

impl InferenceEngine {
    /// Wrap a prepared backend
    pub fn new(backend: Backend) -> Self {
        let state = backend.state();
        Self {
            backend: Mutex::new(backend),
            state,
        }
    }

    /// Build the engine from configuration, falling back to simulated mode
    /// when the model cannot be loaded or initialized
    pub fn from_config(config: &ServerConfig, caps: &NpuCapabilities) -> Self {
        Self::new(crate::model::prepare_backend(config, caps))
    }

    /// Engine state after startup (Initialized or Simulated)
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Execute one inference call.
    ///
    /// Never raises to the caller: any internal failure is logged, counted,
    /// and converted to an empty byte sequence, which the worker sends as a
    /// zero-length response frame.
    pub async fn run(&self, input: &[u8]) -> Vec<u8> {
        let result = {
            let mut backend = self.backend.lock().await;
            // Timed inside the critical section: queue wait behind other
            // workers is not inference time.
            let start = Instant::now();
            let result = backend.run(input).await;
            INFERENCE_DURATION.observe(start.elapsed().as_secs_f64());
            result
        };

        match result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Inference failed");
                INFERENCE_ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
                Vec::new()
            }
        }
    }
}

/// Serialize output tensors in engine-declared order, each element as a
/// little-endian f32
pub(crate) fn serialize_outputs(outputs: &[Vec<f32>]) -> Vec<u8> {
    let total: usize = outputs.iter().map(|t| t.len()).sum();
    let mut bytes = Vec::with_capacity(total * 4);
    for tensor in outputs {
        for value in tensor {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    bytes
}
