//! Hardware-accelerated engine backed by a loaded NPU model

use std::time::Instant;

use tracing::{debug, info};

use super::{serialize_outputs, EngineState, InferenceError, MismatchPolicy};
use crate::model::{ModelHandle, INPUT_ELEMS};

/// Engine variant that executes inference against the loaded model
pub struct HardwareEngine {
    handle: ModelHandle,
    policy: MismatchPolicy,
}

impl HardwareEngine {
    pub fn new(handle: ModelHandle, policy: MismatchPolicy) -> Self {
        Self { handle, policy }
    }

    /// Lifecycle state of the underlying model handle
    pub fn state(&self) -> EngineState {
        self.handle.state()
    }

    /// Interpret the buffer as the model's fixed input shape and run one
    /// inference call.
    ///
    /// A buffer whose byte count does not match the expected element count
    /// is handled per the configured [`MismatchPolicy`]: rejected, or run
    /// best-effort on the raw bytes.
    pub fn run(&mut self, input: &[u8]) -> Result<Vec<u8>, InferenceError> {
        if input.len() != INPUT_ELEMS {
            match self.policy {
                MismatchPolicy::RejectOnMismatch => {
                    return Err(InferenceError::ShapeMismatch {
                        expected: INPUT_ELEMS,
                        received: input.len(),
                    });
                }
                MismatchPolicy::BestEffortReinterpret => {
                    debug!(
                        expected = INPUT_ELEMS,
                        received = input.len(),
                        "Input does not match model shape, running on raw buffer"
                    );
                }
            }
        }

        let start = Instant::now();
        let outputs = self.handle.infer(input)?;
        info!(
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            tensors = outputs.len(),
            "Inference completed"
        );

        Ok(serialize_outputs(&outputs))
    }
}
