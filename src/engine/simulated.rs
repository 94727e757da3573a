//! Simulated engine - synthetic output without real hardware computation
//!
//! Used whenever no real model is loaded or runtime init failed. Ignores
//! its input entirely and, after a small artificial delay, returns a
//! fixed-length sequence of pseudo-random f32 values. Never fails.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::serialize_outputs;

/// Engine variant that fabricates inference results
pub struct SimulatedEngine {
    output_elems: usize,
    delay: Duration,
}

impl SimulatedEngine {
    pub fn new(output_elems: usize, delay: Duration) -> Self {
        Self {
            output_elems,
            delay,
        }
    }

    /// Produce one synthetic result. Input is ignored.
    pub async fn run(&self, _input: &[u8]) -> Vec<u8> {
        debug!("Simulating inference (no model loaded)");
        tokio::time::sleep(self.delay).await;

        let mut rng = rand::thread_rng();
        let values: Vec<f32> = (0..self.output_elems).map(|_| rng.gen::<f32>()).collect();
        serialize_outputs(&[values])
    }
}
