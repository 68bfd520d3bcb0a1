//! Core configuration for kinema-animation-core.

use serde::{Deserialize, Serialize};

/// Configuration for sizing and feature flags.
/// The defaults match the capacities the runtime was tuned against; raising
/// them is safe, lowering them below live content triggers the documented
/// failure paths (overflow errors, failed pool acquires).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Number of virtual animation layers per character.
    pub max_layers: usize,
    /// Bounded prefix of each transition queue that is ever sampled.
    pub max_exec_queue: usize,
    /// Byte budget of the per-frame command arena.
    pub command_buffer_capacity: usize,
    /// Pose-modifier entries per layer buffer; pushes beyond this fail.
    pub pose_modifiers_per_layer: usize,
    /// Global parametric-sampler pool size.
    pub sampler_pool_size: usize,
    /// Scratch poses available per frame across all characters.
    pub pose_arena_capacity: usize,
    /// Worker threads for command-buffer execution (0 = rayon default).
    pub worker_threads: usize,
    /// Run every Execute() inline on the calling thread. An explicit
    /// configuration switch, not a hidden code path.
    pub disable_threading: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_layers: 16,
            max_exec_queue: 4,
            command_buffer_capacity: 2048,
            pose_modifiers_per_layer: 8,
            sampler_pool_size: 256,
            pose_arena_capacity: 128,
            worker_threads: 0,
            disable_threading: false,
        }
    }
}
