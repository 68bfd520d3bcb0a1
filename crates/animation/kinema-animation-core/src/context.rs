//! The animation subsystem context.
//!
//! Owns the lifetime-scoped shared resources: the clip store and skeleton
//! (shared read-only with worker jobs), the parametric sampler pool, the
//! frame-local pose arena and the job executor. Passed by reference into
//! every task operation; there is no hidden global state.

use crate::clips::ClipStore;
use crate::config::Config;
use crate::jobs::JobExecutor;
use crate::pose::PoseArena;
use crate::sampler::SamplerPool;
use crate::skeleton::SkeletonDef;
use std::sync::Arc;

pub struct AnimationContext {
    pub config: Config,
    pub store: Arc<ClipStore>,
    pub skeleton: Arc<SkeletonDef>,
    pub sampler_pool: SamplerPool,
    pub pose_arena: PoseArena,
    pub executor: JobExecutor,
}

impl AnimationContext {
    pub fn new(config: Config, store: Arc<ClipStore>, skeleton: Arc<SkeletonDef>) -> Self {
        let executor = JobExecutor::new(config.worker_threads, config.disable_threading);
        Self {
            sampler_pool: SamplerPool::new(config.sampler_pool_size),
            pose_arena: PoseArena::new(config.pose_arena_capacity),
            executor,
            config,
            store,
            skeleton,
        }
    }

    /// End-of-frame hook, after every character has synchronized.
    pub fn end_frame(&mut self) {
        self.pose_arena.reset();
    }
}
