//! Kinema Animation Core (engine-agnostic)
//!
//! Command-buffer-driven skeletal animation evaluation: per-character
//! tasks build a small instruction stream each frame from their layered
//! transition queues and pose-modifier queues, then execute it inline or
//! on a worker to produce a blended, time-sampled pose. Parametric blend
//! spaces (1-3D) turn desired motion parameters into per-example weights.
//!
//! The crate owns no assets and no render state: clip data, skeletons and
//! pose storage are collaborator-owned, referenced by id or handle.

pub mod blendspace;
pub mod clips;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod execute;
pub mod ids;
pub mod jobs;
pub mod pose;
pub mod posemod;
pub mod rootmotion;
pub mod sampler;
pub mod saved_state;
pub mod skeleton;
pub mod task;
pub mod transition;

// Re-exports for consumers (adapters)
pub use blendspace::{BlendSpaceDef, DimensionDef, ExampleDef, Face, MotionParam};
pub use clips::{AnimEventDef, AssetKind, ClipHeader, ClipStore, ClipTracks, JointTrack};
pub use commands::{BlendMode, Command, CommandBuffer};
pub use config::Config;
pub use context::AnimationContext;
pub use error::AnimError;
pub use execute::{execute, ExecutionInput};
pub use ids::{CharacterId, ClipId, JointId, SamplerHandle};
pub use jobs::{JobExecutor, JobHandle};
pub use pose::{JointMask, JointTransform, Pose, PoseArena};
pub use posemod::{ModifierParams, PoseModifier, PoseModifierQueue, WorldLocation};
pub use rootmotion::{relative_movement, RelativeMovement, RootSample};
pub use sampler::{ParametricSamplerState, SamplerPool};
pub use saved_state::{SavedCharacterState, SavedEntry, SavedLayer};
pub use skeleton::{joint_name_hash, JointDef, SkeletonDef};
pub use task::{Layer, SkeletonAnimTask, TaskState};
pub use transition::{
    Animation, AnimationPush, DynFlags, FiredEvent, LayerUpdate, StaticFlags, TransitionQueue,
    MAX_EXEC_QUEUE,
};
