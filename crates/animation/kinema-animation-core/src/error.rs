//! Error taxonomy for the evaluation core.
//!
//! Fatal variants indicate a structural authoring or scheduling defect
//! (command arena overflow, double-begin) and are surfaced as hard errors.
//! Everything recoverable is logged at the site and the frame continues
//! with best-effort output; see the `log` calls throughout the crate.

use crate::ids::CharacterId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnimError {
    /// The per-frame command arena ran out of space. Too many concurrently
    /// active layers/animations/pose-modifiers were authored for one
    /// character; not recoverable within the frame.
    #[error("command buffer overflow on character {character:?}: {requested} bytes requested, {used} of {capacity} in use")]
    CommandBufferOverflow {
        character: CharacterId,
        requested: usize,
        used: usize,
        capacity: usize,
    },

    /// `begin()` was called while the task was still running the previous
    /// frame. Indicates a scheduling bug upstream.
    #[error("begin() called on character {0:?} while its animation task is still running")]
    DoubleBegin(CharacterId),

    /// The frame-local pose arena could not supply scratch storage. The
    /// character keeps its last pose for this frame; callers treat this as
    /// a skipped update, not a failure.
    #[error("pose scratch storage exhausted for character {0:?}")]
    PoseStorageExhausted(CharacterId),
}

impl AnimError {
    /// Fatal errors must stop the offending character loudly; recoverable
    /// ones are contained to a skipped frame.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AnimError::PoseStorageExhausted(_))
    }
}
