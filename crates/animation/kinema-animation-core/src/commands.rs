//! The per-frame command stream.
//!
//! Prepare() appends fixed-size instructions once per frame per character;
//! Execute() walks them in order on whatever thread the job lands on. The
//! stream is the only thing the interpreter needs besides raw clip data,
//! which is what lets blending run off the main thread.
//!
//! Commands are an enum stored in an arena-backed vector; every variant
//! charges a fixed, 4-byte-aligned encoded size against the arena's byte
//! budget. Overflowing the budget is a fatal authoring error: the push
//! fails, nothing is recorded past capacity, and the task surfaces
//! `AnimError::CommandBufferOverflow`.

use crate::error::AnimError;
use crate::ids::{CharacterId, ClipId};

/// Index of a pose buffer inside the frame's working set. Buffer 0 is the
/// final target; higher indices are per-layer temporaries.
pub type PoseBufId = u8;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BlendMode {
    /// Replace the target where the source has data, weighted.
    Override,
    /// Add the source on top of the target as a weighted delta.
    Additive,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Zero a pose buffer's accumulators.
    ClearPose { target: PoseBufId },
    /// Accumulate one clip sample (entire-clip normalized time) with a
    /// weight, honoring the active joint mask.
    SampleClip {
        clip: ClipId,
        time: f32,
        weight: f32,
        target: PoseBufId,
    },
    /// Additively apply one clip sample on top of an already-normalized
    /// buffer.
    SampleAddClip {
        clip: ClipId,
        time: f32,
        weight: f32,
        target: PoseBufId,
    },
    /// Resolve accumulated weighted sums: normalize rotations, divide by
    /// total weight, fill untouched joints from the rest pose.
    NormalizePose { target: PoseBufId },
    /// Merge `source` into `target`.
    BlendPoses {
        source: PoseBufId,
        target: PoseBufId,
        weight: f32,
        mode: BlendMode,
    },
    /// Restrict subsequent sampling to a joint subset; None lifts the mask.
    SetJointMask { mask: Option<u8> },
    /// Invoke the pose modifier in the given slot with the final buffer.
    RunModifier { slot: u8 },
}

impl Command {
    /// Fixed encoded footprint per record, a multiple of 4 bytes. These
    /// mirror the packed wire sizes of the records, not Rust layout.
    pub const fn encoded_size(&self) -> usize {
        match self {
            Command::ClearPose { .. } => 4,
            Command::SampleClip { .. } => 16,
            Command::SampleAddClip { .. } => 16,
            Command::NormalizePose { .. } => 4,
            Command::BlendPoses { .. } => 12,
            Command::SetJointMask { .. } => 8,
            Command::RunModifier { .. } => 8,
        }
    }
}

/// Append-only instruction arena with a fixed byte budget, rebuilt every
/// frame.
#[derive(Debug)]
pub struct CommandBuffer {
    character: CharacterId,
    commands: Vec<Command>,
    bytes_used: usize,
    capacity: usize,
}

impl CommandBuffer {
    pub fn new(character: CharacterId, capacity: usize) -> Self {
        Self {
            character,
            commands: Vec::new(),
            bytes_used: 0,
            capacity,
        }
    }

    /// Append one record. Fails fatally when the arena is full; the record
    /// is not recorded and the buffer is left exactly as it was.
    pub fn push(&mut self, command: Command) -> Result<(), AnimError> {
        let size = command.encoded_size();
        debug_assert!(size % 4 == 0, "command records must stay 4-byte aligned");
        if self.bytes_used + size > self.capacity {
            return Err(AnimError::CommandBufferOverflow {
                character: self.character,
                requested: size,
                used: self.bytes_used,
                capacity: self.capacity,
            });
        }
        self.bytes_used += size;
        self.commands.push(command);
        Ok(())
    }

    /// Start a fresh frame; keeps the vector's allocation.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.bytes_used = 0;
    }

    #[inline]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[inline]
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    #[inline]
    pub fn character(&self) -> CharacterId {
        self.character
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_fatal_and_writes_nothing() {
        let mut buf = CommandBuffer::new(CharacterId(7), 40);
        // 2 x 16 bytes fit; the third sample must fail.
        buf.push(Command::SampleClip {
            clip: ClipId(0),
            time: 0.0,
            weight: 1.0,
            target: 0,
        })
        .unwrap();
        buf.push(Command::SampleClip {
            clip: ClipId(1),
            time: 0.0,
            weight: 1.0,
            target: 0,
        })
        .unwrap();
        let before = (buf.len(), buf.bytes_used());
        let err = buf
            .push(Command::SampleClip {
                clip: ClipId(2),
                time: 0.0,
                weight: 1.0,
                target: 0,
            })
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!((buf.len(), buf.bytes_used()), before);
        // Smaller records can still fit in the remainder.
        buf.push(Command::ClearPose { target: 1 }).unwrap();
        assert_eq!(buf.bytes_used(), 36);
    }
}
