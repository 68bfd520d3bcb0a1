//! Pose modifiers: opaque post-processing passes (IK, look-at, recoil,
//! transformation pins) plugged into the pipeline behind a narrow trait.
//!
//! The queue is double buffered. Command generation reads the "active"
//! buffer while producers push into "pending" during the same frame; the
//! buffers swap exactly once per frame at synchronize, so a producer can
//! never mutate the list the interpreter is walking.

use crate::ids::CharacterId;
use crate::pose::Pose;
use glam::{Quat, Vec3};

/// World-space placement of the character this frame.
#[derive(Copy, Clone, Debug)]
pub struct WorldLocation {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for WorldLocation {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Everything a modifier gets to see: the character, the pose accumulated
/// so far, the frame delta and the world location.
pub struct ModifierParams<'a> {
    pub character: CharacterId,
    pub pose: &'a mut Pose,
    pub dt: f32,
    pub location: WorldLocation,
}

/// Capability interface for pose-modifier plugins. The core treats
/// implementations as opaque and calls them in queue order.
pub trait PoseModifier: Send {
    fn name(&self) -> &str;

    /// Called during Prepare, before sampling. Returning false drops the
    /// modifier from this frame's command stream.
    fn prepare(&mut self, params: &mut ModifierParams<'_>) -> bool;

    /// Called by the interpreter with the accumulated pose.
    fn execute(&mut self, params: &mut ModifierParams<'_>);

    /// Called once at frame synchronize, on the main thread.
    fn synchronize(&mut self) {}
}

/// Double-buffered, bounded modifier queue for one layer.
#[derive(Default)]
pub struct PoseModifierQueue {
    active: Vec<Box<dyn PoseModifier>>,
    pending: Vec<Box<dyn PoseModifier>>,
    capacity: usize,
}

impl PoseModifierQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: Vec::with_capacity(capacity),
            pending: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Queue a modifier for the next frame. Fails safely when the buffer
    /// is full: the modifier is dropped and the caller told so.
    #[must_use]
    pub fn push(&mut self, modifier: Box<dyn PoseModifier>) -> bool {
        if self.pending.len() >= self.capacity {
            log::warn!(
                "pose-modifier queue full ({} entries), dropping '{}'",
                self.capacity,
                modifier.name()
            );
            return false;
        }
        self.pending.push(modifier);
        true
    }

    /// The buffer command generation reads this frame.
    #[inline]
    pub fn active(&self) -> &[Box<dyn PoseModifier>] {
        &self.active
    }

    #[inline]
    pub fn active_mut(&mut self) -> &mut Vec<Box<dyn PoseModifier>> {
        &mut self.active
    }

    /// Take the active buffer for worker-side execution; returned via
    /// `restore_active` at synchronize.
    pub fn take_active(&mut self) -> Vec<Box<dyn PoseModifier>> {
        std::mem::take(&mut self.active)
    }

    pub fn restore_active(&mut self, modifiers: Vec<Box<dyn PoseModifier>>) {
        self.active = modifiers;
    }

    /// The once-per-frame swap point: pending becomes active. Modifiers
    /// are consumed each frame; producers re-push persistent ones.
    pub fn swap_buffers(&mut self) {
        for m in &mut self.active {
            m.synchronize();
        }
        self.active.clear();
        std::mem::swap(&mut self.active, &mut self.pending);
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop(&'static str);
    impl PoseModifier for Nop {
        fn name(&self) -> &str {
            self.0
        }
        fn prepare(&mut self, _params: &mut ModifierParams<'_>) -> bool {
            true
        }
        fn execute(&mut self, _params: &mut ModifierParams<'_>) {}
    }

    #[test]
    fn push_beyond_capacity_fails_safely() {
        let mut q = PoseModifierQueue::new(2);
        assert!(q.push(Box::new(Nop("a"))));
        assert!(q.push(Box::new(Nop("b"))));
        assert!(!q.push(Box::new(Nop("c"))));
        assert_eq!(q.pending_len(), 2);
        q.swap_buffers();
        assert_eq!(q.active().len(), 2);
        assert_eq!(q.pending_len(), 0);
    }
}
