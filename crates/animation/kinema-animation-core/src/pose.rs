//! Pose buffers, the frame-local pose arena, and joint masks.
//!
//! A `Pose` carries per-joint local transforms plus a parallel per-joint
//! accumulated weight, so sampling commands can write weighted
//! contributions and a later normalize command resolves them (the same
//! sum-then-normalize scheme the blending accumulator uses for
//! quaternions). Poses are leased from a `PoseArena` that is reset once
//! per frame after every character has synchronized.

use crate::ids::JointId;
use glam::{Quat, Vec3};

/// Local transform of one joint: rotation, translation, scale.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct JointTransform {
    pub rotation: Quat,
    pub translation: Vec3,
    pub scale: Vec3,
}

impl JointTransform {
    pub const IDENTITY: JointTransform = JointTransform {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
        scale: Vec3::ONE,
    };
}

impl Default for JointTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A full-skeleton pose plus per-joint accumulated weights.
#[derive(Clone, Debug, Default)]
pub struct Pose {
    pub joints: Vec<JointTransform>,
    pub weights: Vec<f32>,
}

impl Pose {
    pub fn new(joint_count: usize) -> Self {
        Self {
            joints: vec![JointTransform::IDENTITY; joint_count],
            weights: vec![0.0; joint_count],
        }
    }

    #[inline]
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// Reset to identity with zero accumulated weight.
    pub fn clear(&mut self) {
        for j in &mut self.joints {
            *j = JointTransform::IDENTITY;
        }
        for w in &mut self.weights {
            *w = 0.0;
        }
    }

    fn resize(&mut self, joint_count: usize) {
        self.joints.resize(joint_count, JointTransform::IDENTITY);
        self.weights.resize(joint_count, 0.0);
        self.clear();
    }
}

/// Restricts sampling to a subset of joints. Ids are kept sorted so the
/// interpreter can test membership with a binary search; commands touching
/// joints outside the mask are no-ops for those joints.
#[derive(Clone, Debug, Default)]
pub struct JointMask {
    ids: Vec<JointId>,
}

impl JointMask {
    pub fn new(mut ids: Vec<JointId>) -> Self {
        ids.sort();
        ids.dedup();
        Self { ids }
    }

    #[inline]
    pub fn contains(&self, id: JointId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Frame-local pose allocator with a fixed lease budget.
///
/// `acquire` returns None once the budget is spent; callers treat that as
/// "skip this character's update" (non-fatal). `reset` must only run after
/// every lease has been returned — leasing across the frame boundary is the
/// correctness bug the explicit consumer wait in `begin()` exists to
/// prevent, so it is asserted here.
#[derive(Debug)]
pub struct PoseArena {
    free: Vec<Pose>,
    capacity: usize,
    outstanding: usize,
}

impl PoseArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Vec::new(),
            capacity,
            outstanding: 0,
        }
    }

    /// Lease a cleared pose sized for `joint_count` joints.
    pub fn acquire(&mut self, joint_count: usize) -> Option<Pose> {
        if self.outstanding >= self.capacity {
            return None;
        }
        self.outstanding += 1;
        let mut pose = self.free.pop().unwrap_or_default();
        pose.resize(joint_count);
        Some(pose)
    }

    /// Return a lease. The buffer is recycled for the next acquire.
    pub fn release(&mut self, pose: Pose) {
        debug_assert!(self.outstanding > 0, "release without matching acquire");
        self.outstanding = self.outstanding.saturating_sub(1);
        self.free.push(pose);
    }

    /// End-of-frame reset, after all characters have synchronized.
    pub fn reset(&mut self) {
        assert_eq!(
            self.outstanding, 0,
            "pose arena reset while {} leases are still outstanding",
            self.outstanding
        );
    }

    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::joint_name_hash;

    #[test]
    fn arena_enforces_budget() {
        let mut arena = PoseArena::new(2);
        let a = arena.acquire(4).unwrap();
        let b = arena.acquire(4).unwrap();
        assert!(arena.acquire(4).is_none());
        arena.release(a);
        arena.release(b);
        assert!(arena.acquire(8).is_some());
    }

    #[test]
    fn mask_membership_is_sorted_lookup() {
        let mask = JointMask::new(vec![
            joint_name_hash("spine"),
            joint_name_hash("head"),
            joint_name_hash("neck"),
        ]);
        assert!(mask.contains(joint_name_hash("head")));
        assert!(!mask.contains(joint_name_hash("pelvis")));
    }
}
