//! Skeleton definition: joint names, hierarchy and rest pose.
//!
//! The core never owns the render-side skeleton; this is the minimal
//! description needed to size pose buffers, resolve joint masks and find
//! the root joint for motion extraction. Joint ids are stable 32-bit name
//! hashes so masks can be stored sorted and resolved by binary search.

use crate::ids::JointId;
use crate::pose::JointTransform;
use hashbrown::HashMap;

/// FNV-1a, fixed seed. Stable across platforms and runs, which the
/// deterministic-execution contract requires.
#[inline]
pub fn joint_name_hash(name: &str) -> JointId {
    let mut h: u32 = 0x811c_9dc5;
    for b in name.as_bytes() {
        h ^= u32::from(*b);
        h = h.wrapping_mul(0x0100_0193);
    }
    JointId(h)
}

#[derive(Clone, Debug)]
pub struct JointDef {
    pub name: String,
    pub id: JointId,
    /// Parent joint index; None for the root.
    pub parent: Option<u16>,
    pub rest: JointTransform,
}

#[derive(Clone, Debug, Default)]
pub struct SkeletonDef {
    joints: Vec<JointDef>,
    by_name: HashMap<String, u16>,
    /// (id, joint index), sorted by id for binary search.
    sorted_ids: Vec<(JointId, u16)>,
}

impl SkeletonDef {
    /// Build from (name, parent) pairs with rest transforms. The first
    /// joint is the root and must have no parent.
    pub fn new(joints: Vec<(String, Option<u16>, JointTransform)>) -> Self {
        let joints: Vec<JointDef> = joints
            .into_iter()
            .map(|(name, parent, rest)| JointDef {
                id: joint_name_hash(&name),
                name,
                parent,
                rest,
            })
            .collect();
        let by_name = joints
            .iter()
            .enumerate()
            .map(|(i, j)| (j.name.clone(), i as u16))
            .collect();
        let mut sorted_ids: Vec<(JointId, u16)> = joints
            .iter()
            .enumerate()
            .map(|(i, j)| (j.id, i as u16))
            .collect();
        sorted_ids.sort_by_key(|(id, _)| *id);
        Self {
            joints,
            by_name,
            sorted_ids,
        }
    }

    #[inline]
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    #[inline]
    pub fn joints(&self) -> &[JointDef] {
        &self.joints
    }

    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    /// Resolve a joint id to its index, by binary search over the sorted table.
    pub fn index_of_id(&self, id: JointId) -> Option<u16> {
        self.sorted_ids
            .binary_search_by_key(&id, |(jid, _)| *jid)
            .ok()
            .map(|pos| self.sorted_ids[pos].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_lookup_matches_name_lookup() {
        let skel = SkeletonDef::new(vec![
            ("root".into(), None, JointTransform::IDENTITY),
            ("spine".into(), Some(0), JointTransform::IDENTITY),
            ("head".into(), Some(1), JointTransform::IDENTITY),
        ]);
        for name in ["root", "spine", "head"] {
            let idx = skel.index_of(name).unwrap();
            assert_eq!(skel.index_of_id(joint_name_hash(name)), Some(idx));
        }
        assert_eq!(skel.index_of_id(JointId(0xdead_beef)), None);
    }
}
