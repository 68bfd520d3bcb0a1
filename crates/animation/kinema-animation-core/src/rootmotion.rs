//! Root-motion extraction.
//!
//! One pure function: given the root joint's current and previous sampled
//! transforms across the active entries and their weights, produce the
//! frame's relative movement. Consumers (movement controller, physics)
//! read it once per frame after synchronize.

use crate::pose::JointTransform;
use glam::{Quat, Vec3};

/// Net root movement implied by this frame's sampling.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RelativeMovement {
    pub rotation: Quat,
    pub translation: Vec3,
}

impl RelativeMovement {
    pub const IDENTITY: RelativeMovement = RelativeMovement {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
    };
}

impl Default for RelativeMovement {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One active entry's root samples for the frame.
#[derive(Copy, Clone, Debug)]
pub struct RootSample {
    pub current: JointTransform,
    pub previous: JointTransform,
    pub weight: f32,
}

/// Blend per-entry root deltas into a single relative movement.
///
/// Each entry contributes `previous^-1 * current`; rotations are summed
/// sign-aligned and normalized, translations are weighted linearly. With
/// no weighted contributions (e.g. a clip without a root track) the result
/// is the identity.
pub fn relative_movement(samples: &[RootSample]) -> RelativeMovement {
    let mut rot_sum = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
    let mut trans_sum = Vec3::ZERO;
    let mut weight_sum = 0.0f32;

    for sample in samples {
        if sample.weight <= 0.0 {
            continue;
        }
        let delta_rot = sample.previous.rotation.inverse() * sample.current.rotation;
        let delta_trans = sample
            .previous
            .rotation
            .inverse()
            .mul_vec3(sample.current.translation - sample.previous.translation);

        let mut q = delta_rot;
        if weight_sum > 0.0 && rot_sum.dot(q) < 0.0 {
            q = -q;
        }
        rot_sum = rot_sum + q * sample.weight;
        trans_sum += delta_trans * sample.weight;
        weight_sum += sample.weight;
    }

    if weight_sum <= 0.0 {
        return RelativeMovement::IDENTITY;
    }
    RelativeMovement {
        rotation: {
            let rcp = rot_sum.length_recip();
            if rcp.is_finite() && rcp > 0.0 {
                rot_sum * rcp
            } else {
                Quat::IDENTITY
            }
        },
        translation: trans_sum / weight_sum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_samples_is_identity() {
        assert_eq!(relative_movement(&[]), RelativeMovement::IDENTITY);
    }

    #[test]
    fn single_sample_reports_its_delta() {
        let mut current = JointTransform::IDENTITY;
        current.translation = Vec3::new(0.0, 0.1, 0.0);
        let m = relative_movement(&[RootSample {
            current,
            previous: JointTransform::IDENTITY,
            weight: 1.0,
        }]);
        assert!((m.translation - Vec3::new(0.0, 0.1, 0.0)).length() < 1e-6);
        assert!((m.rotation.dot(Quat::IDENTITY).abs() - 1.0).abs() < 1e-6);
    }
}
