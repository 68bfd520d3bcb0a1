//! The command interpreter.
//!
//! Strictly sequential: command N's output is visible to command N+1, and
//! given the same instruction stream, clip data and weights the output is
//! bit-identical run to run. Nothing here reads surrounding engine state;
//! the stream plus raw clip tracks is the entire input, which is what
//! makes worker-thread execution safe.

use crate::clips::ClipStore;
use crate::commands::{BlendMode, Command};
use crate::ids::CharacterId;
use crate::pose::{JointMask, Pose};
use crate::posemod::{ModifierParams, PoseModifier, WorldLocation};
use crate::skeleton::SkeletonDef;
use glam::Quat;

/// Read-only context shared by every command of one frame.
pub struct ExecutionInput<'a> {
    pub store: &'a ClipStore,
    pub skeleton: &'a SkeletonDef,
    pub masks: &'a [JointMask],
    pub character: CharacterId,
    pub dt: f32,
    pub location: WorldLocation,
}

/// Walk the stream in order against the frame's working pose buffers.
/// Buffer 0 is the final target the caller publishes after synchronize.
pub fn execute(
    commands: &[Command],
    input: &ExecutionInput<'_>,
    buffers: &mut [Pose],
    modifiers: &mut [Box<dyn PoseModifier>],
) {
    let mut active_mask: Option<usize> = None;

    for command in commands {
        match *command {
            Command::ClearPose { target } => {
                clear_accumulators(&mut buffers[target as usize]);
            }
            Command::SampleClip {
                clip,
                time,
                weight,
                target,
            } => {
                sample_into(
                    input,
                    &mut buffers[target as usize],
                    clip,
                    time,
                    weight,
                    active_mask,
                );
            }
            Command::SampleAddClip {
                clip,
                time,
                weight,
                target,
            } => {
                sample_additive(
                    input,
                    &mut buffers[target as usize],
                    clip,
                    time,
                    weight,
                    active_mask,
                );
            }
            Command::NormalizePose { target } => {
                normalize_pose(&mut buffers[target as usize], input.skeleton);
            }
            Command::BlendPoses {
                source,
                target,
                weight,
                mode,
            } => {
                let (src, dst) = split_two(buffers, source as usize, target as usize);
                blend_poses(src, dst, weight, mode);
            }
            Command::SetJointMask { mask } => {
                active_mask = mask.map(usize::from).filter(|m| *m < input.masks.len());
            }
            Command::RunModifier { slot } => {
                if let Some(modifier) = modifiers.get_mut(slot as usize) {
                    let (head, _) = buffers.split_at_mut(1);
                    let mut params = ModifierParams {
                        character: input.character,
                        pose: &mut head[0],
                        dt: input.dt,
                        location: input.location,
                    };
                    modifier.execute(&mut params);
                }
            }
        }
    }
}

fn clear_accumulators(pose: &mut Pose) {
    for j in &mut pose.joints {
        j.rotation = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
        j.translation = glam::Vec3::ZERO;
        j.scale = glam::Vec3::ZERO;
    }
    for w in &mut pose.weights {
        *w = 0.0;
    }
}

#[inline]
fn joint_in_mask(input: &ExecutionInput<'_>, mask: Option<usize>, joint: usize) -> bool {
    match mask {
        None => true,
        Some(m) => input.masks[m].contains(input.skeleton.joints()[joint].id),
    }
}

/// Weighted accumulation of one clip sample. Rotations are sign-aligned
/// against the running sum so later normalization takes the short arc,
/// independent of sampling order sign conventions.
fn sample_into(
    input: &ExecutionInput<'_>,
    pose: &mut Pose,
    clip: crate::ids::ClipId,
    time: f32,
    weight: f32,
    mask: Option<usize>,
) {
    let Some(tracks) = input.store.tracks(clip) else {
        log::warn!("sample command references clip {clip:?} without track data");
        return;
    };
    let joint_count = pose.joint_count();
    for joint in 0..joint_count {
        if !joint_in_mask(input, mask, joint) {
            continue;
        }
        let sample = tracks.sample_joint(joint, time);
        let acc = &mut pose.joints[joint];
        let mut rot = sample.rotation;
        if pose.weights[joint] > 0.0 && acc.rotation.dot(rot) < 0.0 {
            rot = -rot;
        }
        acc.rotation = acc.rotation + rot * weight;
        acc.translation += sample.translation * weight;
        acc.scale += sample.scale * weight;
        pose.weights[joint] += weight;
    }
}

/// Additive application on top of an already-normalized buffer: the sample
/// is treated as a delta pose scaled by the weight.
fn sample_additive(
    input: &ExecutionInput<'_>,
    pose: &mut Pose,
    clip: crate::ids::ClipId,
    time: f32,
    weight: f32,
    mask: Option<usize>,
) {
    let Some(tracks) = input.store.tracks(clip) else {
        log::warn!("additive sample references clip {clip:?} without track data");
        return;
    };
    let joint_count = pose.joint_count();
    for joint in 0..joint_count {
        if !joint_in_mask(input, mask, joint) {
            continue;
        }
        let sample = tracks.sample_joint(joint, time);
        let acc = &mut pose.joints[joint];
        let delta = Quat::IDENTITY.lerp(sample.rotation, weight);
        acc.rotation = delta * acc.rotation;
        acc.translation += sample.translation * weight;
        acc.scale *= glam::Vec3::ONE.lerp(sample.scale, weight);
    }
}

/// Resolve weighted sums: normalize rotations, divide by total weight and
/// fill joints nothing touched from the skeleton rest pose (weight stays 0
/// so a later override blend knows there is no data here).
fn normalize_pose(pose: &mut Pose, skeleton: &SkeletonDef) {
    for joint in 0..pose.joint_count() {
        let w = pose.weights[joint];
        if w > 0.0 {
            let acc = &mut pose.joints[joint];
            let rcp = acc.rotation.length_recip();
            acc.rotation = if rcp.is_finite() && rcp > 0.0 {
                acc.rotation * rcp
            } else {
                Quat::IDENTITY
            };
            acc.translation /= w;
            acc.scale /= w;
            pose.weights[joint] = 1.0;
        } else {
            pose.joints[joint] = skeleton.joints()[joint].rest;
        }
    }
}

fn blend_poses(source: &Pose, target: &mut Pose, weight: f32, mode: BlendMode) {
    for joint in 0..target.joint_count().min(source.joint_count()) {
        if source.weights[joint] <= 0.0 {
            continue; // no data in the source; override keeps the target
        }
        let src = &source.joints[joint];
        let dst = &mut target.joints[joint];
        match mode {
            BlendMode::Override => {
                dst.rotation = dst.rotation.lerp(src.rotation, weight);
                dst.translation = dst.translation.lerp(src.translation, weight);
                dst.scale = dst.scale.lerp(src.scale, weight);
                target.weights[joint] = 1.0;
            }
            BlendMode::Additive => {
                let delta = Quat::IDENTITY.lerp(src.rotation, weight);
                dst.rotation = delta * dst.rotation;
                dst.translation += src.translation * weight;
            }
        }
    }
}

/// Disjoint mutable views of two buffers; `source == target` is rejected
/// during command generation, not here.
fn split_two(buffers: &mut [Pose], source: usize, target: usize) -> (&Pose, &mut Pose) {
    debug_assert_ne!(source, target, "blend with aliasing buffers");
    if source < target {
        let (a, b) = buffers.split_at_mut(target);
        (&a[source], &mut b[0])
    } else {
        let (a, b) = buffers.split_at_mut(source);
        (&b[0], &mut a[target])
    }
}
