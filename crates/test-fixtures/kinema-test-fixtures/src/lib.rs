//! Programmatic fixtures shared by kinema-rs integration tests: a small
//! skeleton, clip stores with known-value tracks, and canonical blend-space
//! layouts.

use glam::{Quat, Vec3};
use kinema_animation_core::{
    AssetKind, BlendSpaceDef, ClipHeader, ClipId, ClipStore, ClipTracks, DimensionDef, ExampleDef,
    Face, JointTrack, JointTransform, MotionParam, SkeletonDef,
};

/// Four-joint chain: root, pelvis, spine, head.
pub fn skeleton() -> SkeletonDef {
    SkeletonDef::new(vec![
        ("root".into(), None, JointTransform::IDENTITY),
        ("pelvis".into(), Some(0), JointTransform::IDENTITY),
        ("spine".into(), Some(1), JointTransform::IDENTITY),
        ("head".into(), Some(2), JointTransform::IDENTITY),
    ])
}

/// Tracks holding one constant transform per joint.
pub fn constant_tracks(joint_count: usize, transform: JointTransform) -> ClipTracks {
    ClipTracks {
        joints: (0..joint_count)
            .map(|_| JointTrack::constant(transform))
            .collect(),
    }
}

/// Tracks whose root moves forward at a constant speed while joint 2
/// rotates around Z from 0 to `end_angle` over the clip. `keys` samples.
pub fn locomotion_tracks(joint_count: usize, keys: usize, distance: f32, end_angle: f32) -> ClipTracks {
    let mut joints = Vec::with_capacity(joint_count);
    for joint in 0..joint_count {
        let mut track = JointTrack::default();
        for k in 0..keys {
            let t = k as f32 / (keys - 1) as f32;
            match joint {
                0 => {
                    track.rotations.push(Quat::IDENTITY);
                    track.translations.push(Vec3::new(0.0, distance * t, 0.0));
                    track.scales.push(Vec3::ONE);
                }
                2 => {
                    track.rotations.push(Quat::from_rotation_z(end_angle * t));
                    track.translations.push(Vec3::ZERO);
                    track.scales.push(Vec3::ONE);
                }
                _ => {
                    track.rotations.push(Quat::IDENTITY);
                    track.translations.push(Vec3::ZERO);
                    track.scales.push(Vec3::ONE);
                }
            }
        }
        joints.push(track);
    }
    ClipTracks { joints }
}

/// A store with three one-second locomotion clips of increasing root
/// speed. Returns (store, idle, walk, run).
pub fn locomotion_store(joint_count: usize) -> (ClipStore, ClipId, ClipId, ClipId) {
    let mut store = ClipStore::new();
    let idle = store.add_clip(
        ClipHeader::new("idle", AssetKind::Clip, 30.0, 1.0),
        constant_tracks(joint_count, JointTransform::IDENTITY),
    );
    let walk = store.add_clip(
        ClipHeader::new("walk", AssetKind::Clip, 30.0, 1.0),
        locomotion_tracks(joint_count, 31, 1.5, 0.3),
    );
    let run = store.add_clip(
        ClipHeader::new("run", AssetKind::Clip, 30.0, 1.0),
        locomotion_tracks(joint_count, 31, 3.0, 0.6),
    );
    (store, idle, walk, run)
}

/// 1D travel-speed blend space over (idle, walk, run) at speeds 0/1.5/3.
pub fn blendspace_1d(store: &mut ClipStore, idle: ClipId, walk: ClipId, run: ClipId) -> ClipId {
    let def = BlendSpaceDef {
        dimensions: vec![DimensionDef {
            param: MotionParam::TravelSpeed,
            min: 0.0,
            max: 3.0,
            scale: 1.0,
        }],
        examples: vec![
            ExampleDef {
                clip: idle,
                position: Vec3::new(0.0, 0.0, 0.0),
                playback_scale: 1.0,
            },
            ExampleDef {
                clip: walk,
                position: Vec3::new(1.5, 0.0, 0.0),
                playback_scale: 1.0,
            },
            ExampleDef {
                clip: run,
                position: Vec3::new(3.0, 0.0, 0.0),
                playback_scale: 1.0,
            },
        ],
        faces: vec![Face::new(&[0, 1]), Face::new(&[1, 2])],
        idle_to_move: false,
    };
    store.add_blend_space(ClipHeader::new("move-1d", AssetKind::BlendSpace, 30.0, 1.0), def)
}

/// 2D unit-square blend space with one example at each corner, quad face
/// in ring order.
pub fn blendspace_2d_corners(store: &mut ClipStore, corners: [ClipId; 4]) -> ClipId {
    let positions = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ];
    let def = BlendSpaceDef {
        dimensions: vec![
            DimensionDef {
                param: MotionParam::TravelSpeed,
                min: 0.0,
                max: 1.0,
                scale: 1.0,
            },
            DimensionDef {
                param: MotionParam::TurnSpeed,
                min: 0.0,
                max: 1.0,
                scale: 1.0,
            },
        ],
        examples: corners
            .iter()
            .zip(positions)
            .map(|(clip, position)| ExampleDef {
                clip: *clip,
                position,
                playback_scale: 1.0,
            })
            .collect(),
        faces: vec![Face::new(&[0, 1, 2, 3])],
        idle_to_move: false,
    };
    store.add_blend_space(ClipHeader::new("move-2d", AssetKind::BlendSpace, 30.0, 1.0), def)
}
