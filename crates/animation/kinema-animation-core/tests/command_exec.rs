use glam::Quat;
use kinema_animation_core::{
    execute, BlendMode, CharacterId, Command, CommandBuffer, ExecutionInput, JointMask, Pose,
    WorldLocation,
};
use kinema_test_fixtures as fixtures;

fn input<'a>(
    store: &'a kinema_animation_core::ClipStore,
    skeleton: &'a kinema_animation_core::SkeletonDef,
    masks: &'a [JointMask],
) -> ExecutionInput<'a> {
    ExecutionInput {
        store,
        skeleton,
        masks,
        character: CharacterId(0),
        dt: 1.0 / 30.0,
        location: WorldLocation::default(),
    }
}

/// it should produce bit-identical poses when executing the same
/// unmodified buffer twice
#[test]
fn execute_is_idempotent() {
    let skeleton = fixtures::skeleton();
    let (store, _idle, walk, run) = fixtures::locomotion_store(skeleton.joint_count());

    let mut commands = CommandBuffer::new(CharacterId(0), 2048);
    commands.push(Command::ClearPose { target: 0 }).unwrap();
    commands
        .push(Command::SampleClip {
            clip: walk,
            time: 0.4,
            weight: 0.3,
            target: 0,
        })
        .unwrap();
    commands
        .push(Command::SampleClip {
            clip: run,
            time: 0.4,
            weight: 0.7,
            target: 0,
        })
        .unwrap();
    commands.push(Command::NormalizePose { target: 0 }).unwrap();

    let mut first = vec![Pose::new(skeleton.joint_count())];
    let mut second = vec![Pose::new(skeleton.joint_count())];
    execute(commands.commands(), &input(&store, &skeleton, &[]), &mut first, &mut []);
    execute(commands.commands(), &input(&store, &skeleton, &[]), &mut second, &mut []);

    for (a, b) in first[0].joints.iter().zip(second[0].joints.iter()) {
        assert_eq!(a.rotation.to_array(), b.rotation.to_array());
        assert_eq!(a.translation.to_array(), b.translation.to_array());
        assert_eq!(a.scale.to_array(), b.scale.to_array());
    }
}

/// it should leave unmasked joints at the rest pose while sampling masked
/// ones
#[test]
fn joint_mask_restricts_sampling() {
    let skeleton = fixtures::skeleton();
    let (store, _idle, walk, _run) = fixtures::locomotion_store(skeleton.joint_count());
    let masks = vec![JointMask::new(vec![kinema_animation_core::joint_name_hash(
        "spine",
    )])];

    let mut commands = CommandBuffer::new(CharacterId(0), 2048);
    commands
        .push(Command::SetJointMask { mask: Some(0) })
        .unwrap();
    commands.push(Command::ClearPose { target: 0 }).unwrap();
    commands
        .push(Command::SampleClip {
            clip: walk,
            time: 1.0,
            weight: 1.0,
            target: 0,
        })
        .unwrap();
    commands.push(Command::NormalizePose { target: 0 }).unwrap();

    let mut buffers = vec![Pose::new(skeleton.joint_count())];
    execute(
        commands.commands(),
        &input(&store, &skeleton, &masks),
        &mut buffers,
        &mut [],
    );

    let spine = skeleton.index_of("spine").unwrap() as usize;
    let root = skeleton.index_of("root").unwrap() as usize;
    // spine (in the mask) picked up the clip's end rotation
    let expected = Quat::from_rotation_z(0.3);
    assert!(buffers[0].joints[spine].rotation.dot(expected).abs() > 0.9999);
    // root (outside the mask) stayed untouched and resolved to rest
    assert_eq!(buffers[0].joints[root].translation.to_array(), [0.0; 3]);
    assert!(buffers[0].weights[root] == 0.0);
}

/// it should replace covered joints on override blends and stack deltas on
/// additive blends
#[test]
fn blend_modes_compose() {
    let skeleton = fixtures::skeleton();
    let (store, _idle, walk, _run) = fixtures::locomotion_store(skeleton.joint_count());

    let mut commands = CommandBuffer::new(CharacterId(0), 2048);
    for target in [0u8, 1u8] {
        commands.push(Command::ClearPose { target }).unwrap();
    }
    commands
        .push(Command::SampleClip {
            clip: walk,
            time: 1.0,
            weight: 1.0,
            target: 1,
        })
        .unwrap();
    commands.push(Command::NormalizePose { target: 0 }).unwrap();
    commands.push(Command::NormalizePose { target: 1 }).unwrap();
    commands
        .push(Command::BlendPoses {
            source: 1,
            target: 0,
            weight: 0.5,
            mode: BlendMode::Override,
        })
        .unwrap();

    let mut buffers = vec![
        Pose::new(skeleton.joint_count()),
        Pose::new(skeleton.joint_count()),
    ];
    execute(
        commands.commands(),
        &input(&store, &skeleton, &[]),
        &mut buffers,
        &mut [],
    );

    let root = 0usize;
    // override at half weight: halfway between rest (0) and the clip's
    // end-of-clip root offset (1.5 forward)
    assert!((buffers[0].joints[root].translation.y - 0.75).abs() < 1e-4);
}

/// it should report overflow exactly once and keep the stream intact
#[test]
fn overflow_reports_once_with_nothing_written() {
    let mut commands = CommandBuffer::new(CharacterId(3), 16);
    commands.push(Command::ClearPose { target: 0 }).unwrap();
    let len = commands.len();
    let bytes = commands.bytes_used();

    let err = commands.push(Command::SampleClip {
        clip: kinema_animation_core::ClipId(0),
        time: 0.0,
        weight: 1.0,
        target: 0,
    });
    assert!(err.is_err());
    assert_eq!(commands.len(), len);
    assert_eq!(commands.bytes_used(), bytes);
}
