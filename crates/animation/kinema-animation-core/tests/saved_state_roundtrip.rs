use kinema_animation_core::saved_state::{capture_layer, from_json, restore_layer, to_json};
use kinema_animation_core::{
    AnimationPush, SamplerPool, SavedCharacterState, StaticFlags, TransitionQueue, MAX_EXEC_QUEUE,
};
use kinema_test_fixtures as fixtures;

const DT: f32 = 1.0 / 30.0;

/// it should reproduce the same subsequent frame after a save/load as the
/// original queue would have produced had it continued
#[test]
fn queue_roundtrip_resumes_mid_transition() {
    let skeleton = fixtures::skeleton();
    let (mut store, idle, walk, run) = fixtures::locomotion_store(skeleton.joint_count());
    let group = fixtures::blendspace_1d(&mut store, idle, walk, run);

    let mut pool = SamplerPool::new(8);
    let mut queue = TransitionQueue::new();

    assert!(queue.push_animation(
        AnimationPush::new(walk)
            .with_flags(StaticFlags::LOOP | StaticFlags::ALLOW_RESTART)
            .with_transition_time(0.2),
        &store,
        &mut pool
    ));
    for _ in 0..4 {
        queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
    }
    assert!(queue.push_animation(
        AnimationPush::new(group)
            .with_flags(StaticFlags::LOOP)
            .with_transition_time(0.3),
        &store,
        &mut pool
    ));
    for _ in 0..5 {
        queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
    }

    // snapshot, through the serialized form
    let saved = SavedCharacterState {
        version: 1,
        layers: vec![capture_layer(&queue, &pool)],
    };
    let json = to_json(&saved).unwrap();
    let reloaded = from_json(&json).unwrap();

    let mut restored_pool = SamplerPool::new(8);
    let mut restored = TransitionQueue::new();
    restore_layer(
        &reloaded.layers[0],
        &mut restored,
        &store,
        &mut restored_pool,
    );

    assert_eq!(restored.animation_count(), queue.animation_count());
    for i in 0..queue.animation_count() {
        let a = queue.animation(i);
        let b = restored.animation(i);
        assert_eq!(a.clip, b.clip);
        assert!((a.anim_time[0] - b.anim_time[0]).abs() < 1e-6);
        assert_eq!(a.segment[0], b.segment[0]);
    }

    // both queues must agree on the next frame's sampling state
    queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
    restored.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut restored_pool);
    for i in 0..queue.animation_count() {
        let a = queue.animation(i);
        let b = restored.animation(i);
        assert!(
            (a.anim_time[0] - b.anim_time[0]).abs() < 1e-5,
            "entry {i}: {} vs {}",
            a.anim_time[0],
            b.anim_time[0]
        );
        assert_eq!(a.segment[0], b.segment[0]);
    }

    queue.clear(&store, &mut pool);
    restored.clear(&store, &mut restored_pool);
}

/// it should treat missing layers and unknown clips as "nothing playing"
#[test]
fn restore_tolerates_missing_and_unknown() {
    let skeleton = fixtures::skeleton();
    let (store, _idle, _walk, _run) = fixtures::locomotion_store(skeleton.joint_count());
    let mut pool = SamplerPool::new(4);
    let mut queue = TransitionQueue::new();

    let json = r#"{"version":7,"layers":[{"entries":[{"clip":4096,"normalized_time":0.5}]}]}"#;
    let state = from_json(json).unwrap();
    restore_layer(&state.layers[0], &mut queue, &store, &mut pool);
    assert_eq!(queue.animation_count(), 0, "unknown clip must be skipped");
}
