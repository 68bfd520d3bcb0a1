use kinema_animation_core::{
    AnimEventDef, AnimationPush, AssetKind, ClipHeader, ClipStore, SamplerPool, StaticFlags,
    TransitionQueue, MAX_EXEC_QUEUE,
};
use kinema_test_fixtures as fixtures;

const DT: f32 = 1.0 / 30.0;

fn looping(clip: kinema_animation_core::ClipId, transition: f32) -> AnimationPush {
    AnimationPush::new(clip)
        .with_flags(StaticFlags::LOOP | StaticFlags::ALLOW_RESTART)
        .with_transition_time(transition)
}

/// it should crossfade through the shaped weight pair (0.2, 0.8) once the
/// incoming entry's priority reaches two thirds, and keep both entries
/// queued until the old one has fully drained
#[test]
fn two_push_crossfade_scenario() {
    let (store, _idle, walk, run) = fixtures::locomotion_store(4);
    let mut pool = SamplerPool::new(8);
    let mut queue = TransitionQueue::new();

    assert!(queue.push_animation(looping(walk, 0.5), &store, &mut pool));
    for _ in 0..3 {
        queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
    }
    assert!((queue.animation(0).transition_weight - 1.0).abs() < 1e-5);

    assert!(queue.push_animation(looping(run, 0.5), &store, &mut pool));
    assert_eq!(queue.animation_count(), 2);

    // 10 updates at 1/30s: priority = (10/30)/0.5 = 2/3, which the
    // smoothing curve maps to exactly (0.2, 0.8)
    let mut last_front = 1.0f32;
    for _ in 0..10 {
        queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
        let w0 = queue.animation(0).transition_weight;
        assert!(w0 <= last_front + 1e-5, "front weight must not rise");
        last_front = w0;
        let sum = queue.animation(0).transition_weight + queue.animation(1).transition_weight;
        assert!((sum - 1.0).abs() < 1e-4);
    }
    assert!((queue.animation(0).transition_weight - 0.2).abs() < 1e-3);
    assert!((queue.animation(1).transition_weight - 0.8).abs() < 1e-3);
    assert_eq!(queue.animation_count(), 2);

    // once priority saturates the old entry drains to zero and is evicted
    for _ in 0..10 {
        queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
    }
    assert_eq!(queue.animation_count(), 1);
    assert!((queue.animation(0).transition_weight - 1.0).abs() < 1e-5);

    queue.clear(&store, &mut pool);
}

/// it should keep an entry waiting while its clip is still streaming and
/// activate it the frame the asset arrives
#[test]
fn streaming_clip_gates_activation() {
    let mut store = ClipStore::new();
    let streamed = store.add_clip(
        ClipHeader::new("streamed", AssetKind::Clip, 30.0, 1.0).with_on_demand(),
        fixtures::constant_tracks(4, kinema_animation_core::JointTransform::IDENTITY),
    );
    let mut pool = SamplerPool::new(4);
    let mut queue = TransitionQueue::new();

    assert!(queue.push_animation(looping(streamed, 0.2), &store, &mut pool));
    for _ in 0..5 {
        let update = queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
        assert!(!update.active, "layer must stay silent while streaming");
        assert!(!queue.animation(0).is_activated());
    }

    store.mark_loaded(streamed, true);
    let update = queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
    assert!(update.active);
    assert!(queue.animation(0).is_activated());

    queue.clear(&store, &mut pool);
}

/// it should hold a start-after follower until its looping predecessor is
/// replaced by a forced transition stripping the gate
#[test]
fn force_transition_strips_delay_gates() {
    let (store, _idle, walk, run) = fixtures::locomotion_store(4);
    let mut pool = SamplerPool::new(8);
    let mut queue = TransitionQueue::new();

    // non-looping predecessor in repeat mode would be required for
    // START_AFTER; a looping one holds the follower forever
    assert!(queue.push_animation(looping(walk, 0.2), &store, &mut pool));
    queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);

    let mut gated = AnimationPush::new(run)
        .with_flags(StaticFlags::LOOP | StaticFlags::START_AT_KEYTIME | StaticFlags::ALLOW_RESTART)
        .with_transition_time(0.2);
    gated.start_time = 0.9; // keytime late in the cycle
    assert!(queue.push_animation(gated, &store, &mut pool));
    queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
    assert!(!queue.animation(1).is_activated(), "keytime not reached yet");

    let forced = AnimationPush::new(walk)
        .with_flags(StaticFlags::LOOP | StaticFlags::FORCE_TRANSITION | StaticFlags::ALLOW_RESTART)
        .with_transition_time(0.2);
    assert!(queue.push_animation(forced, &store, &mut pool));
    queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
    assert!(
        queue.animation(1).is_activated(),
        "forced push must strip the keytime gate"
    );
    assert!(queue.animation(2).is_activated());

    queue.clear(&store, &mut pool);
}

/// it should inherit the predecessor's time and segment state when a
/// time-warped push continues the same clip
#[test]
fn timewarped_push_inherits_time() {
    let (store, _idle, walk, _run) = fixtures::locomotion_store(4);
    let mut pool = SamplerPool::new(8);
    let mut queue = TransitionQueue::new();

    let warped = AnimationPush::new(walk)
        .with_flags(StaticFlags::LOOP | StaticFlags::TRANSITION_TIMEWARP | StaticFlags::ALLOW_RESTART)
        .with_transition_time(0.3);
    assert!(queue.push_animation(warped.clone(), &store, &mut pool));
    for _ in 0..10 {
        queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
    }
    let t = queue.animation(0).anim_time[0];
    assert!(t > 0.2, "predecessor should have advanced, t={t}");

    assert!(queue.push_animation(warped, &store, &mut pool));
    assert!(
        (queue.animation(1).anim_time[0] - t).abs() < 1e-6,
        "follower must continue at the predecessor's time, not restart"
    );

    queue.clear(&store, &mut pool);
}

/// it should fire events exactly once when the playhead crosses them,
/// splitting the range across a loop wrap
#[test]
fn events_fire_across_loop_wrap() {
    let mut store = ClipStore::new();
    let clip = store.add_clip(
        ClipHeader::new("stride", AssetKind::Clip, 30.0, 1.0).with_events(vec![
            AnimEventDef {
                time: 0.5,
                name: "footstep_l".into(),
            },
            AnimEventDef {
                time: 0.98,
                name: "footstep_r".into(),
            },
        ]),
        fixtures::locomotion_tracks(4, 31, 1.0, 0.0),
    );
    let mut pool = SamplerPool::new(4);
    let mut queue = TransitionQueue::new();
    assert!(queue.push_animation(looping(clip, 0.0), &store, &mut pool));

    let mut left = 0usize;
    let mut right = 0usize;
    // 50 frames at 1/30s, comfortably past 1.5 cycles even with float
    // drift in the per-frame accumulation
    for _ in 0..50 {
        let update = queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);
        for ev in &update.events {
            match ev.name.as_str() {
                "footstep_l" => left += 1,
                "footstep_r" => right += 1,
                other => panic!("unexpected event {other}"),
            }
        }
    }
    // 1.5 cycles: the 0.5 event fires twice, the 0.98 event once
    assert_eq!(left, 2, "footstep_l fired {left} times");
    assert_eq!(right, 1, "footstep_r fired {right} times");

    queue.clear(&store, &mut pool);
}

/// it should refuse to sample more than the execution-queue prefix
#[test]
fn only_bounded_prefix_is_active() {
    let (store, idle, walk, run) = fixtures::locomotion_store(4);
    let mut pool = SamplerPool::new(8);
    let mut queue = TransitionQueue::new();

    for clip in [idle, walk, run, idle, walk, run] {
        assert!(queue.push_animation(looping(clip, 5.0), &store, &mut pool));
    }
    queue.update(DT, 0, MAX_EXEC_QUEUE, &store, &mut pool);

    let weighted = (0..queue.animation_count())
        .filter(|&i| queue.animation(i).transition_weight > 0.0)
        .count();
    assert!(weighted <= MAX_EXEC_QUEUE);

    queue.clear(&store, &mut pool);
}
