use glam::Vec3;
use kinema_animation_core::{
    AnimError, AnimationContext, AnimationPush, CharacterId, Config, ModifierParams, MotionParam,
    PoseModifier, SkeletonAnimTask, StaticFlags, TaskState, WorldLocation,
};
use kinema_test_fixtures as fixtures;
use std::sync::Arc;

const DT: f32 = 1.0 / 30.0;

fn make_context(config: Config) -> (AnimationContext, kinema_animation_core::ClipId) {
    let skeleton = Arc::new(fixtures::skeleton());
    let (store, _idle, walk, _run) = fixtures::locomotion_store(skeleton.joint_count());
    let ctx = AnimationContext::new(config, Arc::new(store), skeleton);
    (ctx, walk)
}

fn push_walk(task: &mut SkeletonAnimTask, walk: kinema_animation_core::ClipId, ctx: &mut AnimationContext) {
    let push = AnimationPush::new(walk)
        .with_flags(StaticFlags::LOOP | StaticFlags::ALLOW_RESTART)
        .with_transition_time(0.1);
    assert!(task.push_animation(0, push, ctx));
}

/// it should run the whole Begin -> Execute -> Wait/Synchronize pipeline on
/// a worker and publish the sampled pose and root motion
#[test]
fn threaded_pipeline_publishes_pose_and_root_motion() {
    let (mut ctx, walk) = make_context(Config::default());
    let mut task = SkeletonAnimTask::new(CharacterId(0), &ctx);
    push_walk(&mut task, walk, &mut ctx);

    task.begin(DT, WorldLocation::default(), false, &mut ctx)
        .unwrap();
    task.wait(&mut ctx);
    assert_eq!(task.state(), TaskState::Idle);

    // walk moves the root 1.5 units/second; one frame of root motion
    let rm = task.root_motion();
    assert!(
        (rm.translation.y - 1.5 * DT).abs() < 5e-3,
        "root motion {:?}",
        rm.translation
    );

    // the spine rotation sampled at the first frame's time
    let spine = 2usize;
    let t = task.layer(0).unwrap().queue.animation(0).anim_time[0];
    let expected = glam::Quat::from_rotation_z(0.3 * t);
    assert!(task.pose().joints[spine].rotation.dot(expected).abs() > 0.999);

    ctx.end_frame();
}

/// it should reject a second begin while the task is still running
#[test]
fn double_begin_is_fatal() {
    let (mut ctx, walk) = make_context(Config::default());
    let mut task = SkeletonAnimTask::new(CharacterId(1), &ctx);
    push_walk(&mut task, walk, &mut ctx);

    task.begin(DT, WorldLocation::default(), false, &mut ctx)
        .unwrap();
    let second = task.begin(DT, WorldLocation::default(), false, &mut ctx);
    assert!(matches!(second, Err(AnimError::DoubleBegin(_))));

    task.wait(&mut ctx);
    ctx.end_frame();
}

/// it should execute inline (and synchronize immediately) when threading
/// is disabled by configuration
#[test]
fn disable_threading_runs_inline() {
    let config = Config {
        disable_threading: true,
        ..Config::default()
    };
    let (mut ctx, walk) = make_context(config);
    let mut task = SkeletonAnimTask::new(CharacterId(2), &ctx);
    push_walk(&mut task, walk, &mut ctx);

    task.begin(DT, WorldLocation::default(), false, &mut ctx)
        .unwrap();
    // inline execution synchronizes inside begin()
    assert_eq!(task.state(), TaskState::Idle);
    assert!(task.root_motion().translation.y > 0.0);

    ctx.end_frame();
}

/// it should skip the character's frame, keeping the last pose, when the
/// pose arena cannot supply scratch space
#[test]
fn pose_arena_exhaustion_skips_frame() {
    let config = Config {
        pose_arena_capacity: 1, // prepare needs two buffers
        disable_threading: true,
        ..Config::default()
    };
    let (mut ctx, walk) = make_context(config);
    let mut task = SkeletonAnimTask::new(CharacterId(3), &ctx);
    push_walk(&mut task, walk, &mut ctx);

    let before = task.pose().joints[0].translation;
    let result = task.begin(DT, WorldLocation::default(), false, &mut ctx);
    assert!(result.is_ok(), "arena exhaustion must stay non-fatal");
    assert_eq!(task.state(), TaskState::Idle);
    assert_eq!(task.pose().joints[0].translation, before);
    assert_eq!(ctx.pose_arena.outstanding(), 0, "leases must be returned");

    ctx.end_frame();
}

struct HeadPin {
    executed: bool,
}

impl PoseModifier for HeadPin {
    fn name(&self) -> &str {
        "head-pin"
    }
    fn prepare(&mut self, _params: &mut ModifierParams<'_>) -> bool {
        true
    }
    fn execute(&mut self, params: &mut ModifierParams<'_>) {
        self.executed = true;
        params.pose.joints[3].translation = Vec3::new(0.0, 0.0, 9.0);
    }
}

/// it should run queued pose modifiers over the accumulated pose and
/// consume them at the frame boundary
#[test]
fn pose_modifiers_run_once_per_frame() {
    let config = Config {
        disable_threading: true,
        ..Config::default()
    };
    let (mut ctx, walk) = make_context(config);
    let mut task = SkeletonAnimTask::new(CharacterId(4), &ctx);
    push_walk(&mut task, walk, &mut ctx);

    assert!(task.push_pose_modifier(0, Box::new(HeadPin { executed: false })));

    // pushed modifiers live in the pending buffer; the swap at the end of
    // this frame makes them active for the next one
    task.begin(DT, WorldLocation::default(), false, &mut ctx)
        .unwrap();
    assert_ne!(task.pose().joints[3].translation.z, 9.0);

    task.begin(DT, WorldLocation::default(), false, &mut ctx)
        .unwrap();
    assert_eq!(task.pose().joints[3].translation.z, 9.0);

    // consumed: the third frame no longer runs it
    task.begin(DT, WorldLocation::default(), false, &mut ctx)
        .unwrap();
    assert_ne!(task.pose().joints[3].translation.z, 9.0);

    ctx.end_frame();
}

/// it should drive parametric entries from the shared motion parameters
#[test]
fn blend_space_follows_motion_parameter() {
    let config = Config {
        disable_threading: true,
        ..Config::default()
    };
    let skeleton = Arc::new(fixtures::skeleton());
    let (mut store, idle, walk, run) = fixtures::locomotion_store(skeleton.joint_count());
    let group = fixtures::blendspace_1d(&mut store, idle, walk, run);
    let mut ctx = AnimationContext::new(config, Arc::new(store), skeleton);
    let mut task = SkeletonAnimTask::new(CharacterId(5), &ctx);

    let push = AnimationPush::new(group)
        .with_flags(StaticFlags::LOOP)
        .with_transition_time(0.1);
    assert!(task.push_animation(0, push, &mut ctx));
    task.set_desired_motion_param(MotionParam::TravelSpeed, 3.0, &mut ctx);

    task.begin(DT, WorldLocation::default(), false, &mut ctx)
        .unwrap();

    // full speed: the run example dominates, so root motion approaches
    // 3 units/second
    let rm = task.root_motion();
    assert!(
        rm.translation.y > 2.0 * DT,
        "expected run-dominated root motion, got {:?}",
        rm.translation
    );

    ctx.end_frame();
}
