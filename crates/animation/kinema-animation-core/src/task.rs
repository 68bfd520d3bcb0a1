//! The per-character orchestrator.
//!
//! One task owns a transition queue and a pose-modifier queue per virtual
//! layer, builds the frame's command buffer during Prepare (main thread),
//! hands it to a worker for Execute, and publishes the result during
//! Synchronize (main thread again). State machine:
//! Idle -> Preparing -> Running -> Synchronizing -> Idle.

use crate::clips::{AssetKind, ClipStore};
use crate::commands::{BlendMode, Command, CommandBuffer};
use crate::config::Config;
use crate::context::AnimationContext;
use crate::error::AnimError;
use crate::execute::{execute, ExecutionInput};
use crate::ids::{CharacterId, ClipId};
use crate::jobs::JobHandle;
use crate::pose::{JointMask, Pose};
use crate::posemod::{ModifierParams, PoseModifier, PoseModifierQueue, WorldLocation};
use crate::rootmotion::{relative_movement, RelativeMovement, RootSample};
use crate::sampler::SamplerPool;
use crate::saved_state::{capture_layer, restore_layer, SavedCharacterState, SAVED_STATE_VERSION};
use crate::transition::{AnimationPush, FiredEvent, TransitionQueue};
use std::sync::{Arc, Mutex};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    Idle,
    Preparing,
    Running,
    Synchronizing,
}

/// One virtual layer: its queue, its modifier queue and an optional joint
/// mask restricting what the layer samples.
pub struct Layer {
    pub queue: TransitionQueue,
    pub modifiers: PoseModifierQueue,
    pub joint_mask: Option<JointMask>,
}

/// Everything a worker needs to execute one frame, moved into the job.
struct FrameWork {
    commands: CommandBuffer,
    buffers: Vec<Pose>,
    masks: Vec<JointMask>,
    modifiers: Vec<Box<dyn PoseModifier>>,
    /// How many of `modifiers` belong to each layer, in layer order.
    modifier_counts: Vec<(usize, usize)>,
    root_samples: Vec<RootSample>,
    dt: f32,
    location: WorldLocation,
}

pub struct SkeletonAnimTask {
    character: CharacterId,
    state: TaskState,
    layers: Vec<Layer>,
    location: WorldLocation,
    /// Wait handle for the previous frame's downstream consumer
    /// (skinning); begin() blocks on it before touching frame storage.
    consumer_fence: JobHandle,
    job: Option<JobHandle>,
    in_flight: Option<Arc<Mutex<Option<FrameWork>>>>,
    // published after synchronize
    output: Pose,
    root_motion: RelativeMovement,
    events: Vec<FiredEvent>,
}

impl SkeletonAnimTask {
    pub fn new(character: CharacterId, ctx: &AnimationContext) -> Self {
        let layers = (0..ctx.config.max_layers)
            .map(|_| Layer {
                queue: TransitionQueue::new(),
                modifiers: PoseModifierQueue::new(ctx.config.pose_modifiers_per_layer),
                joint_mask: None,
            })
            .collect();
        let mut output = Pose::new(ctx.skeleton.joint_count());
        for (joint, def) in output.joints.iter_mut().zip(ctx.skeleton.joints()) {
            *joint = def.rest;
        }
        Self {
            character,
            state: TaskState::Idle,
            layers,
            location: WorldLocation::default(),
            consumer_fence: JobHandle::completed(),
            job: None,
            in_flight: None,
            output,
            root_motion: RelativeMovement::IDENTITY,
            events: Vec::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub fn character(&self) -> CharacterId {
        self.character
    }

    /// The pose published by the last synchronize.
    #[inline]
    pub fn pose(&self) -> &Pose {
        &self.output
    }

    #[inline]
    pub fn root_motion(&self) -> RelativeMovement {
        self.root_motion
    }

    /// Events crossed during the last prepared frame.
    #[inline]
    pub fn events(&self) -> &[FiredEvent] {
        &self.events
    }

    /// Install the handle the next begin() must wait on before reusing
    /// frame storage (typically the renderer's read of the last pose).
    pub fn set_consumer_fence(&mut self, fence: JobHandle) {
        self.consumer_fence = fence;
    }

    // ----------------------------------------------------------------- //
    // layer-facing API                                                   //
    // ----------------------------------------------------------------- //

    fn layer_or_log(&mut self, layer: usize) -> Option<&mut Layer> {
        if layer >= self.layers.len() {
            log::error!("invalid layer id: {layer}");
            return None;
        }
        Some(&mut self.layers[layer])
    }

    pub fn push_animation(
        &mut self,
        layer: usize,
        push: AnimationPush,
        ctx: &mut AnimationContext,
    ) -> bool {
        let store = ctx.store.clone();
        let Some(l) = self.layer_or_log(layer) else {
            return false;
        };
        l.queue.push_animation(push, &store, &mut ctx.sampler_pool)
    }

    pub fn stop_animations_in_layer(&mut self, layer: usize, fade_seconds: f32) {
        if let Some(l) = self.layer_or_log(layer) {
            l.queue.stop_with_fade(fade_seconds);
        }
    }

    pub fn stop_animations_all_layers(&mut self, ctx: &mut AnimationContext) {
        let store = ctx.store.clone();
        for layer in &mut self.layers {
            layer.queue.clear(&store, &mut ctx.sampler_pool);
        }
    }

    pub fn set_layer_playback_scale(&mut self, layer: usize, scale: f32) {
        if let Some(l) = self.layer_or_log(layer) {
            l.queue.playback_scale = scale.max(0.0);
        }
    }

    pub fn set_layer_blend_weight(&mut self, layer: usize, weight: f32) {
        if let Some(l) = self.layer_or_log(layer) {
            l.queue.blend_weight = weight;
        }
    }

    pub fn set_layer_joint_mask(&mut self, layer: usize, mask: Option<JointMask>) {
        if let Some(l) = self.layer_or_log(layer) {
            l.joint_mask = mask;
        }
    }

    pub fn push_pose_modifier(&mut self, layer: usize, modifier: Box<dyn PoseModifier>) -> bool {
        match self.layer_or_log(layer) {
            Some(l) => l.modifiers.push(modifier),
            None => false,
        }
    }

    /// Forward a desired motion parameter to every parametric entry on
    /// every layer.
    pub fn set_desired_motion_param(
        &self,
        param: crate::blendspace::MotionParam,
        value: f32,
        ctx: &mut AnimationContext,
    ) {
        for layer in &self.layers {
            layer
                .queue
                .set_desired_param(param, value, &mut ctx.sampler_pool);
        }
    }

    #[inline]
    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn animation_count(&self, layer: usize) -> usize {
        self.layers
            .get(layer)
            .map(|l| l.queue.animation_count())
            .unwrap_or(0)
    }

    // ----------------------------------------------------------------- //
    // frame pipeline                                                     //
    // ----------------------------------------------------------------- //

    /// Start this character's frame. Double-begin is fatal. With
    /// `immediate` (or threading disabled) the whole pipeline runs inline
    /// and the task returns already synchronized.
    pub fn begin(
        &mut self,
        dt: f32,
        location: WorldLocation,
        immediate: bool,
        ctx: &mut AnimationContext,
    ) -> Result<(), AnimError> {
        if self.state != TaskState::Idle {
            return Err(AnimError::DoubleBegin(self.character));
        }

        // One-frame pipeline back-pressure: the previous frame's consumer
        // must be done with the pose before we reuse frame storage.
        self.consumer_fence.wait();

        self.state = TaskState::Preparing;
        self.location = location;

        let work = match self.prepare(dt, ctx) {
            Ok(Some(work)) => work,
            Ok(None) => {
                // Nothing to animate this frame; keep the last pose.
                self.state = TaskState::Idle;
                return Ok(());
            }
            Err(e) => {
                self.state = TaskState::Idle;
                if let AnimError::PoseStorageExhausted(_) = e {
                    log::warn!("{e}; character keeps its previous pose");
                    return Ok(());
                }
                return Err(e);
            }
        };

        let slot: Arc<Mutex<Option<FrameWork>>> = Arc::new(Mutex::new(None));
        self.in_flight = Some(slot.clone());

        let store = ctx.store.clone();
        let skeleton = ctx.skeleton.clone();
        let character = self.character;
        let job = move || {
            let mut work = work;
            let FrameWork {
                commands,
                buffers,
                masks,
                modifiers,
                dt,
                location,
                ..
            } = &mut work;
            let input = ExecutionInput {
                store: &store,
                skeleton: &skeleton,
                masks,
                character,
                dt: *dt,
                location: *location,
            };
            execute(commands.commands(), &input, buffers, modifiers);
            *slot.lock().expect("frame slot poisoned") = Some(work);
        };

        if immediate || ctx.executor.is_inline() {
            job();
            self.job = Some(JobHandle::completed());
            self.state = TaskState::Running;
            self.synchronize(ctx);
        } else {
            self.job = Some(ctx.executor.spawn(job));
            self.state = TaskState::Running;
        }
        Ok(())
    }

    /// Join the worker, then synchronize. No-op when the task is idle.
    pub fn wait(&mut self, ctx: &mut AnimationContext) {
        if self.state != TaskState::Running {
            return;
        }
        if let Some(job) = self.job.take() {
            job.wait();
        }
        self.synchronize(ctx);
    }

    /// Publish the executed pose, extract root motion, return pose leases
    /// and swap the pose-modifier buffers. Runs exactly once per frame.
    fn synchronize(&mut self, ctx: &mut AnimationContext) {
        self.state = TaskState::Synchronizing;

        let work = self
            .in_flight
            .take()
            .and_then(|slot| slot.lock().expect("frame slot poisoned").take());

        if let Some(mut work) = work {
            self.output.joints.copy_from_slice(&work.buffers[0].joints);
            self.output.weights.copy_from_slice(&work.buffers[0].weights);
            self.root_motion = relative_movement(&work.root_samples);

            let counts = std::mem::take(&mut work.modifier_counts);
            let modifiers = std::mem::take(&mut work.modifiers);
            self.return_modifiers(modifiers, &counts);

            for buffer in work.buffers.drain(..) {
                ctx.pose_arena.release(buffer);
            }
        }
        for layer in &mut self.layers {
            layer.modifiers.swap_buffers();
        }

        self.job = None;
        self.state = TaskState::Idle;
    }

    /// Hand taken modifiers back to their owning layers' active buffers.
    fn return_modifiers(
        &mut self,
        mut modifiers: Vec<Box<dyn PoseModifier>>,
        counts: &[(usize, usize)],
    ) {
        for (layer_index, count) in counts.iter().rev() {
            let start = modifiers.len() - count;
            let returned = modifiers.split_off(start);
            self.layers[*layer_index].modifiers.restore_active(returned);
        }
    }

    /// Build the frame: (1) pose scratch, (2) pre-sampling modifier
    /// prepare, (3) command generation across all layers, (4) root-motion
    /// samples. The order is load-bearing; each step mutates state the
    /// next one reads.
    fn prepare(
        &mut self,
        dt: f32,
        ctx: &mut AnimationContext,
    ) -> Result<Option<FrameWork>, AnimError> {
        self.events.clear();

        let store = ctx.store.clone();
        let joint_count = ctx.skeleton.joint_count();

        // (1) frame scratch: the final target plus one layer temporary
        let Some(final_buffer) = ctx.pose_arena.acquire(joint_count) else {
            return Err(AnimError::PoseStorageExhausted(self.character));
        };
        let Some(layer_buffer) = ctx.pose_arena.acquire(joint_count) else {
            ctx.pose_arena.release(final_buffer);
            return Err(AnimError::PoseStorageExhausted(self.character));
        };
        let mut buffers = vec![final_buffer, layer_buffer];

        // (2) pre-sampling modifier hooks; modifiers that decline prepare
        // are dropped from this frame.
        let mut modifiers: Vec<Box<dyn PoseModifier>> = Vec::new();
        let mut modifier_counts: Vec<(usize, usize)> = Vec::new();
        for (layer_index, layer) in self.layers.iter_mut().enumerate() {
            let mut kept = 0usize;
            for mut modifier in layer.modifiers.take_active() {
                let mut params = ModifierParams {
                    character: self.character,
                    pose: &mut self.output,
                    dt,
                    location: self.location,
                };
                if modifier.prepare(&mut params) {
                    modifiers.push(modifier);
                    kept += 1;
                }
            }
            if kept > 0 {
                modifier_counts.push((layer_index, kept));
            }
        }

        // (3) + (4): queue updates, command stream, root samples
        let generated = self.generate_commands(
            dt,
            &store,
            &mut ctx.sampler_pool,
            &ctx.config,
            modifiers.len(),
            &modifier_counts,
        );
        match generated {
            Ok(Some((commands, masks, root_samples))) => Ok(Some(FrameWork {
                commands,
                buffers,
                masks,
                modifiers,
                modifier_counts,
                root_samples,
                dt,
                location: self.location,
            })),
            Ok(None) => {
                for buffer in buffers.drain(..) {
                    ctx.pose_arena.release(buffer);
                }
                self.return_modifiers(modifiers, &modifier_counts);
                Ok(None)
            }
            Err(e) => {
                for buffer in buffers.drain(..) {
                    ctx.pose_arena.release(buffer);
                }
                self.return_modifiers(modifiers, &modifier_counts);
                Err(e)
            }
        }
    }

    /// Advance every layer's queue and emit the frame's command stream.
    /// Returns None when no layer is active and no modifier is queued.
    #[allow(clippy::type_complexity)]
    fn generate_commands(
        &mut self,
        dt: f32,
        store: &ClipStore,
        pool: &mut SamplerPool,
        config: &Config,
        total_modifiers: usize,
        modifier_counts: &[(usize, usize)],
    ) -> Result<Option<(CommandBuffer, Vec<JointMask>, Vec<RootSample>)>, AnimError> {
        let mut commands = CommandBuffer::new(self.character, config.command_buffer_capacity);
        let mut masks: Vec<JointMask> = Vec::new();
        let mut root_samples: Vec<RootSample> = Vec::new();
        let mut any_active = false;
        let mut multilayer_disabled = false;
        let max_exec = config.max_exec_queue;

        let mut modifier_slot = 0usize;
        let mut counts_iter = modifier_counts.iter().peekable();

        for (layer_index, layer) in self.layers.iter_mut().enumerate() {
            let update = layer.queue.update(dt, layer_index, max_exec, store, pool);
            self.events.extend(update.events);

            let layer_weight = layer.queue.transition_weight * layer.queue.blend_weight;
            let layer_modifiers = match counts_iter.peek() {
                Some((li, count)) if *li == layer_index => {
                    counts_iter.next();
                    *count
                }
                _ => 0,
            };

            if update.active && layer_weight > 0.0 && !(multilayer_disabled && layer_index > 0) {
                any_active = true;
                if layer_index == 0 {
                    multilayer_disabled = layer
                        .queue
                        .animation(0)
                        .has_static_flag(crate::transition::StaticFlags::DISABLE_MULTILAYER);
                }

                let mask_slot = match &layer.joint_mask {
                    Some(mask) => {
                        masks.push(mask.clone());
                        Some((masks.len() - 1) as u8)
                    }
                    None => None,
                };

                if layer_index == 0 {
                    Self::emit_layer_samples(
                        &mut commands,
                        layer,
                        0,
                        mask_slot,
                        store,
                        pool,
                        max_exec,
                        Some(&mut root_samples),
                    )?;
                } else {
                    // Upper layers sample into the temporary, then one
                    // blend merges it down with the detected mode.
                    let additive = Self::layer_is_additive(layer, store, max_exec);
                    Self::emit_layer_samples(
                        &mut commands,
                        layer,
                        1,
                        mask_slot,
                        store,
                        pool,
                        max_exec,
                        None,
                    )?;
                    commands.push(Command::BlendPoses {
                        source: 1,
                        target: 0,
                        weight: layer_weight,
                        mode: if additive {
                            BlendMode::Additive
                        } else {
                            BlendMode::Override
                        },
                    })?;
                }
            }

            for _ in 0..layer_modifiers {
                commands.push(Command::RunModifier {
                    slot: modifier_slot as u8,
                })?;
                modifier_slot += 1;
            }
        }

        if !any_active {
            if total_modifiers == 0 {
                return Ok(None);
            }
            // Only modifiers this frame: run them over the rest pose.
            commands.clear();
            commands.push(Command::ClearPose { target: 0 })?;
            commands.push(Command::NormalizePose { target: 0 })?;
            for slot in 0..total_modifiers {
                commands.push(Command::RunModifier { slot: slot as u8 })?;
            }
        }

        Ok(Some((commands, masks, root_samples)))
    }

    /// Sampling commands for one layer's active prefix into `target`.
    /// Parametric entries expand into one sample per weighted example.
    #[allow(clippy::too_many_arguments)]
    fn emit_layer_samples(
        commands: &mut CommandBuffer,
        layer: &Layer,
        target: u8,
        mask_slot: Option<u8>,
        store: &ClipStore,
        pool: &SamplerPool,
        max_exec: usize,
        mut root_samples: Option<&mut Vec<RootSample>>,
    ) -> Result<(), AnimError> {
        if mask_slot.is_some() {
            commands.push(Command::SetJointMask { mask: mask_slot })?;
        }
        commands.push(Command::ClearPose { target })?;

        let active = layer.queue.animation_count().min(max_exec);
        for index in 0..active {
            let anim = layer.queue.animation(index);
            if !anim.is_activated() {
                break;
            }
            let entry_weight = anim.transition_weight * anim.playback_weight;
            if entry_weight <= 0.0 {
                continue;
            }
            for (clip, time_cur, time_prev, weight) in
                Self::entry_samples(anim, store, pool, entry_weight)
            {
                commands.push(Command::SampleClip {
                    clip,
                    time: time_cur,
                    weight,
                    target,
                })?;
                if let Some(samples) = root_samples.as_deref_mut() {
                    if let Some(tracks) = store.tracks(clip) {
                        samples.push(RootSample {
                            current: tracks.sample_joint(0, time_cur),
                            previous: tracks.sample_joint(0, time_prev),
                            weight,
                        });
                    }
                }
            }
        }

        commands.push(Command::NormalizePose { target })?;
        if mask_slot.is_some() {
            commands.push(Command::SetJointMask { mask: None })?;
        }
        Ok(())
    }

    /// Flatten one queue entry into weighted (clip, current time, previous
    /// time) samples; a parametric entry contributes its weighted examples.
    fn entry_samples(
        anim: &crate::transition::Animation,
        store: &ClipStore,
        pool: &SamplerPool,
        entry_weight: f32,
    ) -> Vec<(ClipId, f32, f32, f32)> {
        let mut out = Vec::new();
        match anim.sampler {
            None => {
                if let Some(header) = store.header(anim.clip) {
                    let cur =
                        header.entire_clip_time(usize::from(anim.segment[0]), anim.anim_time[0]);
                    let prev = header.entire_clip_time(
                        usize::from(anim.segment_prev[0]),
                        anim.anim_time_prev[0],
                    );
                    out.push((anim.clip, cur, prev, entry_weight));
                }
            }
            Some(handle) => {
                let state = pool.get(handle);
                for i in 0..state.num_examples() {
                    let w = state.weight(i);
                    if w == 0.0 {
                        continue;
                    }
                    let clip = state.example_clip(i);
                    if let Some(header) = store.header(clip) {
                        let seg = usize::from(state.segment_counter(0, i));
                        let seg_prev = usize::from(state.segment_counter_prev(0, i));
                        let cur = header.entire_clip_time(seg, anim.anim_time[0]);
                        let prev = header.entire_clip_time(seg_prev, anim.anim_time_prev[0]);
                        out.push((clip, cur, prev, entry_weight * w));
                    }
                }
            }
        }
        out
    }

    /// Majority vote across the active prefix decides whether an upper
    /// layer merges additively or by override.
    fn layer_is_additive(layer: &Layer, store: &ClipStore, max_exec: usize) -> bool {
        let active = layer.queue.animation_count().min(max_exec);
        let mut additive = 0usize;
        let mut total = 0usize;
        for index in 0..active {
            let anim = layer.queue.animation(index);
            if !anim.is_activated() {
                break;
            }
            if let Some(header) = store.header(anim.clip) {
                total += 1;
                let is_additive = match header.kind {
                    AssetKind::Clip => header.is_additive,
                    AssetKind::BlendSpace => store
                        .blend_space(anim.clip)
                        .and_then(|def| def.examples.first())
                        .and_then(|ex| store.header(ex.clip))
                        .map(|h| h.is_additive)
                        .unwrap_or(false),
                };
                if is_additive {
                    additive += 1;
                }
            }
        }
        total > 0 && additive * 2 > total
    }

    // ----------------------------------------------------------------- //
    // persistence                                                        //
    // ----------------------------------------------------------------- //

    pub fn capture_state(&self, ctx: &AnimationContext) -> SavedCharacterState {
        SavedCharacterState {
            version: SAVED_STATE_VERSION,
            layers: self
                .layers
                .iter()
                .map(|l| capture_layer(&l.queue, &ctx.sampler_pool))
                .collect(),
        }
    }

    pub fn restore_state(&mut self, state: &SavedCharacterState, ctx: &mut AnimationContext) {
        let store = ctx.store.clone();
        for (layer, saved) in self.layers.iter_mut().zip(&state.layers) {
            restore_layer(saved, &mut layer.queue, &store, &mut ctx.sampler_pool);
        }
        // layers beyond the saved set default to "no animation playing"
        for layer in self.layers.iter_mut().skip(state.layers.len()) {
            layer.queue.clear(&store, &mut ctx.sampler_pool);
        }
    }
}
