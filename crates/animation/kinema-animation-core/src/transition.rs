//! Per-layer transition queues.
//!
//! A queue holds the animations currently playing or transitioning on one
//! virtual layer, in insertion order: the front entry is dominant, trailing
//! entries are crossfading in, and only a bounded prefix is ever sampled.
//! Entries move through Queued -> Activating (delay gates: streaming,
//! start-at-keytime, start-after, idle-to-move) -> Activated ->
//! Transitioning-out -> Removed.

use crate::clips::{AssetKind, ClipStore};
use crate::ids::{ClipId, SamplerHandle};
use crate::sampler::SamplerPool;

/// Bounded prefix of a queue that participates in blending.
pub const MAX_EXEC_QUEUE: usize = 4;

/// Static per-animation flags, fixed at push time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticFlags(pub u32);

impl StaticFlags {
    pub const MANUAL_UPDATE: StaticFlags = StaticFlags(0x0001);
    pub const LOOP: StaticFlags = StaticFlags(0x0002);
    pub const REPEAT_LAST_KEY: StaticFlags = StaticFlags(0x0004);
    pub const TRANSITION_TIMEWARP: StaticFlags = StaticFlags(0x0008);
    pub const START_AT_KEYTIME: StaticFlags = StaticFlags(0x0010);
    pub const START_AFTER: StaticFlags = StaticFlags(0x0020);
    pub const IDLE_TO_MOVE: StaticFlags = StaticFlags(0x0040);
    pub const MOVE_TO_IDLE: StaticFlags = StaticFlags(0x0080);
    pub const ALLOW_RESTART: StaticFlags = StaticFlags(0x0100);
    pub const DISABLE_MULTILAYER: StaticFlags = StaticFlags(0x0400);
    pub const FORCE_SKELETON_UPDATE: StaticFlags = StaticFlags(0x0800);
    pub const FULL_ROOT_PRIORITY: StaticFlags = StaticFlags(0x4000);
    pub const FORCE_TRANSITION: StaticFlags = StaticFlags(0x8000);
    pub const FADEOUT_ON_END: StaticFlags = StaticFlags(0x1_0000);

    #[inline]
    pub fn contains(self, other: StaticFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: StaticFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: StaticFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for StaticFlags {
    type Output = StaticFlags;
    fn bitor(self, rhs: StaticFlags) -> StaticFlags {
        StaticFlags(self.0 | rhs.0)
    }
}

/// Dynamic flags, one set per evaluation index.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DynFlags(pub u32);

impl DynFlags {
    pub const ACTIVATED: DynFlags = DynFlags(0x01);
    pub const END_OF_CYCLE: DynFlags = DynFlags(0x02);
    pub const NEGATIVE_EOC: DynFlags = DynFlags(0x04);
    pub const LOOPED: DynFlags = DynFlags(0x08);
    pub const LOOPED_THIS_UPDATE: DynFlags = DynFlags(0x10);
    pub const REPEAT: DynFlags = DynFlags(0x20);
    pub const REMOVE_FROM_QUEUE: DynFlags = DynFlags(0x40);
    pub const EVENTS_EVALUATED_ONCE: DynFlags = DynFlags(0x80);

    #[inline]
    pub fn contains(self, other: DynFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: DynFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: DynFlags) {
        self.0 &= !other.0;
    }
}

/// One slot in a transition queue.
#[derive(Copy, Clone, Debug)]
pub struct Animation {
    pub clip: ClipId,
    pub static_flags: StaticFlags,
    pub dyn_flags: [DynFlags; 2],
    /// Normalized time inside the current segment, per evaluation index.
    pub anim_time: [f32; 2],
    pub anim_time_prev: [f32; 2],
    pub segment: [u8; 2],
    pub segment_prev: [u8; 2],
    /// Crossfade progress claimed by this entry, 0..1.
    pub transition_priority: f32,
    /// Resulting share of the layer blend, 0..1.
    pub transition_weight: f32,
    pub playback_weight: f32,
    pub playback_scale: f32,
    pub current_delta_time: f32,
    /// Keytime for START_AT_KEYTIME gating.
    pub start_time: f32,
    pub transition_time: f32,
    pub expected_segment_duration: f32,
    pub expected_total_duration: f32,
    pub sampler: Option<SamplerHandle>,
    pub user_token: u32,
}

/// Shared default returned for out-of-range queue access.
pub const DEFAULT_ANIMATION: Animation = Animation {
    clip: ClipId(u32::MAX),
    static_flags: StaticFlags(0),
    dyn_flags: [DynFlags(0); 2],
    anim_time: [0.0; 2],
    anim_time_prev: [0.0; 2],
    segment: [0; 2],
    segment_prev: [0; 2],
    transition_priority: 0.0,
    transition_weight: 0.0,
    playback_weight: 1.0,
    playback_scale: 1.0,
    current_delta_time: 0.0,
    start_time: 0.0,
    transition_time: 0.0,
    expected_segment_duration: 0.0,
    expected_total_duration: 0.0,
    sampler: None,
    user_token: 0,
};

impl Animation {
    #[inline]
    pub fn is_activated(&self) -> bool {
        self.dyn_flags[0].contains(DynFlags::ACTIVATED)
    }

    #[inline]
    pub fn in_repeat(&self) -> bool {
        self.dyn_flags[0].contains(DynFlags::REPEAT)
    }

    #[inline]
    pub fn has_static_flag(&self, flag: StaticFlags) -> bool {
        self.static_flags.contains(flag)
    }

    /// Compact flag string for queue debugging, one letter per set flag.
    pub fn flags_string(&self) -> String {
        const CODES: &[(char, StaticFlags)] = &[
            ('+', StaticFlags::FORCE_TRANSITION),
            ('y', StaticFlags::FULL_ROOT_PRIORITY),
            ('F', StaticFlags::FORCE_SKELETON_UPDATE),
            ('x', StaticFlags::DISABLE_MULTILAYER),
            ('n', StaticFlags::ALLOW_RESTART),
            ('S', StaticFlags::MOVE_TO_IDLE),
            ('I', StaticFlags::IDLE_TO_MOVE),
            ('A', StaticFlags::START_AFTER),
            ('K', StaticFlags::START_AT_KEYTIME),
            ('T', StaticFlags::TRANSITION_TIMEWARP),
            ('R', StaticFlags::REPEAT_LAST_KEY),
            ('L', StaticFlags::LOOP),
            ('M', StaticFlags::MANUAL_UPDATE),
            ('O', StaticFlags::FADEOUT_ON_END),
        ];
        CODES
            .iter()
            .map(|(c, f)| if self.static_flags.contains(*f) { *c } else { '-' })
            .collect()
    }
}

/// Parameters for pushing an animation onto a queue.
#[derive(Clone, Debug)]
pub struct AnimationPush {
    pub clip: ClipId,
    pub static_flags: StaticFlags,
    pub transition_time: f32,
    pub playback_weight: f32,
    pub playback_scale: f32,
    /// Keytime for START_AT_KEYTIME, entire-clip normalized.
    pub start_time: f32,
    pub user_token: u32,
}

impl AnimationPush {
    pub fn new(clip: ClipId) -> Self {
        Self {
            clip,
            static_flags: StaticFlags(0),
            transition_time: 0.15,
            playback_weight: 1.0,
            playback_scale: 1.0,
            start_time: 0.0,
            user_token: 0,
        }
    }

    pub fn with_flags(mut self, flags: StaticFlags) -> Self {
        self.static_flags = flags;
        self
    }

    pub fn with_transition_time(mut self, seconds: f32) -> Self {
        self.transition_time = seconds;
        self
    }
}

/// An animation event crossed by the playhead this frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FiredEvent {
    pub clip: ClipId,
    pub name: String,
    /// Entire-clip normalized time of the event.
    pub time: f32,
    pub queue_index: u32,
    pub priority: f32,
}

/// Per-frame result of updating one layer's queue.
#[derive(Debug, Default)]
pub struct LayerUpdate {
    /// False when the layer contributes nothing this frame.
    pub active: bool,
    pub force_skeleton_update: bool,
    pub events: Vec<FiredEvent>,
}

#[derive(Copy, Clone, Debug)]
struct FadeOut {
    remaining: f32,
    duration: f32,
}

/// The ordered queue of one virtual layer, plus the layer-wide scalars.
pub struct TransitionQueue {
    animations: Vec<Animation>,
    pub playback_scale: f32,
    /// Manual intensity multiplier applied by the compositor.
    pub blend_weight: f32,
    /// Layer crossfade progress; driven to 0 by a fade-out.
    pub transition_weight: f32,
    fade_out: Option<FadeOut>,
}

impl Default for TransitionQueue {
    fn default() -> Self {
        Self {
            animations: Vec::new(),
            playback_scale: 1.0,
            blend_weight: 1.0,
            transition_weight: 1.0,
            fade_out: None,
        }
    }
}

/// The transition-weight shaping curve. Applied after recentering around
/// 0.5 and followed by renormalization, it turns linear crossfades into
/// smooth S-curves. Its exact constants are load-bearing for shipped
/// content; see DESIGN.md before touching them.
#[inline]
pub fn smooth_transition_weight(w: f32) -> f32 {
    let x = w - 0.5;
    x / (0.5 + 2.0 * x * x) + 0.5
}

impl TransitionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn animation_count(&self) -> usize {
        self.animations.len()
    }

    /// Out-of-range access returns a shared inert entry instead of failing.
    pub fn animation(&self, index: usize) -> &Animation {
        self.animations.get(index).unwrap_or(&DEFAULT_ANIMATION)
    }

    pub fn animation_mut(&mut self, index: usize) -> Option<&mut Animation> {
        self.animations.get_mut(index)
    }

    /// Append an animation. Returns false (logged) when the clip is
    /// unknown, a restart is refused, or the sampler pool is exhausted.
    pub fn push_animation(
        &mut self,
        push: AnimationPush,
        store: &ClipStore,
        pool: &mut SamplerPool,
    ) -> bool {
        let Some(header) = store.header(push.clip) else {
            log::error!("push of unknown clip {:?}", push.clip);
            return false;
        };

        if let Some(last) = self.animations.last() {
            let still_running = !last.dyn_flags[0].contains(DynFlags::REMOVE_FROM_QUEUE);
            if still_running
                && last.clip == push.clip
                && !push.static_flags.contains(StaticFlags::ALLOW_RESTART)
            {
                log::debug!("refusing restart of '{}' without ALLOW_RESTART", header.name);
                return false;
            }
        }

        let sampler = match header.kind {
            AssetKind::Clip => None,
            AssetKind::BlendSpace => {
                let Some(def) = store.blend_space(push.clip) else {
                    log::error!("blend-space clip '{}' has no definition", header.name);
                    return false;
                };
                match pool.acquire() {
                    Some(handle) => {
                        pool.get_mut(handle).bind(push.clip, def);
                        Some(handle)
                    }
                    None => {
                        log::error!(
                            "parametric sampler pool exhausted, cannot start '{}'",
                            header.name
                        );
                        return false;
                    }
                }
            }
        };

        // Streaming reference counts: group examples count individually.
        store.retain(push.clip);
        if let Some(def) = store.blend_space(push.clip) {
            for ex in &def.examples {
                store.retain(ex.clip);
            }
        }

        // A forced transition strips the delay gates off everything already
        // queued so the new entry can take over without waiting.
        if push.static_flags.contains(StaticFlags::FORCE_TRANSITION) {
            for anim in &mut self.animations {
                anim.static_flags.remove(
                    StaticFlags::START_AT_KEYTIME
                        | StaticFlags::START_AFTER
                        | StaticFlags::IDLE_TO_MOVE,
                );
            }
        }

        let mut entry = Animation {
            clip: push.clip,
            static_flags: push.static_flags,
            transition_time: push.transition_time,
            playback_weight: push.playback_weight,
            playback_scale: push.playback_scale,
            start_time: push.start_time,
            user_token: push.user_token,
            sampler,
            ..DEFAULT_ANIMATION
        };

        // Transition time-warping: continuing the same clip inherits the
        // predecessor's time and segment state instead of restarting at 0.
        if let Some(prev) = self.animations.last() {
            let warped = prev.has_static_flag(StaticFlags::TRANSITION_TIMEWARP)
                && entry.has_static_flag(StaticFlags::TRANSITION_TIMEWARP)
                && prev.clip == entry.clip;
            if warped {
                entry.anim_time = prev.anim_time;
                entry.anim_time_prev = prev.anim_time_prev;
                entry.segment = prev.segment;
                entry.segment_prev = prev.segment_prev;
                if let (Some(dst), Some(src)) = (entry.sampler, prev.sampler) {
                    let src_state = pool.get(src).clone();
                    let dst_state = pool.get_mut(dst);
                    for i in 0..src_state.num_examples() {
                        for idx in 0..2 {
                            dst_state.set_segment_counter(
                                idx,
                                i,
                                src_state.segment_counter(idx, i),
                            );
                        }
                    }
                }
            }
        }

        self.animations.push(entry);
        true
    }

    /// Remove one entry. Active entries are only removed when forced.
    pub fn remove_animation(
        &mut self,
        index: usize,
        force: bool,
        store: &ClipStore,
        pool: &mut SamplerPool,
    ) -> bool {
        if index >= self.animations.len() {
            return false;
        }
        if self.animations[index].is_activated() && !force {
            return false;
        }
        let entry = self.animations.remove(index);
        Self::release_entry(&entry, store, pool);
        true
    }

    /// Drop every entry, releasing pooled samplers and clip references.
    pub fn clear(&mut self, store: &ClipStore, pool: &mut SamplerPool) {
        for entry in self.animations.drain(..) {
            Self::release_entry(&entry, store, pool);
        }
    }

    /// Begin a layer-wide fade; once the weight reaches zero the queue is
    /// cleared.
    pub fn stop_with_fade(&mut self, seconds: f32) {
        let duration = seconds.max(0.0001);
        self.fade_out = Some(FadeOut {
            remaining: duration,
            duration,
        });
    }

    fn release_entry(entry: &Animation, store: &ClipStore, pool: &mut SamplerPool) {
        if let Some(handle) = entry.sampler {
            pool.release(handle);
        }
        store.release(entry.clip);
        if let Some(def) = store.blend_space(entry.clip) {
            for ex in &def.examples {
                store.release(ex.clip);
            }
        }
    }

    /// Forward a desired motion parameter to every parametric entry.
    pub fn set_desired_param(
        &self,
        param: crate::blendspace::MotionParam,
        value: f32,
        pool: &mut SamplerPool,
    ) {
        for anim in &self.animations {
            if let Some(handle) = anim.sampler {
                pool.get_mut(handle).set_desired_param(param, value);
            }
        }
    }

    // ----------------------------------------------------------------- //
    // per-frame update                                                   //
    // ----------------------------------------------------------------- //

    /// Advance the whole queue by `dt`. This is the blend manager: it
    /// activates entries, distributes transition weights, updates times
    /// and segment counters per evaluation index, fires events and evicts
    /// finished entries.
    pub fn update(
        &mut self,
        dt: f32,
        layer: usize,
        max_exec_queue: usize,
        store: &ClipStore,
        pool: &mut SamplerPool,
    ) -> LayerUpdate {
        let mut out = LayerUpdate::default();

        if let Some(mut fade) = self.fade_out {
            fade.remaining -= dt;
            if fade.remaining <= 0.0 {
                self.fade_out = None;
                self.transition_weight = 1.0;
                self.clear(store, pool);
                return out;
            }
            self.transition_weight = fade.remaining / fade.duration;
            self.fade_out = Some(fade);
        }

        if self.animations.is_empty() {
            return out;
        }

        // The front entry must be resident before the layer contributes.
        if !self.animations[0].is_activated() {
            if self.is_animation_in_memory(0, store, pool) {
                self.animations[0].dyn_flags[0].insert(DynFlags::ACTIVATED);
            } else {
                return out;
            }
        }

        let queue_len = self.animations.len();
        let mut max_active = max_exec_queue.min(queue_len);
        let activated = self.evaluate_transition_flags(max_active, store, pool);
        max_active = max_active.min(activated);

        self.update_transition_time(max_active, dt);
        self.adjust_transition_weights(max_active);

        let total: f32 = self.animations[..max_active]
            .iter()
            .map(|a| a.transition_weight)
            .sum();
        if (total - 1.0).abs() > 0.01 {
            log::error!("layer {layer}: transition weights sum to {total}, skipping update");
            return out;
        }

        out.force_skeleton_update = self.animations[..max_active]
            .iter()
            .any(|a| a.has_static_flag(StaticFlags::FORCE_SKELETON_UPDATE));

        self.update_parameters(max_active, dt, store, pool);
        self.adjust_time_for_timewarped(max_active, pool);

        let mut request_fadeout = false;
        for a in 0..max_active {
            let max_segments = Self::max_segments(&self.animations[a], store, pool);
            request_fadeout |= Self::update_animation_time(
                &mut self.animations[a],
                a,
                0,
                queue_len,
                layer,
                max_segments,
                pool,
            );
            Self::collect_events(&self.animations[a], a, max_active, store, &mut out.events);
            self.animations[a].dyn_flags[0].insert(DynFlags::EVENTS_EVALUATED_ONCE);

            // Mirror the current index into the "next" one and advance it,
            // so downstream evaluation can read both this frame's and the
            // following frame's sampling state.
            let anim = &mut self.animations[a];
            anim.segment[1] = anim.segment[0];
            anim.anim_time[1] = anim.anim_time[0];
            if let Some(handle) = anim.sampler {
                pool.get_mut(handle).mirror_index(0, 1);
            }
            request_fadeout |= Self::update_animation_time(
                &mut self.animations[a],
                a,
                1,
                queue_len,
                layer,
                max_segments,
                pool,
            );
        }

        if request_fadeout {
            self.stop_with_fade(0.5);
        }

        // Evict finished front entries whose weight has drained.
        while let Some(front) = self.animations.first() {
            if front.dyn_flags[0].contains(DynFlags::REMOVE_FROM_QUEUE) {
                let entry = self.animations.remove(0);
                Self::release_entry(&entry, store, pool);
            } else {
                break;
            }
        }

        out.active = !self.animations.is_empty();
        out
    }

    /// Is the entry's clip (or every blend-space example) resident?
    fn is_animation_in_memory(&self, index: usize, store: &ClipStore, pool: &SamplerPool) -> bool {
        let anim = &self.animations[index];
        match anim.sampler {
            None => store.is_in_memory(anim.clip),
            Some(handle) => {
                let state = pool.get(handle);
                (0..state.num_examples()).all(|i| store.is_in_memory(state.example_clip(i)))
            }
        }
    }

    /// Walk the not-yet-activated suffix and resolve delay gates. Returns
    /// the length of the activated prefix; nothing past the first blocked
    /// entry can activate this frame.
    fn evaluate_transition_flags(
        &mut self,
        num: usize,
        store: &ClipStore,
        pool: &SamplerPool,
    ) -> usize {
        let mut aq = 1;
        while aq < num {
            if self.animations[aq].is_activated() {
                aq += 1;
                continue;
            }

            let prev = self.animations[aq - 1];
            let cur = self.animations[aq];

            let is_looping = prev.has_static_flag(StaticFlags::LOOP);
            let start_at_keytime = cur.has_static_flag(StaticFlags::START_AT_KEYTIME);
            // A looping predecessor never "finishes", so start-after would
            // hang the queue; start immediately instead.
            let start_after = cur.has_static_flag(StaticFlags::START_AFTER) && !is_looping;
            let idle_to_move = cur.has_static_flag(StaticFlags::IDLE_TO_MOVE)
                && prev.sampler.is_some_and(|h| {
                    store
                        .blend_space(pool.get(h).group())
                        .is_some_and(|def| def.idle_to_move)
                });
            let in_memory = self.is_animation_in_memory(aq, store, pool);

            if start_at_keytime || start_after || idle_to_move || !in_memory {
                if !in_memory {
                    break; // impossible to activate this frame
                }
                let mut activate = false;
                if start_at_keytime {
                    let at_new = self.animation_normalized_time(aq - 1, store, pool);
                    let at_old = at_new - 0.000001;
                    if at_old < cur.start_time && cur.start_time < at_new {
                        activate = true;
                    }
                }
                if start_after && prev.in_repeat() {
                    activate = true;
                }
                if idle_to_move {
                    activate |= Self::idle_to_move_ready(&prev, pool);
                }
                if !activate {
                    break; // everything behind stays inactive too
                }
                self.animations[aq].dyn_flags[0].insert(DynFlags::ACTIVATED);
            } else {
                // No delay gate: the transition starts immediately.
                self.animations[aq].dyn_flags[0].insert(DynFlags::ACTIVATED);
            }
            aq += 1;
        }
        aq
    }

    /// Idle-to-move gating from the predecessor's turn parameter: turning
    /// left starts once the start segment is done, turning right also
    /// waits for the second half of the cycle.
    fn idle_to_move_ready(prev: &Animation, pool: &SamplerPool) -> bool {
        let Some(handle) = prev.sampler else {
            return false;
        };
        let state = pool.get(handle);
        let Some(dim) = state.dimension_of(crate::blendspace::MotionParam::TurnAngle) else {
            log::error!("idle-to-move blend space without a turn-angle dimension");
            return false;
        };
        let seg_count = state.segment_counter(0, 0);
        let turn = state.desired(dim);
        if turn > 0.0 {
            seg_count != 0
        } else {
            seg_count != 0 && prev.anim_time[0] > 0.50
        }
    }

    /// Advance crossfade priorities. The front entry is always fully
    /// committed; followers ramp linearly over their transition time.
    fn update_transition_time(&mut self, num: usize, dt: f32) {
        if num == 0 {
            return;
        }
        self.animations[0].transition_priority = 1.0;
        for anim in self.animations[1..num].iter_mut() {
            if anim.transition_time <= 0.0 {
                anim.transition_priority = 1.0;
            } else {
                anim.transition_priority =
                    (anim.transition_priority + dt / anim.transition_time).min(1.0);
            }
        }
    }

    /// Distribute the layer's unit weight across the active prefix: the
    /// newest entry claims its priority, each older entry claims its
    /// priority from what remains, and the front entry absorbs the rest.
    /// The shaped weights are renormalized so the sum stays exactly 1.
    fn adjust_transition_weights(&mut self, num: usize) {
        if num == 0 {
            return;
        }
        let mut raw = [0.0f32; MAX_EXEC_QUEUE];
        let mut residual = 1.0f32;
        for i in (1..num).rev() {
            let p = self.animations[i].transition_priority.clamp(0.0, 1.0);
            raw[i] = p * residual;
            residual *= 1.0 - p;
        }
        raw[0] = residual;

        let mut sum = 0.0f32;
        for w in raw[..num].iter_mut() {
            *w = smooth_transition_weight(*w);
            sum += *w;
        }
        if sum > 0.0 {
            for (anim, w) in self.animations[..num].iter_mut().zip(&raw) {
                anim.transition_weight = w / sum;
            }
        }
    }

    /// Per-entry delta times and expected durations for this frame.
    fn update_parameters(&mut self, num: usize, dt: f32, store: &ClipStore, pool: &mut SamplerPool) {
        for anim in self.animations[..num].iter_mut() {
            match anim.sampler {
                Some(handle) => {
                    let out = pool
                        .get_mut(handle)
                        .parameterize(store, dt, self.playback_scale);
                    anim.current_delta_time = out.delta_time * anim.playback_scale;
                    anim.expected_segment_duration = out.segment_duration.max(0.0001);
                    anim.expected_total_duration = out.total_duration.max(0.0001);
                }
                None => {
                    let Some(header) = store.header(anim.clip) else {
                        continue;
                    };
                    if header.kind != AssetKind::Clip {
                        continue;
                    }
                    let seg_duration = header.segment_duration(usize::from(anim.segment[0]));
                    anim.expected_segment_duration = seg_duration;
                    anim.expected_total_duration = header.total_duration.max(0.0001);
                    anim.current_delta_time =
                        (anim.playback_scale * self.playback_scale * dt) / seg_duration;
                }
            }
        }
    }

    /// Time-warped chains share their sampling state: a follower on the
    /// same clip with the warp flag keeps continuing the predecessor.
    fn adjust_time_for_timewarped(&mut self, num: usize, pool: &mut SamplerPool) {
        for i in 1..num {
            let (head, tail) = self.animations.split_at_mut(i);
            let prev = &head[i - 1];
            let cur = &mut tail[0];
            let warped = prev.has_static_flag(StaticFlags::TRANSITION_TIMEWARP)
                && cur.has_static_flag(StaticFlags::TRANSITION_TIMEWARP)
                && prev.clip == cur.clip;
            if !warped {
                continue;
            }
            cur.anim_time = prev.anim_time;
            cur.anim_time_prev = prev.anim_time_prev;
            cur.segment = prev.segment;
            cur.segment_prev = prev.segment_prev;
            cur.current_delta_time = prev.current_delta_time;
            if let (Some(dst), Some(src)) = (cur.sampler, prev.sampler) {
                let src_state = pool.get(src).clone();
                let dst_state = pool.get_mut(dst);
                for e in 0..src_state.num_examples() {
                    for idx in 0..2 {
                        dst_state.set_segment_counter(idx, e, src_state.segment_counter(idx, e));
                    }
                }
            }
        }
    }

    /// Largest segment count across the entry's weighted examples.
    fn max_segments(anim: &Animation, store: &ClipStore, pool: &SamplerPool) -> usize {
        let mut max_segments = 1usize;
        match anim.sampler {
            Some(handle) => {
                let state = pool.get(handle);
                for i in 0..state.num_examples() {
                    if state.weight(i).abs() < 0.001 {
                        continue;
                    }
                    if let Some(h) = store.header(state.example_clip(i)) {
                        max_segments = max_segments.max(h.segment_count());
                    }
                }
            }
            None => {
                if let Some(h) = store.header(anim.clip) {
                    max_segments = max_segments.max(h.segment_count());
                }
            }
        }
        max_segments
    }

    /// Advance one entry's time for one evaluation index: wrap handling,
    /// segment counters, end-of-cycle flags, repeat/removal transitions.
    /// Returns true when the layer should auto-fade (repeat-last-key +
    /// fadeout entry finished on an upper layer).
    fn update_animation_time(
        anim: &mut Animation,
        index_in_queue: usize,
        idx: usize,
        queue_len: usize,
        layer: usize,
        max_segments: usize,
        pool: &mut SamplerPool,
    ) -> bool {
        let mut request_fadeout = false;

        if anim.has_static_flag(StaticFlags::MANUAL_UPDATE) {
            anim.current_delta_time = 0.0;
            if anim.transition_weight == 0.0 && index_in_queue == 0 {
                anim.dyn_flags[idx].insert(DynFlags::REMOVE_FROM_QUEUE);
            }
            return false;
        }

        let loop_animation = anim.has_static_flag(StaticFlags::LOOP);
        // looping wins over repeat-last-key
        let repeat_last_key = anim.has_static_flag(StaticFlags::REPEAT_LAST_KEY) && !loop_animation;

        // negative delta time is not allowed
        anim.current_delta_time = anim.current_delta_time.max(0.0);

        if let Some(handle) = anim.sampler {
            pool.get_mut(handle).latch_segment_counters(idx);
        }
        anim.segment_prev[idx] = anim.segment[idx];
        anim.anim_time_prev[idx] = anim.anim_time[idx];
        anim.anim_time[idx] += anim.current_delta_time;

        anim.dyn_flags[idx].remove(DynFlags::END_OF_CYCLE);
        anim.dyn_flags[idx].remove(DynFlags::NEGATIVE_EOC);
        anim.dyn_flags[idx].remove(DynFlags::LOOPED_THIS_UPDATE);

        let num_loops = anim.anim_time[idx] as i32;
        if num_loops > 0 {
            anim.anim_time[idx] -= num_loops as f32;
            anim.dyn_flags[idx].insert(DynFlags::END_OF_CYCLE);
            anim.dyn_flags[idx].insert(DynFlags::LOOPED);

            if !loop_animation {
                match anim.sampler {
                    Some(handle) => {
                        let state = pool.get_mut(handle);
                        let mut clamped = 0usize;
                        let n = state.num_examples();
                        for i in 0..n {
                            let next = state.segment_counter(idx, i) + 1;
                            if usize::from(next) >= max_segments {
                                state.set_segment_counter(idx, i, (max_segments - 1) as u8);
                                clamped += 1;
                            } else {
                                state.set_segment_counter(idx, i, next);
                            }
                        }
                        if clamped == n {
                            anim.dyn_flags[idx].remove(DynFlags::END_OF_CYCLE);
                            anim.anim_time[idx] = 1.0;
                            if repeat_last_key {
                                anim.dyn_flags[idx].insert(DynFlags::REPEAT);
                            } else {
                                anim.dyn_flags[idx].insert(DynFlags::REMOVE_FROM_QUEUE);
                            }
                        }
                    }
                    None => {
                        let next = usize::from(anim.segment[idx]) + 1;
                        if next >= max_segments {
                            anim.segment[idx] = (max_segments - 1) as u8;
                            anim.anim_time[idx] = 1.0;
                            anim.dyn_flags[idx].remove(DynFlags::END_OF_CYCLE);
                            if repeat_last_key {
                                anim.dyn_flags[idx].insert(DynFlags::REPEAT);
                            } else {
                                anim.dyn_flags[idx].insert(DynFlags::REMOVE_FROM_QUEUE);
                            }
                        } else {
                            anim.segment[idx] = next as u8;
                        }
                    }
                }

                // Automatic fade-out for a finished one-shot on an upper
                // layer that holds its last key.
                if queue_len == 1
                    && layer > 0
                    && anim.has_static_flag(StaticFlags::REPEAT_LAST_KEY)
                    && anim.has_static_flag(StaticFlags::FADEOUT_ON_END)
                {
                    request_fadeout = true;
                }
            }

            if loop_animation && !repeat_last_key {
                match anim.sampler {
                    Some(handle) => {
                        let state = pool.get_mut(handle);
                        for i in 0..state.num_examples() {
                            let next = usize::from(state.segment_counter(idx, i)) + 1;
                            let wrapped = if next >= max_segments { 0 } else { next as u8 };
                            state.set_segment_counter(idx, i, wrapped);
                        }
                        anim.dyn_flags[idx].insert(DynFlags::LOOPED_THIS_UPDATE);
                    }
                    None => {
                        let next = usize::from(anim.segment[idx]) + 1;
                        if next >= max_segments {
                            anim.segment[idx] = 0;
                            anim.dyn_flags[idx].insert(DynFlags::LOOPED_THIS_UPDATE);
                        } else {
                            anim.segment[idx] = next as u8;
                        }
                    }
                }
            }
        }

        if anim.transition_weight == 0.0 && index_in_queue == 0 {
            anim.dyn_flags[idx].insert(DynFlags::REMOVE_FROM_QUEUE);
        }

        debug_assert!(anim.anim_time[idx] >= 0.0 && anim.anim_time[idx] <= 1.0);
        request_fadeout
    }

    /// Report events whose entire-clip time was crossed by index 0 this
    /// frame. A looped update fires the wrap in two ranges; stationary
    /// time fires nothing (a key exactly at the hold point would otherwise
    /// fire every frame).
    fn collect_events(
        anim: &Animation,
        index_in_queue: usize,
        active: usize,
        store: &ClipStore,
        events: &mut Vec<FiredEvent>,
    ) {
        let Some(header) = store.header(anim.clip) else {
            return;
        };
        if header.events.is_empty() {
            return;
        }

        let looped = anim.dyn_flags[0].contains(DynFlags::LOOPED_THIS_UPDATE);
        let seg_old = anim.segment_prev[0];
        let seg_new = anim.segment[0];
        let stationary =
            anim.anim_time_prev[0] == anim.anim_time[0] && seg_old == seg_new && !looped;
        if stationary {
            return;
        }

        // Entire-clip normalized range covered this frame. Parametric
        // groups keep their events on the group header, whose time base is
        // the blended cycle itself.
        let (old_time, new_time) = if anim.sampler.is_some() {
            (anim.anim_time_prev[0], anim.anim_time[0])
        } else {
            (
                header.entire_clip_time(usize::from(seg_old), anim.anim_time_prev[0]),
                header.entire_clip_time(usize::from(seg_new), anim.anim_time[0]),
            )
        };

        let inclusive_start = !anim.dyn_flags[0].contains(DynFlags::EVENTS_EVALUATED_ONCE);
        let mut fire_range = |lo: f32, hi: f32, inclusive: bool| {
            for ev in &header.events {
                let hit = (lo < ev.time && ev.time <= hi) || (inclusive && ev.time == lo);
                if hit {
                    events.push(FiredEvent {
                        clip: anim.clip,
                        name: ev.name.clone(),
                        time: ev.time,
                        queue_index: (active - 1 - index_in_queue) as u32,
                        priority: anim.transition_priority,
                    });
                }
            }
        };

        if looped {
            if inclusive_start || old_time < 1.0 {
                fire_range(old_time, 1.0, inclusive_start);
            }
            fire_range(0.0, new_time, true);
        } else {
            fire_range(old_time, new_time, inclusive_start);
        }
    }

    // ----------------------------------------------------------------- //
    // entire-clip time mapping                                           //
    // ----------------------------------------------------------------- //

    /// Normalized time over the entire clip for one entry, mapped through
    /// the segment table. Parametric entries use the example with the most
    /// segments among those currently weighted.
    pub fn animation_normalized_time(
        &self,
        index: usize,
        store: &ClipStore,
        pool: &SamplerPool,
    ) -> f32 {
        let anim = self.animation(index);
        match anim.sampler {
            None => {
                let Some(header) = store.header(anim.clip) else {
                    return 0.0;
                };
                if header.segment_count() <= 1 {
                    return anim.anim_time[0];
                }
                header.entire_clip_time(usize::from(anim.segment[0]), anim.anim_time[0])
            }
            Some(handle) => {
                let state = pool.get(handle);
                let mut best: Option<(usize, ClipId, u8)> = None;
                let mut weight_sum = 0.0f32;
                for i in 0..state.num_examples() {
                    weight_sum += state.weight(i);
                    if state.weight(i) == 0.0 {
                        continue;
                    }
                    let clip = state.example_clip(i);
                    let Some(header) = store.header(clip) else {
                        continue;
                    };
                    let sc = header.segment_count();
                    if best.map_or(true, |(max_sc, _, _)| sc > max_sc) {
                        best = Some((sc, clip, state.segment_counter(0, i)));
                    }
                }
                if weight_sum == 0.0 {
                    return 0.0;
                }
                match best {
                    Some((_, clip, seg)) => store
                        .header(clip)
                        .map(|h| h.entire_clip_time(usize::from(seg), anim.anim_time[0]))
                        .unwrap_or(0.0),
                    None => 0.0,
                }
            }
        }
    }

    /// Seek one entry to an entire-clip normalized time, updating segment
    /// indices (and, for parametric entries, every example counter).
    pub fn set_animation_normalized_time(
        &mut self,
        index: usize,
        time: f32,
        store: &ClipStore,
        pool: &mut SamplerPool,
    ) {
        let time = time.clamp(0.0, 0.99999);
        let Some(anim) = self.animations.get_mut(index) else {
            return;
        };
        match anim.sampler {
            None => {
                let Some(header) = store.header(anim.clip) else {
                    anim.anim_time[0] = time;
                    return;
                };
                let old_entire =
                    header.entire_clip_time(usize::from(anim.segment[0]), anim.anim_time[0]);
                let (seg, local) = header.segment_for_time(time);
                if seg as u8 != anim.segment[0] {
                    anim.dyn_flags[0].insert(DynFlags::END_OF_CYCLE);
                }
                if time < old_entire {
                    anim.dyn_flags[0].insert(DynFlags::NEGATIVE_EOC);
                }
                anim.segment[0] = seg as u8;
                anim.anim_time[0] = local;
            }
            Some(handle) => {
                // Resolve the segment in the widest example, then wrap every
                // example's counter into its own segment range.
                let state = pool.get_mut(handle);
                let mut widest: Option<(usize, ClipId)> = None;
                for i in 0..state.num_examples() {
                    if state.weight(i) == 0.0 {
                        continue;
                    }
                    let clip = state.example_clip(i);
                    if let Some(h) = store.header(clip) {
                        let sc = h.segment_count();
                        if widest.map_or(true, |(max_sc, _)| sc > max_sc) {
                            widest = Some((sc, clip));
                        }
                    }
                }
                let Some((_, widest_clip)) = widest else {
                    return; // all weights zero; seeking is not possible
                };
                let Some(header) = store.header(widest_clip) else {
                    return;
                };
                let (seg, local) = header.segment_for_time(time);
                for i in 0..state.num_examples() {
                    let sc = store
                        .header(state.example_clip(i))
                        .map(|h| h.segment_count())
                        .unwrap_or(1)
                        .max(1);
                    let wrapped = (seg % sc) as u8;
                    state.set_segment_counter(0, i, wrapped);
                    state.set_segment_counter(1, i, wrapped);
                }
                anim.anim_time[0] = local;
            }
        }
    }

    /// Serialization view of the queue entries.
    pub fn entries(&self) -> &[Animation] {
        &self.animations
    }
}

/// Euclid's algorithm.
fn greatest_common_divisor(a: usize, b: usize) -> usize {
    let (mut smallest, mut largest) = (a.min(b), a.max(b));
    while smallest != 0 {
        let rem = largest % smallest;
        largest = smallest;
        smallest = rem;
    }
    largest
}

fn least_common_multiple(counts: &[usize]) -> usize {
    let mut result = 1usize;
    for &c in counts {
        if c <= 1 {
            continue;
        }
        result *= c / greatest_common_divisor(result, c);
    }
    result
}

/// Duration of one full blend-space cycle: examples with different segment
/// counts only line up again after the least common multiple of them.
pub fn complete_blend_space_duration(
    anim: &Animation,
    store: &ClipStore,
    pool: &SamplerPool,
) -> f32 {
    let Some(handle) = anim.sampler else {
        return anim.expected_total_duration;
    };
    let state = pool.get(handle);

    let mut counts = Vec::new();
    for i in 0..state.num_examples() {
        if state.weight(i) == 0.0 {
            continue;
        }
        if let Some(h) = store.header(state.example_clip(i)) {
            counts.push(h.segment_count());
        }
    }
    let total_segments = least_common_multiple(&counts);

    let mut duration = 0.0f32;
    let mut count_iter = counts.iter();
    for i in 0..state.num_examples() {
        if state.weight(i) == 0.0 {
            continue;
        }
        let Some(header) = store.header(state.example_clip(i)) else {
            continue;
        };
        let segments = *count_iter.next().unwrap_or(&1);
        let repetitions = (total_segments / segments.max(1)) as f32;
        for s in 0..segments {
            duration += header.segment_duration(s) * state.weight(i) * repetitions;
        }
    }
    duration
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_curve_pins_known_values() {
        // end points and midpoint are fixed points of the curve
        assert!((smooth_transition_weight(0.0) - 0.0).abs() < 1e-6);
        assert!((smooth_transition_weight(0.5) - 0.5).abs() < 1e-6);
        assert!((smooth_transition_weight(1.0) - 1.0).abs() < 1e-6);
        // the pair the crossfade scenario is calibrated against
        assert!((smooth_transition_weight(1.0 / 3.0) - 0.2).abs() < 1e-4);
        assert!((smooth_transition_weight(2.0 / 3.0) - 0.8).abs() < 1e-4);
    }

    #[test]
    fn lcm_of_segment_counts() {
        assert_eq!(least_common_multiple(&[2, 3]), 6);
        assert_eq!(least_common_multiple(&[1, 1]), 1);
        assert_eq!(least_common_multiple(&[4, 6, 2]), 12);
    }

    #[test]
    fn flag_string_marks_set_flags() {
        let mut anim = DEFAULT_ANIMATION;
        anim.static_flags = StaticFlags::LOOP | StaticFlags::TRANSITION_TIMEWARP;
        let s = anim.flags_string();
        assert!(s.contains('L'));
        assert!(s.contains('T'));
        assert!(!s.contains('M'));
    }
}
