//! Per-animation parametric sampler state and the fixed-size pool it
//! lives in.
//!
//! A sampler is attached to a queue entry whose clip resolves to a
//! blend-space group. Each frame `parameterize` turns the desired motion
//! parameters into per-example blend weights and a time-warped normalized
//! delta time. Segment counters are double-buffered (current/next
//! evaluation index, plus previous-frame copies) so downstream blending
//! can be delta-time correct across segment boundaries.
//!
//! Pool discipline: acquire/release happen only from the main thread
//! during transition-queue mutation; workers read acquired state during
//! Execute and never allocate.

use crate::blendspace::{self, BlendSpaceDef, MotionParam, MAX_BLEND_EXAMPLES};
use crate::clips::ClipStore;
use crate::ids::{ClipId, SamplerHandle};
use glam::{Vec2, Vec3};

/// Raw weight sums drifting past this are a content data error.
const WEIGHT_SUM_DATA_ERROR: f32 = 0.09;
/// Smaller drift worth surfacing while debugging content.
const WEIGHT_SUM_DRIFT: f32 = 0.005;

#[derive(Clone, Debug)]
pub struct ParametricSamplerState {
    group: ClipId,
    num_examples: u32,
    clip_ids: [ClipId; MAX_BLEND_EXAMPLES],
    blend_weights: [f32; MAX_BLEND_EXAMPLES],
    playback_scales: [f32; MAX_BLEND_EXAMPLES],
    /// Segment counters per evaluation index (current/next).
    segment: [[u8; MAX_BLEND_EXAMPLES]; 2],
    segment_prev: [[u8; MAX_BLEND_EXAMPLES]; 2],
    dimensions: u32,
    params: [Option<MotionParam>; 4],
    desired: [f32; 4],
}

impl Default for ParametricSamplerState {
    fn default() -> Self {
        Self {
            group: ClipId(u32::MAX),
            num_examples: 0,
            clip_ids: [ClipId(0); MAX_BLEND_EXAMPLES],
            blend_weights: [0.0; MAX_BLEND_EXAMPLES],
            playback_scales: [1.0; MAX_BLEND_EXAMPLES],
            segment: [[0; MAX_BLEND_EXAMPLES]; 2],
            segment_prev: [[0; MAX_BLEND_EXAMPLES]; 2],
            dimensions: 0,
            params: [None; 4],
            desired: [0.0; 4],
        }
    }
}

/// Blended durations produced alongside the weights.
#[derive(Copy, Clone, Debug, Default)]
pub struct ParameterizeOutput {
    /// Time-warped normalized delta time for this frame.
    pub delta_time: f32,
    /// Expected duration of the current blended segment, seconds.
    pub segment_duration: f32,
    /// Expected duration of the entire blended clip, seconds.
    pub total_duration: f32,
}

impl ParametricSamplerState {
    /// Rebind this slot to a blend-space group. Called on acquire.
    pub fn bind(&mut self, group: ClipId, def: &BlendSpaceDef) {
        *self = Self::default();
        self.group = group;
        self.num_examples = def.examples.len().min(MAX_BLEND_EXAMPLES) as u32;
        for (i, ex) in def.examples.iter().take(MAX_BLEND_EXAMPLES).enumerate() {
            self.clip_ids[i] = ex.clip;
            self.playback_scales[i] = ex.playback_scale;
        }
        self.dimensions = def.dimensions.len() as u32;
        for (d, dim) in def.dimensions.iter().take(4).enumerate() {
            self.params[d] = Some(dim.param);
        }
    }

    #[inline]
    pub fn group(&self) -> ClipId {
        self.group
    }

    #[inline]
    pub fn num_examples(&self) -> usize {
        self.num_examples as usize
    }

    #[inline]
    pub fn example_clip(&self, i: usize) -> ClipId {
        self.clip_ids[i]
    }

    #[inline]
    pub fn weight(&self, i: usize) -> f32 {
        self.blend_weights[i]
    }

    #[inline]
    pub fn segment_counter(&self, idx: usize, i: usize) -> u8 {
        self.segment[idx][i]
    }

    #[inline]
    pub fn set_segment_counter(&mut self, idx: usize, i: usize, value: u8) {
        self.segment[idx][i] = value;
    }

    #[inline]
    pub fn segment_counter_prev(&self, idx: usize, i: usize) -> u8 {
        self.segment_prev[idx][i]
    }

    /// Latch current counters into the previous-frame copies before a time
    /// update advances them.
    pub fn latch_segment_counters(&mut self, idx: usize) {
        for i in 0..self.num_examples as usize {
            self.segment_prev[idx][i] = self.segment[idx][i];
        }
    }

    /// Copy the current evaluation index into the next one, as the time
    /// update does for the entry's own time and segment.
    pub fn mirror_index(&mut self, from: usize, to: usize) {
        self.segment[to] = self.segment[from];
        self.segment_prev[to] = self.segment_prev[from];
    }

    /// Which named parameter a dimension reads, if this group uses `param`.
    pub fn dimension_of(&self, param: MotionParam) -> Option<usize> {
        self.params
            .iter()
            .take(self.dimensions as usize)
            .position(|p| *p == Some(param))
    }

    /// Desired motion parameter, ignored unless some dimension reads it.
    pub fn set_desired_param(&mut self, param: MotionParam, value: f32) {
        if let Some(d) = self.dimension_of(param) {
            self.desired[d] = value;
        }
    }

    #[inline]
    pub fn desired(&self, dim: usize) -> f32 {
        self.desired[dim]
    }

    /// Compute this frame's blend weights and the time-warped delta.
    ///
    /// Never fails: malformed layouts are logged and evaluation degrades to
    /// the first example, because this runs on the per-frame hot path.
    pub fn parameterize(
        &mut self,
        store: &ClipStore,
        frame_dt: f32,
        playback_scale: f32,
    ) -> ParameterizeOutput {
        let mut weights = [0.0f32; MAX_BLEND_EXAMPLES];
        let n = self.num_examples as usize;

        let group_name = store
            .header(self.group)
            .map(|h| h.name.as_str())
            .unwrap_or("<missing>");

        match store.blend_space(self.group) {
            Some(def) => {
                let desired = self.clamped_desired(def);
                match self.dimensions {
                    1 => {
                        blendspace::weights_1d(def, desired.x, &mut weights[..n]);
                    }
                    2 => {
                        blendspace::weights_2d(def, Vec2::new(desired.x, desired.y), &mut weights[..n]);
                    }
                    3 => {
                        blendspace::weights_3d(def, desired, &mut weights[..n]);
                    }
                    _ => {
                        log::error!(
                            "blend space '{group_name}': cannot evaluate {} dimensions",
                            self.dimensions
                        );
                    }
                }
            }
            None => {
                // Usually invalid groups never start; reaching this means the
                // definition was replaced under us (hot-loading).
                log::error!("blend space '{group_name}': definition missing at evaluation time");
            }
        }

        // Weight post-pass: strip dust, recover from a collapsed sum,
        // renormalize, and report drift as a data error.
        for w in weights[..n].iter_mut() {
            if w.abs() < 1e-4 {
                *w = 0.0;
            }
        }
        let mut sum: f32 = weights[..n].iter().sum();
        if sum == 0.0 {
            weights[0] = 1.0;
            sum = 1.0;
        } else {
            let drift = (sum - 1.0).abs();
            if drift > WEIGHT_SUM_DATA_ERROR {
                log::error!("blend space '{group_name}': example weights sum to {sum}");
            } else if drift > WEIGHT_SUM_DRIFT {
                log::warn!("blend space '{group_name}': example weight drift, sum {sum}");
            }
        }
        for w in weights[..n].iter_mut() {
            *w /= sum;
        }
        self.blend_weights[..n].copy_from_slice(&weights[..n]);

        self.time_warped_delta(store, frame_dt, playback_scale)
    }

    fn clamped_desired(&self, def: &BlendSpaceDef) -> Vec3 {
        let mut v = Vec3::ZERO;
        for (d, dim) in def.dimensions.iter().take(3).enumerate() {
            v[d] = self.desired[d].clamp(dim.min, dim.max);
        }
        v
    }

    /// Time-warp by the ratio of blended move speed to blended distance,
    /// which keeps feet planted across the blend; groups that do not move
    /// fall back to the blended segment duration.
    fn time_warped_delta(
        &self,
        store: &ClipStore,
        frame_dt: f32,
        playback_scale: f32,
    ) -> ParameterizeOutput {
        let n = self.num_examples as usize;
        let mut tw_duration = 0.0f32;
        let mut tw_move_speed = 0.0f32;
        let mut tw_distance = 0.0f32;
        let mut entire_time = 0.0f32;
        let mut scale_sum = 0.0f32;

        for i in 0..n {
            let w = self.blend_weights[i];
            scale_sum += self.playback_scales[i] * w;
            if w == 0.0 {
                continue;
            }
            let Some(header) = store.header(self.clip_ids[i]) else {
                continue;
            };
            let seg = usize::from(self.segment[0][i]);
            let seg_duration = header.segment_duration(seg);
            tw_duration += w * seg_duration;
            for s in 0..header.segment_count() {
                entire_time += w * header.segment_duration(s);
            }

            if let Some(tracks) = store.tracks(self.clip_ids[i]) {
                let (speed, distance) = root_motion_over_segment(header, tracks, seg);
                tw_move_speed += w * speed;
                tw_distance += w * distance;
            }
        }

        let tw_duration = tw_duration.max(1e-4);
        let delta = if tw_distance < 0.001 {
            // Idle group or a single pose: warp by duration alone.
            scale_sum * (frame_dt / tw_duration)
        } else {
            scale_sum * (frame_dt * (tw_move_speed / tw_distance))
        };
        let delta = delta * playback_scale;

        // Scale the whole-clip estimate by the warp rate actually applied.
        let total = if delta > 0.0 {
            entire_time * (frame_dt / (delta * tw_duration))
        } else {
            entire_time
        };

        ParameterizeOutput {
            delta_time: delta,
            segment_duration: tw_duration,
            total_duration: total.max(1e-4),
        }
    }
}

/// Average root speed and total root distance over one segment of a clip.
fn root_motion_over_segment(
    header: &crate::clips::ClipHeader,
    tracks: &crate::clips::ClipTracks,
    segment: usize,
) -> (f32, f32) {
    let keys = tracks.root_positions();
    let num_keys = keys.len();
    if num_keys < 2 {
        return (0.0, 0.0);
    }
    let seg = segment.min(header.segment_count() - 1);
    let t0 = header.segment_times[seg];
    let t1 = header.segment_times[seg + 1];
    let last = (num_keys - 1) as f32;
    let skey = (t0 * last) as usize;
    let ekey = ((t1 * last) as usize).min(num_keys - 1);

    let mut distance = 0.0f32;
    let mut speed = 0.0f32;
    let mut poses = 0.0f32;
    for k in skey..ekey {
        let step = (keys[k] - keys[k + 1]).length();
        distance += step;
        speed += step * header.sample_rate;
        poses += 1.0;
    }
    if poses > 0.0 {
        speed /= poses;
    }
    (speed, distance)
}

/// Fixed-size sampler pool with a parallel in-use bitmap. Acquire fails
/// with None once the pool is exhausted, leaving live entries untouched.
#[derive(Debug)]
pub struct SamplerPool {
    slots: Vec<ParametricSamplerState>,
    in_use: Vec<u64>,
}

impl SamplerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![ParametricSamplerState::default(); capacity],
            in_use: vec![0u64; capacity.div_ceil(64)],
        }
    }

    pub fn acquire(&mut self) -> Option<SamplerHandle> {
        for (word_idx, word) in self.in_use.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                let slot = word_idx * 64 + bit;
                if slot >= self.slots.len() {
                    return None;
                }
                *word |= 1u64 << bit;
                self.slots[slot] = ParametricSamplerState::default();
                return Some(SamplerHandle(slot as u16));
            }
        }
        None
    }

    pub fn release(&mut self, handle: SamplerHandle) {
        let slot = handle.0 as usize;
        if slot < self.slots.len() {
            self.in_use[slot / 64] &= !(1u64 << (slot % 64));
        }
    }

    #[inline]
    pub fn is_live(&self, handle: SamplerHandle) -> bool {
        let slot = handle.0 as usize;
        slot < self.slots.len() && (self.in_use[slot / 64] >> (slot % 64)) & 1 == 1
    }

    #[inline]
    pub fn get(&self, handle: SamplerHandle) -> &ParametricSamplerState {
        &self.slots[handle.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, handle: SamplerHandle) -> &mut ParametricSamplerState {
        &mut self.slots[handle.0 as usize]
    }

    pub fn live_count(&self) -> usize {
        self.in_use.iter().map(|w| w.count_ones() as usize).sum()
    }
}
