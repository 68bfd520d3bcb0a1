//! Clip store: headers, raw sampled joint tracks and blend-space groups.
//!
//! The store is the external data provider the evaluation core reads every
//! frame. It never blocks: on-demand clips report `is_loaded() == false`
//! until the host marks them streamed in. Reference counts are bumped on
//! transition-queue push/pop only (main thread); workers read tracks
//! through a shared reference during Execute and never touch the counts.

use crate::blendspace::BlendSpaceDef;
use crate::ids::{ClipId, IdAllocator};
use crate::pose::JointTransform;
use glam::{Quat, Vec3};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AssetKind {
    /// A single baked clip.
    Clip,
    /// A parametric group of example clips.
    BlendSpace,
}

/// Per-clip event: fired when the playhead crosses `time` (normalized over
/// the entire clip).
#[derive(Clone, Debug)]
pub struct AnimEventDef {
    pub time: f32,
    pub name: String,
}

#[derive(Debug)]
pub struct ClipHeader {
    pub name: String,
    pub kind: AssetKind,
    pub global_id: u32,
    pub sample_rate: f32,
    pub total_duration: f32,
    /// Normalized segment boundaries; `[0.0, ..., 1.0]`, one entry more
    /// than the segment count.
    pub segment_times: Vec<f32>,
    pub is_additive: bool,
    pub on_demand: bool,
    pub events: Vec<AnimEventDef>,
    loaded: AtomicBool,
    ref_count: AtomicU32,
}

impl ClipHeader {
    pub fn new(name: impl Into<String>, kind: AssetKind, sample_rate: f32, duration: f32) -> Self {
        Self {
            name: name.into(),
            kind,
            global_id: 0,
            sample_rate,
            total_duration: duration,
            segment_times: vec![0.0, 1.0],
            is_additive: false,
            on_demand: false,
            events: Vec::new(),
            loaded: AtomicBool::new(true),
            ref_count: AtomicU32::new(0),
        }
    }

    pub fn with_segments(mut self, boundaries: Vec<f32>) -> Self {
        debug_assert!(boundaries.len() >= 2);
        self.segment_times = boundaries;
        self
    }

    pub fn with_additive(mut self, additive: bool) -> Self {
        self.is_additive = additive;
        self
    }

    pub fn with_on_demand(mut self) -> Self {
        self.on_demand = true;
        self.loaded.store(false, Ordering::Relaxed);
        self
    }

    pub fn with_events(mut self, events: Vec<AnimEventDef>) -> Self {
        self.events = events;
        self
    }

    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segment_times.len() - 1
    }

    /// Duration of one segment in seconds, floored at one sample interval.
    pub fn segment_duration(&self, segment: usize) -> f32 {
        let seg = segment.min(self.segment_count() - 1);
        let span = self.segment_times[seg + 1] - self.segment_times[seg];
        (self.total_duration * span).max(1.0 / self.sample_rate)
    }

    /// Map (segment, segment-normalized time) to entire-clip normalized time.
    pub fn entire_clip_time(&self, segment: usize, segment_time: f32) -> f32 {
        let seg = segment.min(self.segment_count() - 1);
        let t0 = self.segment_times[seg];
        let t1 = self.segment_times[seg + 1];
        t0 + segment_time.clamp(0.0, 1.0) * (t1 - t0)
    }

    /// Map entire-clip normalized time to (segment, segment-normalized time).
    pub fn segment_for_time(&self, time: f32) -> (usize, f32) {
        let t = time.clamp(0.0, 1.0);
        for seg in 0..self.segment_count() {
            let t1 = self.segment_times[seg + 1];
            if t <= t1 {
                let t0 = self.segment_times[seg];
                let span = t1 - t0;
                let local = if span > 0.0 { (t - t0) / span } else { t };
                return (seg, local);
            }
        }
        (self.segment_count() - 1, 1.0)
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }
}

/// Uniformly sampled track for one joint.
#[derive(Clone, Debug, Default)]
pub struct JointTrack {
    pub rotations: Vec<Quat>,
    pub translations: Vec<Vec3>,
    pub scales: Vec<Vec3>,
}

impl JointTrack {
    pub fn constant(t: JointTransform) -> Self {
        Self {
            rotations: vec![t.rotation],
            translations: vec![t.translation],
            scales: vec![t.scale],
        }
    }

    fn key_count(&self) -> usize {
        self.translations.len()
    }
}

/// Raw sampled data of one clip: joint tracks indexed like the skeleton,
/// root at index 0. This is the only clip data worker threads touch.
#[derive(Clone, Debug, Default)]
pub struct ClipTracks {
    pub joints: Vec<JointTrack>,
}

impl ClipTracks {
    /// Sample a joint at entire-clip normalized time; linear keys, NLERP
    /// rotation. Deterministic for identical inputs.
    pub fn sample_joint(&self, joint: usize, time: f32) -> JointTransform {
        let Some(track) = self.joints.get(joint) else {
            return JointTransform::IDENTITY;
        };
        let n = track.key_count();
        if n == 0 {
            return JointTransform::IDENTITY;
        }
        if n == 1 {
            return JointTransform {
                rotation: track.rotations[0],
                translation: track.translations[0],
                scale: track.scales[0],
            };
        }
        let f = time.clamp(0.0, 1.0) * (n - 1) as f32;
        let k0 = (f as usize).min(n - 2);
        let k1 = k0 + 1;
        let t = f - k0 as f32;
        JointTransform {
            rotation: track.rotations[k0].lerp(track.rotations[k1], t),
            translation: track.translations[k0].lerp(track.translations[k1], t),
            scale: track.scales[k0].lerp(track.scales[k1], t),
        }
    }

    /// Root translation keys, used for move-speed extraction.
    pub fn root_positions(&self) -> &[Vec3] {
        self.joints.first().map(|t| &t.translations[..]).unwrap_or(&[])
    }
}

/// The clip store. Owned by the host; the core holds `ClipId`s into it,
/// never ownership.
#[derive(Debug, Default)]
pub struct ClipStore {
    ids: IdAllocator,
    headers: Vec<ClipHeader>,
    tracks: Vec<Option<ClipTracks>>,
    blend_spaces: Vec<Option<BlendSpaceDef>>,
}

impl ClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_clip(&mut self, mut header: ClipHeader, tracks: ClipTracks) -> ClipId {
        let id = self.ids.alloc_clip();
        header.global_id = id.0;
        header.kind = AssetKind::Clip;
        self.headers.push(header);
        self.tracks.push(Some(tracks));
        self.blend_spaces.push(None);
        id
    }

    pub fn add_blend_space(&mut self, mut header: ClipHeader, def: BlendSpaceDef) -> ClipId {
        def.validate(&header.name);
        let id = self.ids.alloc_clip();
        header.global_id = id.0;
        header.kind = AssetKind::BlendSpace;
        self.headers.push(header);
        self.tracks.push(None);
        self.blend_spaces.push(Some(def));
        id
    }

    #[inline]
    pub fn header(&self, id: ClipId) -> Option<&ClipHeader> {
        self.headers.get(id.0 as usize)
    }

    #[inline]
    pub fn tracks(&self, id: ClipId) -> Option<&ClipTracks> {
        self.tracks.get(id.0 as usize).and_then(|t| t.as_ref())
    }

    #[inline]
    pub fn blend_space(&self, id: ClipId) -> Option<&BlendSpaceDef> {
        self.blend_spaces.get(id.0 as usize).and_then(|b| b.as_ref())
    }

    /// Host-side: flip the streamed-in flag for an on-demand clip.
    pub fn mark_loaded(&self, id: ClipId, loaded: bool) {
        if let Some(h) = self.header(id) {
            h.loaded.store(loaded, Ordering::Release);
        }
    }

    /// Main-thread only: bump the streaming reference count.
    pub fn retain(&self, id: ClipId) {
        if let Some(h) = self.header(id) {
            h.ref_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Main-thread only: drop a streaming reference.
    pub fn release(&self, id: ClipId) {
        if let Some(h) = self.header(id) {
            let prev = h.ref_count.fetch_sub(1, Ordering::Relaxed);
            debug_assert!(prev > 0, "release of unreferenced clip {:?}", id);
        }
    }

    /// True when a clip (or, for a blend space, every example) is resident.
    /// Queried every frame; never blocks on streaming.
    pub fn is_in_memory(&self, id: ClipId) -> bool {
        let Some(header) = self.header(id) else {
            return false;
        };
        match header.kind {
            AssetKind::Clip => header.is_loaded(),
            AssetKind::BlendSpace => {
                let Some(def) = self.blend_space(id) else {
                    return false;
                };
                def.examples
                    .iter()
                    .all(|ex| self.header(ex.clip).is_some_and(|h| h.is_loaded()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_time_round_trips() {
        let header = ClipHeader::new("walk", AssetKind::Clip, 30.0, 2.0)
            .with_segments(vec![0.0, 0.25, 0.75, 1.0]);
        assert_eq!(header.segment_count(), 3);
        let entire = header.entire_clip_time(1, 0.5);
        assert!((entire - 0.5).abs() < 1e-6);
        let (seg, local) = header.segment_for_time(entire);
        assert_eq!(seg, 1);
        assert!((local - 0.5).abs() < 1e-5);
    }

    #[test]
    fn on_demand_clip_reports_unloaded() {
        let mut store = ClipStore::new();
        let id = store.add_clip(
            ClipHeader::new("streamed", AssetKind::Clip, 30.0, 1.0).with_on_demand(),
            ClipTracks::default(),
        );
        assert!(!store.is_in_memory(id));
        store.mark_loaded(id, true);
        assert!(store.is_in_memory(id));
    }
}
