//! Version-tolerant persistence of transition-queue state.
//!
//! Only what is needed to resume mid-transition after a load is saved:
//! per layer, the ordered (clip id, normalized time, segment counters)
//! records. Everything else is reconstructed on the first frame after
//! restore. Unknown or missing fields default to "no animation playing".

use crate::clips::ClipStore;
use crate::sampler::SamplerPool;
use crate::transition::{AnimationPush, StaticFlags, TransitionQueue};
use serde::{Deserialize, Serialize};

pub const SAVED_STATE_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SavedEntry {
    #[serde(default)]
    pub clip: u32,
    #[serde(default)]
    pub static_flags: u32,
    #[serde(default)]
    pub normalized_time: f32,
    #[serde(default)]
    pub segment: u8,
    /// Per-example segment counters of a parametric entry.
    #[serde(default)]
    pub sampler_segments: Vec<u8>,
    #[serde(default)]
    pub transition_time: f32,
    #[serde(default)]
    pub transition_priority: f32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SavedLayer {
    #[serde(default)]
    pub entries: Vec<SavedEntry>,
    #[serde(default = "default_scale")]
    pub playback_scale: f32,
    #[serde(default = "default_scale")]
    pub blend_weight: f32,
}

fn default_scale() -> f32 {
    1.0
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SavedCharacterState {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub layers: Vec<SavedLayer>,
}

/// Capture one queue's resume state.
pub fn capture_layer(queue: &TransitionQueue, pool: &SamplerPool) -> SavedLayer {
    let mut layer = SavedLayer {
        entries: Vec::with_capacity(queue.animation_count()),
        playback_scale: queue.playback_scale,
        blend_weight: queue.blend_weight,
    };
    for anim in queue.entries() {
        let sampler_segments = match anim.sampler {
            Some(handle) => {
                let state = pool.get(handle);
                (0..state.num_examples())
                    .map(|i| state.segment_counter(0, i))
                    .collect()
            }
            None => Vec::new(),
        };
        layer.entries.push(SavedEntry {
            clip: anim.clip.0,
            static_flags: anim.static_flags.0,
            normalized_time: anim.anim_time[0],
            segment: anim.segment[0],
            sampler_segments,
            transition_time: anim.transition_time,
            transition_priority: anim.transition_priority,
        });
    }
    layer
}

/// Rebuild a queue from a saved layer. Entries referencing clips the store
/// no longer knows are skipped (logged), matching the "missing means not
/// playing" reading policy.
pub fn restore_layer(
    saved: &SavedLayer,
    queue: &mut TransitionQueue,
    store: &ClipStore,
    pool: &mut SamplerPool,
) {
    queue.clear(store, pool);
    queue.playback_scale = saved.playback_scale;
    queue.blend_weight = saved.blend_weight;

    for entry in &saved.entries {
        let clip = crate::ids::ClipId(entry.clip);
        if store.header(clip).is_none() {
            log::warn!("saved state references unknown clip {}, skipping", entry.clip);
            continue;
        }
        let push = AnimationPush {
            clip,
            static_flags: StaticFlags(entry.static_flags) | StaticFlags::ALLOW_RESTART,
            transition_time: entry.transition_time,
            playback_weight: 1.0,
            playback_scale: 1.0,
            start_time: 0.0,
            user_token: 0,
        };
        if !queue.push_animation(push, store, pool) {
            continue;
        }
        let index = queue.animation_count() - 1;
        if let Some(anim) = queue.animation_mut(index) {
            anim.anim_time = [entry.normalized_time; 2];
            anim.anim_time_prev = [entry.normalized_time; 2];
            anim.segment = [entry.segment; 2];
            anim.segment_prev = [entry.segment; 2];
            anim.transition_priority = entry.transition_priority;
            let sampler = anim.sampler;
            if let Some(handle) = sampler {
                let state = pool.get_mut(handle);
                for (i, seg) in entry.sampler_segments.iter().enumerate() {
                    if i >= state.num_examples() {
                        break;
                    }
                    state.set_segment_counter(0, i, *seg);
                    state.set_segment_counter(1, i, *seg);
                }
            }
        }
    }
}

/// Serialize a full character state to JSON.
pub fn to_json(state: &SavedCharacterState) -> serde_json::Result<String> {
    serde_json::to_string(state)
}

/// Parse a character state; tolerates unknown fields and fills missing
/// ones with defaults, per the version-tolerant reading contract.
pub fn from_json(json: &str) -> serde_json::Result<SavedCharacterState> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_default_to_not_playing() {
        let state = from_json("{}").unwrap();
        assert_eq!(state.version, 0);
        assert!(state.layers.is_empty());

        let state = from_json(r#"{"version":1,"layers":[{}]}"#).unwrap();
        assert_eq!(state.layers.len(), 1);
        assert!(state.layers[0].entries.is_empty());
        assert_eq!(state.layers[0].playback_scale, 1.0);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let state = from_json(r#"{"version":99,"future_field":true,"layers":[]}"#).unwrap();
        assert_eq!(state.version, 99);
    }
}
