//! Blend-space layouts and the weight geometry that drives them.
//!
//! A blend space arranges clip examples at fixed positions in a 1-3
//! dimensional motion-parameter space. Every frame the sampler turns the
//! desired parameter point into per-example weights that are non-negative,
//! sum to 1 and vary continuously as the point moves:
//!
//! - 1D: piecewise-linear between the two bracketing examples of the
//!   segment containing the point; outside the covered range the closest
//!   segment is extrapolated and the result later clamped by
//!   renormalization.
//! - 2D: faces of three examples use triangle barycentrics, faces of four
//!   use a four-triangle convex extrapolation. Points outside every face
//!   are resolved by widening the acceptance tolerance in small steps, so
//!   the nearest face wins without a discontinuity.
//! - 3D: faces decompose into tetrahedra (4), pyramids (5, a fan of four
//!   tetrahedra) or prisms (6, a pyramid plus a tetrahedron split on the
//!   diagonal plane).
//!
//! The face search and the tolerance sweep bounds are kept numerically
//! identical to the shipped data this content was authored against.

use crate::ids::ClipId;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Hard cap on examples per blend-space group.
pub const MAX_BLEND_EXAMPLES: usize = 64;

/// Tolerance sweep used when the desired point lies outside the hull:
/// acceptance widens from 0 in `HULL_SWEEP_STEP` increments until a face
/// accepts the point or `HULL_SWEEP_LIMIT` is reached.
const HULL_SWEEP_STEP: f32 = 0.05;
const HULL_SWEEP_LIMIT: f32 = 2.35;

/// Named motion parameters that can drive a blend-space dimension.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MotionParam {
    TravelSpeed,
    TurnSpeed,
    TravelAngle,
    TravelSlope,
    TurnAngle,
    TravelDist,
    StopLeg,
    BlendWeight,
}

/// One axis of the parameter space.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct DimensionDef {
    pub param: MotionParam,
    pub min: f32,
    pub max: f32,
    /// Display/debug scale for non-normalized parameter spaces.
    pub scale: f32,
}

/// One example clip placed in parameter space.
#[derive(Copy, Clone, Debug)]
pub struct ExampleDef {
    pub clip: ClipId,
    pub position: Vec3,
    pub playback_scale: f32,
}

/// An annotation face: 2 indices in 1D, 3-4 in 2D, 4-6 in 3D.
#[derive(Copy, Clone, Debug)]
pub struct Face {
    pub count: u8,
    pub idx: [u8; 8],
}

impl Face {
    pub fn new(indices: &[u8]) -> Self {
        let mut idx = [0u8; 8];
        idx[..indices.len()].copy_from_slice(indices);
        Self {
            count: indices.len() as u8,
            idx,
        }
    }

    #[inline]
    pub fn indices(&self) -> &[u8] {
        &self.idx[..self.count as usize]
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlendSpaceDef {
    pub dimensions: Vec<DimensionDef>,
    pub examples: Vec<ExampleDef>,
    pub faces: Vec<Face>,
    /// Set for locomotion-start groups whose turn parameter gates the
    /// idle-to-move transition.
    pub idle_to_move: bool,
}

impl BlendSpaceDef {
    /// Validate the layout, logging every data error found. Evaluation
    /// stays best-effort even for invalid layouts; this exists so broken
    /// content is reported once at registration instead of every frame.
    pub fn validate(&self, name: &str) -> bool {
        let mut ok = true;
        if self.dimensions.is_empty() || self.dimensions.len() > 3 {
            log::error!(
                "blend space '{name}': unsupported dimension count {}",
                self.dimensions.len()
            );
            ok = false;
        }
        if self.examples.is_empty() || self.examples.len() > MAX_BLEND_EXAMPLES {
            log::error!(
                "blend space '{name}': example count {} out of range",
                self.examples.len()
            );
            ok = false;
        }
        for face in &self.faces {
            for &i in face.indices() {
                if usize::from(i) >= self.examples.len() {
                    log::error!("blend space '{name}': face references missing example {i}");
                    ok = false;
                }
            }
        }
        if self.dimensions.len() == 1 {
            for face in self.faces.iter().filter(|f| f.count == 2) {
                let x0 = self.examples[face.idx[0] as usize].position.x;
                let x1 = self.examples[face.idx[1] as usize].position.x;
                if (x0 - x1).abs() < 0.01 {
                    log::warn!("blend space '{name}': 1D example parameters are too close");
                    ok = false;
                }
                if x0 >= x1 {
                    log::warn!(
                        "blend space '{name}': 1D examples must be sorted by parameter, lowest first"
                    );
                    ok = false;
                }
            }
        }
        if self.dimensions.len() == 2 {
            for face in &self.faces {
                let idx = face.indices();
                for e in 0..idx.len() {
                    let a = self.examples[idx[e] as usize].position;
                    let b = self.examples[idx[(e + 1) % idx.len()] as usize].position;
                    if (a - b).length() < 0.01 {
                        log::warn!("blend space '{name}': 2D example parameters are too close");
                        ok = false;
                    }
                }
            }
        }
        ok
    }
}

#[inline]
fn cross2(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Piecewise-linear 1D weighting. Writes into `weights` (zeroed first) and
/// returns the selected face, or None when the point fell outside every
/// segment and the closest one was extrapolated.
pub fn weights_1d(def: &BlendSpaceDef, desired: f32, weights: &mut [f32]) -> Option<usize> {
    for w in weights.iter_mut() {
        *w = 0.0;
    }

    for (f, face) in def.faces.iter().enumerate() {
        if face.count != 2 {
            continue;
        }
        let i0 = face.idx[0] as usize;
        let i1 = face.idx[1] as usize;
        let x0 = def.examples[i0].position.x;
        let x1 = def.examples[i1].position.x;
        if x1 - x0 <= f32::EPSILON {
            continue; // degenerate segment, reported by validate()
        }
        if x0 <= desired && desired <= x1 {
            let d = (desired - x0) / (x1 - x0);
            weights[i0] += 1.0 - d;
            weights[i1] += d;
            return Some(f);
        }
    }

    // Outside the covered range: extrapolate along the segment whose
    // violated weight is closest to the valid band.
    let mut closest = f32::MAX;
    let mut line = None;
    for (f, face) in def.faces.iter().enumerate() {
        if face.count != 2 {
            continue;
        }
        let x0 = def.examples[face.idx[0] as usize].position.x;
        let x1 = def.examples[face.idx[1] as usize].position.x;
        if x1 - x0 <= f32::EPSILON {
            continue;
        }
        let d = (desired - x0) / (x1 - x0);
        let w0 = 1.0 - d;
        for w in [w0, d] {
            let overshoot = if w < 0.0 {
                -w
            } else if w > 1.0 {
                w - 1.0
            } else {
                continue;
            };
            if overshoot < closest {
                closest = overshoot;
                line = Some(f);
            }
        }
    }
    if let Some(f) = line {
        let face = &def.faces[f];
        let i0 = face.idx[0] as usize;
        let i1 = face.idx[1] as usize;
        let x0 = def.examples[i0].position.x;
        let x1 = def.examples[i1].position.x;
        let d = (desired - x0) / (x1 - x0);
        weights[i0] += 1.0 - d;
        weights[i1] += d;
    }
    None
}

/// Barycentric weights for a triangle; degenerate triangles fall through
/// unnormalized so the caller's weight post-pass can recover.
fn triangle_weights(p: Vec2, v0: Vec2, v1: Vec2, v2: Vec2) -> [f32; 3] {
    let pd = p - v2;
    let z0 = v0 - v2;
    let z1 = v1 - v2;
    let u = pd.x * z1.y - pd.y * z1.x;
    let v = pd.y * z0.x - pd.x * z0.y;
    let w = z0.x * z1.y - z1.x * z0.y - u - v;
    let sum = u + v + w;
    if sum.abs() > f32::EPSILON {
        [u / sum, v / sum, w / sum]
    } else {
        [u, v, w]
    }
}

/// One fan triangle of the convex-quad weighting. Contributes only when
/// the point lies left of the (v0, v1) edge; weights are unnormalized
/// signed areas relative to v2.
fn fan_triangle(p: Vec2, v0: Vec2, v1: Vec2, v2: Vec2) -> [f32; 3] {
    if cross2(v1 - v0, p - v0) < 0.0 {
        return [0.0; 3];
    }
    let e0 = v0 - v2;
    let e1 = v1 - v2;
    let pd = p - v2;
    let w0 = pd.x * e1.y - e1.x * pd.y;
    let w1 = e0.x * pd.y - pd.x * e0.y;
    let w2 = e0.x * e1.y - e1.x * e0.y - w0 - w1;
    [w0, w1, w2]
}

/// Convex weighting over four scattered points (quad treated as four fan
/// triangles, summed then normalized). Extrapolates smoothly outside the
/// quad, which the hull tolerance sweep relies on.
pub(crate) fn convex4_weights(p: Vec2, q: [Vec2; 4]) -> [f32; 4] {
    let mut acc = [0.0f32; 4];
    let mut add = |tri: [f32; 3], slots: [usize; 3]| {
        for (w, s) in tri.iter().zip(slots) {
            acc[s] += w;
        }
    };
    add(fan_triangle(p, q[1], q[3], q[0]), [1, 3, 0]);
    add(fan_triangle(p, q[3], q[1], q[2]), [3, 1, 2]);
    add(fan_triangle(p, q[2], q[0], q[1]), [2, 0, 1]);
    add(fan_triangle(p, q[0], q[2], q[3]), [0, 2, 3]);
    let sum = acc.iter().sum::<f32>();
    if sum.abs() > f32::EPSILON {
        for w in &mut acc {
            *w /= sum;
        }
    }
    acc
}

/// 2D weighting over triangle/quad faces with the widening hull sweep.
pub fn weights_2d(def: &BlendSpaceDef, desired: Vec2, weights: &mut [f32]) -> Option<usize> {
    for w in weights.iter_mut() {
        *w = 0.0;
    }

    let pos2 = |i: u8| {
        let p = def.examples[i as usize].position;
        Vec2::new(p.x, p.y)
    };

    let mut d = 0.0f32;
    while d < HULL_SWEEP_LIMIT {
        for (f, face) in def.faces.iter().enumerate() {
            let bc: [f32; 4] = match face.count {
                3 => {
                    let t = triangle_weights(
                        desired,
                        pos2(face.idx[0]),
                        pos2(face.idx[1]),
                        pos2(face.idx[2]),
                    );
                    [t[0], t[1], t[2], 0.0]
                }
                4 => convex4_weights(
                    desired,
                    [
                        pos2(face.idx[0]),
                        pos2(face.idx[1]),
                        pos2(face.idx[2]),
                        pos2(face.idx[3]),
                    ],
                ),
                _ => continue,
            };
            let n = face.count as usize;
            let inside = bc[..n].iter().all(|&w| w >= -d && w <= 1.0 + d);
            if inside {
                for (e, &i) in face.indices().iter().enumerate() {
                    weights[i as usize] += bc[e];
                }
                return Some(f);
            }
        }
        d += HULL_SWEEP_STEP;
    }
    None
}

/// Generalized barycentric weights inside a tetrahedron. The four plane
/// volumes sum to the cell volume, so the weights sum to 1 up to float
/// error.
pub(crate) fn tetrahedron_weights(cp: Vec3, t0: Vec3, t1: Vec3, t2: Vec3, t3: Vec3) -> [f32; 4] {
    let n = (t3 - t0).cross(t2 - t0);
    let m = n.dot(t1 - t0);
    [
        (t2 - t1).cross(t3 - t1).dot(cp - t0) / m + 1.0,
        (t0 - t2).cross(t3 - t2).dot(cp - t1) / m + 1.0,
        (t0 - t3).cross(t1 - t3).dot(cp - t2) / m + 1.0,
        (t2 - t0).cross(t1 - t0).dot(cp - t3) / m + 1.0,
    ]
}

/// Pyramid cell: a fan of four tetrahedra sharing the apex (index 4).
pub(crate) fn pyramid_weights(cp: Vec3, t: [Vec3; 5]) -> [f32; 5] {
    let mut w = [0.0f32; 5];
    for e in 0..4usize {
        let i0 = e & 3;
        let i1 = (e + 1) & 3;
        let i2 = (e + 2) & 3;
        let bc = tetrahedron_weights(cp, t[i0], t[i1], t[i2], t[4]);
        if bc[1] >= 0.0 {
            w[i0] += bc[0];
            w[i1] += bc[1];
            w[i2] += bc[2];
            w[4] += bc[3];
        }
    }
    let sum = w.iter().sum::<f32>();
    if sum != 0.0 {
        for x in &mut w {
            *x /= sum;
        }
    }
    w
}

#[inline]
fn plane_side(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> f32 {
    (b - a).cross(c - a).dot(p - a)
}

/// Prism cell: a pyramid and a tetrahedron split on the diagonal plane.
pub(crate) fn prism_weights(cp: Vec3, t: [Vec3; 6]) -> [f32; 6] {
    let mut w = [0.0f32; 6];

    if plane_side(cp, t[0], t[1], t[5]) <= 0.0 {
        let bc = pyramid_weights(cp, [t[0], t[1], t[2], t[3], t[5]]);
        w[0] += bc[0];
        w[1] += bc[1];
        w[2] += bc[2];
        w[3] += bc[3];
        w[5] += bc[4];
    }
    if plane_side(cp, t[1], t[0], t[5]) <= 0.0 {
        let bc = tetrahedron_weights(cp, t[0], t[1], t[5], t[4]);
        w[0] += bc[0];
        w[1] += bc[1];
        w[5] += bc[2];
        w[4] += bc[3];
    }

    let sum = w.iter().sum::<f32>();
    if sum != 0.0 {
        for x in &mut w {
            *x /= sum;
        }
    }
    w
}

/// 3D weighting over tetrahedron/pyramid/prism faces with the hull sweep.
pub fn weights_3d(def: &BlendSpaceDef, desired: Vec3, weights: &mut [f32]) -> Option<usize> {
    for w in weights.iter_mut() {
        *w = 0.0;
    }

    let pos = |i: u8| def.examples[i as usize].position;

    let mut d = 0.0f32;
    while d < HULL_SWEEP_LIMIT {
        for (f, face) in def.faces.iter().enumerate() {
            let mut bc = [0.0f32; 8];
            match face.count {
                4 => {
                    let t = tetrahedron_weights(
                        desired,
                        pos(face.idx[0]),
                        pos(face.idx[1]),
                        pos(face.idx[2]),
                        pos(face.idx[3]),
                    );
                    bc[..4].copy_from_slice(&t);
                }
                5 => {
                    let t = pyramid_weights(
                        desired,
                        [
                            pos(face.idx[0]),
                            pos(face.idx[1]),
                            pos(face.idx[2]),
                            pos(face.idx[3]),
                            pos(face.idx[4]),
                        ],
                    );
                    bc[..5].copy_from_slice(&t);
                }
                6 => {
                    let t = prism_weights(
                        desired,
                        [
                            pos(face.idx[0]),
                            pos(face.idx[1]),
                            pos(face.idx[2]),
                            pos(face.idx[3]),
                            pos(face.idx[4]),
                            pos(face.idx[5]),
                        ],
                    );
                    bc[..6].copy_from_slice(&t);
                }
                _ => continue,
            }
            let n = face.count as usize;
            let inside = bc[..n].iter().all(|&w| w >= -d && w <= 1.0 + d);
            if inside {
                for (e, &i) in face.indices().iter().enumerate() {
                    weights[i as usize] += bc[e];
                }
                return Some(f);
            }
        }
        d += HULL_SWEEP_STEP;
    }
    None
}
