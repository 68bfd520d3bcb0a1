use approx::assert_relative_eq;
use glam::{Vec2, Vec3};
use kinema_animation_core::blendspace::{weights_1d, weights_2d, weights_3d};
use kinema_animation_core::{BlendSpaceDef, ClipId, DimensionDef, ExampleDef, Face, MotionParam};

fn dim(param: MotionParam, min: f32, max: f32) -> DimensionDef {
    DimensionDef {
        param,
        min,
        max,
        scale: 1.0,
    }
}

fn ex(x: f32, y: f32, z: f32) -> ExampleDef {
    ExampleDef {
        clip: ClipId(0),
        position: Vec3::new(x, y, z),
        playback_scale: 1.0,
    }
}

fn speed_line() -> BlendSpaceDef {
    BlendSpaceDef {
        dimensions: vec![dim(MotionParam::TravelSpeed, 0.0, 3.0)],
        examples: vec![ex(0.0, 0.0, 0.0), ex(1.5, 0.0, 0.0), ex(3.0, 0.0, 0.0)],
        faces: vec![Face::new(&[0, 1]), Face::new(&[1, 2])],
        idle_to_move: false,
    }
}

/// it should produce non-negative weights summing to 1 across the whole
/// 1D range, continuously
#[test]
fn one_d_weights_partition_unity_and_vary_continuously() {
    let def = speed_line();
    let mut weights = [0.0f32; 3];
    let mut prev: Option<[f32; 3]> = None;

    let steps = 300;
    for s in 0..=steps {
        let x = 3.0 * s as f32 / steps as f32;
        weights_1d(&def, x, &mut weights);
        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum {sum} at x={x}");
        for &w in &weights {
            assert!(w >= -1e-6, "negative weight {w} at x={x}");
        }
        if let Some(p) = prev {
            for (a, b) in weights.iter().zip(p.iter()) {
                assert!(
                    (a - b).abs() < 0.02,
                    "discontinuity at x={x}: {p:?} -> {weights:?}"
                );
            }
        }
        prev = Some(weights);
    }
}

/// it should hand each bracketing example its linear share and resolve
/// exact example positions to weight 1
#[test]
fn one_d_weights_bracketing_examples() {
    let def = speed_line();
    let mut weights = [0.0f32; 3];

    weights_1d(&def, 0.75, &mut weights);
    assert_relative_eq!(weights[0], 0.5, epsilon = 1e-5);
    assert_relative_eq!(weights[1], 0.5, epsilon = 1e-5);
    assert!(weights[2].abs() < 1e-6);

    weights_1d(&def, 1.5, &mut weights);
    assert_relative_eq!(weights[1], 1.0, epsilon = 1e-5);

    // outside the covered range the closest segment is extrapolated;
    // callers clamp the desired parameter, this guards the fallback
    weights_1d(&def, 3.5, &mut weights);
    let sum: f32 = weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-4);
}

/// it should weight the four corner examples positively and symmetrically
/// at the center of the square
#[test]
fn two_d_center_query_is_symmetric() {
    let def = BlendSpaceDef {
        dimensions: vec![
            dim(MotionParam::TravelSpeed, 0.0, 1.0),
            dim(MotionParam::TurnSpeed, 0.0, 1.0),
        ],
        examples: vec![
            ex(0.0, 0.0, 0.0),
            ex(1.0, 0.0, 0.0),
            ex(0.0, 1.0, 0.0),
            ex(1.0, 1.0, 0.0),
        ],
        faces: vec![Face::new(&[0, 1, 3, 2])],
        idle_to_move: false,
    };
    let mut weights = [0.0f32; 4];
    let face = weights_2d(&def, Vec2::new(0.5, 0.5), &mut weights);
    assert!(face.is_some());
    let sum: f32 = weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-4);
    for &w in &weights {
        assert!(w > 0.0);
        assert!((w - 0.25).abs() < 1e-3, "weights {weights:?}");
    }

    // each corner resolves to its own example
    weights_2d(&def, Vec2::new(0.0, 0.0), &mut weights);
    assert!((weights[0] - 1.0).abs() < 1e-3, "corner weights {weights:?}");
}

/// it should clamp an outside-hull query to the boundary instead of
/// producing wild extrapolation
#[test]
fn two_d_outside_hull_stays_bounded() {
    let def = BlendSpaceDef {
        dimensions: vec![
            dim(MotionParam::TravelSpeed, 0.0, 1.0),
            dim(MotionParam::TurnSpeed, 0.0, 1.0),
        ],
        examples: vec![ex(0.0, 0.0, 0.0), ex(1.0, 0.0, 0.0), ex(0.5, 1.0, 0.0)],
        faces: vec![Face::new(&[0, 1, 2])],
        idle_to_move: false,
    };
    let mut weights = [0.0f32; 3];
    weights_2d(&def, Vec2::new(0.5, -0.5), &mut weights);
    let sum: f32 = weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-3);
    for &w in &weights {
        assert!(w.abs() < 2.0, "runaway weight {w}");
    }
}

/// it should partition unity inside a tetrahedron cell
#[test]
fn three_d_tetrahedron_interior() {
    let def = BlendSpaceDef {
        dimensions: vec![
            dim(MotionParam::TravelSpeed, 0.0, 1.0),
            dim(MotionParam::TurnSpeed, 0.0, 1.0),
            dim(MotionParam::TravelSlope, 0.0, 1.0),
        ],
        examples: vec![
            ex(0.0, 0.0, 0.0),
            ex(1.0, 0.0, 0.0),
            ex(0.0, 1.0, 0.0),
            ex(0.0, 0.0, 1.0),
        ],
        faces: vec![Face::new(&[0, 1, 2, 3])],
        idle_to_move: false,
    };
    let mut weights = [0.0f32; 4];
    let face = weights_3d(&def, Vec3::new(0.2, 0.25, 0.3), &mut weights);
    assert!(face.is_some());
    let sum: f32 = weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-3);
    for &w in &weights {
        assert!(w >= -1e-4);
    }
    // vertex queries collapse onto the matching example
    weights_3d(&def, Vec3::new(0.0, 0.0, 1.0), &mut weights);
    assert!((weights[3] - 1.0).abs() < 1e-3, "weights {weights:?}");
}
