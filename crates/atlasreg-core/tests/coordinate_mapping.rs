use atlasreg_core::{Direction3, GridGeometry, Point3, Spacing3};
use proptest::prelude::*;

fn make_rotation(angle_x: f64, angle_y: f64, angle_z: f64) -> Direction3 {
    let rotation = nalgebra::Rotation3::from_euler_angles(angle_x, angle_y, angle_z);
    Direction3(rotation.into_inner())
}

fn grid(shape: [usize; 3], spacing: Spacing3, direction: Direction3) -> GridGeometry {
    GridGeometry::new(shape, spacing, Point3::origin(), direction)
}

proptest! {
    #[test]
    fn test_coordinate_roundtrip(
        ox in -100.0f64..100.0, oy in -100.0f64..100.0, oz in -100.0f64..100.0,
        sx in 0.1f64..5.0, sy in 0.1f64..5.0, sz in 0.1f64..5.0,
        ax in -3.14f64..3.14, ay in -3.14f64..3.14, az in -3.14f64..3.14,
        px in -50.0f64..50.0, py in -50.0f64..50.0, pz in -50.0f64..50.0
    ) {
        let mut geometry = grid([2, 2, 2], Spacing3::new(sx, sy, sz), make_rotation(ax, ay, az));
        geometry.origin = Point3::new(ox, oy, oz);
        let point = Point3::new(px, py, pz);

        let index = geometry.physical_to_index(&point).expect("rotation is invertible");
        let recovered = geometry.index_to_physical(&index);

        prop_assert!((point.x - recovered.x).abs() < 1e-6, "X mismatch: {} vs {}", point.x, recovered.x);
        prop_assert!((point.y - recovered.y).abs() < 1e-6, "Y mismatch: {} vs {}", point.y, recovered.y);
        prop_assert!((point.z - recovered.z).abs() < 1e-6, "Z mismatch: {} vs {}", point.z, recovered.z);
    }

    #[test]
    fn test_compatibility_is_symmetric(
        sx in 0.1f64..5.0, sy in 0.1f64..5.0, sz in 0.1f64..5.0,
        dx in -1e-3f64..1e-3,
        nx in 1usize..8, ny in 1usize..8, nz in 1usize..8,
    ) {
        let a = grid([nz, ny, nx], Spacing3::new(sx, sy, sz), Direction3::identity());
        let b = grid([nz, ny, nx], Spacing3::new(sx + dx, sy, sz), Direction3::identity());
        prop_assert_eq!(a.is_compatible(&b), b.is_compatible(&a));
    }

    #[test]
    fn test_different_shapes_never_compatible(
        nx in 1usize..8, ny in 1usize..8, nz in 1usize..8, extra in 1usize..4,
    ) {
        let a = grid([nz, ny, nx], Spacing3::new(1.0, 1.0, 1.0), Direction3::identity());
        let b = grid([nz, ny, nx + extra], Spacing3::new(1.0, 1.0, 1.0), Direction3::identity());
        prop_assert!(!a.is_compatible(&b));
        let err = a.ensure_compatible(&b, "shared grid").unwrap_err();
        prop_assert!(err.is_format());
    }
}
