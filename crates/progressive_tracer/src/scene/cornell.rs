//! The Cornell box test scene
//!
//! Five meshes (white shell, blue and red side walls, short and tall block)
//! and one rectangular ceiling light. Units are metres; the box spans
//! roughly 0.55 x 0.55 x 0.56.

use crate::core::config::SceneCapacity;
use crate::foundation::math::{constants::PI, Mat4, Vec3};

use super::{AreaLight, Material, Scene, SceneBuilder, SceneError};

/// Width of the ceiling light
pub const LIGHT_WIDTH: f32 = 0.130;
/// Height of the ceiling light
pub const LIGHT_HEIGHT: f32 = 0.105;
/// Scalar intensity of the ceiling light
pub const LIGHT_INTENSITY: f32 = 0.2;
/// Centre of the ceiling light
pub const LIGHT_CENTRE: Vec3 = Vec3::new(0.278, 0.549, 0.2795);

const fn v(x: f32, y: f32, z: f32) -> Vec3 {
    Vec3::new(x, y, z)
}

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

const BLOCK_INDICES: [u32; 30] = [
    0, 1, 2, 0, 2, 3, //
    4, 5, 6, 4, 6, 7, //
    8, 9, 10, 8, 10, 11, //
    12, 13, 14, 12, 14, 15, //
    16, 17, 18, 16, 18, 19,
];

const WHITE_POSITIONS: [Vec3; 16] = [
    // floor
    v(0.55, 0.0, 0.0),
    v(0.0, 0.0, 0.0),
    v(0.0, 0.0, 0.560),
    v(0.55, 0.0, 0.560),
    // ceiling
    v(0.550, 0.550, 0.0),
    v(0.550, 0.550, 0.560),
    v(0.0, 0.550, 0.560),
    v(0.0, 0.550, 0.0),
    // back wall
    v(0.550, 0.0, 0.560),
    v(0.0, 0.0, 0.560),
    v(0.0, 0.550, 0.560),
    v(0.550, 0.550, 0.560),
    // front wall
    v(0.550, 0.0, 0.0),
    v(0.0, 0.0, 0.0),
    v(0.0, 0.550, 0.0),
    v(0.550, 0.550, 0.0),
];

const WHITE_NORMALS: [Vec3; 16] = [
    v(0.0, 1.0, 0.0),
    v(0.0, 1.0, 0.0),
    v(0.0, 1.0, 0.0),
    v(0.0, 1.0, 0.0),
    v(0.0, -1.0, 0.0),
    v(0.0, -1.0, 0.0),
    v(0.0, -1.0, 0.0),
    v(0.0, -1.0, 0.0),
    v(0.0, 0.0, -1.0),
    v(0.0, 0.0, -1.0),
    v(0.0, 0.0, -1.0),
    v(0.0, 0.0, -1.0),
    v(0.0, 0.0, 1.0),
    v(0.0, 0.0, 1.0),
    v(0.0, 0.0, 1.0),
    v(0.0, 0.0, 1.0),
];

// The front wall winds the other way so it faces into the box.
const WHITE_INDICES: [u32; 24] = [
    0, 1, 2, 0, 2, 3, //
    4, 5, 6, 4, 6, 7, //
    8, 9, 10, 8, 10, 11, //
    13, 12, 14, 14, 12, 15,
];

const BLUE_POSITIONS: [Vec3; 4] = [
    v(0.0, 0.0, 0.560),
    v(0.0, 0.0, 0.0),
    v(0.0, 0.550, 0.0),
    v(0.0, 0.550, 0.560),
];

const BLUE_NORMALS: [Vec3; 4] = [v(1.0, 0.0, 0.0); 4];

const RED_POSITIONS: [Vec3; 4] = [
    v(0.550, 0.0, 0.0),
    v(0.550, 0.0, 0.560),
    v(0.550, 0.550, 0.560),
    v(0.550, 0.550, 0.0),
];

const RED_NORMALS: [Vec3; 4] = [v(-1.0, 0.0, 0.0); 4];

const SHORT_BLOCK_POSITIONS: [Vec3; 20] = [
    v(0.130, 0.165, 0.065),
    v(0.082, 0.165, 0.225),
    v(0.240, 0.165, 0.272),
    v(0.290, 0.165, 0.114),
    v(0.290, 0.0, 0.114),
    v(0.290, 0.165, 0.114),
    v(0.240, 0.165, 0.272),
    v(0.240, 0.0, 0.272),
    v(0.130, 0.0, 0.065),
    v(0.130, 0.165, 0.065),
    v(0.290, 0.165, 0.114),
    v(0.290, 0.0, 0.114),
    v(0.082, 0.0, 0.225),
    v(0.082, 0.165, 0.225),
    v(0.130, 0.165, 0.065),
    v(0.130, 0.0, 0.065),
    v(0.240, 0.0, 0.272),
    v(0.240, 0.165, 0.272),
    v(0.082, 0.165, 0.225),
    v(0.082, 0.0, 0.225),
];

const SHORT_BLOCK_FACE_NORMALS: [Vec3; 5] = [
    v(0.0, 1.0, 0.0),
    v(0.953_400, 0.0, 0.301_709),
    v(0.292_826, 0.0, -0.956_166),
    v(-0.957_826, 0.0, -0.287_348),
    v(-0.285_121, 0.0, 0.958_492),
];

const TALL_BLOCK_POSITIONS: [Vec3; 20] = [
    v(0.423, 0.330, 0.247),
    v(0.265, 0.330, 0.296),
    v(0.314, 0.330, 0.456),
    v(0.472, 0.330, 0.406),
    v(0.423, 0.0, 0.247),
    v(0.423, 0.330, 0.247),
    v(0.472, 0.330, 0.406),
    v(0.472, 0.0, 0.406),
    v(0.472, 0.0, 0.406),
    v(0.472, 0.330, 0.406),
    v(0.314, 0.330, 0.456),
    v(0.314, 0.0, 0.456),
    v(0.314, 0.0, 0.456),
    v(0.314, 0.330, 0.456),
    v(0.265, 0.330, 0.296),
    v(0.265, 0.0, 0.296),
    v(0.265, 0.0, 0.296),
    v(0.265, 0.330, 0.296),
    v(0.423, 0.330, 0.247),
    v(0.423, 0.0, 0.247),
];

const TALL_BLOCK_FACE_NORMALS: [Vec3; 5] = [
    v(0.0, 1.0, 0.0),
    v(0.955_649, 0.0, -0.294_508),
    v(0.301_709, 0.0, 0.953_400),
    v(-0.956_166, 0.0, 0.292_826),
    v(-0.296_209, 0.0, -0.955_123),
];

/// Four vertices per face, all sharing the face normal
fn per_face_normals(faces: &[Vec3; 5]) -> [Vec3; 20] {
    let mut normals = [Vec3::ZERO; 20];
    for (i, normal) in normals.iter_mut().enumerate() {
        *normal = faces[i / 4];
    }
    normals
}

/// Ceiling light facing down into the box
pub fn ceiling_light() -> AreaLight {
    let radiance = Vec3::splat(LIGHT_INTENSITY) * (PI / (LIGHT_WIDTH * LIGHT_HEIGHT));
    let mut transform = Mat4::rotation_x(PI);
    transform.set_translation(LIGHT_CENTRE);
    AreaLight::new(transform, radiance, LIGHT_WIDTH, LIGHT_HEIGHT)
}

/// Build the Cornell box within `capacity`
pub fn cornell_box(capacity: SceneCapacity) -> Result<Scene, SceneError> {
    let white = Material::diffuse(Vec3::new(0.7, 0.7, 0.7));
    let red = Material::diffuse(Vec3::new(0.7, 0.45, 0.45));
    let blue = Material::diffuse(Vec3::new(0.45, 0.45, 0.7));

    let mut builder = SceneBuilder::new(capacity);
    builder.add_mesh(&WHITE_POSITIONS, &WHITE_NORMALS, &WHITE_INDICES, white)?;
    builder.add_mesh(&BLUE_POSITIONS, &BLUE_NORMALS, &QUAD_INDICES, blue)?;
    builder.add_mesh(&RED_POSITIONS, &RED_NORMALS, &QUAD_INDICES, red)?;
    builder.add_mesh(
        &SHORT_BLOCK_POSITIONS,
        &per_face_normals(&SHORT_BLOCK_FACE_NORMALS),
        &BLOCK_INDICES,
        white,
    )?;
    builder.add_mesh(
        &TALL_BLOCK_POSITIONS,
        &per_face_normals(&TALL_BLOCK_FACE_NORMALS),
        &BLOCK_INDICES,
        white,
    )?;
    builder.add_area_light(ceiling_light())?;

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MeshRange;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cornell_box_shape() {
        let scene = cornell_box(SceneCapacity::default()).unwrap();
        assert_eq!(scene.mesh_count(), 5);
        assert_eq!(scene.positions().len(), 16 + 4 + 4 + 20 + 20);
        assert_eq!(scene.normals().len(), scene.positions().len());
        assert_eq!(scene.indices().len(), 24 + 6 + 6 + 30 + 30);
        assert_eq!(scene.lights().len(), 1);
        assert_eq!(
            scene.mesh_ranges(),
            &[
                MeshRange { start: 0, end: 24 },
                MeshRange { start: 24, end: 30 },
                MeshRange { start: 30, end: 36 },
                MeshRange { start: 36, end: 66 },
                MeshRange { start: 66, end: 96 },
            ]
        );
        // Tall block indices are based after the 44 preceding vertices.
        assert_eq!(&scene.indices()[66..69], &[44, 45, 46]);
        assert!(scene.indices().iter().all(|&i| (i as usize) < scene.positions().len()));
    }

    #[test]
    fn test_cornell_constants() {
        let scene = cornell_box(SceneCapacity::default()).unwrap();
        let block = scene.constants();
        assert_eq!(block.num_meshes, 5);
        assert_eq!(block.num_lights, 1);

        let expected = LIGHT_INTENSITY * PI / (LIGHT_WIDTH * LIGHT_HEIGHT);
        assert_abs_diff_eq!(block.area_lights[0].radiance[0], expected, epsilon = 1e-4);
        assert_eq!(block.area_lights[0].radiance[3], 0.0);
    }

    #[test]
    fn test_light_faces_down() {
        let light = ceiling_light();
        let normal = light.transform().transform_vector(Vec3::Y);
        assert_abs_diff_eq!(normal, Vec3::new(0.0, -1.0, 0.0), epsilon = 1e-5);
        assert_abs_diff_eq!(light.transform().translation(), LIGHT_CENTRE, epsilon = 1e-6);
    }

    #[test]
    fn test_too_small_capacity_fails() {
        let capacity = SceneCapacity { max_vertices: 40, ..SceneCapacity::default() };
        assert!(matches!(
            cornell_box(capacity),
            Err(SceneError::CapacityExceeded { kind: "vertex", .. })
        ));
    }
}
