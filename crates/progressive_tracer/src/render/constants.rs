//! Constant blocks shared with the integrator and tone-map programs
//!
//! These are plain fixed-layout records copied byte-for-byte into GPU memory.
//! Field order and sizes are part of the contract with the shader programs;
//! do not reorder.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Vec2, Vec3};

/// Number of area light slots in [`SceneConstants`]
pub const MAX_AREA_LIGHTS: usize = 4;

/// Alignment of every constant block inside the constant buffer
pub const CONSTANT_BLOCK_ALIGNMENT: u64 = 256;

/// Round `size` up to the constant block alignment
pub const fn align_constant_block(size: u64) -> u64 {
    (size + CONSTANT_BLOCK_ALIGNMENT - 1) & !(CONSTANT_BLOCK_ALIGNMENT - 1)
}

/// One rectangular area light as seen by the integrator
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct AreaLightBlock {
    /// Light-to-world transform
    pub transform: [f32; 16],
    /// World-to-light transform
    pub transform_inverse: [f32; 16],
    /// Emitted radiance, W unused
    pub radiance: [f32; 4],
    /// Half extent along the light's local X
    pub half_width: f32,
    /// Half extent along the light's local Y
    pub half_height: f32,
    /// 1 / (width * height)
    pub one_over_area: f32,
    /// Padding to a 16-byte multiple
    pub _padding: i32,
}

/// Scene-level constant block, written once at init
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneConstants {
    /// Area lights; only the first `num_lights` are meaningful
    pub area_lights: [AreaLightBlock; MAX_AREA_LIGHTS],
    /// Populated entries of `area_lights`
    pub num_lights: i32,
    /// Number of meshes in the scene arrays
    pub num_meshes: i32,
    /// Padding to a 16-byte multiple
    pub _padding: [i32; 2],
}

/// Per-frame view block, one copy per frame in flight
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewConstants {
    /// Inverse of projection * view
    pub view_projection_inverse: [f32; 16],
    /// Camera position in world space
    pub camera_position: [f32; 3],
    /// Samples already accumulated
    pub frame_index: i32,
    /// Sub-pixel ray offset in normalized device coordinates
    pub jitter: [f32; 2],
    /// Viewport width in pixels
    pub viewport_width: i32,
    /// Viewport height in pixels
    pub viewport_height: i32,
    /// Hash sampler stride
    pub seed_interval: i32,
    /// Hash sampler offset
    pub seed_offset: i32,
    /// Hash sampler increment
    pub seed_add: i32,
    /// Non-zero when the integrator's blur is enabled
    pub blur_enabled: i32,
}

/// Vertex of the screen-space quad
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    /// Clip-space position
    pub position: [f32; 2],
}

/// Fullscreen quad drawn as a triangle strip
pub const FULLSCREEN_QUAD: [QuadVertex; 4] = [
    QuadVertex { position: [-1.0, 1.0] },
    QuadVertex { position: [-1.0, -1.0] },
    QuadVertex { position: [1.0, 1.0] },
    QuadVertex { position: [1.0, -1.0] },
];

impl ViewConstants {
    /// Assemble the block from its parts
    pub fn new(
        view_projection_inverse: &Mat4,
        camera_position: Vec3,
        frame_index: u32,
        jitter: Vec2,
        viewport: (u32, u32),
        seeds: [i32; 3],
        blur_enabled: bool,
    ) -> Self {
        let [seed_offset, seed_interval, seed_add] = seeds;
        Self {
            view_projection_inverse: view_projection_inverse.to_cols_array(),
            camera_position: camera_position.to_array(),
            frame_index: i32::try_from(frame_index).unwrap_or(i32::MAX),
            jitter: jitter.to_array(),
            viewport_width: i32::try_from(viewport.0).unwrap_or(i32::MAX),
            viewport_height: i32::try_from(viewport.1).unwrap_or(i32::MAX),
            seed_interval,
            seed_offset,
            seed_add,
            blur_enabled: i32::from(blur_enabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_block_layouts() {
        assert_eq!(size_of::<AreaLightBlock>(), 160);
        assert_eq!(offset_of!(AreaLightBlock, radiance), 128);
        assert_eq!(offset_of!(AreaLightBlock, half_width), 144);

        assert_eq!(size_of::<SceneConstants>(), 4 * 160 + 16);
        assert_eq!(offset_of!(SceneConstants, num_lights), 640);
        assert_eq!(offset_of!(SceneConstants, num_meshes), 644);

        assert_eq!(size_of::<ViewConstants>(), 112);
        assert_eq!(offset_of!(ViewConstants, camera_position), 64);
        assert_eq!(offset_of!(ViewConstants, frame_index), 76);
        assert_eq!(offset_of!(ViewConstants, jitter), 80);
        assert_eq!(offset_of!(ViewConstants, seed_interval), 96);
        assert_eq!(offset_of!(ViewConstants, blur_enabled), 108);
    }

    #[test]
    fn test_alignment() {
        assert_eq!(align_constant_block(1), 256);
        assert_eq!(align_constant_block(256), 256);
        assert_eq!(align_constant_block(656), 768);
        assert_eq!(align_constant_block(0), 0);
    }

    #[test]
    fn test_view_constants_packs_fields() {
        let block = ViewConstants::new(
            &Mat4::IDENTITY,
            Vec3::new(1.0, 2.0, 3.0),
            9,
            Vec2::new(0.25, -0.25),
            (512, 256),
            [7, 100, 10],
            true,
        );
        assert_eq!(block.frame_index, 9);
        assert_eq!(block.camera_position, [1.0, 2.0, 3.0]);
        assert_eq!((block.viewport_width, block.viewport_height), (512, 256));
        assert_eq!((block.seed_offset, block.seed_interval, block.seed_add), (7, 100, 10));
        assert_eq!(block.blur_enabled, 1);
        assert_eq!(bytemuck::bytes_of(&block).len(), 112);
    }
}
