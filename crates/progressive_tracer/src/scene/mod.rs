//! Static scene description
//!
//! The scene is assembled once at startup through [`SceneBuilder`] and frozen
//! into an immutable [`Scene`]. All meshes share one vertex array and one index
//! array; each mesh owns a contiguous slice of the index array.

pub mod cornell;

use bytemuck::{Pod, Zeroable};

use crate::core::config::SceneCapacity;
use crate::foundation::math::{constants::PI, Mat4, Vec3, Vec4};
use crate::render::constants::{AreaLightBlock, SceneConstants, MAX_AREA_LIGHTS};

pub use cornell::cornell_box;

/// Errors raised while building a scene
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// A fixed capacity would be exceeded
    #[error("{kind} capacity exceeded: {requested} requested, {capacity} available")]
    CapacityExceeded {
        /// Which array overflowed
        kind: &'static str,
        /// Total the call would have produced
        requested: usize,
        /// Configured limit
        capacity: usize,
    },

    /// Positions and normals differ in length
    #[error("mesh has {positions} positions but {normals} normals")]
    MismatchedNormals {
        /// Position count
        positions: usize,
        /// Normal count
        normals: usize,
    },

    /// An index refers past the end of the mesh's own vertices
    #[error("index {index} out of range for a mesh with {vertex_count} vertices")]
    IndexOutOfRange {
        /// Offending local index
        index: u32,
        /// Vertices supplied with the mesh
        vertex_count: usize,
    },

    /// Index count is not a whole number of triangles
    #[error("index count {0} is not a multiple of 3")]
    IncompleteTriangle(usize),
}

/// Surface response of one mesh
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Material {
    /// Diffuse albedo already divided by pi
    pub albedo: Vec4,
    /// Emitted radiance
    pub emissive: Vec4,
}

impl Material {
    /// Lambertian material from a reflectance colour
    pub fn diffuse(reflectance: Vec3) -> Self {
        Self {
            albedo: (reflectance * (1.0 / PI)).extend(0.0),
            emissive: Vec4::ZERO,
        }
    }
}

/// Half-open `[start, end)` range into the shared index array
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct MeshRange {
    /// First index of the mesh
    pub start: u32,
    /// One past the last index of the mesh
    pub end: u32,
}

impl MeshRange {
    /// Number of indices
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// True when the mesh has no indices
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Rectangular emitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaLight {
    transform: Mat4,
    transform_inverse: Mat4,
    radiance: Vec3,
    half_width: f32,
    half_height: f32,
    one_over_area: f32,
}

impl AreaLight {
    /// Create a light of `width` x `height` placed by `transform`.
    ///
    /// The inverse transform is derived here, once.
    pub fn new(transform: Mat4, radiance: Vec3, width: f32, height: f32) -> Self {
        Self {
            transform,
            transform_inverse: transform.inverse(),
            radiance,
            half_width: width * 0.5,
            half_height: height * 0.5,
            one_over_area: 1.0 / (width * height),
        }
    }

    /// Light-to-world transform
    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }

    /// World-to-light transform
    pub fn transform_inverse(&self) -> &Mat4 {
        &self.transform_inverse
    }

    /// Emitted radiance
    pub fn radiance(&self) -> Vec3 {
        self.radiance
    }

    /// Half extents (width, height)
    pub fn half_extent(&self) -> (f32, f32) {
        (self.half_width, self.half_height)
    }

    /// Reciprocal of the emitting area
    pub fn one_over_area(&self) -> f32 {
        self.one_over_area
    }

    fn to_block(self) -> AreaLightBlock {
        AreaLightBlock {
            transform: self.transform.to_cols_array(),
            transform_inverse: self.transform_inverse.to_cols_array(),
            radiance: self.radiance.extend(0.0).to_array(),
            half_width: self.half_width,
            half_height: self.half_height,
            one_over_area: self.one_over_area,
            _padding: 0,
        }
    }
}

/// Accumulates meshes and lights up to fixed capacities
#[derive(Debug, Clone)]
pub struct SceneBuilder {
    capacity: SceneCapacity,
    positions: Vec<Vec4>,
    normals: Vec<Vec4>,
    indices: Vec<u32>,
    materials: Vec<Material>,
    ranges: Vec<MeshRange>,
    lights: Vec<AreaLight>,
}

impl SceneBuilder {
    /// Empty builder bounded by `capacity`
    pub fn new(capacity: SceneCapacity) -> Self {
        Self {
            capacity,
            positions: Vec::new(),
            normals: Vec::new(),
            indices: Vec::new(),
            materials: Vec::new(),
            ranges: Vec::new(),
            lights: Vec::new(),
        }
    }

    /// Vertices added so far
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Indices added so far
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Append one mesh.
    ///
    /// Indices are local to `positions` and get re-based onto the shared
    /// vertex array. On error the builder is left unchanged.
    pub fn add_mesh(
        &mut self,
        positions: &[Vec3],
        normals: &[Vec3],
        indices: &[u32],
        material: Material,
    ) -> Result<MeshRange, SceneError> {
        if positions.len() != normals.len() {
            return Err(SceneError::MismatchedNormals {
                positions: positions.len(),
                normals: normals.len(),
            });
        }
        if indices.len() % 3 != 0 {
            return Err(SceneError::IncompleteTriangle(indices.len()));
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(SceneError::IndexOutOfRange {
                index,
                vertex_count: positions.len(),
            });
        }

        let cap = self.capacity;
        check_capacity("vertex", self.positions.len() + positions.len(), cap.max_vertices)?;
        check_capacity("index", self.indices.len() + indices.len(), cap.max_indices)?;
        check_capacity("material", self.materials.len() + 1, cap.max_materials)?;
        check_capacity("mesh", self.ranges.len() + 1, cap.max_meshes)?;

        let base = index_u32(self.positions.len())?;
        let start = index_u32(self.indices.len())?;
        let end = index_u32(self.indices.len() + indices.len())?;

        self.positions.extend(positions.iter().map(|p| p.extend(1.0)));
        self.normals.extend(normals.iter().map(|n| n.extend(0.0)));
        self.indices.extend(indices.iter().map(|&i| i + base));
        self.materials.push(material);

        let range = MeshRange { start, end };
        self.ranges.push(range);
        log::trace!(
            "Added mesh {} with {} vertices, indices [{}, {})",
            self.ranges.len() - 1,
            positions.len(),
            range.start,
            range.end
        );
        Ok(range)
    }

    /// Append one area light
    pub fn add_area_light(&mut self, light: AreaLight) -> Result<(), SceneError> {
        let limit = self.capacity.max_lights.min(MAX_AREA_LIGHTS);
        check_capacity("light", self.lights.len() + 1, limit)?;
        self.lights.push(light);
        Ok(())
    }

    /// Freeze the scene
    pub fn build(self) -> Scene {
        log::debug!(
            "Scene built: {} meshes, {} vertices, {} indices, {} lights",
            self.ranges.len(),
            self.positions.len(),
            self.indices.len(),
            self.lights.len()
        );
        Scene {
            positions: self.positions,
            normals: self.normals,
            indices: self.indices,
            materials: self.materials,
            ranges: self.ranges,
            lights: self.lights,
        }
    }
}

fn check_capacity(kind: &'static str, requested: usize, capacity: usize) -> Result<(), SceneError> {
    if requested > capacity {
        Err(SceneError::CapacityExceeded { kind, requested, capacity })
    } else {
        Ok(())
    }
}

fn index_u32(value: usize) -> Result<u32, SceneError> {
    u32::try_from(value).map_err(|_| SceneError::CapacityExceeded {
        kind: "index",
        requested: value,
        capacity: u32::MAX as usize,
    })
}

/// Immutable scene arrays
#[derive(Debug, Clone)]
pub struct Scene {
    positions: Vec<Vec4>,
    normals: Vec<Vec4>,
    indices: Vec<u32>,
    materials: Vec<Material>,
    ranges: Vec<MeshRange>,
    lights: Vec<AreaLight>,
}

impl Scene {
    /// Vertex positions, W = 1
    pub fn positions(&self) -> &[Vec4] {
        &self.positions
    }

    /// Vertex normals, W = 0
    pub fn normals(&self) -> &[Vec4] {
        &self.normals
    }

    /// Shared, globally based triangle indices
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// One material per mesh
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// One index range per mesh
    pub fn mesh_ranges(&self) -> &[MeshRange] {
        &self.ranges
    }

    /// Area lights
    pub fn lights(&self) -> &[AreaLight] {
        &self.lights
    }

    /// Number of meshes
    pub fn mesh_count(&self) -> usize {
        self.ranges.len()
    }

    /// Scene-level constant block for the integrator
    pub fn constants(&self) -> SceneConstants {
        let mut block = SceneConstants::zeroed();
        for (slot, light) in block.area_lights.iter_mut().zip(&self.lights) {
            *slot = light.to_block();
        }
        // Both counts are bounded by the builder's capacities.
        block.num_lights = self.lights.len() as i32;
        block.num_meshes = self.ranges.len() as i32;
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn triangle() -> ([Vec3; 3], [Vec3; 3]) {
        (
            [Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)],
            [Vec3::new(0.0, 0.0, 1.0); 3],
        )
    }

    #[test]
    fn test_add_mesh_rebases_indices() {
        let mut builder = SceneBuilder::new(SceneCapacity::default());
        let (pos, nor) = triangle();
        builder.add_mesh(&pos, &nor, &[0, 1, 2], Material::default()).unwrap();
        let quad = [pos[0], pos[1], pos[2], pos[0]];
        builder
            .add_mesh(&quad, &[nor[0]; 4], &[0, 1, 2, 0, 2, 3], Material::default())
            .unwrap();

        let prior_vertices = builder.vertex_count() as u32;
        let prior_indices = builder.index_count() as u32;
        let range = builder.add_mesh(&pos, &nor, &[0, 1, 2], Material::default()).unwrap();

        let scene = builder.build();
        let tail = &scene.indices()[prior_indices as usize..];
        assert_eq!(tail, &[prior_vertices, prior_vertices + 1, prior_vertices + 2]);
        assert_eq!(range, MeshRange { start: prior_indices, end: prior_indices + 3 });
        assert_eq!(scene.mesh_count(), 3);
    }

    #[test]
    fn test_ranges_are_contiguous() {
        let mut builder = SceneBuilder::new(SceneCapacity::default());
        let (pos, nor) = triangle();
        for _ in 0..4 {
            builder.add_mesh(&pos, &nor, &[0, 1, 2, 2, 1, 0], Material::default()).unwrap();
        }
        let scene = builder.build();
        let mut expected_start = 0;
        for range in scene.mesh_ranges() {
            assert_eq!(range.start, expected_start);
            expected_start = range.end;
        }
        assert_eq!(expected_start as usize, scene.indices().len());
    }

    #[test]
    fn test_vertex_capacity_is_enforced() {
        let capacity = SceneCapacity { max_vertices: 5, ..SceneCapacity::default() };
        let mut builder = SceneBuilder::new(capacity);
        let (pos, nor) = triangle();
        builder.add_mesh(&pos, &nor, &[0, 1, 2], Material::default()).unwrap();

        let err = builder.add_mesh(&pos, &nor, &[0, 1, 2], Material::default()).unwrap_err();
        assert_eq!(err, SceneError::CapacityExceeded { kind: "vertex", requested: 6, capacity: 5 });
        assert_eq!(builder.vertex_count(), 3);
        assert_eq!(builder.index_count(), 3);
    }

    #[test]
    fn test_mesh_capacity_is_enforced() {
        let capacity = SceneCapacity { max_meshes: 1, ..SceneCapacity::default() };
        let mut builder = SceneBuilder::new(capacity);
        let (pos, nor) = triangle();
        builder.add_mesh(&pos, &nor, &[0, 1, 2], Material::default()).unwrap();
        assert!(matches!(
            builder.add_mesh(&pos, &nor, &[0, 1, 2], Material::default()),
            Err(SceneError::CapacityExceeded { kind: "mesh", .. })
        ));
    }

    #[test]
    fn test_rejects_malformed_meshes() {
        let mut builder = SceneBuilder::new(SceneCapacity::default());
        let (pos, nor) = triangle();
        assert!(matches!(
            builder.add_mesh(&pos, &nor[..2], &[0, 1, 2], Material::default()),
            Err(SceneError::MismatchedNormals { positions: 3, normals: 2 })
        ));
        assert_eq!(
            builder.add_mesh(&pos, &nor, &[0, 1, 3], Material::default()),
            Err(SceneError::IndexOutOfRange { index: 3, vertex_count: 3 })
        );
        assert_eq!(
            builder.add_mesh(&pos, &nor, &[0, 1], Material::default()),
            Err(SceneError::IncompleteTriangle(2))
        );
        assert_eq!(builder.vertex_count(), 0);
    }

    #[test]
    fn test_light_capacity() {
        let capacity = SceneCapacity { max_lights: 1, ..SceneCapacity::default() };
        let mut builder = SceneBuilder::new(capacity);
        let light = AreaLight::new(Mat4::IDENTITY, Vec3::splat(1.0), 1.0, 1.0);
        builder.add_area_light(light).unwrap();
        assert!(builder.add_area_light(light).is_err());
    }

    #[test]
    fn test_area_light_inverse_is_exact() {
        let mut transform = Mat4::rotation_x(PI);
        transform.set_translation(Vec3::new(0.278, 0.549, 0.2795));
        let light = AreaLight::new(transform, Vec3::splat(1.0), 0.13, 0.105);

        assert_abs_diff_eq!(
            *light.transform() * *light.transform_inverse(),
            Mat4::IDENTITY,
            epsilon = 1e-5
        );
        assert_abs_diff_eq!(light.one_over_area(), 1.0 / (0.13 * 0.105), epsilon = 1e-3);
        assert_eq!(light.half_extent(), (0.065, 0.0525));
    }

    #[test]
    fn test_constants_counts_match_arrays() {
        let mut builder = SceneBuilder::new(SceneCapacity::default());
        let (pos, nor) = triangle();
        builder.add_mesh(&pos, &nor, &[0, 1, 2], Material::default()).unwrap();
        builder.add_mesh(&pos, &nor, &[0, 1, 2], Material::default()).unwrap();
        builder
            .add_area_light(AreaLight::new(Mat4::IDENTITY, Vec3::splat(2.0), 2.0, 1.0))
            .unwrap();
        let scene = builder.build();
        let block = scene.constants();

        assert_eq!(block.num_meshes, 2);
        assert_eq!(block.num_lights, 1);
        assert_eq!(block.area_lights[0].radiance, [2.0, 2.0, 2.0, 0.0]);
        assert_eq!(block.area_lights[0].one_over_area, 0.5);
        assert_eq!(block.area_lights[1], AreaLightBlock::zeroed());
    }

    #[test]
    fn test_diffuse_divides_by_pi() {
        let material = Material::diffuse(Vec3::new(0.7, 0.45, 0.45));
        assert_abs_diff_eq!(
            material.albedo,
            Vec4::new(0.7 / PI, 0.45 / PI, 0.45 / PI, 0.0),
            epsilon = 1e-6
        );
        assert_eq!(material.emissive, Vec4::ZERO);
    }
}
