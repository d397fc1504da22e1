//! One-shot transfer of scene data into device-local memory
//!
//! Each array goes through a host-visible staging buffer and a recorded copy
//! into a device-local buffer, followed by a barrier into its read state. All
//! copies share one submission; the batch waits for it before the staging
//! buffers are released.

use bytemuck::Pod;

use crate::scene::Scene;

use super::backend::{
    BufferDesc, BufferResource, BufferUsage, CommandRecorder, GpuDevice, GpuResult, MemoryLocation,
    ResourceState, SceneBindings,
};
use super::constants::FULLSCREEN_QUAD;
use super::frame_sync::FenceTimeline;

/// Smallest buffer ever allocated; empty arrays still get a binding
pub const MIN_BUFFER_SIZE: u64 = 16;

/// Device-local scene arrays plus the fullscreen quad
pub struct SceneBuffers<D: GpuDevice> {
    /// Vertex positions
    pub positions: D::Buffer,
    /// Vertex normals
    pub normals: D::Buffer,
    /// Triangle indices
    pub indices: D::Buffer,
    /// Per-mesh materials
    pub materials: D::Buffer,
    /// Per-mesh index ranges
    pub mesh_ranges: D::Buffer,
    /// Screen-space quad vertices
    pub quad: D::Buffer,
}

impl<D: GpuDevice> SceneBuffers<D> {
    /// Borrow the integrator's read-only arrays
    pub fn bindings(&self) -> SceneBindings<'_, D> {
        SceneBindings {
            positions: &self.positions,
            normals: &self.normals,
            indices: &self.indices,
            materials: &self.materials,
            mesh_ranges: &self.mesh_ranges,
        }
    }
}

/// A batch of staged copies sharing one submission
pub struct UploadBatch<'d, D: GpuDevice> {
    device: &'d D,
    recorder: D::Recorder,
    staging: Vec<D::Buffer>,
    bytes: u64,
}

impl<'d, D: GpuDevice> UploadBatch<'d, D> {
    /// Open a batch with its own recording context
    pub fn new(device: &'d D) -> GpuResult<Self> {
        let mut recorder = device.create_recorder("upload")?;
        recorder.begin()?;
        Ok(Self { device, recorder, staging: Vec::new(), bytes: 0 })
    }

    /// Stage raw bytes into a new device-local buffer left in `final_state`
    pub fn stage_bytes(
        &mut self,
        label: &str,
        data: &[u8],
        usage: BufferUsage,
        final_state: ResourceState,
    ) -> GpuResult<D::Buffer> {
        let size = (data.len() as u64).max(MIN_BUFFER_SIZE);

        let staging = self.device.create_buffer(&BufferDesc {
            label: &format!("{label}-staging"),
            size,
            location: MemoryLocation::Upload,
            usage: BufferUsage::Staging,
        })?;
        if !data.is_empty() {
            staging.write(0, data)?;
        }

        let buffer = self.device.create_buffer(&BufferDesc {
            label,
            size,
            location: MemoryLocation::DeviceLocal,
            usage,
        })?;

        self.recorder.copy_buffer(&staging, &buffer, size)?;
        self.recorder
            .transition_buffer(&buffer, ResourceState::CopyDest, final_state)?;

        self.staging.push(staging);
        self.bytes += size;
        Ok(buffer)
    }

    /// Stage a slice of plain records
    pub fn stage<T: Pod>(
        &mut self,
        label: &str,
        items: &[T],
        usage: BufferUsage,
        final_state: ResourceState,
    ) -> GpuResult<D::Buffer> {
        self.stage_bytes(label, bytemuck::cast_slice(items), usage, final_state)
    }

    /// Submit every staged copy and wait for completion
    pub fn finish(mut self, timeline: &mut FenceTimeline) -> GpuResult<()> {
        self.recorder.end()?;
        self.device.submit(&mut self.recorder)?;
        timeline.flush(self.device)?;
        log::info!(
            "Uploaded {} buffers ({} bytes) to {}",
            self.staging.len(),
            self.bytes,
            self.device.name()
        );
        Ok(())
    }
}

/// Upload the scene arrays and the fullscreen quad
pub fn upload_scene<D: GpuDevice>(
    device: &D,
    scene: &Scene,
    timeline: &mut FenceTimeline,
) -> GpuResult<SceneBuffers<D>> {
    let read = ResourceState::ShaderResource;
    let mut batch = UploadBatch::new(device)?;
    let buffers = SceneBuffers {
        positions: batch.stage("positions", scene.positions(), BufferUsage::Storage, read)?,
        normals: batch.stage("normals", scene.normals(), BufferUsage::Storage, read)?,
        indices: batch.stage("indices", scene.indices(), BufferUsage::Storage, read)?,
        materials: batch.stage("materials", scene.materials(), BufferUsage::Storage, read)?,
        mesh_ranges: batch.stage("mesh-ranges", scene.mesh_ranges(), BufferUsage::Storage, read)?,
        quad: batch.stage(
            "fullscreen-quad",
            &FULLSCREEN_QUAD,
            BufferUsage::Vertex,
            ResourceState::VertexBuffer,
        )?,
    };
    batch.finish(timeline)?;
    Ok(buffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SceneCapacity;
    use crate::render::backend::GpuError;
    use crate::render::headless::{HeadlessDevice, HeadlessOptions, JournalCommand};
    use crate::scene::cornell::cornell_box;

    #[test]
    fn test_scene_reaches_device_memory() {
        let device = HeadlessDevice::new(HeadlessOptions::default()).unwrap();
        let scene = cornell_box(SceneCapacity::default()).unwrap();
        let mut timeline = FenceTimeline::new();

        let buffers = upload_scene(&device, &scene, &mut timeline).unwrap();

        assert_eq!(buffers.positions.contents(), bytemuck::cast_slice::<_, u8>(scene.positions()));
        assert_eq!(buffers.indices.contents(), bytemuck::cast_slice::<_, u8>(scene.indices()));
        assert_eq!(buffers.mesh_ranges.size(), 5 * 8);
        assert_eq!(buffers.quad.contents(), bytemuck::cast_slice::<_, u8>(&FULLSCREEN_QUAD));
        assert_eq!(device.completed_value().unwrap(), timeline.last_signaled());

        let journal = device.probe().journal();
        assert!(journal.violations.is_empty(), "{:?}", journal.violations);
        assert_eq!(journal.submissions.len(), 1);
        let copies = journal.submissions[0]
            .commands
            .iter()
            .filter(|c| matches!(c, JournalCommand::Copy { .. }))
            .count();
        assert_eq!(copies, 6);
        assert!(journal.released.iter().any(|label| label == "positions-staging"));
        assert!(!journal.released.iter().any(|label| label == "positions"));
    }

    #[test]
    fn test_empty_array_still_allocates() {
        let device = HeadlessDevice::new(HeadlessOptions::default()).unwrap();
        let mut timeline = FenceTimeline::new();
        let mut batch = UploadBatch::new(&device).unwrap();
        let buffer = batch
            .stage::<u32>("empty", &[], BufferUsage::Storage, ResourceState::ShaderResource)
            .unwrap();
        batch.finish(&mut timeline).unwrap();
        assert_eq!(buffer.size(), MIN_BUFFER_SIZE);
    }

    #[test]
    fn test_staging_failure_aborts() {
        let device = HeadlessDevice::new(HeadlessOptions {
            fail_staging_writes: true,
            ..HeadlessOptions::default()
        })
        .unwrap();
        let scene = cornell_box(SceneCapacity::default()).unwrap();
        let mut timeline = FenceTimeline::new();

        let result = upload_scene(&device, &scene, &mut timeline);
        assert!(matches!(result, Err(GpuError::MapFailed { .. })));
        assert!(device.probe().journal().submissions.is_empty());
    }
}
