//! Simulated accelerator
//!
//! [`HeadlessDevice`] implements [`GpuDevice`] without any GPU: a worker
//! thread plays the role of the queue, executing submissions in FIFO order
//! (optionally after an artificial latency) and advancing the fence when it
//! reaches a signal. Buffer copies are carried out for real on host memory.
//!
//! Everything that happens is written to a [`Journal`], and misuse that would
//! be undefined behaviour on real hardware is recorded as a violation:
//! barriers whose `before` state does not match the tracked state, contexts
//! reset while still executing, and resources released while a pending
//! submission still references them.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::backend::{
    BufferDesc, BufferResource, BufferUsage, CommandRecorder, GpuDevice, GpuError, GpuResult,
    IntegratorPass, MemoryLocation, ResourceState, TextureDesc, TextureFormat, TextureResource,
    ToneMapPass,
};

/// Tuning of the simulated device
#[derive(Debug, Clone, Default)]
pub struct HeadlessOptions {
    /// Time the worker spends on each submission
    pub latency: Duration,
    /// Make every write to a staging buffer fail, as a lost device would
    pub fail_staging_writes: bool,
}

/// A command as it reached the simulated queue
#[derive(Debug, Clone, PartialEq)]
pub enum JournalCommand {
    /// Buffer to buffer copy
    Copy {
        /// Source label
        src: String,
        /// Destination label
        dst: String,
        /// Bytes copied
        size: u64,
    },
    /// State transition
    Transition {
        /// Resource label
        resource: String,
        /// State before the barrier
        before: ResourceState,
        /// State after the barrier
        after: ResourceState,
    },
    /// Render target clear
    Clear {
        /// Texture label
        texture: String,
        /// Clear colour
        color: [f32; 4],
    },
    /// Integrator invocation
    Integrator {
        /// Accumulation target label
        target: String,
        /// Target size
        extent: (u32, u32),
        /// Blend factor handed to the pass
        blend_factor: f32,
        /// Samples already accumulated
        frame_index: u32,
        /// View block offset
        view_offset: u64,
    },
    /// Tone-map invocation
    ToneMap {
        /// Accumulation buffer label
        source: String,
        /// Present target label
        target: String,
        /// View block offset
        view_offset: u64,
    },
}

/// One submission as seen by the queue
#[derive(Debug, Clone, PartialEq)]
pub struct JournalSubmission {
    /// Queue-wide submission number, starting at 1
    pub batch: u64,
    /// Label of the recording context
    pub recorder: String,
    /// Recorded commands in order
    pub commands: Vec<JournalCommand>,
}

/// Everything the simulated device observed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Journal {
    /// Submissions in queue order
    pub submissions: Vec<JournalSubmission>,
    /// Labels of presented targets in order
    pub presents: Vec<String>,
    /// Fence values signaled, in order
    pub signals: Vec<u64>,
    /// Labels of released resources in release order
    pub released: Vec<String>,
    /// Calls to `wait_for` that actually had to block
    pub blocking_waits: usize,
    /// Misuse that real hardware would not have survived
    pub violations: Vec<String>,
}

#[derive(Debug, Default)]
struct QueueState {
    completed: u64,
    executed_batches: u64,
}

#[derive(Debug, Default)]
struct Tracking {
    journal: Journal,
    states: HashMap<u64, ResourceState>,
    last_use: HashMap<u64, u64>,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<QueueState>,
    progress: Condvar,
    tracking: Mutex<Tracking>,
    next_id: AtomicU64,
    options: HeadlessOptions,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn executed_batches(&self) -> u64 {
        lock(&self.queue).executed_batches
    }

    fn register(&self, id: u64, state: ResourceState) {
        lock(&self.tracking).states.insert(id, state);
    }

    fn release(&self, id: u64, label: &str) {
        let executed = self.executed_batches();
        let mut tracking = lock(&self.tracking);
        if let Some(&batch) = tracking.last_use.get(&id) {
            if batch > executed {
                tracking.journal.violations.push(format!(
                    "'{label}' released while submission {batch} was still pending"
                ));
            }
        }
        tracking.states.remove(&id);
        tracking.last_use.remove(&id);
        tracking.journal.released.push(label.to_string());
    }
}

/// Read access to a headless device's journal that outlives the device
#[derive(Debug, Clone)]
pub struct HeadlessProbe {
    shared: Arc<Shared>,
}

impl HeadlessProbe {
    /// Snapshot of the journal
    pub fn journal(&self) -> Journal {
        lock(&self.shared.tracking).journal.clone()
    }

    /// Fence value reached by the simulated queue
    pub fn completed_value(&self) -> u64 {
        lock(&self.shared.queue).completed
    }
}

type HostMemory = Arc<Mutex<Vec<u8>>>;

enum Work {
    Execute {
        batch: u64,
        copies: Vec<(HostMemory, HostMemory, usize)>,
    },
    Signal(u64),
}

/// Simulated accelerator
pub struct HeadlessDevice {
    shared: Arc<Shared>,
    sender: Option<Sender<Work>>,
    worker: Option<JoinHandle<()>>,
    last_batch: Cell<u64>,
    last_signaled: Cell<u64>,
}

impl HeadlessDevice {
    /// Start the simulated queue
    pub fn new(options: HeadlessOptions) -> GpuResult<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState::default()),
            progress: Condvar::new(),
            tracking: Mutex::new(Tracking::default()),
            next_id: AtomicU64::new(0),
            options,
        });

        let (sender, receiver) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("headless-queue".to_string())
            .spawn(move || run_queue(&worker_shared, &receiver))
            .map_err(|e| GpuError::Api(format!("failed to start queue thread: {e}")))?;

        log::info!(
            "Headless device started (latency {:?}, failing staging writes: {})",
            shared.options.latency,
            shared.options.fail_staging_writes
        );

        Ok(Self {
            shared,
            sender: Some(sender),
            worker: Some(worker),
            last_batch: Cell::new(0),
            last_signaled: Cell::new(0),
        })
    }

    /// Handle for inspecting the journal, usable after the device is gone
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe { shared: Arc::clone(&self.shared) }
    }

    fn send(&self, work: Work) -> GpuResult<()> {
        self.sender
            .as_ref()
            .ok_or(GpuError::DeviceLost)?
            .send(work)
            .map_err(|_| GpuError::DeviceLost)
    }
}

fn run_queue(shared: &Shared, receiver: &Receiver<Work>) {
    while let Ok(work) = receiver.recv() {
        match work {
            Work::Execute { batch, copies } => {
                if !shared.options.latency.is_zero() {
                    std::thread::sleep(shared.options.latency);
                }
                for (src, dst, size) in copies {
                    let src = lock(&src);
                    let mut dst = lock(&dst);
                    dst[..size].copy_from_slice(&src[..size]);
                }
                lock(&shared.queue).executed_batches = batch;
                shared.progress.notify_all();
            }
            Work::Signal(value) => {
                let mut queue = lock(&shared.queue);
                queue.completed = queue.completed.max(value);
                drop(queue);
                shared.progress.notify_all();
            }
        }
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish what is queued and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Headless queue thread panicked");
            }
        }
        log::debug!("Headless device shut down");
    }
}

/// Buffer backed by host memory
pub struct HeadlessBuffer {
    id: u64,
    label: String,
    size: u64,
    location: MemoryLocation,
    usage: BufferUsage,
    memory: HostMemory,
    shared: Arc<Shared>,
}

impl HeadlessBuffer {
    /// Current contents. Only meaningful once the queue has caught up.
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.memory).clone()
    }
}

impl BufferResource for HeadlessBuffer {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn write(&self, offset: u64, data: &[u8]) -> GpuResult<()> {
        if self.location != MemoryLocation::Upload {
            return Err(GpuError::invalid(format!("'{}' is not host visible", self.label)));
        }
        if self.usage == BufferUsage::Staging && self.shared.options.fail_staging_writes {
            return Err(GpuError::MapFailed {
                label: self.label.clone(),
                reason: "device removed".to_string(),
            });
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                GpuError::invalid(format!(
                    "write of {} bytes at {offset} overruns '{}' ({} bytes)",
                    data.len(),
                    self.label,
                    self.size
                ))
            })?;
        lock(&self.memory)[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        self.shared.release(self.id, &self.label);
    }
}

/// Texture with no storage, only an identity
pub struct HeadlessTexture {
    id: u64,
    label: String,
    extent: (u32, u32),
    format: TextureFormat,
    shared: Arc<Shared>,
}

impl TextureResource for HeadlessTexture {
    fn label(&self) -> &str {
        &self.label
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn format(&self) -> TextureFormat {
        self.format
    }
}

impl Drop for HeadlessTexture {
    fn drop(&mut self) {
        self.shared.release(self.id, &self.label);
    }
}

enum Op {
    Copy {
        src: (u64, String, HostMemory),
        dst: (u64, String, HostMemory),
        size: u64,
    },
    Transition {
        id: u64,
        label: String,
        before: ResourceState,
        after: ResourceState,
    },
    Touch(u64, JournalCommand),
}

/// Recording context of the simulated device
pub struct HeadlessRecorder {
    id: u64,
    label: String,
    ops: Vec<Op>,
    recording: bool,
    last_batch: u64,
    shared: Arc<Shared>,
}

impl HeadlessRecorder {
    fn ensure_recording(&self) -> GpuResult<()> {
        if self.recording {
            Ok(())
        } else {
            Err(GpuError::invalid(format!("'{}' is not recording", self.label)))
        }
    }

    fn push(&mut self, op: Op) -> GpuResult<()> {
        self.ensure_recording()?;
        self.ops.push(op);
        Ok(())
    }
}

impl CommandRecorder<HeadlessDevice> for HeadlessRecorder {
    fn label(&self) -> &str {
        &self.label
    }

    fn begin(&mut self) -> GpuResult<()> {
        if self.recording {
            return Err(GpuError::invalid(format!("'{}' is already recording", self.label)));
        }
        if self.last_batch > self.shared.executed_batches() {
            let mut tracking = lock(&self.shared.tracking);
            tracking.journal.violations.push(format!(
                "'{}' reset while submission {} was still executing",
                self.label, self.last_batch
            ));
            return Err(GpuError::RecorderInFlight { label: self.label.clone() });
        }
        self.ops.clear();
        self.recording = true;
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &HeadlessBuffer,
        dst: &HeadlessBuffer,
        size: u64,
    ) -> GpuResult<()> {
        if size > src.size || size > dst.size {
            return Err(GpuError::invalid(format!(
                "copy of {size} bytes from '{}' to '{}' overruns a buffer",
                src.label, dst.label
            )));
        }
        self.push(Op::Copy {
            src: (src.id, src.label.clone(), Arc::clone(&src.memory)),
            dst: (dst.id, dst.label.clone(), Arc::clone(&dst.memory)),
            size,
        })
    }

    fn transition_buffer(
        &mut self,
        buffer: &HeadlessBuffer,
        before: ResourceState,
        after: ResourceState,
    ) -> GpuResult<()> {
        self.push(Op::Transition { id: buffer.id, label: buffer.label.clone(), before, after })
    }

    fn transition_texture(
        &mut self,
        texture: &HeadlessTexture,
        before: ResourceState,
        after: ResourceState,
    ) -> GpuResult<()> {
        self.push(Op::Transition { id: texture.id, label: texture.label.clone(), before, after })
    }

    fn clear_texture(&mut self, texture: &HeadlessTexture, color: [f32; 4]) -> GpuResult<()> {
        self.push(Op::Touch(
            texture.id,
            JournalCommand::Clear { texture: texture.label.clone(), color },
        ))
    }

    fn integrator_pass(&mut self, pass: &IntegratorPass<'_, HeadlessDevice>) -> GpuResult<()> {
        self.push(Op::Touch(
            pass.target.id,
            JournalCommand::Integrator {
                target: pass.target.label.clone(),
                extent: pass.target.extent,
                blend_factor: pass.blend_factor,
                frame_index: pass.frame_index,
                view_offset: pass.view_offset,
            },
        ))
    }

    fn tone_map_pass(&mut self, pass: &ToneMapPass<'_, HeadlessDevice>) -> GpuResult<()> {
        self.push(Op::Touch(
            pass.target.id,
            JournalCommand::ToneMap {
                source: pass.source.label.clone(),
                target: pass.target.label.clone(),
                view_offset: pass.view_offset,
            },
        ))
    }

    fn end(&mut self) -> GpuResult<()> {
        self.ensure_recording()?;
        self.recording = false;
        Ok(())
    }
}

impl Drop for HeadlessRecorder {
    fn drop(&mut self) {
        self.shared.release(self.id, &self.label);
    }
}

impl GpuDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type Recorder = HeadlessRecorder;

    fn name(&self) -> &str {
        "headless"
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> GpuResult<HeadlessBuffer> {
        let len = usize::try_from(desc.size)
            .map_err(|_| GpuError::OutOfMemory { requested: desc.size })?;
        let id = self.shared.allocate_id();
        let initial = match desc.location {
            MemoryLocation::DeviceLocal => ResourceState::CopyDest,
            MemoryLocation::Upload => ResourceState::ShaderResource,
        };
        self.shared.register(id, initial);
        log::trace!("Created buffer '{}' ({} bytes, {:?})", desc.label, desc.size, desc.location);
        Ok(HeadlessBuffer {
            id,
            label: desc.label.to_string(),
            size: desc.size,
            location: desc.location,
            usage: desc.usage,
            memory: Arc::new(Mutex::new(vec![0; len])),
            shared: Arc::clone(&self.shared),
        })
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> GpuResult<HeadlessTexture> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::invalid(format!("'{}' has an empty extent", desc.label)));
        }
        let id = self.shared.allocate_id();
        self.shared.register(id, desc.initial_state);
        log::trace!(
            "Created texture '{}' ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(HeadlessTexture {
            id,
            label: desc.label.to_string(),
            extent: (desc.width, desc.height),
            format: desc.format,
            shared: Arc::clone(&self.shared),
        })
    }

    fn create_recorder(&self, label: &str) -> GpuResult<HeadlessRecorder> {
        Ok(HeadlessRecorder {
            id: self.shared.allocate_id(),
            label: label.to_string(),
            ops: Vec::new(),
            recording: false,
            last_batch: 0,
            shared: Arc::clone(&self.shared),
        })
    }

    fn submit(&self, recorder: &mut HeadlessRecorder) -> GpuResult<()> {
        if recorder.recording {
            return Err(GpuError::invalid(format!(
                "'{}' submitted while recording",
                recorder.label
            )));
        }

        let batch = self.last_batch.get() + 1;
        let mut copies = Vec::new();
        let mut commands = Vec::with_capacity(recorder.ops.len());
        {
            let mut tracking = lock(&self.shared.tracking);
            tracking.last_use.insert(recorder.id, batch);
            for op in &recorder.ops {
                match op {
                    Op::Copy { src, dst, size } => {
                        tracking.last_use.insert(src.0, batch);
                        tracking.last_use.insert(dst.0, batch);
                        // Sizes were bounds-checked against both buffers at record time.
                        copies.push((Arc::clone(&src.2), Arc::clone(&dst.2), *size as usize));
                        commands.push(JournalCommand::Copy {
                            src: src.1.clone(),
                            dst: dst.1.clone(),
                            size: *size,
                        });
                    }
                    Op::Transition { id, label, before, after } => {
                        tracking.last_use.insert(*id, batch);
                        let tracked = tracking.states.insert(*id, *after);
                        if tracked != Some(*before) {
                            tracking.journal.violations.push(format!(
                                "barrier on '{label}' assumed {before} but resource was {}",
                                tracked.map_or_else(|| "untracked".to_string(), |s| s.to_string())
                            ));
                        }
                        commands.push(JournalCommand::Transition {
                            resource: label.clone(),
                            before: *before,
                            after: *after,
                        });
                    }
                    Op::Touch(id, command) => {
                        tracking.last_use.insert(*id, batch);
                        commands.push(command.clone());
                    }
                }
            }
            tracking.journal.submissions.push(JournalSubmission {
                batch,
                recorder: recorder.label.clone(),
                commands,
            });
        }

        self.send(Work::Execute { batch, copies })?;
        self.last_batch.set(batch);
        recorder.last_batch = batch;
        Ok(())
    }

    fn signal(&self, value: u64) -> GpuResult<()> {
        if value <= self.last_signaled.get() {
            return Err(GpuError::invalid(format!(
                "fence values must increase: {value} after {}",
                self.last_signaled.get()
            )));
        }
        lock(&self.shared.tracking).journal.signals.push(value);
        self.send(Work::Signal(value))?;
        self.last_signaled.set(value);
        Ok(())
    }

    fn completed_value(&self) -> GpuResult<u64> {
        Ok(lock(&self.shared.queue).completed)
    }

    fn wait_for(&self, value: u64) -> GpuResult<()> {
        if value > self.last_signaled.get() {
            return Err(GpuError::invalid(format!(
                "waiting for fence value {value} which was never signaled"
            )));
        }
        let mut queue = lock(&self.shared.queue);
        if queue.completed >= value {
            return Ok(());
        }
        lock(&self.shared.tracking).journal.blocking_waits += 1;
        while queue.completed < value {
            queue = self
                .shared
                .progress
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    fn present(&self, target: &HeadlessTexture) -> GpuResult<()> {
        lock(&self.shared.tracking).journal.presents.push(target.label.clone());
        Ok(())
    }
}
