//! Frames-in-flight scheduling over a single monotonic fence
//!
//! The CPU records frame N+1 while the GPU may still be executing frame N.
//! Every per-frame resource (recording context, present target, view block)
//! is therefore replicated once per slot, and a slot is only handed out again
//! after the fence value stored at its last submission has been reached.
//!
//! ## Timeline
//!
//! ```text
//! slot 0: [record] submit(v=1) ................. wait(1) [record] submit(v=3)
//! slot 1:                 [record] submit(v=2) ............... wait(2) ...
//! GPU:          [frame v=1]      [frame v=2]      [frame v=3]
//! ```
//!
//! ## Ownership of a slot
//!
//! [`FrameScheduler::acquire_slot`] returns an [`AcquiredSlot`] token that is
//! consumed by [`FrameScheduler::submit`]. The token is not `Clone`, and only
//! one may be outstanding at a time, so a slot can never be recorded twice or
//! submitted without first being acquired.
//!
//! Once the device has accepted a slot's work the slot counts as in flight.
//! If the fence signal for that work then fails, nothing can tell when the
//! slot is free again, so the scheduler is marked lost and every later
//! acquisition fails with [`GpuError::DeviceLost`] until a successful
//! [`FrameScheduler::drain_all`] covers the unfenced work.
//!
//! ## Drain
//!
//! [`FrameScheduler::drain_all`] signals one more value and waits for it.
//! Because the queue is FIFO, this covers every earlier submission; it is
//! required before anything the GPU might still be reading is released or
//! replaced.

use crate::core::config::MAX_FRAMES_IN_FLIGHT;

use super::backend::{
    CommandRecorder, GpuDevice, GpuError, GpuResult, ResourceState, TextureDesc, TextureFormat,
    TextureResource, TextureUsage,
};

/// Format of the per-slot present targets
pub const PRESENT_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// CPU side of the device fence
///
/// Values handed to the device strictly increase, starting at 1.
#[derive(Debug, Default)]
pub struct FenceTimeline {
    last_signaled: u64,
}

impl FenceTimeline {
    /// Timeline with nothing signaled yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent value queued for signaling
    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    /// Queue a signal of the next value after all submitted work
    pub fn signal<D: GpuDevice>(&mut self, device: &D) -> GpuResult<u64> {
        let value = self.last_signaled + 1;
        device.signal(value)?;
        self.last_signaled = value;
        Ok(value)
    }

    /// Wait until the device reaches `value`. Returns whether it had to block.
    pub fn wait<D: GpuDevice>(&self, device: &D, value: u64) -> GpuResult<bool> {
        if device.completed_value()? >= value {
            return Ok(false);
        }
        device.wait_for(value)?;
        Ok(true)
    }

    /// Signal a fresh value and wait for it
    pub fn flush<D: GpuDevice>(&mut self, device: &D) -> GpuResult<()> {
        let value = self.signal(device)?;
        self.wait(device, value)?;
        Ok(())
    }
}

/// Where a slot is in its life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free; its last submission (if any) is known to be complete
    Idle,
    /// Handed out to the CPU
    Recording,
    /// Submitted; complete once the fence reaches the slot's value
    InFlight,
}

/// Per-frame resources
pub struct FrameSlot<D: GpuDevice> {
    recorder: D::Recorder,
    present_target: D::Texture,
    fence_value: u64,
    state: SlotState,
    view_offset: u64,
}

impl<D: GpuDevice> FrameSlot<D> {
    /// Fence value of the last submission from this slot, 0 if never submitted
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Current life-cycle state
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Offset of this slot's view block in the constant buffer
    pub fn view_offset(&self) -> u64 {
        self.view_offset
    }

    /// This slot's present target
    pub fn present_target(&self) -> &D::Texture {
        &self.present_target
    }
}

/// Exclusive right to record into one slot
#[derive(Debug, PartialEq, Eq)]
pub struct AcquiredSlot {
    index: usize,
    view_offset: u64,
}

impl AcquiredSlot {
    /// Slot index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Offset of the slot's view block
    pub fn view_offset(&self) -> u64 {
        self.view_offset
    }
}

/// Counters for diagnostics and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frames handed to the queue
    pub frames_submitted: u64,
    /// Acquisitions that had to block on the fence
    pub blocking_waits: u64,
    /// Full drains performed
    pub drains: u64,
}

/// Ring of frame slots sharing one fence
pub struct FrameScheduler<D: GpuDevice> {
    slots: Vec<FrameSlot<D>>,
    current: usize,
    timeline: FenceTimeline,
    outstanding: bool,
    lost: bool,
    stats: SchedulerStats,
}

fn present_target<D: GpuDevice>(
    device: &D,
    index: usize,
    extent: (u32, u32),
) -> GpuResult<D::Texture> {
    let label = format!("present-target-{index}");
    device.create_texture(&TextureDesc {
        label: &label,
        width: extent.0,
        height: extent.1,
        format: PRESENT_FORMAT,
        usage: TextureUsage::Present,
        initial_state: ResourceState::Present,
    })
}

impl<D: GpuDevice> FrameScheduler<D> {
    /// Create one slot per entry of `view_offsets`
    pub fn new(device: &D, extent: (u32, u32), view_offsets: &[u64]) -> GpuResult<Self> {
        let frames = view_offsets.len();
        if frames == 0 || frames > MAX_FRAMES_IN_FLIGHT {
            return Err(GpuError::invalid(format!(
                "frames in flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {frames}"
            )));
        }

        let slots = view_offsets
            .iter()
            .enumerate()
            .map(|(index, &view_offset)| {
                Ok(FrameSlot {
                    recorder: device.create_recorder(&format!("frame-{index}"))?,
                    present_target: present_target(device, index, extent)?,
                    fence_value: 0,
                    state: SlotState::Idle,
                    view_offset,
                })
            })
            .collect::<GpuResult<Vec<_>>>()?;

        log::debug!("Frame scheduler created with {} slots at {}x{}", frames, extent.0, extent.1);

        Ok(Self {
            slots,
            current: 0,
            timeline: FenceTimeline::new(),
            outstanding: false,
            lost: false,
            stats: SchedulerStats::default(),
        })
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot the next acquisition returns
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Slot by index
    pub fn slot(&self, index: usize) -> Option<&FrameSlot<D>> {
        self.slots.get(index)
    }

    /// Whether a submitted frame was left without a fence
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Counters
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// The shared fence timeline
    pub fn timeline(&self) -> &FenceTimeline {
        &self.timeline
    }

    /// Mutable access to the fence timeline, for one-off submissions such as uploads
    pub fn timeline_mut(&mut self) -> &mut FenceTimeline {
        &mut self.timeline
    }

    /// Wait until the current slot's previous submission is complete and hand it out
    pub fn acquire_slot(&mut self, device: &D) -> GpuResult<AcquiredSlot> {
        if self.lost {
            return Err(GpuError::DeviceLost);
        }
        if self.outstanding {
            return Err(GpuError::invalid("a frame slot is already acquired"));
        }

        let index = self.current;
        let slot = &mut self.slots[index];
        if slot.state == SlotState::InFlight {
            if self.timeline.wait(device, slot.fence_value)? {
                self.stats.blocking_waits += 1;
                log::trace!("Blocked on fence value {} for slot {}", slot.fence_value, index);
            }
            slot.state = SlotState::Idle;
        }

        slot.state = SlotState::Recording;
        self.outstanding = true;
        Ok(AcquiredSlot { index, view_offset: slot.view_offset })
    }

    /// Record, submit and present the acquired slot, then move to the next one
    ///
    /// `record` receives the slot's recording context (already begun) and its
    /// present target in the render-target state; it must leave the target in
    /// that state. Returns the fence value that marks this frame complete.
    ///
    /// A failed present still fences the slot and moves on; a failed signal
    /// marks the scheduler lost.
    pub fn submit<F>(&mut self, device: &D, acquired: AcquiredSlot, record: F) -> GpuResult<u64>
    where
        F: FnOnce(&mut D::Recorder, &D::Texture) -> GpuResult<()>,
    {
        if acquired.index != self.current || !self.outstanding {
            return Err(GpuError::invalid(format!(
                "slot {} is not the acquired slot",
                acquired.index
            )));
        }
        self.outstanding = false;

        let index = acquired.index;
        let slot = &mut self.slots[index];
        let recorded = record_frame::<D, F>(&mut slot.recorder, &slot.present_target, record);
        if let Err(err) = recorded {
            slot.state = SlotState::Idle;
            if slot.recorder.end().is_err() {
                log::trace!("Recording context of slot {} was not open", index);
            }
            return Err(err);
        }

        if let Err(err) = device.submit(&mut slot.recorder) {
            slot.state = SlotState::Idle;
            return Err(err);
        }
        slot.state = SlotState::InFlight;
        self.stats.frames_submitted += 1;
        let presented = device.present(&slot.present_target);

        let value = match self.timeline.signal(device) {
            Ok(value) => value,
            Err(err) => {
                self.lost = true;
                log::error!("Slot {} submitted but its fence signal failed: {}", index, err);
                return Err(err);
            }
        };
        slot.fence_value = value;
        self.current = (self.current + 1) % self.slots.len();
        log::trace!("Submitted slot {} with fence value {}", index, value);

        presented?;
        Ok(value)
    }

    /// Wait for every submitted frame to finish
    pub fn drain_all(&mut self, device: &D) -> GpuResult<()> {
        self.timeline.flush(device)?;
        if self.lost {
            log::warn!("Fence recovered by a full drain");
            self.lost = false;
        }
        for slot in &mut self.slots {
            if slot.state == SlotState::InFlight {
                slot.state = SlotState::Idle;
            }
        }
        self.stats.drains += 1;
        log::debug!("Drained GPU at fence value {}", self.timeline.last_signaled());
        Ok(())
    }

    /// Replace every present target with one of the new size
    ///
    /// Requires a prior [`drain_all`](Self::drain_all).
    pub fn recreate_present_targets(&mut self, device: &D, extent: (u32, u32)) -> GpuResult<()> {
        if self.slots.iter().any(|slot| slot.state == SlotState::InFlight) {
            return Err(GpuError::invalid("present targets replaced while frames are in flight"));
        }
        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.present_target = present_target(device, index, extent)?;
        }
        log::debug!("Present targets recreated at {}x{}", extent.0, extent.1);
        Ok(())
    }
}

fn record_frame<D, F>(recorder: &mut D::Recorder, target: &D::Texture, record: F) -> GpuResult<()>
where
    D: GpuDevice,
    F: FnOnce(&mut D::Recorder, &D::Texture) -> GpuResult<()>,
{
    recorder.begin()?;
    recorder.transition_texture(target, ResourceState::Present, ResourceState::RenderTarget)?;
    record(recorder, target)?;
    recorder.transition_texture(target, ResourceState::RenderTarget, ResourceState::Present)?;
    recorder.end()
}

impl<D: GpuDevice> std::fmt::Debug for FrameScheduler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("frames_in_flight", &self.slots.len())
            .field("current", &self.current)
            .field("last_signaled", &self.timeline.last_signaled)
            .field("extent", &self.slots.first().map(|slot| slot.present_target.extent()))
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::headless::{HeadlessDevice, HeadlessOptions, JournalCommand};
    use std::time::Duration;

    fn device(latency_ms: u64) -> HeadlessDevice {
        HeadlessDevice::new(HeadlessOptions {
            latency: Duration::from_millis(latency_ms),
            ..HeadlessOptions::default()
        })
        .unwrap()
    }

    fn offsets(frames: usize) -> Vec<u64> {
        (0..frames as u64).map(|i| 256 * (i + 1)).collect()
    }

    fn run_frames(frames: usize, latency_ms: u64, count: usize) {
        let device = device(latency_ms);
        let mut scheduler = FrameScheduler::new(&device, (8, 8), &offsets(frames)).unwrap();
        let mut last = 0;
        for n in 0..count {
            let slot = scheduler.acquire_slot(&device).unwrap();
            assert_eq!(slot.index(), n % frames);
            let previous = scheduler.slot(slot.index()).unwrap().fence_value();
            assert!(device.completed_value().unwrap() >= previous);

            let value = scheduler.submit(&device, slot, |_, _| Ok(())).unwrap();
            assert!(value > last);
            last = value;
        }
        scheduler.drain_all(&device).unwrap();

        let journal = device.probe().journal();
        assert!(journal.violations.is_empty(), "{:?}", journal.violations);
        assert_eq!(journal.presents.len(), count);
        assert!(journal.signals.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_single_slot() {
        run_frames(1, 2, 6);
    }

    #[test]
    fn test_double_buffered() {
        run_frames(2, 2, 9);
    }

    #[test]
    fn test_triple_buffered() {
        run_frames(3, 1, 10);
    }

    #[test]
    fn test_single_slot_blocks_on_every_reuse() {
        let device = device(20);
        let mut scheduler = FrameScheduler::new(&device, (4, 4), &offsets(1)).unwrap();
        for _ in 0..3 {
            let slot = scheduler.acquire_slot(&device).unwrap();
            scheduler.submit(&device, slot, |_, _| Ok(())).unwrap();
        }
        assert_eq!(scheduler.stats().frames_submitted, 3);
        assert_eq!(scheduler.stats().blocking_waits, 2);
    }

    #[test]
    fn test_second_acquire_is_refused() {
        let device = device(0);
        let mut scheduler = FrameScheduler::new(&device, (4, 4), &offsets(2)).unwrap();
        let slot = scheduler.acquire_slot(&device).unwrap();
        assert!(scheduler.acquire_slot(&device).is_err());
        scheduler.submit(&device, slot, |_, _| Ok(())).unwrap();
        assert!(scheduler.acquire_slot(&device).is_ok());
    }

    #[test]
    fn test_frame_wraps_present_transitions() {
        let device = device(0);
        let mut scheduler = FrameScheduler::new(&device, (4, 4), &offsets(2)).unwrap();
        let slot = scheduler.acquire_slot(&device).unwrap();
        scheduler
            .submit(&device, slot, |recorder, target| recorder.clear_texture(target, [1.0; 4]))
            .unwrap();

        let journal = device.probe().journal();
        let commands = &journal.submissions[0].commands;
        assert_eq!(commands.len(), 3);
        assert!(matches!(
            &commands[0],
            JournalCommand::Transition {
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
                ..
            }
        ));
        assert!(matches!(&commands[1], JournalCommand::Clear { .. }));
        assert!(matches!(
            &commands[2],
            JournalCommand::Transition {
                before: ResourceState::RenderTarget,
                after: ResourceState::Present,
                ..
            }
        ));
    }

    #[test]
    fn test_failed_recording_keeps_slot_current() {
        let device = device(0);
        let mut scheduler = FrameScheduler::new(&device, (4, 4), &offsets(2)).unwrap();
        let slot = scheduler.acquire_slot(&device).unwrap();
        let result = scheduler.submit(&device, slot, |_, _| Err(GpuError::invalid("boom")));
        assert!(result.is_err());
        assert_eq!(scheduler.current_index(), 0);

        let slot = scheduler.acquire_slot(&device).unwrap();
        assert_eq!(slot.index(), 0);
        assert!(scheduler.submit(&device, slot, |_, _| Ok(())).is_ok());
    }

    #[test]
    fn test_failed_signal_never_hands_out_busy_slot() {
        let device = device(100);
        let mut scheduler = FrameScheduler::new(&device, (4, 4), &offsets(1)).unwrap();
        device.signal(1000).unwrap();

        let slot = scheduler.acquire_slot(&device).unwrap();
        let result = scheduler.submit(&device, slot, |_, _| Ok(()));
        assert!(matches!(result, Err(GpuError::InvalidOperation { .. })));
        assert!(scheduler.is_lost());
        assert_eq!(scheduler.slot(0).unwrap().state(), SlotState::InFlight);
        assert_eq!(scheduler.stats().frames_submitted, 1);

        assert_eq!(scheduler.acquire_slot(&device), Err(GpuError::DeviceLost));
        assert_eq!(scheduler.acquire_slot(&device), Err(GpuError::DeviceLost));
        assert!(device.probe().journal().violations.is_empty());

        // The fence can never move past 1000 again, so the loss is permanent.
        assert!(scheduler.drain_all(&device).is_err());
        assert!(scheduler.is_lost());
    }

    #[test]
    fn test_drain_and_recreate() {
        let device = device(5);
        let mut scheduler = FrameScheduler::new(&device, (4, 4), &offsets(2)).unwrap();
        let slot = scheduler.acquire_slot(&device).unwrap();
        scheduler.submit(&device, slot, |_, _| Ok(())).unwrap();

        assert!(scheduler.recreate_present_targets(&device, (8, 2)).is_err());
        scheduler.drain_all(&device).unwrap();
        assert_eq!(device.completed_value().unwrap(), scheduler.timeline().last_signaled());
        scheduler.recreate_present_targets(&device, (8, 2)).unwrap();
        assert_eq!(scheduler.slot(1).unwrap().present_target().extent(), (8, 2));
        assert!(device.probe().journal().violations.is_empty());
    }

    #[test]
    fn test_rejects_bad_slot_count() {
        let device = device(0);
        assert!(FrameScheduler::new(&device, (4, 4), &[]).is_err());
        assert!(FrameScheduler::new(&device, (4, 4), &offsets(MAX_FRAMES_IN_FLIGHT + 1)).is_err());
    }
}
