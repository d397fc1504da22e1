//! End-to-end tests of the path tracer on the headless device

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use approx::assert_relative_eq;

    use crate::core::config::{SceneCapacity, TracerConfig};
    use crate::foundation::logging;
    use crate::render::backend::{GpuDevice, GpuError, ResourceState};
    use crate::render::headless::{
        HeadlessDevice, HeadlessOptions, HeadlessProbe, JournalCommand, JournalSubmission,
    };
    use crate::render::constants::ViewConstants;
    use crate::render::{MoveDirection, PathTracer, RendererError};
    use crate::scene::cornell_box;

    fn start(
        config: &TracerConfig,
        options: HeadlessOptions,
    ) -> (PathTracer<HeadlessDevice>, HeadlessProbe) {
        logging::init_for_tests();
        let device = HeadlessDevice::new(options).unwrap();
        let probe = device.probe();
        let scene = cornell_box(SceneCapacity::default()).unwrap();
        (PathTracer::init(device, config, &scene).unwrap(), probe)
    }

    fn frames(submissions: &[JournalSubmission]) -> Vec<&JournalSubmission> {
        submissions.iter().filter(|s| s.recorder.starts_with("frame-")).collect()
    }

    fn integrator(submission: &JournalSubmission) -> (u32, f32, (u32, u32), u64) {
        submission
            .commands
            .iter()
            .find_map(|c| match c {
                JournalCommand::Integrator {
                    frame_index, blend_factor, extent, view_offset, ..
                } => Some((*frame_index, *blend_factor, *extent, *view_offset)),
                _ => None,
            })
            .unwrap()
    }

    fn run_frames(tracer: &mut PathTracer<HeadlessDevice>, count: usize) {
        for _ in 0..count {
            tracer.update_with_delta(0.016).unwrap();
            tracer.render().unwrap();
        }
    }

    #[test]
    fn test_ten_still_frames() {
        let (mut tracer, probe) = start(&TracerConfig::default(), HeadlessOptions::default());
        run_frames(&mut tracer, 10);
        tracer.release().unwrap();

        let journal = probe.journal();
        assert!(journal.violations.is_empty(), "{:?}", journal.violations);
        let frames = frames(&journal.submissions);
        assert_eq!(frames.len(), 10);
        assert_eq!(journal.presents.len(), 10);

        let (index, blend, extent, _) = integrator(frames[0]);
        assert_eq!(index, 0);
        assert_relative_eq!(blend, 0.0);
        assert_eq!(extent, (512, 512));

        let (index, blend, _, _) = integrator(frames[9]);
        assert_eq!(index, 9);
        assert_relative_eq!(blend, 0.9);
    }

    #[test]
    fn test_frame_command_order() {
        let (mut tracer, probe) = start(&TracerConfig::default(), HeadlessOptions::default());
        run_frames(&mut tracer, 1);
        tracer.release().unwrap();

        let journal = probe.journal();
        let frame = frames(&journal.submissions)[0];
        let kinds: Vec<String> = frame
            .commands
            .iter()
            .map(|c| match c {
                JournalCommand::Transition { resource, before, after } => {
                    format!("{resource}:{before}->{after}")
                }
                JournalCommand::Clear { texture, .. } => format!("clear {texture}"),
                JournalCommand::Integrator { .. } => "integrator".to_string(),
                JournalCommand::ToneMap { .. } => "tone map".to_string(),
                JournalCommand::Copy { .. } => "copy".to_string(),
            })
            .collect();

        assert_eq!(
            kinds,
            vec![
                "present-target-0:Present->RenderTarget",
                "clear accumulation",
                "integrator",
                "accumulation:RenderTarget->ShaderResource",
                "clear present-target-0",
                "tone map",
                "accumulation:ShaderResource->RenderTarget",
                "present-target-0:RenderTarget->Present",
            ]
        );
        assert!(frame.commands.contains(&JournalCommand::Clear {
            texture: "present-target-0".to_string(),
            color: [0.8, 0.8, 1.0, 1.0],
        }));
    }

    #[test]
    fn test_resize_restarts_at_new_size() {
        let (mut tracer, probe) = start(&TracerConfig::default(), HeadlessOptions::default());
        run_frames(&mut tracer, 4);
        tracer.resize(256, 256).unwrap();
        assert_eq!(tracer.scheduler_stats().drains, 1);
        assert_eq!(tracer.accumulation_extent(), (256, 256));
        run_frames(&mut tracer, 2);
        tracer.release().unwrap();

        let journal = probe.journal();
        assert!(journal.violations.is_empty(), "{:?}", journal.violations);
        let frames = frames(&journal.submissions);
        let (index, blend, extent, _) = integrator(frames[4]);
        assert_eq!((index, extent), (0, (256, 256)));
        assert_relative_eq!(blend, 0.0);
        assert_eq!(integrator(frames[5]).0, 1);

        let released_accumulations =
            journal.released.iter().filter(|l| *l == "accumulation").count();
        assert_eq!(released_accumulations, 2);
    }

    #[test]
    fn test_resize_between_update_and_render_clears() {
        let (mut tracer, probe) = start(&TracerConfig::default(), HeadlessOptions::default());
        run_frames(&mut tracer, 4);
        tracer.update_with_delta(0.016).unwrap();
        assert_eq!(tracer.accumulation_state().frame_index, 4);

        tracer.resize(256, 256).unwrap();
        assert_eq!(tracer.accumulation_state().frame_index, 0);
        tracer.render().unwrap();

        let journal = probe.journal();
        let frames = frames(&journal.submissions);
        let last = frames[4];
        let (index, blend, extent, view_offset) = integrator(last);
        assert_eq!((index, extent), (0, (256, 256)));
        assert_relative_eq!(blend, 0.0);
        assert!(last.commands.contains(&JournalCommand::Clear {
            texture: "accumulation".to_string(),
            color: [0.0; 4],
        }));

        let contents = tracer.constant_buffer().buffer().contents();
        let at = view_offset as usize;
        let block: ViewConstants = bytemuck::pod_read_unaligned(
            &contents[at..at + std::mem::size_of::<ViewConstants>()],
        );
        assert_eq!((block.viewport_width, block.viewport_height), (256, 256));
        assert_eq!(block.frame_index, 0);

        // The clear served the reset, so the next tick continues.
        run_frames(&mut tracer, 1);
        assert_eq!(tracer.accumulation_state().frame_index, 1);
        tracer.release().unwrap();
    }

    #[test]
    fn test_lost_fence_stops_rendering() {
        let config = TracerConfig::default().with_frames_in_flight(1);
        let options =
            HeadlessOptions { latency: Duration::from_millis(100), ..HeadlessOptions::default() };
        let (mut tracer, probe) = start(&config, options);
        tracer.device().signal(1000).unwrap();

        tracer.update_with_delta(0.016).unwrap();
        assert!(matches!(
            tracer.render(),
            Err(RendererError::Gpu(GpuError::InvalidOperation { .. }))
        ));
        tracer.update_with_delta(0.016).unwrap();
        assert!(matches!(tracer.render(), Err(RendererError::Gpu(GpuError::DeviceLost))));

        let journal = probe.journal();
        assert!(journal.violations.is_empty(), "{:?}", journal.violations);
        assert_eq!(frames(&journal.submissions).len(), 1);
    }

    #[test]
    fn test_held_key_keeps_resetting() {
        let (mut tracer, _probe) = start(&TracerConfig::default(), HeadlessOptions::default());
        run_frames(&mut tracer, 3);

        tracer.on_move_key_changed(MoveDirection::Forward, true);
        let start_z = tracer.camera().position.z;
        for _ in 0..3 {
            tracer.update_with_delta(0.016).unwrap();
            assert_eq!(tracer.accumulation_state().frame_index, 0);
            tracer.render().unwrap();
        }
        assert!(tracer.camera().position.z > start_z);

        tracer.on_move_key_changed(MoveDirection::Forward, false);
        run_frames(&mut tracer, 3);
        assert_eq!(tracer.accumulation_state().frame_index, 3);
        tracer.release().unwrap();
    }

    #[test]
    fn test_single_frame_in_flight() {
        let config = TracerConfig::default().with_size(64, 64).with_frames_in_flight(1);
        let options =
            HeadlessOptions { latency: Duration::from_millis(2), ..HeadlessOptions::default() };
        let (mut tracer, probe) = start(&config, options);
        run_frames(&mut tracer, 4);
        tracer.release().unwrap();

        let journal = probe.journal();
        assert!(journal.violations.is_empty(), "{:?}", journal.violations);
        assert!(journal.signals.windows(2).all(|w| w[0] < w[1]));
        let offsets: Vec<u64> =
            frames(&journal.submissions).iter().map(|f| integrator(f).3).collect();
        assert_eq!(offsets, vec![768; 4]);
    }

    #[test]
    fn test_three_frames_in_flight() {
        let config = TracerConfig::default().with_size(64, 64).with_frames_in_flight(3);
        let options =
            HeadlessOptions { latency: Duration::from_millis(1), ..HeadlessOptions::default() };
        let (mut tracer, probe) = start(&config, options);
        assert_eq!(tracer.frames_in_flight(), 3);
        run_frames(&mut tracer, 7);
        tracer.release().unwrap();

        let journal = probe.journal();
        assert!(journal.violations.is_empty(), "{:?}", journal.violations);
        let frames = frames(&journal.submissions);
        let recorders: Vec<&str> = frames.iter().map(|f| f.recorder.as_str()).collect();
        assert_eq!(
            recorders,
            vec!["frame-0", "frame-1", "frame-2", "frame-0", "frame-1", "frame-2", "frame-0"]
        );
        let offsets: Vec<u64> = frames.iter().map(|f| integrator(f).3).collect();
        assert_eq!(offsets, vec![768, 1024, 1280, 768, 1024, 1280, 768]);
    }

    #[test]
    fn test_release_drains_everything() {
        let options =
            HeadlessOptions { latency: Duration::from_millis(1), ..HeadlessOptions::default() };
        let (mut tracer, probe) = start(&TracerConfig::default(), options);
        run_frames(&mut tracer, 5);
        tracer.release().unwrap();

        let journal = probe.journal();
        assert!(journal.violations.is_empty(), "{:?}", journal.violations);
        assert_eq!(probe.completed_value(), *journal.signals.last().unwrap());
        let labels = [
            "accumulation",
            "constants",
            "positions",
            "fullscreen-quad",
            "present-target-0",
            "present-target-1",
        ];
        for label in labels {
            assert!(journal.released.iter().any(|l| l == label), "{label} not released");
        }
    }

    #[test]
    fn test_drop_without_release_still_drains() {
        let options =
            HeadlessOptions { latency: Duration::from_millis(1), ..HeadlessOptions::default() };
        let (mut tracer, probe) = start(&TracerConfig::default(), options);
        run_frames(&mut tracer, 3);
        drop(tracer);

        let journal = probe.journal();
        assert!(journal.violations.is_empty(), "{:?}", journal.violations);
        assert_eq!(probe.completed_value(), *journal.signals.last().unwrap());
    }

    #[test]
    fn test_staging_failure_aborts_init() {
        logging::init_for_tests();
        let options = HeadlessOptions { fail_staging_writes: true, ..HeadlessOptions::default() };
        let device = HeadlessDevice::new(options).unwrap();
        let probe = device.probe();
        let scene = cornell_box(SceneCapacity::default()).unwrap();

        let result = PathTracer::init(device, &TracerConfig::default(), &scene);
        assert!(matches!(result, Err(RendererError::Gpu(GpuError::MapFailed { .. }))));
        assert!(frames(&probe.journal().submissions).is_empty());
    }

    #[test]
    fn test_scene_arrays_resident_before_first_frame() {
        let (tracer, probe) = start(&TracerConfig::default(), HeadlessOptions::default());
        tracer.release().unwrap();

        let journal = probe.journal();
        let upload = &journal.submissions[0];
        assert_eq!(upload.recorder, "upload");
        assert!(upload.commands.contains(&JournalCommand::Transition {
            resource: "fullscreen-quad".to_string(),
            before: ResourceState::CopyDest,
            after: ResourceState::VertexBuffer,
        }));
        assert!(journal.released.iter().any(|l| l == "positions-staging"));
    }
}
