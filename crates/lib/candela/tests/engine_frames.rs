//! Full-engine scenarios on the recording backend: dispatch counts over
//! multiple frames, upload fencing, readback staleness, and shutdown.

use std::path::PathBuf;

use glam::UVec3;

use candela::{
    EngineConfig, FrameUpdate, ProbeEngine, ProbeVolumeDesc, VolumeUpdate,
};
use candela_gpu::mock::{GpuOp, RecordingBackend};
use candela_gpu::{AccelHandle, GpuBackend, GpuError};

fn base_config(volumes: Vec<ProbeVolumeDesc>) -> EngineConfig {
    EngineConfig {
        render_width: 640,
        render_height: 360,
        shader_dir: PathBuf::from("shaders"),
        volumes,
        visualization_enabled: false,
    }
}

fn scene_tlas(backend: &mut RecordingBackend) -> AccelHandle {
    backend.create_tlas(16, "scene").unwrap()
}

fn run_frames(engine: &mut ProbeEngine, backend: &mut RecordingBackend, frames: usize) {
    for _ in 0..frames {
        engine.update(backend, &FrameUpdate::default());
        engine.execute(backend).unwrap();
    }
}

#[test]
fn five_frames_record_exactly_the_enabled_passes() {
    let mut backend = RecordingBackend::new();
    let tlas = scene_tlas(&mut backend);

    let config = base_config(vec![ProbeVolumeDesc {
        probe_counts: UVec3::new(4, 4, 4),
        probe_num_rays: 128,
        probe_relocation_enabled: false,
        probe_classification_enabled: false,
        probe_variability_enabled: false,
        ..Default::default()
    }]);

    let mut engine = ProbeEngine::initialize(&mut backend, tlas, &config).unwrap();
    backend.clear_ops();

    run_frames(&mut engine, &mut backend, 5);

    let traces = backend.trace_dims();
    assert_eq!(traces.len(), 5);
    for dims in traces {
        assert_eq!(dims, [128, 64, 1]);
    }

    assert_eq!(backend.dispatch_count("probe blend irradiance"), 5);
    assert_eq!(backend.dispatch_count("probe blend distance"), 5);
    assert_eq!(backend.dispatch_count("probe relocation"), 0);
    assert_eq!(backend.dispatch_count("probe classification"), 0);
    assert_eq!(backend.dispatch_count("probe variability"), 0);

    engine.cleanup(&mut backend);
}

#[test]
fn every_upload_write_happens_after_the_frame_fence() {
    let mut backend = RecordingBackend::new();
    let tlas = scene_tlas(&mut backend);

    let config = base_config(vec![ProbeVolumeDesc::default()]);
    let mut engine = ProbeEngine::initialize(&mut backend, tlas, &config).unwrap();
    backend.clear_ops();

    // Hold the fence: the simulated GPU no longer signals on submit, so
    // from the third frame on the wait has to block before the upload
    // slot is reused.
    backend.fence().lock().auto_signal = false;

    run_frames(&mut engine, &mut backend, 4);

    let mut waited_this_frame = false;
    let mut blocked_waits = 0;
    for op in backend.ops() {
        match op {
            GpuOp::BeginFrame => waited_this_frame = false,
            GpuOp::FenceWait { blocked, .. } => {
                waited_this_frame = true;
                if *blocked {
                    blocked_waits += 1;
                }
            }
            GpuOp::WriteBuffer { .. } => {
                assert!(
                    waited_this_frame,
                    "upload write recorded before the frame fence wait"
                );
            }
            _ => {}
        }
    }

    // Frames 1 and 2 fit in the two slots; 3 and 4 must block.
    assert_eq!(blocked_waits, 2);

    engine.cleanup(&mut backend);
}

#[test]
fn variability_readback_lags_the_recorded_reduction() {
    let mut backend = RecordingBackend::new();
    let tlas = scene_tlas(&mut backend);

    let config = base_config(vec![ProbeVolumeDesc {
        probe_variability_enabled: true,
        ..Default::default()
    }]);
    let mut engine = ProbeEngine::initialize(&mut backend, tlas, &config).unwrap();

    // Stage a known "previous frame" value directly in the readback
    // buffer.
    let readback = engine
        .registry()
        .volume(0)
        .unwrap()
        .textures
        .variability_readback
        .unwrap();
    backend
        .buffer_data_mut(readback)
        .splice(0..4, 0.75f32.to_le_bytes());

    // update() observes the staged value even though no reduction for it
    // was ever recorded this frame.
    engine.update(&mut backend, &FrameUpdate::default());
    assert_eq!(
        engine.registry().volume(0).unwrap().average_variability,
        0.75
    );

    engine.execute(&mut backend).unwrap();
    engine.cleanup(&mut backend);
}

#[test]
fn converged_volume_stops_updating_until_cleared() {
    let mut backend = RecordingBackend::new();
    let tlas = scene_tlas(&mut backend);

    let config = base_config(vec![ProbeVolumeDesc {
        probe_variability_enabled: true,
        probe_variability_threshold: 0.05,
        ..Default::default()
    }]);
    let mut engine = ProbeEngine::initialize(&mut backend, tlas, &config).unwrap();

    let readback = engine
        .registry()
        .volume(0)
        .unwrap()
        .textures
        .variability_readback
        .unwrap();
    // Deeply converged value, visible from the first update.
    backend
        .buffer_data_mut(readback)
        .splice(0..4, 0.001f32.to_le_bytes());

    // The sample floor keeps the volume selected for the first 16 frames.
    run_frames(&mut engine, &mut backend, 16);
    backend.clear_ops();

    run_frames(&mut engine, &mut backend, 3);
    assert_eq!(backend.trace_dims().len(), 0, "converged volume still traced");

    // Clearing probes invalidates convergence and resumes updates.
    engine.update(
        &mut backend,
        &FrameUpdate {
            volumes: vec![VolumeUpdate {
                index: 0,
                clear_probes: true,
                ..Default::default()
            }],
            ..Default::default()
        },
    );
    engine.execute(&mut backend).unwrap();
    assert_eq!(backend.trace_dims().len(), 1);

    engine.cleanup(&mut backend);
}

#[test]
fn cleanup_is_idempotent_and_leaves_nothing_alive() {
    let mut backend = RecordingBackend::new();
    let tlas = scene_tlas(&mut backend);

    let config = base_config(vec![
        ProbeVolumeDesc {
            index: 0,
            probe_variability_enabled: true,
            ..Default::default()
        },
        ProbeVolumeDesc {
            index: 1,
            ..Default::default()
        },
    ]);
    let mut engine = ProbeEngine::initialize(&mut backend, tlas, &config).unwrap();
    run_frames(&mut engine, &mut backend, 2);

    engine.cleanup(&mut backend);
    let ops_after_first = backend.ops().len();

    // Everything except the externally owned scene TLAS instance buffer
    // is gone.
    assert_eq!(backend.live_texture_count(), 0);
    assert_eq!(backend.live_buffer_count(), 1);

    engine.cleanup(&mut backend);
    assert_eq!(
        backend.ops().len(),
        ops_after_first,
        "second cleanup recorded destroy ops"
    );

    // A further execute reports shutdown instead of touching the GPU.
    assert!(engine.execute(&mut backend).is_err());
}

#[test]
fn visualization_records_only_when_enabled() {
    let mut backend = RecordingBackend::new();
    let tlas = scene_tlas(&mut backend);

    let config = EngineConfig {
        visualization_enabled: true,
        ..base_config(vec![ProbeVolumeDesc {
            probe_counts: UVec3::new(2, 2, 2),
            show_probes: true,
            ..Default::default()
        }])
    };
    let mut engine = ProbeEngine::initialize(&mut backend, tlas, &config).unwrap();
    backend.clear_ops();

    run_frames(&mut engine, &mut backend, 2);
    assert_eq!(backend.dispatch_count("vis instance update"), 2);

    // Hiding the probes stops the overlay without touching the update
    // pipeline.
    engine.update(
        &mut backend,
        &FrameUpdate {
            volumes: vec![VolumeUpdate {
                index: 0,
                show_probes: Some(false),
                ..Default::default()
            }],
            ..Default::default()
        },
    );
    backend.clear_ops();
    engine.execute(&mut backend).unwrap();
    assert_eq!(backend.dispatch_count("vis instance update"), 0);
    assert_eq!(backend.trace_dims().len(), 1, "probe trace still runs");

    engine.cleanup(&mut backend);
}

#[test]
fn texture_atlas_viewer_toggles_from_frame_updates() {
    let mut backend = RecordingBackend::new();
    let tlas = scene_tlas(&mut backend);

    let config = EngineConfig {
        visualization_enabled: true,
        ..base_config(vec![ProbeVolumeDesc {
            probe_counts: UVec3::new(2, 2, 2),
            show_probes: true,
            ..Default::default()
        }])
    };
    let mut engine = ProbeEngine::initialize(&mut backend, tlas, &config).unwrap();
    backend.clear_ops();

    run_frames(&mut engine, &mut backend, 1);
    assert_eq!(backend.dispatch_count("vis texture view"), 0);

    engine.update(
        &mut backend,
        &FrameUpdate {
            show_texture_atlases: Some(true),
            ..Default::default()
        },
    );
    engine.execute(&mut backend).unwrap();
    assert_eq!(backend.dispatch_count("vis texture view"), 1);

    engine.update(
        &mut backend,
        &FrameUpdate {
            show_texture_atlases: Some(false),
            ..Default::default()
        },
    );
    engine.execute(&mut backend).unwrap();
    assert_eq!(backend.dispatch_count("vis texture view"), 1);

    engine.cleanup(&mut backend);
}

#[test]
fn device_loss_surfaces_as_a_fatal_error() {
    let mut backend = RecordingBackend::new();
    let tlas = scene_tlas(&mut backend);

    let config = base_config(vec![ProbeVolumeDesc::default()]);
    let mut engine = ProbeEngine::initialize(&mut backend, tlas, &config).unwrap();
    run_frames(&mut engine, &mut backend, 1);

    backend.fence().lock().device_lost = true;
    let err = engine.execute(&mut backend).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GpuError>(),
        Some(GpuError::DeviceLost { .. })
    ));

    engine.cleanup(&mut backend);
}

#[test]
fn failed_initialization_tears_everything_down() {
    let mut backend = RecordingBackend::new();
    let tlas = scene_tlas(&mut backend);
    backend.fail_shader_compiles_containing("indirect_gather");

    let config = base_config(vec![ProbeVolumeDesc::default()]);
    assert!(ProbeEngine::initialize(&mut backend, tlas, &config).is_err());

    assert_eq!(backend.live_texture_count(), 0);
    // Only the scene TLAS instance buffer survives.
    assert_eq!(backend.live_buffer_count(), 1);
}
