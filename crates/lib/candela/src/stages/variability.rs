//! Variability reduction: tree-reduces per-texel variability down to one
//! scalar per volume, then records a copy of that scalar into the
//! volume's readback buffer.
//!
//! The CPU read of that buffer is deliberately unsynchronized: no fence
//! guards it, so the value observed on any given frame comes from a
//! previous frame's reduction. Synchronizing here would stall the GPU
//! every frame.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use candela_gpu::{BarrierScope, GpuBackend};

use crate::registry::VolumeRegistry;
use crate::volume::textures::VARIABILITY_AVERAGE_FORMAT;
use crate::volume::ProbeVolume;

/// Threads per reduction group.
pub const REDUCTION_GROUP: [u32; 3] = [4, 8, 4];
/// Texels sampled per thread along each axis.
pub const REDUCTION_FOOTPRINT: [u32; 3] = [4, 2, 1];
/// Input texels consumed per output texel in one pass.
pub const REDUCTION_DIMENSION_SCALE: [u32; 3] = [
    REDUCTION_GROUP[0] * REDUCTION_FOOTPRINT[0],
    REDUCTION_GROUP[1] * REDUCTION_FOOTPRINT[1],
    REDUCTION_GROUP[2] * REDUCTION_FOOTPRINT[2],
];

/// One thread group per output texel.
pub fn reduction_output_dims(input: [u32; 3]) -> [u32; 3] {
    [
        input[0].div_ceil(REDUCTION_DIMENSION_SCALE[0]),
        input[1].div_ceil(REDUCTION_DIMENSION_SCALE[1]),
        input[2].div_ceil(REDUCTION_DIMENSION_SCALE[2]),
    ]
}

/// Number of passes (first reduction plus extra reductions) needed to
/// reach a single texel.
pub fn reduction_pass_count(mut input: [u32; 3]) -> u32 {
    let mut passes = 1;
    input = reduction_output_dims(input);
    while input.iter().any(|&d| d > 1) {
        passes += 1;
        input = reduction_output_dims(input);
    }
    passes
}

pub fn record(backend: &mut dyn GpuBackend, registry: &VolumeRegistry, selected: &[u32]) {
    for &index in selected {
        let Some(volume) = registry.volume(index) else {
            continue;
        };
        if !volume.desc.probe_variability_enabled {
            continue;
        }
        let (Some(reduce), Some(extra_reduce)) = (
            volume.pipelines.variability_reduction,
            volume.pipelines.variability_extra_reduction,
        ) else {
            continue;
        };
        let (Some(average), Some(readback)) = (
            volume.textures.variability_average,
            volume.textures.variability_readback,
        ) else {
            continue;
        };

        let c = volume.desc.probe_counts;
        let texels = volume.desc.probe_num_irradiance_texels;
        let mut input = [c.x * texels, c.z * texels, c.y];

        // First pass reads the variability texture and reduces as far as
        // one group can.
        let mut output = reduction_output_dims(input);
        backend.dispatch(reduce, "probe variability reduction", output);
        backend.barrier(&[BarrierScope::VariabilityAverage(average)]);
        input = output;

        // Extra passes fold the averaging texture onto itself until a
        // single texel remains.
        while input.iter().any(|&d| d > 1) {
            output = reduction_output_dims(input);
            backend.dispatch(extra_reduce, "probe variability extra reduction", output);
            backend.barrier(&[BarrierScope::VariabilityAverage(average)]);
            input = output;
        }

        // Texel (0,0,0) now holds the volume average; schedule its copy
        // into CPU-readable memory. Read next frame, or later.
        backend.copy_texture_to_buffer(
            average,
            readback,
            VARIABILITY_AVERAGE_FORMAT.block_bytes(),
        );
    }
}

/// The unsynchronized CPU read. Whatever the buffer holds right now is
/// at least one frame old; callers must not treat it as this frame's
/// result.
pub fn read_stale_average(backend: &dyn GpuBackend, volume: &ProbeVolume) -> Option<f32> {
    let readback = volume.textures.variability_readback?;
    match backend.read_buffer(readback, 0, 4) {
        Ok(bytes) => Some(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        Err(err) => {
            warn!(
                "variability readback failed for '{}': {err}",
                volume.desc.name
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::desc::ProbeVolumeDesc;
    use candela_gpu::mock::RecordingBackend;
    use glam::UVec3;
    use std::path::Path;

    #[test]
    fn output_dims_ceil_divide_by_the_footprint() {
        assert_eq!(reduction_output_dims([96, 64, 3]), [6, 4, 1]);
        assert_eq!(reduction_output_dims([6, 4, 1]), [1, 1, 1]);
        assert_eq!(reduction_output_dims([17, 17, 5]), [2, 2, 2]);
    }

    #[test]
    fn pass_count_matches_recorded_dispatches() {
        let mut backend = RecordingBackend::new();
        let mut registry = VolumeRegistry::new();

        let desc = ProbeVolumeDesc {
            probe_counts: UVec3::new(12, 3, 8),
            probe_num_irradiance_texels: 8,
            probe_variability_enabled: true,
            ..Default::default()
        };
        let input = [96, 64, 3];
        let expected = reduction_pass_count(input);

        registry
            .create_or_replace(&mut backend, Path::new("shaders"), desc)
            .unwrap();
        record(&mut backend, &registry, &[0]);

        assert_eq!(
            backend.dispatch_count("probe variability") as u32,
            expected
        );
        // Exactly one readback copy per volume per frame.
        let copies = backend
            .ops()
            .iter()
            .filter(|op| matches!(op, candela_gpu::mock::GpuOp::CopyTextureToBuffer { .. }))
            .count();
        assert_eq!(copies, 1);
    }

    #[test]
    fn stale_read_returns_previous_contents() {
        let mut backend = RecordingBackend::new();
        let mut registry = VolumeRegistry::new();
        registry
            .create_or_replace(
                &mut backend,
                Path::new("shaders"),
                ProbeVolumeDesc {
                    probe_variability_enabled: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let readback = registry
            .volume(0)
            .unwrap()
            .textures
            .variability_readback
            .unwrap();
        backend
            .buffer_data_mut(readback)
            .splice(0..4, 0.125f32.to_le_bytes());

        let value = read_stale_average(&backend, registry.volume(0).unwrap()).unwrap();
        assert_eq!(value, 0.125);
    }
}
