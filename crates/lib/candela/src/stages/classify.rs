//! Probe classification: marks probes active or inactive from the
//! reliability of this frame's ray hits; inactive probes are skipped by
//! lighting lookups. Mirrors relocation's reset-then-update shape.

use candela_gpu::{BarrierScope, GpuBackend};

use crate::registry::VolumeRegistry;

pub const CLASSIFICATION_GROUP_SIZE: u32 = 32;

pub fn record(backend: &mut dyn GpuBackend, registry: &mut VolumeRegistry, selected: &[u32]) {
    let mut gates = Vec::new();

    for &index in selected {
        let Some(volume) = registry.volume_mut(index) else {
            continue;
        };
        if !volume.desc.probe_classification_enabled || !volume.classification_needs_reset {
            continue;
        }
        let Some(reset) = volume.pipelines.classification_reset else {
            continue;
        };

        let groups = volume.probe_count().div_ceil(CLASSIFICATION_GROUP_SIZE);
        backend.dispatch(reset, "probe classification reset", [groups, 1, 1]);
        volume.classification_needs_reset = false;
        gates.push(BarrierScope::ProbeData(volume.textures.probe_data));
    }
    if !gates.is_empty() {
        backend.barrier(&gates);
        gates.clear();
    }

    for &index in selected {
        let Some(volume) = registry.volume(index) else {
            continue;
        };
        if !volume.desc.probe_classification_enabled {
            continue;
        }
        let Some(update) = volume.pipelines.classification_update else {
            continue;
        };

        let groups = volume.probe_count().div_ceil(CLASSIFICATION_GROUP_SIZE);
        backend.dispatch(update, "probe classification", [groups, 1, 1]);
        gates.push(BarrierScope::ProbeData(volume.textures.probe_data));
    }
    if !gates.is_empty() {
        backend.barrier(&gates);
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
    fn group_count_rounds_up() {
        let mut backend = RecordingBackend::new();
        let mut registry = VolumeRegistry::new();
        registry
            .create_or_replace(
                &mut backend,
                Path::new("shaders"),
                ProbeVolumeDesc {
                    // 45 probes needs two groups of 32.
                    probe_counts: UVec3::new(5, 3, 3),
                    probe_classification_enabled: true,
                    ..Default::default()
                },
            )
            .unwrap();
        registry.volume_mut(0).unwrap().classification_needs_reset = false;

        record(&mut backend, &mut registry, &[0]);

        let groups: Vec<[u32; 3]> = backend
            .ops()
            .iter()
            .filter_map(|op| match op {
                candela_gpu::mock::GpuOp::Dispatch { label, groups, .. }
                    if label == "probe classification" =>
                {
                    Some(*groups)
                }
                _ => None,
            })
            .collect();
        assert_eq!(groups, vec![[2, 1, 1]]);
    }
}
