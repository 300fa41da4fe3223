//! Probe relocation: nudges probes away from nearby backfaces, capped by
//! `probe_min_frontface_distance`. Volumes flagged for reset get the
//! reset variant first, which snaps every offset back to zero.

use candela_gpu::{BarrierScope, GpuBackend};

use crate::registry::VolumeRegistry;

pub const RELOCATION_GROUP_SIZE: u32 = 32;

pub fn record(backend: &mut dyn GpuBackend, registry: &mut VolumeRegistry, selected: &[u32]) {
    let mut gates = Vec::new();

    // Reset pass for flagged volumes; the flag is consumed here.
    for &index in selected {
        let Some(volume) = registry.volume_mut(index) else {
            continue;
        };
        if !volume.desc.probe_relocation_enabled || !volume.relocation_needs_reset {
            continue;
        }
        let Some(reset) = volume.pipelines.relocation_reset else {
            continue;
        };

        let groups = volume.probe_count().div_ceil(RELOCATION_GROUP_SIZE);
        backend.dispatch(reset, "probe relocation reset", [groups, 1, 1]);
        volume.relocation_needs_reset = false;
        gates.push(BarrierScope::ProbeData(volume.textures.probe_data));
    }
    if !gates.is_empty() {
        backend.barrier(&gates);
        gates.clear();
    }

    // The incremental update reads this frame's ray data.
    for &index in selected {
        let Some(volume) = registry.volume(index) else {
            continue;
        };
        if !volume.desc.probe_relocation_enabled {
            continue;
        }
        let Some(update) = volume.pipelines.relocation_update else {
            continue;
        };

        let groups = volume.probe_count().div_ceil(RELOCATION_GROUP_SIZE);
        backend.dispatch(update, "probe relocation", [groups, 1, 1]);
        gates.push(BarrierScope::ProbeData(volume.textures.probe_data));
    }
    if !gates.is_empty() {
        backend.barrier(&gates);
    }
}
