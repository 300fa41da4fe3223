//! Ordered, nullable volume slots plus the registry-wide GPU buffers
//! that mirror every live volume's constants and resource indices.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::mem::size_of;
use std::path::Path;

use anyhow::{Context, Result};

use candela_gpu::{
    BarrierScope, BufferDesc, BufferHandle, DynamicConstants, GpuBackend,
};

use crate::volume::constants::{VolumeConstants, VolumeResourceIndices};
use crate::volume::desc::ProbeVolumeDesc;
use crate::volume::ProbeVolume;

/// Convergence is never trusted before this many variability samples.
pub const MIN_VARIABILITY_SAMPLES: u32 = 16;

#[derive(Default)]
pub struct VolumeRegistry {
    volumes: Vec<Option<ProbeVolume>>,
    constants_buffer: Option<BufferHandle>,
    resource_indices_buffer: Option<BufferHandle>,
    /// Live count the GPU buffers are currently sized for.
    sized_for: usize,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.volumes.iter().filter(|v| v.is_some()).count()
    }

    pub fn volume(&self, index: u32) -> Option<&ProbeVolume> {
        self.volumes.get(index as usize).and_then(|v| v.as_ref())
    }

    pub fn volume_mut(&mut self, index: u32) -> Option<&mut ProbeVolume> {
        self.volumes
            .get_mut(index as usize)
            .and_then(|v| v.as_mut())
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (u32, &ProbeVolume)> {
        self.volumes
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (i as u32, v)))
    }

    pub fn iter_live_mut(&mut self) -> impl Iterator<Item = (u32, &mut ProbeVolume)> {
        self.volumes
            .iter_mut()
            .enumerate()
            .filter_map(|(i, v)| v.as_mut().map(|v| (i as u32, v)))
    }

    pub fn constants_buffer(&self) -> Option<BufferHandle> {
        self.constants_buffer
    }

    /// Builds the volume described by `desc` at its index, fully
    /// destroying any prior occupant first. Failure leaves the slot
    /// empty; callers abort initialization on any error.
    pub fn create_or_replace(
        &mut self,
        backend: &mut dyn GpuBackend,
        shader_dir: &Path,
        desc: ProbeVolumeDesc,
    ) -> Result<()> {
        let slot = desc.index as usize;
        if slot >= self.volumes.len() {
            self.volumes.resize_with(slot + 1, || None);
        }

        if let Some(old) = self.volumes[slot].take() {
            debug!("replacing volume '{}' at index {slot}", old.desc.name);
            old.destroy(backend);
        }

        let volume = ProbeVolume::create(backend, shader_dir, desc)?;
        self.volumes[slot] = Some(volume);

        self.resize_gpu_buffers(backend)
    }

    /// Releases everything tied to the slot. Safe to call on empty or
    /// already-destroyed slots.
    pub fn destroy(&mut self, backend: &mut dyn GpuBackend, index: u32) {
        if let Some(volume) = self
            .volumes
            .get_mut(index as usize)
            .and_then(Option::take)
        {
            volume.destroy(backend);
            if let Err(err) = self.resize_gpu_buffers(backend) {
                warn!("registry buffer resize after destroy failed: {err:#}");
            }
        }
    }

    pub fn destroy_all(&mut self, backend: &mut dyn GpuBackend) {
        for slot in &mut self.volumes {
            if let Some(volume) = slot.take() {
                volume.destroy(backend);
            }
        }
        self.volumes.clear();
        if let Some(buffer) = self.constants_buffer.take() {
            backend.destroy_buffer(buffer);
        }
        if let Some(buffer) = self.resource_indices_buffer.take() {
            backend.destroy_buffer(buffer);
        }
        self.sized_for = 0;
    }

    /// The registry buffers always hold `max(1, live) × record` bytes and
    /// are re-created whenever the live count changes.
    fn resize_gpu_buffers(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        let records = self.live_count().max(1);
        if records == self.sized_for && self.constants_buffer.is_some() {
            return Ok(());
        }

        if let Some(buffer) = self.constants_buffer.take() {
            backend.destroy_buffer(buffer);
        }
        if let Some(buffer) = self.resource_indices_buffer.take() {
            backend.destroy_buffer(buffer);
        }

        self.constants_buffer = Some(
            backend
                .create_buffer(
                    BufferDesc::device_local(records * size_of::<VolumeConstants>()),
                    "volume constants",
                )
                .context("volume constants buffer")?,
        );
        self.resource_indices_buffer = Some(
            backend
                .create_buffer(
                    BufferDesc::device_local(records * size_of::<VolumeResourceIndices>()),
                    "volume resource indices",
                )
                .context("volume resource indices buffer")?,
        );
        self.sized_for = records;
        Ok(())
    }

    /// Per-frame selection. A volume drops out of the selected set only
    /// once its variability has converged: variability enabled, at least
    /// `MIN_VARIABILITY_SAMPLES` samples accumulated, and the rolling
    /// average below the volume's threshold. Selected variability volumes
    /// accumulate one more sample.
    pub fn select_active(&mut self) -> Vec<u32> {
        let mut selected = Vec::new();
        for (index, volume) in self.iter_live_mut() {
            let converged = volume.desc.probe_variability_enabled
                && volume.variability_samples >= MIN_VARIABILITY_SAMPLES
                && volume.average_variability < volume.desc.probe_variability_threshold;

            if converged {
                trace!(
                    "volume '{}' converged (avg {:.5}), skipping update",
                    volume.desc.name,
                    volume.average_variability
                );
                continue;
            }

            if volume.desc.probe_variability_enabled {
                volume.variability_samples += 1;
            }
            selected.push(index);
        }
        selected
    }

    /// Rewrites every live volume's constants and resource indices for
    /// this frame: staged through the dynamic-constants slot, copied to
    /// the device-local buffers, gated by a barrier. Never patched
    /// incrementally.
    pub fn upload_frame_constants(
        &mut self,
        backend: &mut dyn GpuBackend,
        dynamic_constants: &mut DynamicConstants,
    ) -> Result<()> {
        let mut records = Vec::new();
        let mut indices = Vec::new();
        for (_, volume) in self.iter_live_mut() {
            records.push(volume.constants());
            indices.push(volume.resource_indices(backend));
            // Scroll clears are one-shot; this frame's constants carry
            // them, the next frame's must not.
            volume.scroll_clear = [false; 3];
        }
        if records.is_empty() {
            return Ok(());
        }

        let constants_buffer = self
            .constants_buffer
            .context("registry GPU buffers not created")?;
        let indices_buffer = self
            .resource_indices_buffer
            .context("registry GPU buffers not created")?;

        let offset = dynamic_constants.push_slice(backend, &records)?;
        backend.copy_buffer(
            dynamic_constants.buffer,
            offset,
            constants_buffer,
            0,
            records.len() * size_of::<VolumeConstants>(),
        );

        let offset = dynamic_constants.push_slice(backend, &indices)?;
        backend.copy_buffer(
            dynamic_constants.buffer,
            offset,
            indices_buffer,
            0,
            indices.len() * size_of::<VolumeResourceIndices>(),
        );

        backend.barrier(&[
            BarrierScope::Constants(constants_buffer),
            BarrierScope::Constants(indices_buffer),
        ]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candela_gpu::mock::{GpuOp, RecordingBackend};
    use std::path::PathBuf;

    fn shader_dir() -> PathBuf {
        PathBuf::from("shaders")
    }

    fn desc(index: u32, name: &str) -> ProbeVolumeDesc {
        ProbeVolumeDesc {
            index,
            name: name.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn index_reuse_destroys_the_prior_occupant_completely() {
        let mut backend = RecordingBackend::new();
        let mut registry = VolumeRegistry::new();

        registry
            .create_or_replace(&mut backend, &shader_dir(), desc(0, "first"))
            .unwrap();
        let old = registry.volume(0).unwrap();
        let old_textures = [
            old.textures.ray_data,
            old.textures.irradiance,
            old.textures.distance,
            old.textures.probe_data,
        ];

        registry
            .create_or_replace(&mut backend, &shader_dir(), desc(0, "second"))
            .unwrap();

        assert_eq!(registry.volume(0).unwrap().desc.name, "second");
        assert_eq!(registry.live_count(), 1);
        for handle in old_textures {
            assert_eq!(backend.destroys_of_texture(handle), 1);
        }
        let new = registry.volume(0).unwrap();
        assert!(!old_textures.contains(&new.textures.ray_data));
    }

    #[test]
    fn constants_buffer_is_recreated_when_live_count_changes() {
        let mut backend = RecordingBackend::new();
        let mut registry = VolumeRegistry::new();

        registry
            .create_or_replace(&mut backend, &shader_dir(), desc(0, "a"))
            .unwrap();
        let first = registry.constants_buffer().unwrap();

        registry
            .create_or_replace(&mut backend, &shader_dir(), desc(1, "b"))
            .unwrap();
        let second = registry.constants_buffer().unwrap();
        assert_ne!(first, second);
        assert!(backend
            .ops()
            .contains(&GpuOp::DestroyBuffer { handle: first }));

        // Replacing in place keeps the count, so the buffer survives.
        registry
            .create_or_replace(&mut backend, &shader_dir(), desc(1, "b2"))
            .unwrap();
        assert_eq!(registry.constants_buffer().unwrap(), second);

        // Down to zero volumes still leaves room for one record.
        registry.destroy(&mut backend, 0);
        registry.destroy(&mut backend, 1);
        assert_eq!(registry.live_count(), 0);
        assert!(registry.constants_buffer().is_some());
    }

    #[test]
    fn selection_excludes_only_converged_volumes() {
        let mut backend = RecordingBackend::new();
        let mut registry = VolumeRegistry::new();

        registry
            .create_or_replace(
                &mut backend,
                &shader_dir(),
                ProbeVolumeDesc {
                    probe_variability_enabled: true,
                    probe_variability_threshold: 0.05,
                    ..desc(0, "v")
                },
            )
            .unwrap();

        // Converged value but one sample short of the floor: never excluded.
        {
            let v = registry.volume_mut(0).unwrap();
            v.variability_samples = MIN_VARIABILITY_SAMPLES - 1;
            v.average_variability = 0.05 - 1e-6;
        }
        assert_eq!(registry.select_active(), vec![0]);

        // At the floor with converged variability: excluded.
        {
            let v = registry.volume_mut(0).unwrap();
            v.variability_samples = MIN_VARIABILITY_SAMPLES;
            v.average_variability = 0.05 - 1e-6;
        }
        assert!(registry.select_active().is_empty());

        // At the floor but not converged: still selected.
        {
            let v = registry.volume_mut(0).unwrap();
            v.average_variability = 0.05;
        }
        assert_eq!(registry.select_active(), vec![0]);

        // A clear resets the counter and re-includes the volume.
        {
            let v = registry.volume_mut(0).unwrap();
            v.average_variability = 0.0;
            v.request_clear_variability();
        }
        assert_eq!(registry.select_active(), vec![0]);
    }

    #[test]
    fn selection_counts_samples_for_variability_volumes_only() {
        let mut backend = RecordingBackend::new();
        let mut registry = VolumeRegistry::new();

        registry
            .create_or_replace(&mut backend, &shader_dir(), desc(0, "plain"))
            .unwrap();
        registry
            .create_or_replace(
                &mut backend,
                &shader_dir(),
                ProbeVolumeDesc {
                    probe_variability_enabled: true,
                    ..desc(1, "var")
                },
            )
            .unwrap();

        for _ in 0..3 {
            registry.select_active();
        }
        assert_eq!(registry.volume(0).unwrap().variability_samples, 0);
        assert_eq!(registry.volume(1).unwrap().variability_samples, 3);
    }

    #[test]
    fn scroll_clear_flags_are_consumed_by_the_upload() {
        use crate::volume::desc::ProbeVolumeMovement;
        use glam::Vec3;

        let mut backend = RecordingBackend::new();
        let mut registry = VolumeRegistry::new();
        registry
            .create_or_replace(
                &mut backend,
                &shader_dir(),
                ProbeVolumeDesc {
                    probe_counts: glam::UVec3::new(4, 4, 4),
                    probe_spacing: Vec3::ONE,
                    movement: ProbeVolumeMovement::Scrolling,
                    ..desc(0, "scroll")
                },
            )
            .unwrap();
        let mut dc = DynamicConstants::new(&mut backend).unwrap();

        // Wrap one plane in X; this frame's constants carry the clear.
        registry
            .volume_mut(0)
            .unwrap()
            .move_to(Vec3::new(1.5, 0.0, 0.0));
        assert_eq!(
            registry.volume(0).unwrap().constants().probe_scroll_clear,
            [1, 0, 0]
        );

        registry
            .upload_frame_constants(&mut backend, &mut dc)
            .unwrap();

        // The frame after the wrap must not re-clear the plane.
        assert_eq!(
            registry.volume(0).unwrap().constants().probe_scroll_clear,
            [0, 0, 0]
        );
        // Offsets survive; only the clear request is transient.
        assert_eq!(
            registry.volume(0).unwrap().constants().probe_scroll_offsets,
            [1, 0, 0]
        );
        dc.destroy(&mut backend);
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut backend = RecordingBackend::new();
        let mut registry = VolumeRegistry::new();

        registry
            .create_or_replace(&mut backend, &shader_dir(), desc(0, "v"))
            .unwrap();
        let ray_data = registry.volume(0).unwrap().textures.ray_data;

        registry.destroy(&mut backend, 0);
        registry.destroy(&mut backend, 0);
        registry.destroy(&mut backend, 7);

        assert_eq!(backend.destroys_of_texture(ray_data), 1);
        assert!(registry.volume(0).is_none());
    }

    #[test]
    fn failed_creation_leaves_the_slot_empty() {
        let mut backend = RecordingBackend::new();
        let mut registry = VolumeRegistry::new();
        backend.fail_shader_compiles_containing("probe_blending");

        assert!(registry
            .create_or_replace(&mut backend, &shader_dir(), desc(0, "v"))
            .is_err());
        assert!(registry.volume(0).is_none());
        assert_eq!(registry.live_count(), 0);
    }
}
