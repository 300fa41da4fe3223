//! GPU-side mirror of a volume's configuration and per-frame state. One
//! record per live volume, rewritten in full every frame.

use bytemuck::{Pod, Zeroable};
use glam::IVec3;

use super::desc::{ProbeVolumeDesc, ProbeVolumeMovement};

pub const FEATURE_RELOCATION: u32 = 1 << 0;
pub const FEATURE_CLASSIFICATION: u32 = 1 << 1;
pub const FEATURE_VARIABILITY: u32 = 1 << 2;
pub const FEATURE_SCROLLING: u32 = 1 << 3;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VolumeConstants {
    pub origin: [f32; 3],
    pub probe_hysteresis: f32,

    pub rotation: [f32; 4],
    pub probe_ray_rotation: [f32; 4],

    pub probe_spacing: [f32; 3],
    pub probe_max_ray_distance: f32,

    pub probe_counts: [i32; 3],
    pub probe_num_rays: i32,

    pub probe_num_irradiance_texels: i32,
    pub probe_num_distance_texels: i32,
    pub probe_normal_bias: f32,
    pub probe_view_bias: f32,

    pub probe_irradiance_threshold: f32,
    pub probe_brightness_threshold: f32,
    pub probe_min_frontface_distance: f32,
    pub probe_variability_threshold: f32,

    pub probe_scroll_offsets: [i32; 3],
    pub feature_bits: u32,

    pub probe_scroll_clear: [u32; 3],
    pub volume_index: u32,
}

impl VolumeConstants {
    pub fn pack(
        desc: &ProbeVolumeDesc,
        ray_rotation: glam::Quat,
        scroll_offsets: IVec3,
        scroll_clear: [bool; 3],
    ) -> Self {
        let mut feature_bits = 0;
        if desc.probe_relocation_enabled {
            feature_bits |= FEATURE_RELOCATION;
        }
        if desc.probe_classification_enabled {
            feature_bits |= FEATURE_CLASSIFICATION;
        }
        if desc.probe_variability_enabled {
            feature_bits |= FEATURE_VARIABILITY;
        }
        if desc.movement == ProbeVolumeMovement::Scrolling {
            feature_bits |= FEATURE_SCROLLING;
        }

        Self {
            origin: desc.origin.into(),
            probe_hysteresis: desc.probe_hysteresis,
            rotation: desc.rotation.into(),
            probe_ray_rotation: ray_rotation.into(),
            probe_spacing: desc.probe_spacing.into(),
            probe_max_ray_distance: desc.probe_max_ray_distance,
            probe_counts: desc.probe_counts.as_ivec3().into(),
            probe_num_rays: desc.probe_num_rays as i32,
            probe_num_irradiance_texels: desc.probe_num_irradiance_texels as i32,
            probe_num_distance_texels: desc.probe_num_distance_texels as i32,
            probe_normal_bias: desc.probe_normal_bias,
            probe_view_bias: desc.probe_view_bias,
            probe_irradiance_threshold: desc.probe_irradiance_threshold,
            probe_brightness_threshold: desc.probe_brightness_threshold,
            probe_min_frontface_distance: desc.probe_min_frontface_distance,
            probe_variability_threshold: desc.probe_variability_threshold,
            probe_scroll_offsets: scroll_offsets.into(),
            feature_bits,
            probe_scroll_clear: scroll_clear.map(u32::from),
            volume_index: desc.index,
        }
    }
}

/// Bindless slots for one volume's resources, mirrored to the GPU next
/// to the constants so shaders can index the right atlas.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct VolumeResourceIndices {
    pub ray_data_storage: u32,
    pub ray_data_sampled: u32,
    pub irradiance_storage: u32,
    pub irradiance_sampled: u32,
    pub distance_storage: u32,
    pub distance_sampled: u32,
    pub probe_data_storage: u32,
    pub probe_data_sampled: u32,
    pub variability_storage: u32,
    pub variability_average_storage: u32,
    pub _pad: [u32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_size_has_no_tail_padding() {
        // 36 scalar fields, 4 bytes each.
        assert_eq!(std::mem::size_of::<VolumeConstants>(), 144);
        assert_eq!(std::mem::size_of::<VolumeResourceIndices>(), 48);
    }

    #[test]
    fn feature_bits_follow_toggles() {
        let desc = ProbeVolumeDesc {
            probe_relocation_enabled: true,
            probe_variability_enabled: true,
            movement: ProbeVolumeMovement::Scrolling,
            ..Default::default()
        };
        let c = VolumeConstants::pack(&desc, glam::Quat::IDENTITY, IVec3::ZERO, [false; 3]);
        assert_eq!(
            c.feature_bits,
            FEATURE_RELOCATION | FEATURE_VARIABILITY | FEATURE_SCROLLING
        );
    }
}
