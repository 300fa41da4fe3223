use glam::{Quat, UVec3, Vec3};
use serde::{Deserialize, Serialize};

/// How a volume moves through the world.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeVolumeMovement {
    /// Origin is fixed for the volume's lifetime.
    Fixed,
    /// Infinite scrolling: the lattice stays put in world space while the
    /// volume origin tracks a target; probes wrap around plane by plane.
    Scrolling,
}

/// Immutable-per-generation volume configuration. Changing any of this
/// means destroying and recreating the volume at the same index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeVolumeDesc {
    /// Stable slot in the registry; unique among live volumes.
    pub index: u32,
    pub name: String,

    pub origin: Vec3,
    pub rotation: Quat,
    pub probe_spacing: Vec3,
    pub probe_counts: UVec3,

    pub probe_num_rays: u32,
    /// Interior texels per probe in the irradiance atlas (border ring
    /// excluded).
    pub probe_num_irradiance_texels: u32,
    /// Interior texels per probe in the distance atlas.
    pub probe_num_distance_texels: u32,

    pub probe_hysteresis: f32,
    pub probe_normal_bias: f32,
    pub probe_view_bias: f32,
    pub probe_max_ray_distance: f32,
    pub probe_irradiance_threshold: f32,
    pub probe_brightness_threshold: f32,
    /// Maximum displacement cap for relocation.
    pub probe_min_frontface_distance: f32,

    pub probe_relocation_enabled: bool,
    pub probe_classification_enabled: bool,
    pub probe_variability_enabled: bool,
    /// Convergence threshold on the volume-average variability below
    /// which updates stop.
    pub probe_variability_threshold: f32,

    pub movement: ProbeVolumeMovement,
    pub show_probes: bool,
}

impl Default for ProbeVolumeDesc {
    fn default() -> Self {
        Self {
            index: 0,
            name: "probe volume".to_owned(),
            origin: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            probe_spacing: Vec3::ONE,
            probe_counts: UVec3::new(8, 8, 8),
            probe_num_rays: 256,
            probe_num_irradiance_texels: 8,
            probe_num_distance_texels: 16,
            probe_hysteresis: 0.97,
            probe_normal_bias: 0.1,
            probe_view_bias: 0.1,
            probe_max_ray_distance: 10_000.0,
            probe_irradiance_threshold: 0.25,
            probe_brightness_threshold: 0.1,
            probe_min_frontface_distance: 0.3,
            probe_relocation_enabled: false,
            probe_classification_enabled: false,
            probe_variability_enabled: false,
            probe_variability_threshold: 0.05,
            movement: ProbeVolumeMovement::Fixed,
            show_probes: false,
        }
    }
}

impl ProbeVolumeDesc {
    pub fn probe_count(&self) -> u32 {
        self.probe_counts.x * self.probe_counts.y * self.probe_counts.z
    }

    /// Probes in one horizontal plane; the atlas array-layer count is the
    /// vertical probe count.
    pub fn probes_per_plane(&self) -> u32 {
        self.probe_counts.x * self.probe_counts.z
    }
}
