//! Irradiance and distance blending plus the border-texel update. Both
//! atlases follow the same hysteresis law; borders are copied, never
//! blended, so bilinear lookups wrap seamlessly across probe-tile edges.

use candela_gpu::{BarrierScope, GpuBackend};

use crate::registry::VolumeRegistry;

const BORDER_GROUP_SIZE: u32 = 8;

/// Exponential hysteresis blend. With `0 <= hysteresis < 1` the texel
/// strictly approaches the incoming value and reaches it at the limit.
pub fn blend_texel(old: f32, incoming: f32, hysteresis: f32) -> f32 {
    old + (incoming - old) * (1.0 - hysteresis)
}

/// Interior source for a border texel of an `(n + 2) x (n + 2)` probe
/// tile, in tile-local coordinates. Returns `None` for interior texels.
///
/// The mapping realizes octahedral wrap-around: edge texels mirror the
/// opposing end of the adjacent interior row/column, corners take the
/// diagonally opposite interior corner.
pub fn border_source_texel(n: u32, x: u32, y: u32) -> Option<(u32, u32)> {
    let edge = n + 1;
    debug_assert!(x <= edge && y <= edge);

    match (x, y) {
        (0, 0) => Some((n, n)),
        (x, 0) if x == edge => Some((1, n)),
        (0, y) if y == edge => Some((n, 1)),
        (x, y) if x == edge && y == edge => Some((1, 1)),
        (x, 0) => Some((edge - x, 1)),
        (x, y) if y == edge => Some((edge - x, n)),
        (0, y) => Some((1, edge - y)),
        (x, y) if x == edge => Some((n, edge - y)),
        _ => None,
    }
}

/// CPU reference for the border pass: applies the copy to one tile laid
/// out row-major with stride `n + 2`.
pub fn apply_border_copy(tile: &mut [f32], n: u32) {
    let stride = (n + 2) as usize;
    debug_assert_eq!(tile.len(), stride * stride);

    for y in 0..n + 2 {
        for x in 0..n + 2 {
            if let Some((sx, sy)) = border_source_texel(n, x, y) {
                tile[y as usize * stride + x as usize] =
                    tile[sy as usize * stride + sx as usize];
            }
        }
    }
}

/// Records the blend and border sub-passes for the selected volumes:
/// interior blends for both atlases, a barrier, the four border
/// dispatches per volume, a barrier.
pub fn record(backend: &mut dyn GpuBackend, registry: &VolumeRegistry, selected: &[u32]) {
    let mut gates = Vec::new();

    for &index in selected {
        let Some(volume) = registry.volume(index) else {
            continue;
        };
        let c = volume.desc.probe_counts;

        // One thread group per probe; threads cooperate on the texels of
        // that probe's tile.
        backend.dispatch(
            volume.pipelines.blend_irradiance,
            "probe blend irradiance",
            [c.x, c.z, c.y],
        );
        backend.dispatch(
            volume.pipelines.blend_distance,
            "probe blend distance",
            [c.x, c.z, c.y],
        );

        gates.push(BarrierScope::IrradianceAtlas(volume.textures.irradiance));
        gates.push(BarrierScope::DistanceAtlas(volume.textures.distance));
    }
    if gates.is_empty() {
        return;
    }

    // Borders read the freshly blended interiors.
    backend.barrier(&gates);

    for &index in selected {
        let Some(volume) = registry.volume(index) else {
            continue;
        };
        let c = volume.desc.probe_counts;

        for (label_rows, label_columns, texels) in [
            (
                "probe border rows irradiance",
                "probe border columns irradiance",
                volume.desc.probe_num_irradiance_texels,
            ),
            (
                "probe border rows distance",
                "probe border columns distance",
                volume.desc.probe_num_distance_texels,
            ),
        ] {
            let tile = texels + 2;
            // Rows: two border rows per probe tile, full atlas width.
            backend.dispatch(
                volume.pipelines.border_rows,
                label_rows,
                [
                    (c.x * tile).div_ceil(BORDER_GROUP_SIZE),
                    (c.z * 2).div_ceil(BORDER_GROUP_SIZE).max(1),
                    c.y,
                ],
            );
            // Columns: two border columns per probe tile, full atlas height.
            backend.dispatch(
                volume.pipelines.border_columns,
                label_columns,
                [
                    (c.x * 2).div_ceil(BORDER_GROUP_SIZE).max(1),
                    (c.z * tile).div_ceil(BORDER_GROUP_SIZE),
                    c.y,
                ],
            );
        }
    }

    backend.barrier(&gates);
}
