//! Debug dumps of atlas contents as PNGs. Out of band and not
//! performance critical; reads go through the backend's CPU texture
//! read path.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::path::Path;

use anyhow::{Context, Result};
use image::RgbaImage;

use candela_gpu::{GpuBackend, TextureDesc, TextureFormat, TextureHandle};

fn f16_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) as u32) << 31;
    let exp = ((bits >> 10) & 0x1f) as u32;
    let frac = (bits & 0x3ff) as u32;

    let word = match (exp, frac) {
        (0, 0) => sign,
        (0, _) => {
            // Subnormal: renormalize.
            let shift = frac.leading_zeros() - 21;
            sign | ((127 - 15 - shift as u32 + 1) << 23) | ((frac << (shift + 13)) & 0x7f_ffff)
        }
        (0x1f, 0) => sign | 0x7f80_0000,
        (0x1f, _) => sign | 0x7fc0_0000,
        _ => sign | ((exp + 127 - 15) << 23) | (frac << 13),
    };
    f32::from_bits(word)
}

/// Decodes one texel to RGBA, missing channels filled with 0/0/0/1.
fn texel_to_rgba(format: TextureFormat, bytes: &[u8]) -> [f32; 4] {
    let f32_at = |i: usize| {
        f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
    };
    let f16_at = |i: usize| f16_to_f32(u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]));

    match format {
        TextureFormat::R32G32B32A32Float => [f32_at(0), f32_at(1), f32_at(2), f32_at(3)],
        TextureFormat::R32G32Float => [f32_at(0), f32_at(1), 0.0, 1.0],
        TextureFormat::R32Float => [f32_at(0), 0.0, 0.0, 1.0],
        TextureFormat::R16G16B16A16Float => [f16_at(0), f16_at(1), f16_at(2), f16_at(3)],
        TextureFormat::R16G16Float => [f16_at(0), f16_at(1), 0.0, 1.0],
        TextureFormat::R16Float => [f16_at(0), 0.0, 0.0, 1.0],
        TextureFormat::R10G10B10A2Unorm => {
            let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            [
                (word & 0x3ff) as f32 / 1023.0,
                ((word >> 10) & 0x3ff) as f32 / 1023.0,
                ((word >> 20) & 0x3ff) as f32 / 1023.0,
                ((word >> 30) & 0x3) as f32 / 3.0,
            ]
        }
        TextureFormat::R8G8B8A8Unorm => [
            bytes[0] as f32 / 255.0,
            bytes[1] as f32 / 255.0,
            bytes[2] as f32 / 255.0,
            bytes[3] as f32 / 255.0,
        ],
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// Writes every array layer of the texture as `<stem>_layer<N>.png`
/// under `dir`.
pub fn write_texture_layers(
    backend: &dyn GpuBackend,
    handle: TextureHandle,
    desc: &TextureDesc,
    dir: &Path,
    stem: &str,
) -> Result<()> {
    let data = backend
        .read_texture(handle)
        .with_context(|| format!("reading texture for dump '{stem}'"))?;

    let block = desc.format.block_bytes();
    let layer_bytes = desc.layer_bytes();

    for layer in 0..desc.array_layers as usize {
        let layer_data = &data[layer * layer_bytes..(layer + 1) * layer_bytes];
        let mut img = RgbaImage::new(desc.width, desc.height);

        for y in 0..desc.height {
            for x in 0..desc.width {
                let offset = (y as usize * desc.width as usize + x as usize) * block;
                let rgba = texel_to_rgba(desc.format, &layer_data[offset..offset + block]);
                img.put_pixel(
                    x,
                    y,
                    image::Rgba([to_u8(rgba[0]), to_u8(rgba[1]), to_u8(rgba[2]), to_u8(rgba[3])]),
                );
            }
        }

        let path = dir.join(format!("{stem}_layer{layer}.png"));
        img.save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    debug!("dumped '{stem}' ({} layers)", desc.array_layers);
    Ok(())
}
