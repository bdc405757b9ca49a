use std::cell::Cell;

use image::RgbaImage;
use image::imageops::FilterType;
use wgpu::util::DeviceExt;

use crate::error::RenderError;

// ── Texture ──────────────────────────────────────────────────────────────────

/// A decoded image living on the GPU.
///
/// Immutable after creation. Owned by whichever material or animated texture
/// created it; shared textures (e.g. a common font sheet) are passed around
/// behind `Arc` and must only ever be cleaned up by their owner.
pub struct Texture {
    texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    /// Set once `cleanup` has run; a second call is a logged no-op.
    released: Cell<bool>,
}

impl Texture {
    /// Decode `bytes` (PNG) and upload it with a full mip chain.
    ///
    /// `source_label` identifies the origin (usually the file path) in decode
    /// diagnostics and GPU object labels.
    pub fn from_bytes(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bytes: &[u8],
        source_label: &str,
    ) -> Result<Self, RenderError> {
        let img = image::load_from_memory(bytes)
            .map_err(|source| RenderError::ImageDecode {
                source_label: source_label.to_string(),
                source,
            })?
            .to_rgba8();
        Ok(Self::from_rgba(device, queue, &img, source_label))
    }

    /// Upload an already-decoded RGBA image (used by the bake pass and tests
    /// that synthesize pixels directly).
    pub fn from_rgba(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        img: &RgbaImage,
        label: &str,
    ) -> Self {
        let (width, height) = img.dimensions();
        let mip_level_count = mip_level_count(width, height);

        // Nearest-neighbor sampling still wants mips for minification, so the
        // chain is built on the CPU and uploaded in one mip-major blob.
        let mut data = Vec::with_capacity((width * height * 4) as usize * 2);
        data.extend_from_slice(img.as_raw());
        for level in 1..mip_level_count {
            let (mw, mh) = mip_dimensions(width, height, level);
            let mip = image::imageops::resize(img, mw, mh, FilterType::Triangle);
            data.extend_from_slice(mip.as_raw());
        }

        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::MipMajor,
            &data,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            released: Cell::new(false),
        }
    }

    /// Wrap a texture rendered by the bake pass (single mip, no CPU pixels).
    pub(crate) fn from_raw(texture: wgpu::Texture, width: u32, height: u32) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            released: Cell::new(false),
        }
    }

    /// Centered quad positions sized so `width / relative_to` and
    /// `height / relative_to` map to world units. A smaller `relative_to`
    /// yields a larger quad; passing the texture's own height gives a
    /// one-unit-tall quad with the native aspect ratio preserved.
    ///
    /// Order: top-left, top-right, bottom-left, bottom-right.
    pub fn model_coords(&self, relative_to: f32) -> [[f32; 2]; 4] {
        centered_quad(self.width, self.height, relative_to)
    }

    /// Release the GPU texture. Exactly-once: later calls log and return.
    pub fn cleanup(&self) {
        if self.released.replace(true) {
            log::warn!("texture cleaned up twice; ignoring");
            return;
        }
        self.texture.destroy();
    }
}

/// Centered quad positions for a `width`×`height` texture scaled by
/// `1 / relative_to`. Pure so [`Texture::model_coords`] can be tested
/// without a GPU. Order: top-left, top-right, bottom-left, bottom-right.
pub fn centered_quad(width: u32, height: u32, relative_to: f32) -> [[f32; 2]; 4] {
    let hw = width as f32 / relative_to / 2.0;
    let hh = height as f32 / relative_to / 2.0;
    [[-hw, -hh], [hw, -hh], [-hw, hh], [hw, hh]]
}

/// Number of mip levels for a full chain down to 1×1.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Dimensions of mip `level` (level 0 is the base image).
pub fn mip_dimensions(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_count_for_square_power_of_two() {
        // 256×256 → 256, 128, ..., 1 = 9 levels.
        assert_eq!(mip_level_count(256, 256), 9);
    }

    #[test]
    fn mip_count_for_one_by_one() {
        assert_eq!(mip_level_count(1, 1), 1);
    }

    #[test]
    fn mip_count_uses_larger_dimension() {
        assert_eq!(mip_level_count(256, 16), 9);
        assert_eq!(mip_level_count(16, 256), 9);
    }

    #[test]
    fn mip_dimensions_never_reach_zero() {
        // 256×16: by level 5 the height has bottomed out at 1.
        assert_eq!(mip_dimensions(256, 16, 5), (8, 1));
        assert_eq!(mip_dimensions(256, 16, 8), (1, 1));
    }

    #[test]
    fn mip_dimensions_halve_each_level() {
        assert_eq!(mip_dimensions(64, 32, 0), (64, 32));
        assert_eq!(mip_dimensions(64, 32, 1), (32, 16));
        assert_eq!(mip_dimensions(64, 32, 2), (16, 8));
    }

    #[test]
    fn centered_quad_is_symmetric_about_origin() {
        let q = centered_quad(32, 48, 16.0);
        assert_eq!(q[0], [-1.0, -1.5]);
        assert_eq!(q[3], [1.0, 1.5]);
    }

    #[test]
    fn smaller_relative_to_yields_larger_quad() {
        let small = centered_quad(32, 32, 32.0);
        let large = centered_quad(32, 32, 16.0);
        assert!(large[3][0] > small[3][0]);
    }

    #[test]
    fn centered_quad_preserves_aspect_ratio() {
        let q = centered_quad(64, 32, 32.0);
        let w = q[1][0] - q[0][0];
        let h = q[2][1] - q[0][1];
        assert!((w / h - 2.0).abs() < 1e-6);
    }
}
