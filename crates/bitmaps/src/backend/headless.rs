use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use super::{
    TexelFormat, TextureBackend, TextureDescriptor, TextureExtent, TextureKey,
    check_pitched_buffer, pitched_rows,
};
use crate::BackendError;

pub const DEFAULT_MAX_TEXTURE_SIZE: u32 = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    pub max_texture_size: TextureExtent,
    /// Texture creation starts failing once this many textures were created.
    pub fail_texture_creation_after: Option<usize>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            max_texture_size: TextureExtent::new(DEFAULT_MAX_TEXTURE_SIZE, DEFAULT_MAX_TEXTURE_SIZE),
            fail_texture_creation_after: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessTexture {
    pub descriptor: TextureDescriptor,
    /// Tightly packed texels, `width * bytes_per_texel` per row.
    pub texels: Vec<u8>,
    pub upload_count: usize,
}

impl HeadlessTexture {
    /// Texels of row `y`, or `None` past the bottom edge.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.descriptor.height {
            return None;
        }
        let row_bytes = self.descriptor.width as usize * self.descriptor.format.bytes_per_texel();
        let start = y as usize * row_bytes;
        self.texels.get(start..start + row_bytes)
    }
}

/// Stand-in for the renderer's front buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessFrame {
    pub width: u32,
    pub height: u32,
    pub format: TexelFormat,
    pub texels: Vec<u8>,
}

/// CPU-only texture store.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    config: HeadlessConfig,
    textures: SlotMap<TextureKey, HeadlessTexture>,
    created: usize,
    display: Option<HeadlessFrame>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HeadlessConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_max_texture_size(width: u32, height: u32) -> Self {
        Self::with_config(HeadlessConfig {
            max_texture_size: TextureExtent::new(width, height),
            ..HeadlessConfig::default()
        })
    }

    pub fn config(&self) -> &HeadlessConfig {
        &self.config
    }

    pub fn set_fail_texture_creation_after(&mut self, limit: Option<usize>) {
        self.config.fail_texture_creation_after = limit;
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn created_textures(&self) -> usize {
        self.created
    }

    pub fn texture(&self, key: TextureKey) -> Option<&HeadlessTexture> {
        self.textures.get(key)
    }

    pub fn set_display_frame(&mut self, frame: Option<HeadlessFrame>) {
        self.display = frame;
    }
}

impl TextureBackend for HeadlessBackend {
    fn max_texture_size(&self) -> TextureExtent {
        self.config.max_texture_size
    }

    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureKey, BackendError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(BackendError::TextureCreate(format!(
                "empty texture {}x{}",
                descriptor.width, descriptor.height
            )));
        }
        let limit = self.config.max_texture_size;
        if !descriptor.extent().fits_within(limit) {
            return Err(BackendError::TextureTooLarge {
                width: descriptor.width,
                height: descriptor.height,
                max_width: limit.width,
                max_height: limit.height,
            });
        }
        if self
            .config
            .fail_texture_creation_after
            .is_some_and(|limit| self.created >= limit)
        {
            return Err(BackendError::TextureCreate(format!(
                "injected failure after {} textures",
                self.created
            )));
        }

        let len = descriptor.width as usize
            * descriptor.height as usize
            * descriptor.format.bytes_per_texel();
        self.created += 1;
        Ok(self.textures.insert(HeadlessTexture {
            descriptor: *descriptor,
            texels: vec![0; len],
            upload_count: 0,
        }))
    }

    fn update_texture(
        &mut self,
        key: TextureKey,
        pixels: &[u8],
        pitch: usize,
    ) -> Result<(), BackendError> {
        let texture = self
            .textures
            .get_mut(key)
            .ok_or(BackendError::UnknownTexture(key))?;
        let descriptor = texture.descriptor;
        let row_bytes =
            check_pitched_buffer(descriptor.extent(), descriptor.format, pixels.len(), pitch)?;
        for (dst, src) in texture.texels.chunks_exact_mut(row_bytes).zip(pitched_rows(
            pixels,
            pitch,
            row_bytes,
            descriptor.height as usize,
        )) {
            dst.copy_from_slice(src);
        }
        texture.upload_count += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, key: TextureKey) -> bool {
        self.textures.remove(key).is_some()
    }

    fn read_pixels(
        &mut self,
        format: TexelFormat,
        extent: TextureExtent,
        dst: &mut [u8],
        pitch: usize,
    ) -> Result<(), BackendError> {
        let frame = self.display.as_ref().ok_or(BackendError::ReadbackUnavailable)?;
        if frame.format != format {
            return Err(BackendError::Readback(format!(
                "display is {:?}, {:?} requested",
                frame.format, format
            )));
        }
        check_pitched_buffer(extent, format, dst.len(), pitch)?;
        let frame_len = frame.width as usize * frame.height as usize * format.bytes_per_texel();
        if frame.texels.len() < frame_len {
            return Err(BackendError::Readback(format!(
                "display frame holds {} of {frame_len} bytes",
                frame.texels.len()
            )));
        }

        let visible = extent.clamp_to(TextureExtent::new(frame.width, frame.height));
        let copy_bytes = visible.width as usize * format.bytes_per_texel();
        let frame_row_bytes = frame.width as usize * format.bytes_per_texel();
        for y in 0..visible.height as usize {
            let src = &frame.texels[y * frame_row_bytes..][..copy_bytes];
            dst[y * pitch..][..copy_bytes].copy_from_slice(src);
        }
        Ok(())
    }

    fn texture_size(&self, key: TextureKey) -> Option<TextureExtent> {
        self.textures.get(key).map(|texture| texture.descriptor.extent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TextureAccess;

    fn descriptor(width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor {
            width,
            height,
            format: TexelFormat::Argb8888,
            access: TextureAccess::Static,
        }
    }

    #[test]
    fn rejects_textures_above_the_limit() {
        let mut backend = HeadlessBackend::with_max_texture_size(64, 32);
        assert!(backend.create_texture(&descriptor(64, 32)).is_ok());
        assert_eq!(
            backend.create_texture(&descriptor(65, 32)),
            Err(BackendError::TextureTooLarge {
                width: 65,
                height: 32,
                max_width: 64,
                max_height: 32
            })
        );
        assert_eq!(backend.live_textures(), 1);
    }

    #[test]
    fn upload_strips_row_padding() {
        let mut backend = HeadlessBackend::new();
        let key = backend.create_texture(&descriptor(2, 2)).expect("create");
        let mut pixels = vec![0xEE; 24];
        pixels[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        pixels[12..20].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
        backend.update_texture(key, &pixels, 12).expect("upload");

        let texture = backend.texture(key).expect("texture");
        assert_eq!(texture.texels, (1..=16).collect::<Vec<u8>>());
        assert_eq!(texture.upload_count, 1);
        assert_eq!(texture.row(1), Some(&[9u8, 10, 11, 12, 13, 14, 15, 16][..]));
        assert_eq!(texture.row(2), None);
    }

    #[test]
    fn injected_failure_triggers_after_the_configured_count() {
        let mut backend = HeadlessBackend::new();
        backend.set_fail_texture_creation_after(Some(1));
        let first = backend.create_texture(&descriptor(4, 4)).expect("first");
        assert!(matches!(
            backend.create_texture(&descriptor(4, 4)),
            Err(BackendError::TextureCreate(_))
        ));
        assert!(backend.destroy_texture(first));
        assert!(!backend.destroy_texture(first));
        assert!(matches!(
            backend.update_texture(first, &[0; 64], 16),
            Err(BackendError::UnknownTexture(_))
        ));
    }

    #[test]
    fn readback_requires_a_display_frame_of_the_same_format() {
        let mut backend = HeadlessBackend::new();
        let mut dst = vec![0u8; 8];
        let extent = TextureExtent::new(2, 1);
        assert_eq!(
            backend.read_pixels(TexelFormat::Argb8888, extent, &mut dst, 8),
            Err(BackendError::ReadbackUnavailable)
        );

        backend.set_display_frame(Some(HeadlessFrame {
            width: 1,
            height: 1,
            format: TexelFormat::Argb8888,
            texels: vec![1, 2, 3, 4],
        }));
        assert!(
            backend
                .read_pixels(TexelFormat::Rgb565, TextureExtent::new(1, 1), &mut dst, 2)
                .is_err()
        );
        backend
            .read_pixels(TexelFormat::Argb8888, extent, &mut dst, 8)
            .expect("readback");
        assert_eq!(dst, [1, 2, 3, 4, 0, 0, 0, 0]);
    }
}
