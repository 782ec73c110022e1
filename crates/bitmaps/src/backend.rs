//! Texture backend contract.
//!
//! The manager never talks to a graphics API directly. Every texture it owns
//! is a [`TextureKey`] handed out by a [`TextureBackend`], and every upload
//! is a packed pixel buffer plus the pitch of its rows.

pub mod headless;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

use crate::BackendError;

slotmap::new_key_type! {
    pub struct TextureKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureExtent {
    pub width: u32,
    pub height: u32,
}

impl TextureExtent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn fits_within(self, limit: TextureExtent) -> bool {
        self.width <= limit.width && self.height <= limit.height
    }

    /// Component-wise minimum.
    pub fn clamp_to(self, limit: TextureExtent) -> TextureExtent {
        TextureExtent {
            width: self.width.min(limit.width),
            height: self.height.min(limit.height),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureAccess {
    /// Filled from a CPU buffer by explicit uploads.
    Static,
    /// Written by the renderer every frame; no CPU copy is kept.
    Streaming,
}

/// Texel layouts a bitmap can be mirrored into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexelFormat {
    /// 16-bit 5-6-5, stored little-endian.
    Rgb565,
    /// 32-bit ARGB, stored little-endian (bytes B, G, R, A).
    Argb8888,
}

const_assert_eq!(TexelFormat::Rgb565.bytes_per_texel(), 2);
const_assert_eq!(TexelFormat::Argb8888.bytes_per_texel(), 4);

impl TexelFormat {
    /// Texture format for a bitmap depth. Only 16 and 32 bit bitmaps get textures.
    pub const fn for_depth(depth: u32) -> Option<TexelFormat> {
        match depth {
            16 => Some(TexelFormat::Rgb565),
            32 => Some(TexelFormat::Argb8888),
            _ => None,
        }
    }

    pub const fn bytes_per_texel(self) -> usize {
        match self {
            TexelFormat::Rgb565 => 2,
            TexelFormat::Argb8888 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: TexelFormat,
    pub access: TextureAccess,
}

impl TextureDescriptor {
    pub fn extent(&self) -> TextureExtent {
        TextureExtent::new(self.width, self.height)
    }
}

pub trait TextureBackend {
    /// Largest texture the backend can create.
    fn max_texture_size(&self) -> TextureExtent;

    fn create_texture(&mut self, descriptor: &TextureDescriptor)
    -> Result<TextureKey, BackendError>;

    /// Replaces the whole texture with `pixels`, whose rows start every
    /// `pitch` bytes.
    fn update_texture(
        &mut self,
        key: TextureKey,
        pixels: &[u8],
        pitch: usize,
    ) -> Result<(), BackendError>;

    /// Returns false when `key` is not a live texture.
    fn destroy_texture(&mut self, key: TextureKey) -> bool;

    /// Copies the top-left `extent` of the display surface into `dst`,
    /// converting it to `format`.
    fn read_pixels(
        &mut self,
        format: TexelFormat,
        extent: TextureExtent,
        dst: &mut [u8],
        pitch: usize,
    ) -> Result<(), BackendError>;

    fn texture_size(&self, key: TextureKey) -> Option<TextureExtent>;
}

/// Checks that a pitched buffer covers `extent` texels of `format` and
/// returns the packed byte width of one row.
pub(crate) fn check_pitched_buffer(
    extent: TextureExtent,
    format: TexelFormat,
    len: usize,
    pitch: usize,
) -> Result<usize, BackendError> {
    let row_bytes = extent.width as usize * format.bytes_per_texel();
    let rows = extent.height as usize;
    let required = match rows {
        0 => 0,
        rows => pitch.saturating_mul(rows - 1).saturating_add(row_bytes),
    };
    if pitch < row_bytes || len < required {
        return Err(BackendError::UploadSizeMismatch {
            required,
            actual: len,
        });
    }
    Ok(row_bytes)
}

/// Iterates over the packed part of each row of a pitched buffer.
pub(crate) fn pitched_rows(
    pixels: &[u8],
    pitch: usize,
    row_bytes: usize,
    rows: usize,
) -> impl Iterator<Item = &[u8]> {
    (0..rows).map(move |row| {
        let start = row * pitch;
        &pixels[start..start + row_bytes]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_16_and_32_bit_depths_get_textures() {
        assert_eq!(TexelFormat::for_depth(16), Some(TexelFormat::Rgb565));
        assert_eq!(TexelFormat::for_depth(32), Some(TexelFormat::Argb8888));
        for depth in [1, 8, 15, 24] {
            assert_eq!(TexelFormat::for_depth(depth), None);
        }
    }

    #[test]
    fn pitched_buffer_may_omit_trailing_padding() {
        let extent = TextureExtent::new(3, 2);
        let row = check_pitched_buffer(extent, TexelFormat::Argb8888, 28, 16).expect("fits");
        assert_eq!(row, 12);
        assert_eq!(
            check_pitched_buffer(extent, TexelFormat::Argb8888, 27, 16),
            Err(BackendError::UploadSizeMismatch {
                required: 28,
                actual: 27
            })
        );
        assert!(check_pitched_buffer(extent, TexelFormat::Argb8888, 64, 8).is_err());
    }

    #[test]
    fn extent_clamps_per_axis() {
        let limit = TextureExtent::new(1024, 512);
        assert_eq!(
            TextureExtent::new(2048, 100).clamp_to(limit),
            TextureExtent::new(1024, 100)
        );
        assert!(TextureExtent::new(1024, 512).fits_within(limit));
        assert!(!TextureExtent::new(1024, 513).fits_within(limit));
    }
}
