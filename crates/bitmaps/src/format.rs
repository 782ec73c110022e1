//! Pixel formats and row layout.
//!
//! Formats follow a fixed derivation from the color depth:
//! - depth 32: ARGB, one byte per channel, alpha in the top byte;
//! - depth 9..=31: R-G-B from the top bit down, `depth / 3` bits per
//!   channel, the remainder going to green (depths above 24 are treated as 24);
//! - depth 1..=8: palette indexed, every channel field zero.

use std::sync::Arc;

use crate::BitmapError;

pub const MAX_DEPTH: u32 = 32;
pub const PALETTE_SIZE: usize = 256;

const PITCH_ALIGNMENT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelLayout {
    pub mask: u32,
    pub shift: u8,
    /// Low bits dropped compared with an 8-bit channel.
    pub loss: u8,
}

impl ChannelLayout {
    const ABSENT: Self = Self {
        mask: 0,
        shift: 0,
        loss: 8,
    };

    const fn with_bits(bits: u8, shift: u8) -> Self {
        let loss = 8 - bits;
        Self {
            mask: ((0xFF_u32 >> loss) << shift),
            shift,
            loss,
        }
    }

    /// Packs an 8-bit channel value into this channel's bit range.
    pub const fn pack(self, value: u8) -> u32 {
        ((value as u32 >> self.loss) << self.shift) & self.mask
    }

    /// Extracts this channel from `pixel`, returning the value widened back to 8 bits.
    pub const fn unpack(self, pixel: u32) -> u8 {
        (((pixel & self.mask) >> self.shift) << self.loss) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaletteColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// 256-entry color table shared by indexed bitmaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: [PaletteColor; PALETTE_SIZE],
}

impl Default for Palette {
    fn default() -> Self {
        Self::grayscale()
    }
}

impl Palette {
    pub fn new(colors: [PaletteColor; PALETTE_SIZE]) -> Self {
        Self { colors }
    }

    pub fn grayscale() -> Self {
        Self {
            colors: std::array::from_fn(|index| {
                let level = index as u8;
                PaletteColor {
                    r: level,
                    g: level,
                    b: level,
                }
            }),
        }
    }

    pub fn color(&self, index: u8) -> PaletteColor {
        self.colors[index as usize]
    }

    pub fn colors(&self) -> &[PaletteColor; PALETTE_SIZE] {
        &self.colors
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    depth: u32,
    bytes_per_pixel: u32,
    red: ChannelLayout,
    green: ChannelLayout,
    blue: ChannelLayout,
    alpha: ChannelLayout,
    palette: Option<Arc<Palette>>,
}

impl PixelFormat {
    pub fn for_depth(depth: u32) -> Result<Self, BitmapError> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(BitmapError::UnsupportedDepth(depth));
        }
        let bytes_per_pixel = depth.div_ceil(8);

        let (red, green, blue, alpha) = if depth == 32 {
            (
                ChannelLayout::with_bits(8, 16),
                ChannelLayout::with_bits(8, 8),
                ChannelLayout::with_bits(8, 0),
                ChannelLayout::with_bits(8, 24),
            )
        } else if depth > 8 {
            let working = depth.min(24) as u8;
            let bits = working / 3;
            let green_bits = bits + working % 3;
            (
                ChannelLayout::with_bits(bits, green_bits + bits),
                ChannelLayout::with_bits(green_bits, bits),
                ChannelLayout::with_bits(bits, 0),
                ChannelLayout::ABSENT,
            )
        } else {
            let zero = ChannelLayout::default();
            (zero, zero, zero, zero)
        };

        Ok(Self {
            depth,
            bytes_per_pixel,
            red,
            green,
            blue,
            alpha,
            palette: None,
        })
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    pub fn red(&self) -> ChannelLayout {
        self.red
    }

    pub fn green(&self) -> ChannelLayout {
        self.green
    }

    pub fn blue(&self) -> ChannelLayout {
        self.blue
    }

    pub fn alpha(&self) -> ChannelLayout {
        self.alpha
    }

    pub fn is_indexed(&self) -> bool {
        self.depth <= 8
    }

    pub fn palette(&self) -> Option<&Arc<Palette>> {
        self.palette.as_ref()
    }

    pub fn set_palette(&mut self, palette: Option<Arc<Palette>>) {
        self.palette = palette;
    }

    /// Packs an RGBA color into a pixel value. Indexed formats return 0.
    pub fn pack_rgba(&self, r: u8, g: u8, b: u8, a: u8) -> u32 {
        self.red.pack(r) | self.green.pack(g) | self.blue.pack(b) | self.alpha.pack(a)
    }

    /// Bytes needed for `width` pixels without padding. Sub-byte depths are
    /// bit packed; wider depths occupy whole `bytes_per_pixel` slots.
    pub fn row_bytes(&self, width: u32) -> Option<usize> {
        let bits_per_pixel = if self.depth < 8 {
            self.depth
        } else {
            self.bytes_per_pixel * 8
        };
        let bits = u64::from(width).checked_mul(u64::from(bits_per_pixel))?;
        usize::try_from(bits.div_ceil(8)).ok()
    }
}

/// Row geometry of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceLayout {
    pub row_bytes: usize,
    pub pitch: usize,
    pub buffer_len: usize,
}

impl SurfaceLayout {
    /// Layout with rows padded to a 4-byte boundary.
    pub fn aligned(width: u32, height: u32, format: &PixelFormat) -> Result<Self, BitmapError> {
        let row_bytes = packed_row_bytes(width, height, format)?;
        let pitch = row_bytes
            .checked_next_multiple_of(PITCH_ALIGNMENT)
            .ok_or_else(|| size_overflow(width, height, format))?;
        Self::with_row_bytes(width, height, format, row_bytes, pitch)
    }

    /// Layout of a caller-supplied buffer using the caller's pitch.
    pub fn with_pitch(
        width: u32,
        height: u32,
        format: &PixelFormat,
        pitch: usize,
    ) -> Result<Self, BitmapError> {
        let row_bytes = packed_row_bytes(width, height, format)?;
        if pitch < row_bytes {
            return Err(BitmapError::PitchTooSmall { pitch, row_bytes });
        }
        Self::with_row_bytes(width, height, format, row_bytes, pitch)
    }

    fn with_row_bytes(
        width: u32,
        height: u32,
        format: &PixelFormat,
        row_bytes: usize,
        pitch: usize,
    ) -> Result<Self, BitmapError> {
        let buffer_len = pitch
            .checked_mul(height as usize)
            .ok_or_else(|| size_overflow(width, height, format))?;
        Ok(Self {
            row_bytes,
            pitch,
            buffer_len,
        })
    }
}

pub(crate) fn validate_dimensions(width: u32, height: u32) -> Result<(), BitmapError> {
    if width < 1 || height < 1 {
        return Err(BitmapError::InvalidDimensions { width, height });
    }
    Ok(())
}

fn packed_row_bytes(width: u32, height: u32, format: &PixelFormat) -> Result<usize, BitmapError> {
    validate_dimensions(width, height)?;
    format
        .row_bytes(width)
        .ok_or_else(|| size_overflow(width, height, format))
}

fn size_overflow(width: u32, height: u32, format: &PixelFormat) -> BitmapError {
    BitmapError::SizeOverflow {
        width,
        height,
        depth: format.depth(),
    }
}
