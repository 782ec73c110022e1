use std::sync::Arc;

use bitflags::bitflags;

use crate::BitmapError;
use crate::backend::TextureKey;
use crate::format::{Palette, PixelFormat, SurfaceLayout};
use crate::tiling::TileSet;

/// Shared translucency lookup table. Bitmaps only carry it around.
pub type BlendTable = Arc<[u8]>;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BitmapFlags: u32 {
        /// Analysis found no fully transparent (all-zero) pixel.
        const NO_COLOR_KEY = 1 << 0;
        /// Every flag recomputed by [`Bitmap::analyze`].
        const ANALYSIS_MASK = Self::NO_COLOR_KEY.bits();
    }
}

/// A 2D offset attached to a bitmap. Each axis may be undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ControlPoint {
    pub x: Option<i32>,
    pub y: Option<i32>,
}

impl ControlPoint {
    pub const UNDEFINED: ControlPoint = ControlPoint { x: None, y: None };

    pub const fn new(x: i32, y: i32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
        }
    }
}

#[derive(Debug)]
pub enum PixelStorage<'a> {
    Owned(Vec<u8>),
    /// Caller memory. Never freed, resized or reallocated by the manager.
    Borrowed(&'a mut [u8]),
    /// No CPU mirror; the texture is the only copy.
    Streaming,
}

impl PixelStorage<'_> {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            PixelStorage::Owned(pixels) => Some(pixels),
            PixelStorage::Borrowed(pixels) => Some(pixels),
            PixelStorage::Streaming => None,
        }
    }

    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            PixelStorage::Owned(pixels) => Some(pixels),
            PixelStorage::Borrowed(pixels) => Some(pixels),
            PixelStorage::Streaming => None,
        }
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self, PixelStorage::Borrowed(_))
    }
}

/// A pixel surface and the textures mirroring it.
///
/// Bitmaps are built and torn down by [`crate::BitmapManager`]. A bitmap
/// that still owns textures when it is dropped leaks them in the backend;
/// hand it to [`crate::BitmapManager::destroy`] instead.
#[derive(Debug)]
pub struct Bitmap<'a> {
    pub(crate) code: i32,
    width: u32,
    height: u32,
    pitch: usize,
    row_bytes: usize,
    pub(crate) storage: PixelStorage<'a>,
    pub(crate) texture: Option<TextureKey>,
    pub(crate) tiles: TileSet,
    format: PixelFormat,
    pub(crate) control_points: Vec<ControlPoint>,
    pub(crate) modified: u32,
    name: String,
    pub(crate) flags: BitmapFlags,
    pub(crate) blend_table: Option<BlendTable>,
}

impl<'a> Bitmap<'a> {
    pub(crate) fn from_parts(
        code: i32,
        width: u32,
        height: u32,
        format: PixelFormat,
        layout: SurfaceLayout,
        storage: PixelStorage<'a>,
    ) -> Self {
        Self {
            code,
            width,
            height,
            pitch: layout.pitch,
            row_bytes: layout.row_bytes,
            storage,
            texture: None,
            tiles: TileSet::new(),
            format,
            control_points: Vec::new(),
            modified: 0,
            name: String::new(),
            flags: BitmapFlags::empty(),
            blend_table: None,
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitch(&self) -> usize {
        self.pitch
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn depth(&self) -> u32 {
        self.format.depth()
    }

    pub fn format(&self) -> &PixelFormat {
        &self.format
    }

    pub fn storage(&self) -> &PixelStorage<'a> {
        &self.storage
    }

    pub fn is_external(&self) -> bool {
        self.storage.is_borrowed()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.storage, PixelStorage::Streaming)
    }

    pub fn texture(&self) -> Option<TextureKey> {
        self.texture
    }

    pub fn tiles(&self) -> &TileSet {
        &self.tiles
    }

    pub fn modified(&self) -> u32 {
        self.modified
    }

    pub fn mark_modified(&mut self) {
        self.modified = self.modified.saturating_add(1);
    }

    pub fn flags(&self) -> BitmapFlags {
        self.flags
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn palette(&self) -> Option<&Arc<Palette>> {
        self.format.palette()
    }

    pub fn set_palette(&mut self, palette: Option<Arc<Palette>>) {
        self.format.set_palette(palette);
    }

    pub fn blend_table(&self) -> Option<&BlendTable> {
        self.blend_table.as_ref()
    }

    pub fn set_blend_table(&mut self, table: Option<BlendTable>) {
        self.blend_table = table;
    }

    /// The `pitch * height` bytes of the surface, or `None` for streaming bitmaps.
    pub fn pixels(&self) -> Option<&[u8]> {
        let len = self.surface_len();
        self.storage.bytes().map(|bytes| &bytes[..len])
    }

    /// Mutable access to the surface. Counts as a modification.
    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        let len = self.surface_len();
        if matches!(self.storage, PixelStorage::Streaming) {
            return None;
        }
        self.mark_modified();
        self.storage.bytes_mut().map(|bytes| &mut bytes[..len])
    }

    /// The packed bytes of row `y`, without the pitch padding.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.pitch;
        self.storage
            .bytes()
            .map(|bytes| &bytes[start..start + self.row_bytes])
    }

    pub fn control_points(&self) -> &[ControlPoint] {
        &self.control_points
    }

    pub fn control_point(&self, index: usize) -> Option<ControlPoint> {
        self.control_points.get(index).copied()
    }

    /// Appends a control point and returns its index.
    pub fn add_control_point(&mut self, x: Option<i32>, y: Option<i32>) -> usize {
        self.control_points.push(ControlPoint { x, y });
        if self.control_points.len() == 1 {
            self.mark_modified();
        }
        self.control_points.len() - 1
    }

    /// Writes control point `index`, padding any gap with undefined points.
    pub fn set_control_point(&mut self, index: usize, x: Option<i32>, y: Option<i32>) {
        if index >= self.control_points.len() {
            self.control_points
                .resize(index + 1, ControlPoint::UNDEFINED);
        }
        self.control_points[index] = ControlPoint { x, y };
        if index == 0 {
            self.mark_modified();
        }
    }

    /// Anchor used when the bitmap is drawn or cut into tiles: control
    /// point 0 where defined, the middle of the surface otherwise.
    pub fn center(&self) -> (i32, i32) {
        let origin = self.control_points.first().copied().unwrap_or_default();
        (
            origin.x.unwrap_or((self.width / 2) as i32),
            origin.y.unwrap_or((self.height / 2) as i32),
        )
    }

    /// Recomputes the analysis flags.
    ///
    /// A modification count above one is folded back to one, so callers can
    /// tell an analysed bitmap from one edited since. `NO_COLOR_KEY` is set
    /// when no pixel of a byte-addressed surface is all zero bytes. Palette
    /// depths below 8 and streaming bitmaps are left unflagged.
    pub fn analyze(&mut self) {
        if self.modified > 1 {
            self.modified = 1;
        }
        self.flags.remove(BitmapFlags::ANALYSIS_MASK);

        if self.format.depth() < 8 {
            return;
        }
        let Some(pixels) = self.storage.bytes() else {
            return;
        };
        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        let has_transparent = (0..self.height as usize).any(|y| {
            pixels[y * self.pitch..][..self.row_bytes]
                .chunks_exact(bytes_per_pixel)
                .any(|pixel| pixel.iter().all(|byte| *byte == 0))
        });
        if !has_transparent {
            self.flags.insert(BitmapFlags::NO_COLOR_KEY);
        }
    }

    /// An owned, texture-less bitmap used as a blit target.
    pub(crate) fn scratch(
        width: u32,
        height: u32,
        format: &PixelFormat,
    ) -> Result<Bitmap<'static>, BitmapError> {
        let layout = SurfaceLayout::aligned(width, height, format)?;
        let pixels = allocate_pixels(layout.buffer_len)?;
        Ok(Bitmap::from_parts(
            0,
            width,
            height,
            format.clone(),
            layout,
            PixelStorage::Owned(pixels),
        ))
    }

    pub(crate) fn owns_textures(&self) -> bool {
        !self.storage.is_borrowed() && (self.texture.is_some() || !self.tiles.is_empty())
    }

    fn surface_len(&self) -> usize {
        self.pitch * self.height as usize
    }
}

impl Drop for Bitmap<'_> {
    fn drop(&mut self) {
        if self.owns_textures() {
            log::warn!(
                "bitmap {} dropped while owning {} texture(s); they stay allocated in the backend",
                self.code,
                usize::from(self.texture.is_some()) + self.tiles.len()
            );
        }
    }
}

/// Zero-filled pixel memory, failing instead of aborting when the allocator refuses.
pub(crate) fn allocate_pixels(len: usize) -> Result<Vec<u8>, BitmapError> {
    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(len)
        .map_err(|_| BitmapError::OutOfMemory { bytes: len })?;
    pixels.resize(len, 0);
    Ok(pixels)
}
