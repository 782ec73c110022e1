use std::collections::HashMap;

use codes::CodeAllocator;

use crate::backend::{
    TexelFormat, TextureAccess, TextureBackend, TextureDescriptor, TextureExtent, TextureKey,
};
use crate::bitmap::{Bitmap, BitmapFlags, PixelStorage, allocate_pixels};
use crate::blit::{Blit, ClipRect, RegionBlit};
use crate::config::BitmapManagerConfig;
use crate::format::{PixelFormat, SurfaceLayout, validate_dimensions};
use crate::tiling::{TileGrid, TilePiece, TileSet};
use crate::{BackendError, BitmapError};

/// Builds, synchronizes and tears down bitmaps on one texture backend.
pub struct BitmapManager<B: TextureBackend, L: Blit = RegionBlit> {
    backend: B,
    blitter: L,
    codes: CodeAllocator,
    config: BitmapManagerConfig,
    system_library: HashMap<i32, Bitmap<'static>>,
}

impl<B: TextureBackend> BitmapManager<B, RegionBlit> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, BitmapManagerConfig::default())
    }

    pub fn with_config(backend: B, config: BitmapManagerConfig) -> Self {
        Self::with_blitter(backend, RegionBlit, config)
    }
}

impl<B: TextureBackend, L: Blit> BitmapManager<B, L> {
    pub fn with_blitter(backend: B, blitter: L, config: BitmapManagerConfig) -> Self {
        Self {
            backend,
            blitter,
            codes: CodeAllocator::new(),
            config,
            system_library: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &BitmapManagerConfig {
        &self.config
    }

    /// Largest texture a single tile may use.
    pub fn max_texture_size(&self) -> TextureExtent {
        self.config
            .effective_max_texture_size(self.backend.max_texture_size())
    }

    pub fn display_code(&self) -> Option<i32> {
        self.config.display_code
    }

    pub fn set_display_code(&mut self, code: Option<i32>) {
        self.config.display_code = code;
    }

    pub fn codes(&self) -> &CodeAllocator {
        &self.codes
    }

    pub fn acquire_code(&mut self) -> i32 {
        self.codes.acquire()
    }

    /// Returns `code` to the allocator. Codes still held by a system-library
    /// bitmap are refused; use [`Self::destroy_system_bitmap`] for those.
    pub fn release_code(&mut self, code: i32) -> bool {
        if self.system_library.contains_key(&code) {
            log::warn!("code {code} belongs to a live system bitmap and was not released");
            return false;
        }
        self.codes.release(code)
    }

    /// Creates a zeroed bitmap backed by manager-owned memory.
    ///
    /// 16 and 32 bit bitmaps also get a primary texture. When the bitmap is
    /// larger than [`Self::max_texture_size`] the primary texture covers the
    /// top-left tile and a tile set covers the rest. If any texture cannot be
    /// created, the ones created so far are destroyed before returning.
    pub fn new_bitmap(
        &mut self,
        code: i32,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<Bitmap<'static>, BitmapError> {
        validate_dimensions(width, height)?;
        let format = PixelFormat::for_depth(depth)?;
        let layout = SurfaceLayout::aligned(width, height, &format)?;
        let pixels = allocate_pixels(layout.buffer_len)?;
        let mut bitmap = Bitmap::from_parts(
            code,
            width,
            height,
            format,
            layout,
            PixelStorage::Owned(pixels),
        );
        self.create_tiled_textures(&mut bitmap)?;
        log::debug!(
            "created bitmap {code} {width}x{height}x{depth} with {} tile(s)",
            bitmap.tiles.len()
        );
        Ok(bitmap)
    }

    /// Wraps caller memory without copying it.
    ///
    /// `pixels` must hold `pitch * height` bytes. A 16 or 32 bit bitmap gets
    /// one texture of exactly `width x height`, filled from `pixels` right
    /// away. Neither the memory nor that texture is released by
    /// [`Self::destroy`]; the texture key is returned to the caller instead.
    pub fn new_external_bitmap<'a>(
        &mut self,
        code: i32,
        width: u32,
        height: u32,
        depth: u32,
        pixels: &'a mut [u8],
        pitch: usize,
    ) -> Result<Bitmap<'a>, BitmapError> {
        validate_dimensions(width, height)?;
        let format = PixelFormat::for_depth(depth)?;
        let layout = SurfaceLayout::with_pitch(width, height, &format, pitch)?;
        if pixels.len() < layout.buffer_len {
            return Err(BitmapError::BufferTooSmall {
                required: layout.buffer_len,
                actual: pixels.len(),
            });
        }

        let mut bitmap = Bitmap::from_parts(
            code,
            width,
            height,
            format,
            layout,
            PixelStorage::Borrowed(pixels),
        );
        if let Some(texel_format) = TexelFormat::for_depth(depth) {
            let key = self.backend.create_texture(&TextureDescriptor {
                width,
                height,
                format: texel_format,
                access: TextureAccess::Static,
            })?;
            let upload = match bitmap.pixels() {
                Some(bytes) => self.backend.update_texture(key, bytes, pitch),
                None => Ok(()),
            };
            if let Err(error) = upload {
                self.backend.destroy_texture(key);
                return Err(error.into());
            }
            bitmap.texture = Some(key);
        }
        log::debug!("wrapped external bitmap {code} {width}x{height}x{depth}");
        Ok(bitmap)
    }

    /// Creates a bitmap whose only storage is a streaming texture.
    pub fn new_streaming_bitmap(
        &mut self,
        code: i32,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<Bitmap<'static>, BitmapError> {
        validate_dimensions(width, height)?;
        let format = PixelFormat::for_depth(depth)?;
        let layout = SurfaceLayout::aligned(width, height, &format)?;
        let mut bitmap = Bitmap::from_parts(
            code,
            width,
            height,
            format,
            layout,
            PixelStorage::Streaming,
        );
        if let Some(texel_format) = TexelFormat::for_depth(depth) {
            bitmap.texture = Some(self.backend.create_texture(&TextureDescriptor {
                width,
                height,
                format: texel_format,
                access: TextureAccess::Streaming,
            })?);
        }
        log::debug!("created streaming bitmap {code} {width}x{height}x{depth}");
        Ok(bitmap)
    }

    /// Creates an owned bitmap under a freshly issued code and keeps it in
    /// the system library. Returns the code.
    pub fn new_system_bitmap(
        &mut self,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<i32, BitmapError> {
        let mut bitmap = self.new_bitmap(0, width, height, depth)?;
        let code = self.codes.acquire();
        if self.system_library.contains_key(&code) {
            log::error!("allocator issued code {code} which a system bitmap still holds");
            self.destroy(Some(bitmap));
            return Err(BitmapError::CodeInUse { code });
        }
        bitmap.code = code;
        self.system_library.insert(code, bitmap);
        Ok(code)
    }

    pub fn system_bitmap(&self, code: i32) -> Option<&Bitmap<'static>> {
        self.system_library.get(&code)
    }

    pub fn system_bitmap_mut(&mut self, code: i32) -> Option<&mut Bitmap<'static>> {
        self.system_library.get_mut(&code)
    }

    pub fn system_codes(&self) -> impl Iterator<Item = i32> + '_ {
        self.system_library.keys().copied()
    }

    /// Re-uploads a system-library bitmap. Returns false for unknown codes.
    pub fn update_system_texture(&mut self, code: i32) -> bool {
        let Some(bitmap) = self.system_library.get(&code) else {
            return false;
        };
        sync_textures(&mut self.backend, &self.blitter, bitmap);
        true
    }

    /// Removes a bitmap from the system library and destroys it.
    pub fn destroy_system_bitmap(&mut self, code: i32) -> bool {
        match self.system_library.remove(&code) {
            Some(bitmap) => {
                self.destroy(Some(bitmap));
                true
            }
            None => false,
        }
    }

    /// Deep copy of `src` into manager-owned memory, with code 0.
    ///
    /// The display bitmap is copied from the backend's display surface
    /// rather than from its CPU buffer. Control points, palette, blend
    /// table, analysis flags and the modification count carry over, and the
    /// clone's textures are synchronized before it is returned.
    pub fn clone_bitmap(&mut self, src: &Bitmap<'_>) -> Result<Bitmap<'static>, BitmapError> {
        let from_display = self.config.display_code == Some(src.code());
        if src.is_streaming() && !from_display {
            return Err(BitmapError::NoPixelData { code: src.code() });
        }

        let mut clone = self.new_bitmap(0, src.width(), src.height(), src.depth())?;
        let pitch = clone.pitch();
        let row_bytes = src.row_bytes();
        if from_display {
            let extent = TextureExtent::new(src.width(), src.height());
            let readback = match (TexelFormat::for_depth(src.depth()), clone.storage.bytes_mut()) {
                (Some(format), Some(dst)) => self.backend.read_pixels(format, extent, dst, pitch),
                _ => Err(BackendError::Readback(format!(
                    "depth {} has no texture format",
                    src.depth()
                ))),
            };
            if let Err(error) = readback {
                log::error!(
                    "display readback for bitmap {} failed, clone keeps blank pixels: {error}",
                    src.code()
                );
            }
        } else if let Some(dst) = clone.storage.bytes_mut() {
            for (y, dst_row) in dst.chunks_exact_mut(pitch).enumerate() {
                if let Some(src_row) = src.row(y as u32) {
                    dst_row[..row_bytes].copy_from_slice(src_row);
                }
            }
        }

        clone.control_points = src.control_points().to_vec();
        clone.set_palette(src.palette().cloned());
        clone.blend_table = src.blend_table().cloned();
        clone.flags = src.flags() & BitmapFlags::ANALYSIS_MASK;
        clone.modified = src.modified();
        sync_textures(&mut self.backend, &self.blitter, &clone);
        Ok(clone)
    }

    /// Pushes the CPU pixels of `bitmap` to its textures.
    ///
    /// Does nothing for bitmaps without a texture or without CPU pixels.
    /// Backend failures are logged and skipped.
    pub fn update_texture(&mut self, bitmap: &Bitmap<'_>) {
        sync_textures(&mut self.backend, &self.blitter, bitmap);
    }

    /// Releases everything `bitmap` owns. Passing `None` does nothing.
    ///
    /// Manager-issued codes go back to the allocator, unless a system-library
    /// bitmap still holds the same code. Owned and streaming
    /// bitmaps lose their tiles and primary texture. External bitmaps keep
    /// both buffer and texture alive; the texture key is returned.
    pub fn destroy(&mut self, bitmap: Option<Bitmap<'_>>) -> Option<TextureKey> {
        let mut bitmap = bitmap?;
        let code = bitmap.code();
        bitmap.control_points.clear();
        if CodeAllocator::is_managed(code) && !self.system_library.contains_key(&code) {
            self.codes.release(code);
        }

        let returned = if bitmap.is_external() {
            bitmap.texture.take()
        } else {
            let tiles = bitmap.tiles.take();
            destroy_textures(&mut self.backend, bitmap.texture.take(), tiles);
            None
        };
        log::debug!("destroyed bitmap {code}");
        returned
    }

    fn create_tiled_textures(&mut self, bitmap: &mut Bitmap<'_>) -> Result<(), BitmapError> {
        let Some(format) = TexelFormat::for_depth(bitmap.depth()) else {
            return Ok(());
        };
        let grid = TileGrid::new(bitmap.width(), bitmap.height(), self.max_texture_size());
        let descriptor = |extent: TextureExtent| TextureDescriptor {
            width: extent.width,
            height: extent.height,
            format,
            access: TextureAccess::Static,
        };

        let primary = self
            .backend
            .create_texture(&descriptor(grid.primary_rect().extent()))?;
        let mut tiles = TileSet::new();
        for rect in grid.secondary_rects() {
            match self.backend.create_texture(&descriptor(rect.extent())) {
                Ok(texture) => tiles.push(TilePiece { rect, texture }),
                Err(error) => {
                    log::error!(
                        "tile {}x{} at ({}, {}) for bitmap {} failed, rolling back {} texture(s): {error}",
                        rect.width,
                        rect.height,
                        rect.x,
                        rect.y,
                        bitmap.code(),
                        tiles.len() + 1
                    );
                    destroy_textures(&mut self.backend, Some(primary), tiles.take());
                    return Err(error.into());
                }
            }
        }
        bitmap.texture = Some(primary);
        bitmap.tiles = tiles;
        Ok(())
    }
}

impl<B: TextureBackend, L: Blit> Drop for BitmapManager<B, L> {
    fn drop(&mut self) {
        let library = std::mem::take(&mut self.system_library);
        for (_, bitmap) in library {
            self.destroy(Some(bitmap));
        }
    }
}

fn destroy_textures<B: TextureBackend>(
    backend: &mut B,
    primary: Option<TextureKey>,
    tiles: Vec<TilePiece>,
) {
    for piece in tiles {
        if !backend.destroy_texture(piece.texture) {
            log::warn!("tile texture {:?} was already gone", piece.texture);
        }
    }
    if let Some(key) = primary {
        if !backend.destroy_texture(key) {
            log::warn!("texture {key:?} was already gone");
        }
    }
}

fn sync_textures<B: TextureBackend, L: Blit>(backend: &mut B, blitter: &L, bitmap: &Bitmap<'_>) {
    let Some(texture) = bitmap.texture() else {
        return;
    };
    let Some(pixels) = bitmap.pixels() else {
        return;
    };
    if let Err(error) = backend.update_texture(texture, pixels, bitmap.pitch()) {
        log::error!("upload of bitmap {} failed: {error}", bitmap.code());
    }

    let (anchor_x, anchor_y) = bitmap.center();
    for piece in bitmap.tiles() {
        let rect = piece.rect;
        let mut scratch = match Bitmap::scratch(rect.width, rect.height, bitmap.format()) {
            Ok(scratch) => scratch,
            Err(error) => {
                log::error!(
                    "no scratch surface for tile ({}, {}) of bitmap {}: {error}",
                    rect.x,
                    rect.y,
                    bitmap.code()
                );
                continue;
            }
        };
        let clip = ClipRect::covering(&scratch);
        blitter.blit(
            &mut scratch,
            clip,
            i64::from(anchor_x) - i64::from(rect.x),
            i64::from(anchor_y) - i64::from(rect.y),
            bitmap,
        );
        let Some(tile_pixels) = scratch.pixels() else {
            continue;
        };
        if let Err(error) = backend.update_texture(piece.texture, tile_pixels, scratch.pitch()) {
            log::error!(
                "upload of tile ({}, {}) of bitmap {} failed: {error}",
                rect.x,
                rect.y,
                bitmap.code()
            );
        }
    }
}
