//! CPU pixel buffers mirrored onto GPU textures.
//!
//! A [`Bitmap`] pairs pixel storage (owned, borrowed from the caller, or
//! absent for streaming surfaces) with a primary texture and, when the bitmap
//! is larger than the backend's maximum texture size, a [`TileSet`] of extra
//! textures covering the rest of the surface. [`BitmapManager`] builds,
//! clones, synchronizes and destroys bitmaps against a [`TextureBackend`] and
//! hands out bitmap codes from a [`codes::CodeAllocator`].
//!
//! ```text
//! new_bitmap ──► PixelFormat::for_depth ──► owned buffer
//!                                        └► primary texture (+ tiles)
//! edit pixels ──► update_texture ──► primary upload
//!                                └► Blit per tile ──► tile upload
//! destroy ──► tiles, primary, buffer, code
//! ```

pub mod backend;
pub mod bitmap;
pub mod blit;
pub mod config;
pub mod format;
pub mod manager;
pub mod tiling;

pub use backend::headless::{HeadlessBackend, HeadlessConfig, HeadlessFrame, HeadlessTexture};
#[cfg(feature = "wgpu-backend")]
pub use backend::wgpu_backend::WgpuBackend;
pub use backend::{
    TexelFormat, TextureAccess, TextureBackend, TextureDescriptor, TextureExtent, TextureKey,
};
pub use bitmap::{Bitmap, BitmapFlags, BlendTable, ControlPoint, PixelStorage};
pub use blit::{Blit, ClipRect, RegionBlit};
pub use codes::{CODE_BASE, CodeAllocator};
pub use config::BitmapManagerConfig;
pub use format::{ChannelLayout, Palette, PaletteColor, PixelFormat, SurfaceLayout};
pub use manager::BitmapManager;
pub use tiling::{TileGrid, TilePiece, TileRect, TileSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitmapError {
    #[error("invalid bitmap dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("unsupported color depth {0}")]
    UnsupportedDepth(u32),
    #[error("bitmap {width}x{height} at depth {depth} overflows the addressable size")]
    SizeOverflow { width: u32, height: u32, depth: u32 },
    #[error("pitch {pitch} is smaller than the packed row width {row_bytes}")]
    PitchTooSmall { pitch: usize, row_bytes: usize },
    #[error("pixel buffer holds {actual} bytes, {required} required")]
    BufferTooSmall { required: usize, actual: usize },
    #[error("could not allocate {bytes} bytes of pixel data")]
    OutOfMemory { bytes: usize },
    #[error("code {code} is held by a live system bitmap")]
    CodeInUse { code: i32 },
    #[error("bitmap {code} has no CPU pixel data")]
    NoPixelData { code: i32 },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("texture {width}x{height} exceeds backend limit {max_width}x{max_height}")]
    TextureTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },
    #[error("texture creation failed: {0}")]
    TextureCreate(String),
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureKey),
    #[error("texture upload needs {required} bytes, got {actual}")]
    UploadSizeMismatch { required: usize, actual: usize },
    #[error("no display surface is available for readback")]
    ReadbackUnavailable,
    #[error("readback failed: {0}")]
    Readback(String),
}
