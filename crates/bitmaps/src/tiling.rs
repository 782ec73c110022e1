//! Splitting oversized bitmaps into texture-sized tiles.
//!
//! A bitmap of `w x h` on a backend limited to `max_w x max_h` is covered by a
//! `ceil(w / max_w) x ceil(h / max_h)` grid. The tile at the origin is the
//! bitmap's primary texture; the rest live in a [`TileSet`]. Tiles in the
//! last column and row are clipped to the bitmap edge.

use crate::backend::{TextureExtent, TextureKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub fn extent(&self) -> TextureExtent {
        TextureExtent::new(self.width, self.height)
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePiece {
    pub rect: TileRect,
    pub texture: TextureKey,
}

/// Extra textures of a bitmap, in row-major order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileSet {
    pieces: Vec<TilePiece>,
}

impl TileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TilePiece> {
        self.pieces.iter()
    }

    pub fn get(&self, index: usize) -> Option<&TilePiece> {
        self.pieces.get(index)
    }

    pub(crate) fn push(&mut self, piece: TilePiece) {
        self.pieces.push(piece);
    }

    pub(crate) fn take(&mut self) -> Vec<TilePiece> {
        std::mem::take(&mut self.pieces)
    }
}

impl<'a> IntoIterator for &'a TileSet {
    type Item = &'a TilePiece;
    type IntoIter = std::slice::Iter<'a, TilePiece>;

    fn into_iter(self) -> Self::IntoIter {
        self.pieces.iter()
    }
}

/// Tile layout of a bitmap against a texture size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tile: TextureExtent,
    columns: u32,
    rows: u32,
}

impl TileGrid {
    /// `max` is clamped to at least one texel per axis.
    pub fn new(width: u32, height: u32, max: TextureExtent) -> Self {
        let tile = TextureExtent::new(max.width.max(1), max.height.max(1));
        Self {
            width,
            height,
            tile,
            columns: width.div_ceil(tile.width),
            rows: height.div_ceil(tile.height),
        }
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Total number of tiles, the primary one included.
    pub fn tile_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn is_single(&self) -> bool {
        self.tile_count() <= 1
    }

    pub fn primary_rect(&self) -> TileRect {
        self.rect(0, 0)
    }

    /// Every tile in row-major order, starting with the primary one.
    pub fn iter_rects(&self) -> impl Iterator<Item = TileRect> + '_ {
        (0..self.rows)
            .flat_map(move |row| (0..self.columns).map(move |column| self.rect(column, row)))
    }

    /// The tiles that need textures besides the primary one.
    pub fn secondary_rects(&self) -> impl Iterator<Item = TileRect> + '_ {
        self.iter_rects().skip(1)
    }

    fn rect(&self, column: u32, row: u32) -> TileRect {
        let x = column * self.tile.width;
        let y = row * self.tile.height;
        TileRect {
            x,
            y,
            width: self.tile.width.min(self.width - x),
            height: self.tile.height.min(self.height - y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partitions(grid: &TileGrid, width: u32, height: u32) {
        let mut covered = vec![0u8; width as usize * height as usize];
        for rect in grid.iter_rects() {
            assert!(rect.width > 0 && rect.height > 0, "empty tile {rect:?}");
            for y in rect.y..rect.y + rect.height {
                for x in rect.x..rect.x + rect.width {
                    covered[(y * width + x) as usize] += 1;
                }
            }
        }
        assert!(covered.iter().all(|count| *count == 1));
    }

    #[test]
    fn exact_multiple_yields_full_tiles_only() {
        let grid = TileGrid::new(2048, 2048, TextureExtent::new(1024, 1024));
        let rects = grid.iter_rects().collect::<Vec<_>>();
        assert_eq!(
            rects
                .iter()
                .map(|rect| (rect.x, rect.y, rect.width, rect.height))
                .collect::<Vec<_>>(),
            vec![
                (0, 0, 1024, 1024),
                (1024, 0, 1024, 1024),
                (0, 1024, 1024, 1024),
                (1024, 1024, 1024, 1024),
            ]
        );
        assert_eq!(grid.secondary_rects().count(), 3);
    }

    #[test]
    fn ragged_edges_are_clipped() {
        let grid = TileGrid::new(70, 33, TextureExtent::new(32, 16));
        assert_eq!((grid.columns(), grid.rows()), (3, 3));
        let last = grid.iter_rects().last().expect("tiles");
        assert_eq!(last, TileRect {
            x: 64,
            y: 32,
            width: 6,
            height: 1
        });
        assert_partitions(&grid, 70, 33);
        let area: u64 = grid.iter_rects().map(|rect| rect.area()).sum();
        assert_eq!(area, 70 * 33);
    }

    #[test]
    fn small_bitmap_is_a_single_tile() {
        let grid = TileGrid::new(640, 480, TextureExtent::new(1024, 1024));
        assert!(grid.is_single());
        assert_eq!(grid.primary_rect(), TileRect {
            x: 0,
            y: 0,
            width: 640,
            height: 480
        });
        assert_eq!(grid.secondary_rects().count(), 0);
    }

    #[test]
    fn one_axis_overflow_splits_only_that_axis() {
        let grid = TileGrid::new(2048, 1024, TextureExtent::new(1024, 1024));
        assert_eq!(grid.tile_count(), 2);
        assert_partitions(&grid, 2048, 1024);
    }
}
