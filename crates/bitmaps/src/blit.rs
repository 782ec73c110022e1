use crate::bitmap::Bitmap;

/// Destination-space rectangle outside of which a blit writes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ClipRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole surface of `bitmap`.
    pub fn covering(bitmap: &Bitmap<'_>) -> Self {
        Self::new(0, 0, bitmap.width(), bitmap.height())
    }
}

/// Draws `src` into `dst` so that the anchor of `src` (see
/// [`Bitmap::center`]) lands on `(x, y)`. Positions are 64-bit so that an
/// anchor anywhere in the `i32` range can be moved by a tile offset.
pub trait Blit {
    fn blit(&self, dst: &mut Bitmap<'_>, clip: ClipRect, x: i64, y: i64, src: &Bitmap<'_>);
}

/// Opaque byte copy between bitmaps of the same byte-addressed depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionBlit;

impl Blit for RegionBlit {
    fn blit(&self, dst: &mut Bitmap<'_>, clip: ClipRect, x: i64, y: i64, src: &Bitmap<'_>) {
        if src.depth() != dst.depth() || src.depth() < 8 {
            log::warn!(
                "cannot blit depth {} onto depth {}",
                src.depth(),
                dst.depth()
            );
            return;
        }
        let Some(src_pixels) = src.pixels() else {
            return;
        };

        let (anchor_x, anchor_y) = src.center();
        let origin_x = x - i64::from(anchor_x);
        let origin_y = y - i64::from(anchor_y);
        let columns = span(
            origin_x,
            src.width(),
            i64::from(clip.x),
            clip.width,
            dst.width(),
        );
        let rows = span(
            origin_y,
            src.height(),
            i64::from(clip.y),
            clip.height,
            dst.height(),
        );
        let (Some((left, right)), Some((top, bottom))) = (columns, rows) else {
            return;
        };

        let bytes_per_pixel = src.format().bytes_per_pixel() as usize;
        let copy_bytes = (right - left) as usize * bytes_per_pixel;
        let src_pitch = src.pitch();
        let dst_pitch = dst.pitch();
        let Some(dst_pixels) = dst.pixels_mut() else {
            return;
        };
        for dst_y in top..bottom {
            let src_y = (dst_y - origin_y) as usize;
            let src_start = src_y * src_pitch + (left - origin_x) as usize * bytes_per_pixel;
            let dst_start = dst_y as usize * dst_pitch + left as usize * bytes_per_pixel;
            dst_pixels[dst_start..dst_start + copy_bytes]
                .copy_from_slice(&src_pixels[src_start..src_start + copy_bytes]);
        }
    }
}

/// Intersection of the source span, the clip span and the destination
/// surface along one axis, in destination coordinates.
fn span(origin: i64, len: u32, clip_start: i64, clip_len: u32, dst_len: u32) -> Option<(i64, i64)> {
    let start = origin.max(clip_start).max(0);
    let end = (origin + i64::from(len))
        .min(clip_start + i64::from(clip_len))
        .min(i64::from(dst_len));
    (start < end).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;

    fn gradient(width: u32, height: u32) -> Bitmap<'static> {
        let format = PixelFormat::for_depth(8).expect("format");
        let mut bitmap = Bitmap::scratch(width, height, &format).expect("bitmap");
        let pitch = bitmap.pitch();
        let pixels = bitmap.pixels_mut().expect("pixels");
        for y in 0..height as usize {
            for x in 0..width as usize {
                pixels[y * pitch + x] = (y * 16 + x) as u8;
            }
        }
        bitmap
    }

    fn blank(width: u32, height: u32, depth: u32) -> Bitmap<'static> {
        let format = PixelFormat::for_depth(depth).expect("format");
        Bitmap::scratch(width, height, &format).expect("bitmap")
    }

    #[test]
    fn anchor_offset_selects_the_source_window() {
        let src = gradient(8, 8);
        let mut dst = blank(3, 2, 8);
        // Anchor is (4, 4); placing it at (-1, 0) puts source (5, 4) at dst (0, 0).
        let clip = ClipRect::covering(&dst);
        RegionBlit.blit(&mut dst, clip, -1, 0, &src);
        assert_eq!(dst.row(0), Some(&[0x45u8, 0x46, 0x47][..]));
        assert_eq!(dst.row(1), Some(&[0x55u8, 0x56, 0x57][..]));
    }

    #[test]
    fn clip_limits_the_written_area() {
        let mut src = gradient(4, 4);
        src.set_control_point(0, Some(0), Some(0));
        let mut dst = blank(4, 4, 8);
        RegionBlit.blit(&mut dst, ClipRect::new(1, 1, 2, 1), 0, 0, &src);
        assert_eq!(dst.row(0), Some(&[0u8, 0, 0, 0][..]));
        assert_eq!(dst.row(1), Some(&[0u8, 0x11, 0x12, 0][..]));
        assert_eq!(dst.row(2), Some(&[0u8, 0, 0, 0][..]));
    }

    #[test]
    fn anchor_at_the_edge_of_the_i32_range() {
        let mut src = gradient(4, 4);
        src.set_control_point(0, Some(i32::MIN), Some(i32::MAX));
        let mut dst = blank(2, 1, 8);
        let clip = ClipRect::covering(&dst);
        RegionBlit.blit(
            &mut dst,
            clip,
            i64::from(i32::MIN) - 2,
            i64::from(i32::MAX) - 3,
            &src,
        );
        assert_eq!(dst.row(0), Some(&[0x32u8, 0x33][..]));
    }

    #[test]
    fn mismatched_depths_leave_the_target_untouched() {
        let src = gradient(4, 4);
        let mut dst = blank(4, 4, 16);
        let clip = ClipRect::covering(&dst);
        RegionBlit.blit(&mut dst, clip, 2, 2, &src);
        assert!(dst.pixels().expect("pixels").iter().all(|byte| *byte == 0));
        assert_eq!(dst.modified(), 0);
    }

    #[test]
    fn fully_outside_is_a_no_op() {
        let src = gradient(4, 4);
        let mut dst = blank(4, 4, 8);
        let clip = ClipRect::covering(&dst);
        RegionBlit.blit(&mut dst, clip, 100, -100, &src);
        assert_eq!(dst.modified(), 0);
    }
}
