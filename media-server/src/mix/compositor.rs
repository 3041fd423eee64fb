//! Per-tick frame compositing (spec §4.6 "Composite semantics").
//!
//! The original source leaves this unimplemented (stub + log lines); this
//! implements the design intent: draw the background, then blit each input
//! in ascending z-index order at its configured `(x, y, w, h)`.

use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::frame::video::Video;

/// Copies `overlay` onto `canvas` at `(x, y)`, clipping to the canvas
/// bounds. Both frames must already be [`Pixel::YUV420P`] and `overlay`
/// must already be scaled to the placement's `(width, height)` — scaling is
/// the caller's job (one scaler per input, built/rebuilt on layout update).
pub fn blit_yuv420p(canvas: &mut Video, overlay: &Video, x: i32, y: i32) {
    debug_assert_eq!(canvas.format(), Pixel::YUV420P);
    debug_assert_eq!(overlay.format(), Pixel::YUV420P);

    // Luma plane at full resolution, chroma planes at half resolution in
    // both dimensions (4:2:0 subsampling).
    blit_plane(canvas, overlay, 0, x, y, 1, 1);
    blit_plane(canvas, overlay, 1, x, y, 2, 2);
    blit_plane(canvas, overlay, 2, x, y, 2, 2);
}

fn blit_plane(
    canvas: &mut Video,
    overlay: &Video,
    plane: usize,
    x: i32,
    y: i32,
    div_x: i32,
    div_y: i32,
) {
    let canvas_w = canvas.plane_width(plane) as i32;
    let canvas_h = canvas.plane_height(plane) as i32;
    let overlay_w = overlay.plane_width(plane) as i32;
    let overlay_h = overlay.plane_height(plane) as i32;

    let dst_x0 = x / div_x;
    let dst_y0 = y / div_y;

    let canvas_stride = canvas.stride(plane);
    let overlay_stride = overlay.stride(plane);

    for row in 0..overlay_h {
        let dst_y = dst_y0 + row;
        if dst_y < 0 || dst_y >= canvas_h {
            continue;
        }

        let copy_w = overlay_w.min(canvas_w - dst_x0.max(0));
        if copy_w <= 0 || dst_x0 >= canvas_w {
            continue;
        }
        let (src_x_offset, dst_x) = if dst_x0 < 0 { (-dst_x0, 0) } else { (0, dst_x0) };
        let copy_w = copy_w - src_x_offset;
        if copy_w <= 0 {
            continue;
        }

        let src_row_start = (row as usize) * overlay_stride + src_x_offset as usize;
        let dst_row_start = (dst_y as usize) * canvas_stride + dst_x as usize;

        let src = &overlay.data(plane)[src_row_start..src_row_start + copy_w as usize];
        let dst_data = canvas.data_mut(plane);
        dst_data[dst_row_start..dst_row_start + copy_w as usize].copy_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, y_value: u8) -> Video {
        let mut f = Video::new(Pixel::YUV420P, w, h);
        for plane in 0..3 {
            let stride = f.stride(plane);
            let height = f.plane_height(plane) as usize;
            let data = f.data_mut(plane);
            for row in 0..height {
                let start = row * stride;
                let width = f.plane_width(plane) as usize;
                data[start..start + width].fill(if plane == 0 { y_value } else { 128 });
            }
        }
        f
    }

    #[test]
    fn blit_copies_overlay_luma_into_canvas_at_offset() {
        let mut canvas = solid(64, 64, 16);
        let overlay = solid(8, 8, 235);

        blit_yuv420p(&mut canvas, &overlay, 4, 4);

        let stride = canvas.stride(0);
        let data = canvas.data(0);
        assert_eq!(data[4 * stride + 4], 235);
        assert_eq!(data[0], 16, "pixels outside the overlay stay background");
    }

    #[test]
    fn blit_clips_against_canvas_bounds() {
        let mut canvas = solid(16, 16, 16);
        let overlay = solid(8, 8, 235);

        // Overlay placed so half of it falls outside the canvas on the
        // right/bottom edge; must not panic or write out of bounds.
        blit_yuv420p(&mut canvas, &overlay, 12, 12);

        let stride = canvas.stride(0);
        let data = canvas.data(0);
        assert_eq!(data[12 * stride + 12], 235);
    }

    #[test]
    fn blit_clips_against_negative_offset() {
        let mut canvas = solid(16, 16, 16);
        let overlay = solid(8, 8, 235);

        blit_yuv420p(&mut canvas, &overlay, -4, -4);

        let stride = canvas.stride(0);
        let data = canvas.data(0);
        // Only the bottom-right quadrant of the overlay remains visible.
        assert_eq!(data[0], 235);
        assert_eq!(data[4 * stride + 4], 16);
    }
}
