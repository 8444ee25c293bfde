//! Low-level image routines for the detection pipeline.
//!
//! All routines work on plain byte buffers with explicit dimensions. The
//! hot path stays allocation-light: one output buffer per call, no
//! intermediate copies.

use anyhow::{anyhow, Result};

use crate::frame::{Frame, PixelFormat};

/// Extract 8-bit luma from a frame.
///
/// BGR frames use the Rec.601 integer weighting; grayscale frames pass
/// through as a copy.
pub fn luma(frame: &Frame) -> Result<Vec<u8>> {
    let pixels = frame.pixels();
    let cells = frame.width as usize * frame.height as usize;
    match frame.format {
        PixelFormat::Gray8 => {
            if pixels.len() != cells {
                return Err(anyhow!("malformed gray frame: {} bytes", pixels.len()));
            }
            Ok(pixels.to_vec())
        }
        PixelFormat::Bgr8 => {
            if pixels.len() != cells * 3 {
                return Err(anyhow!("malformed bgr frame: {} bytes", pixels.len()));
            }
            let mut out = vec![0u8; cells];
            for (i, px) in pixels.chunks_exact(3).enumerate() {
                let (b, g, r) = (px[0] as u32, px[1] as u32, px[2] as u32);
                out[i] = ((77 * r + 150 * g + 29 * b) >> 8) as u8;
            }
            Ok(out)
        }
    }
}

/// Bilinear downscale of a single-channel image.
pub fn resize_gray_bilinear(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
    debug_assert_eq!(src.len(), sw as usize * sh as usize);
    let mut out = vec![0u8; dw as usize * dh as usize];
    if dw == 0 || dh == 0 {
        return out;
    }
    let x_ratio = sw as f32 / dw as f32;
    let y_ratio = sh as f32 / dh as f32;
    let stride = sw as usize;
    for dy in 0..dh as usize {
        let fy = (dy as f32 + 0.5) * y_ratio - 0.5;
        let y0 = fy.floor().max(0.0) as usize;
        let y1 = (y0 + 1).min(sh as usize - 1);
        let wy = (fy - y0 as f32).clamp(0.0, 1.0);
        for dx in 0..dw as usize {
            let fx = (dx as f32 + 0.5) * x_ratio - 0.5;
            let x0 = fx.floor().max(0.0) as usize;
            let x1 = (x0 + 1).min(sw as usize - 1);
            let wx = (fx - x0 as f32).clamp(0.0, 1.0);

            let tl = src[y0 * stride + x0] as f32;
            let tr = src[y0 * stride + x1] as f32;
            let bl = src[y1 * stride + x0] as f32;
            let br = src[y1 * stride + x1] as f32;
            let top = tl + (tr - tl) * wx;
            let bottom = bl + (br - bl) * wx;
            out[dy * dw as usize + dx] = (top + (bottom - top) * wy).round() as u8;
        }
    }
    out
}

/// Nearest-neighbor rescale of a single-channel image. Used for masks,
/// where interpolation would invent values outside {0, 255}.
pub fn resize_gray_nearest(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
    debug_assert_eq!(src.len(), sw as usize * sh as usize);
    let mut out = vec![0u8; dw as usize * dh as usize];
    if dw == 0 || dh == 0 {
        return out;
    }
    for dy in 0..dh as usize {
        let sy = (dy * sh as usize / dh as usize).min(sh as usize - 1);
        for dx in 0..dw as usize {
            let sx = (dx * sw as usize / dw as usize).min(sw as usize - 1);
            out[dy * dw as usize + dx] = src[sy * sw as usize + sx];
        }
    }
    out
}

/// 3x3 median filter, clamped at the borders. Knocks out isolated speckle
/// in the raw foreground scores before binarization.
pub fn median3(src: &[u8], width: u32, height: u32) -> Vec<u8> {
    debug_assert_eq!(src.len(), width as usize * height as usize);
    let (w, h) = (width as isize, height as isize);
    let mut out = vec![0u8; src.len()];
    let mut window = [0u8; 9];
    for y in 0..h {
        for x in 0..w {
            let mut n = 0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let sy = (y + dy).clamp(0, h - 1);
                    let sx = (x + dx).clamp(0, w - 1);
                    window[n] = src[(sy * w + sx) as usize];
                    n += 1;
                }
            }
            window.sort_unstable();
            out[(y * w + x) as usize] = window[4];
        }
    }
    out
}

/// Binarize scores: foreground iff `score >= cutoff`.
pub fn threshold_binary(src: &[u8], cutoff: u8) -> Vec<u8> {
    src.iter()
        .map(|&v| if v >= cutoff { 255 } else { 0 })
        .collect()
}

/// Draw a hollow rectangle onto a pixel buffer, clamped to the image.
pub fn draw_rect(
    pixels: &mut [u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    thickness: u32,
    color: [u8; 3],
) {
    if w == 0 || h == 0 {
        return;
    }
    let x1 = (x + w).min(width);
    let y1 = (y + h).min(height);
    let x0 = x.min(width);
    let y0 = y.min(height);
    let t = thickness.max(1);

    for py in y0..y1 {
        for px in x0..x1 {
            let on_edge = px < x0 + t || px >= x1.saturating_sub(t) || py < y0 + t
                || py >= y1.saturating_sub(t);
            if !on_edge {
                continue;
            }
            let idx = (py as usize * width as usize + px as usize) * format.channels();
            match format {
                PixelFormat::Bgr8 => {
                    pixels[idx] = color[0];
                    pixels[idx + 1] = color[1];
                    pixels[idx + 2] = color[2];
                }
                PixelFormat::Gray8 => {
                    pixels[idx] = 255;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn luma_of_bgr_matches_rec601_weighting() {
        // Pure green pixel: luma ~ 150/256 * 255 = 149.
        let frame = Frame::new(
            vec![0, 255, 0],
            1,
            1,
            PixelFormat::Bgr8,
            0,
            Instant::now(),
        );
        let y = luma(&frame).unwrap();
        assert_eq!(y.len(), 1);
        assert!((y[0] as i32 - 149).abs() <= 1, "got {}", y[0]);
    }

    #[test]
    fn bilinear_downscale_preserves_flat_regions() {
        let src = vec![120u8; 16 * 8];
        let out = resize_gray_bilinear(&src, 16, 8, 8, 4);
        assert_eq!(out.len(), 32);
        assert!(out.iter().all(|&v| v == 120));
    }

    #[test]
    fn nearest_upscale_keeps_mask_binary() {
        let src = vec![0, 255, 255, 0];
        let out = resize_gray_nearest(&src, 2, 2, 4, 4);
        assert_eq!(out.len(), 16);
        assert!(out.iter().all(|&v| v == 0 || v == 255));
        assert_eq!(out[0], 0);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn median_removes_lone_speck() {
        let mut src = vec![0u8; 25];
        src[12] = 255;
        let out = median3(&src, 5, 5);
        assert!(out.iter().all(|&v| v == 0));
    }

    #[test]
    fn median_keeps_solid_block() {
        let mut src = vec![0u8; 36];
        for y in 1..5usize {
            for x in 1..5usize {
                src[y * 6 + x] = 255;
            }
        }
        let out = median3(&src, 6, 6);
        // Interior of the block survives.
        assert_eq!(out[2 * 6 + 2], 255);
        assert_eq!(out[3 * 6 + 3], 255);
    }

    #[test]
    fn threshold_is_inclusive_at_cutoff() {
        let out = threshold_binary(&[199, 200, 201, 0, 255], 200);
        assert_eq!(out, vec![0, 255, 255, 0, 255]);
    }

    #[test]
    fn draw_rect_leaves_interior_untouched() {
        let mut pixels = vec![0u8; 10 * 10];
        draw_rect(
            &mut pixels,
            10,
            10,
            PixelFormat::Gray8,
            1,
            1,
            8,
            8,
            2,
            [0, 255, 0],
        );
        // Border painted.
        assert_eq!(pixels[1 * 10 + 1], 255);
        // Center untouched.
        assert_eq!(pixels[5 * 10 + 5], 0);
    }
}
