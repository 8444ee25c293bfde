//! Binary morphology for mask cleanup.
//!
//! The detector runs a small-kernel opening (erode, dilate) to remove
//! isolated speckle, then a larger-kernel closing (dilate, erode) to merge
//! nearby fragments of the same object. Opening must come first: closing a
//! speckled mask would grow the speckle into spurious blobs.
//!
//! Kernels are elliptical, matching the 3x3 cross and 5x5 disc shapes the
//! detection parameters were tuned against. Out-of-bounds neighbors count
//! as background.

/// Structuring element as a list of (dx, dy) offsets.
#[derive(Clone, Copy, Debug)]
pub enum Kernel {
    /// 3x3 ellipse: a cross.
    Small,
    /// 5x5 ellipse: a disc without the four corners.
    Large,
}

const SMALL_OFFSETS: [(i32, i32); 5] = [(0, 0), (-1, 0), (1, 0), (0, -1), (0, 1)];

const LARGE_OFFSETS: [(i32, i32); 17] = [
    (0, -2),
    (-2, -1),
    (-1, -1),
    (0, -1),
    (1, -1),
    (2, -1),
    (-2, 0),
    (-1, 0),
    (0, 0),
    (1, 0),
    (2, 0),
    (-2, 1),
    (-1, 1),
    (0, 1),
    (1, 1),
    (2, 1),
    (0, 2),
];

impl Kernel {
    fn offsets(self) -> &'static [(i32, i32)] {
        match self {
            Kernel::Small => &SMALL_OFFSETS,
            Kernel::Large => &LARGE_OFFSETS,
        }
    }
}

pub fn erode(mask: &[u8], width: u32, height: u32, kernel: Kernel) -> Vec<u8> {
    let (w, h) = (width as i32, height as i32);
    let mut out = vec![0u8; mask.len()];
    for y in 0..h {
        for x in 0..w {
            let mut keep = true;
            for &(dx, dy) in kernel.offsets() {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w || ny >= h {
                    keep = false;
                    break;
                }
                if mask[(ny * w + nx) as usize] == 0 {
                    keep = false;
                    break;
                }
            }
            if keep {
                out[(y * w + x) as usize] = 255;
            }
        }
    }
    out
}

pub fn dilate(mask: &[u8], width: u32, height: u32, kernel: Kernel) -> Vec<u8> {
    let (w, h) = (width as i32, height as i32);
    let mut out = vec![0u8; mask.len()];
    for y in 0..h {
        for x in 0..w {
            for &(dx, dy) in kernel.offsets() {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w || ny >= h {
                    continue;
                }
                if mask[(ny * w + nx) as usize] != 0 {
                    out[(y * w + x) as usize] = 255;
                    break;
                }
            }
        }
    }
    out
}

/// Erode then dilate. Removes structures smaller than the kernel.
pub fn open(mask: &[u8], width: u32, height: u32, kernel: Kernel) -> Vec<u8> {
    let eroded = erode(mask, width, height, kernel);
    dilate(&eroded, width, height, kernel)
}

/// Dilate then erode. Bridges gaps smaller than the kernel.
pub fn close(mask: &[u8], width: u32, height: u32, kernel: Kernel) -> Vec<u8> {
    let dilated = dilate(mask, width, height, kernel);
    erode(&dilated, width, height, kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(w: usize, h: usize, x0: usize, y0: usize, bw: usize, bh: usize) -> Vec<u8> {
        let mut mask = vec![0u8; w * h];
        for y in y0..(y0 + bh).min(h) {
            for x in x0..(x0 + bw).min(w) {
                mask[y * w + x] = 255;
            }
        }
        mask
    }

    #[test]
    fn opening_removes_single_pixel_speckle() {
        let mut mask = vec![0u8; 100];
        mask[55] = 255;
        let out = open(&mask, 10, 10, Kernel::Small);
        assert!(out.iter().all(|&v| v == 0));
    }

    #[test]
    fn opening_preserves_a_solid_block() {
        let mask = block(20, 20, 5, 5, 8, 8);
        let out = open(&mask, 20, 20, Kernel::Small);
        // Interior intact after open.
        for y in 7..11usize {
            for x in 7..11usize {
                assert_eq!(out[y * 20 + x], 255, "({},{})", x, y);
            }
        }
    }

    #[test]
    fn closing_bridges_a_small_gap() {
        // Two blocks separated by a 2px vertical gap.
        let mut mask = block(30, 10, 2, 2, 10, 6);
        for (i, v) in block(30, 10, 14, 2, 10, 6).iter().enumerate() {
            if *v != 0 {
                mask[i] = 255;
            }
        }
        let out = close(&mask, 30, 10, Kernel::Large);
        // The gap row between the blocks is now filled.
        assert_eq!(out[4 * 30 + 12], 255);
        assert_eq!(out[4 * 30 + 13], 255);
    }

    #[test]
    fn erode_treats_border_as_background() {
        let mask = vec![255u8; 25];
        let out = erode(&mask, 5, 5, Kernel::Small);
        // Border ring eroded away, center survives.
        assert_eq!(out[0], 0);
        assert_eq!(out[2 * 5 + 2], 255);
    }
}
