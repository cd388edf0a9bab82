//! Aspect-preserving resize into a cell's pixel box (spec §4.7 step 5).
//! Nearest-neighbor is the default (fast path); bilinear is offered for
//! quality-sensitive configurations. Both operate on tightly-packed RGB.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    Nearest,
    Bilinear,
}

/// Compute the largest rectangle that fits inside `(box_w, box_h)`
/// while preserving `(src_w, src_h)`'s aspect ratio, centered.
pub fn best_fit_rect(src_w: u32, src_h: u32, box_w: u32, box_h: u32) -> (u32, u32, u32, u32) {
    if src_w == 0 || src_h == 0 || box_w == 0 || box_h == 0 {
        return (0, 0, 0, 0);
    }
    let src_aspect = src_w as f64 / src_h as f64;
    let box_aspect = box_w as f64 / box_h as f64;
    let (fit_w, fit_h) = if src_aspect > box_aspect {
        (box_w, (box_w as f64 / src_aspect).round() as u32)
    } else {
        ((box_h as f64 * src_aspect).round() as u32, box_h)
    };
    let fit_w = fit_w.max(1).min(box_w);
    let fit_h = fit_h.max(1).min(box_h);
    let x = (box_w - fit_w) / 2;
    let y = (box_h - fit_h) / 2;
    (x, y, fit_w, fit_h)
}

/// Resize `src` (w x h x 3 RGB) into a new `dst_w x dst_h x 3` buffer.
pub fn resize_rgb(src: &[u8], src_w: u32, src_h: u32, dst_w: u32, dst_h: u32, mode: ResizeMode) -> Vec<u8> {
    let mut out = vec![0u8; dst_w as usize * dst_h as usize * 3];
    if dst_w == 0 || dst_h == 0 || src_w == 0 || src_h == 0 {
        return out;
    }
    match mode {
        ResizeMode::Nearest => resize_nearest(src, src_w, src_h, &mut out, dst_w, dst_h),
        ResizeMode::Bilinear => resize_bilinear(src, src_w, src_h, &mut out, dst_w, dst_h),
    }
    out
}

fn resize_nearest(src: &[u8], src_w: u32, src_h: u32, dst: &mut [u8], dst_w: u32, dst_h: u32) {
    for dy in 0..dst_h {
        let sy = (dy * src_h / dst_h).min(src_h - 1);
        for dx in 0..dst_w {
            let sx = (dx * src_w / dst_w).min(src_w - 1);
            let src_idx = ((sy * src_w + sx) * 3) as usize;
            let dst_idx = ((dy * dst_w + dx) * 3) as usize;
            dst[dst_idx..dst_idx + 3].copy_from_slice(&src[src_idx..src_idx + 3]);
        }
    }
}

fn resize_bilinear(src: &[u8], src_w: u32, src_h: u32, dst: &mut [u8], dst_w: u32, dst_h: u32) {
    let x_ratio = (src_w - 1).max(1) as f64 / dst_w.max(1) as f64;
    let y_ratio = (src_h - 1).max(1) as f64 / dst_h.max(1) as f64;
    for dy in 0..dst_h {
        let sy_f = dy as f64 * y_ratio;
        let sy0 = sy_f.floor() as u32;
        let sy1 = (sy0 + 1).min(src_h - 1);
        let fy = sy_f - sy0 as f64;
        for dx in 0..dst_w {
            let sx_f = dx as f64 * x_ratio;
            let sx0 = sx_f.floor() as u32;
            let sx1 = (sx0 + 1).min(src_w - 1);
            let fx = sx_f - sx0 as f64;

            for c in 0..3 {
                let p00 = src[((sy0 * src_w + sx0) * 3 + c) as usize] as f64;
                let p10 = src[((sy0 * src_w + sx1) * 3 + c) as usize] as f64;
                let p01 = src[((sy1 * src_w + sx0) * 3 + c) as usize] as f64;
                let p11 = src[((sy1 * src_w + sx1) * 3 + c) as usize] as f64;
                let top = p00 * (1.0 - fx) + p10 * fx;
                let bottom = p01 * (1.0 - fx) + p11 * fx;
                let value = top * (1.0 - fy) + bottom * fy;
                let dst_idx = ((dy * dst_w + dx) * 3 + c) as usize;
                dst[dst_idx] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_fit_letterboxes_wide_into_square() {
        let (x, y, w, h) = best_fit_rect(16, 9, 10, 10);
        assert!(w <= 10 && h <= 10);
        assert!(x > 0 || y > 0);
    }

    #[test]
    fn resize_nearest_preserves_corner_colors() {
        let src = vec![
            255, 0, 0, 0, 255, 0, //
            0, 0, 255, 255, 255, 255,
        ];
        let out = resize_rgb(&src, 2, 2, 4, 4, ResizeMode::Nearest);
        assert_eq!(&out[0..3], &[255, 0, 0]);
    }

    #[test]
    fn resize_output_has_expected_length() {
        let src = vec![0u8; 8 * 8 * 3];
        let out = resize_rgb(&src, 8, 8, 3, 5, ResizeMode::Bilinear);
        assert_eq!(out.len(), 3 * 5 * 3);
    }
}
