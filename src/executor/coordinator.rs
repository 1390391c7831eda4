// Percentage to physical pixel mapping.
use crate::device::Resolution;

/// Maps a percentage (0-100) of `dimension` to a pixel index, rounding to nearest.
/// Out-of-range input is clamped to the screen edge.
pub fn pct_to_pixel(pct: f64, dimension: u32) -> u32 {
    if !pct.is_finite() || pct <= 0.0 {
        return 0;
    }
    let px = (pct / 100.0 * dimension as f64).round();
    px.min(dimension as f64) as u32
}

pub fn point_to_physical(x_pct: f64, y_pct: f64, resolution: Resolution) -> (u32, u32) {
    (
        pct_to_pixel(x_pct, resolution.width),
        pct_to_pixel(y_pct, resolution.height),
    )
}
