//! The density ramp used to pick a glyph for each grid cell.

/// Glyphs ordered from densest (index 0, darkest input) to sparsest.
pub const DENSITY_RAMP: [char; 9] = ['@', '#', '8', '&', 'o', ':', '*', '.', ' '];

/// Map a brightness in `[0, 256)` to a ramp index.
///
/// Uses `floor(brightness / 256 * len)` clamped into the ramp, so out-of-range
/// and NaN inputs still land on a valid glyph.
pub fn ramp_index(brightness: f32) -> usize {
    let last = DENSITY_RAMP.len() - 1;
    let idx = (brightness / 256.0 * DENSITY_RAMP.len() as f32).floor();
    if idx.is_nan() || idx <= 0.0 {
        0
    } else {
        (idx as usize).min(last)
    }
}

pub fn glyph_for(brightness: f32) -> char {
    DENSITY_RAMP[ramp_index(brightness)]
}
