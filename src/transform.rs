//! Per-frame ASCII rendering.
//!
//! A frame is downsampled to one pixel per glyph cell, brightness and contrast
//! are applied to that small raster, every cell picks a glyph from the density
//! ramp, and the glyphs are drawn onto a black canvas. Rendering is a pure
//! function of the frame, the options and the font.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use rayon::prelude::*;

use crate::font::{FontResource, CELL_WIDTH_RATIO};
use crate::frame::{Frame, PixelLayout};
use crate::ramp;
use crate::RenderOptions;

/// Glyph cells are roughly twice as tall as they are wide.
pub const CHAR_ASPECT: f64 = 0.5;

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const MONOCHROME_INK: Rgb<u8> = Rgb([255, 255, 255]);

/// Number of character rows for a frame, never less than one.
pub fn grid_height(columns: u32, frame_width: u32, frame_height: u32) -> u32 {
    if frame_width == 0 {
        return 1;
    }
    let rows = (columns as f64 * frame_height as f64 / frame_width as f64 * CHAR_ASPECT).round();
    (rows as u32).max(1)
}

/// Pixel size of one glyph cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGeometry {
    pub cell_width: f32,
    pub cell_height: u32,
}

impl CellGeometry {
    pub fn new(font_size: u32) -> Self {
        Self {
            cell_width: font_size as f32 * CELL_WIDTH_RATIO,
            cell_height: font_size,
        }
    }

    /// Canvas size for a grid, truncating the fractional cell width.
    pub fn canvas_size(&self, columns: u32, rows: u32) -> (u32, u32) {
        let width = (columns as f32 * self.cell_width) as u32;
        (width.max(1), (rows * self.cell_height).max(1))
    }
}

/// Output canvas size for a source frame of the given dimensions.
pub fn output_size(options: &RenderOptions, frame_width: u32, frame_height: u32) -> (u32, u32) {
    let rows = grid_height(options.columns, frame_width, frame_height);
    CellGeometry::new(options.font_size).canvas_size(options.columns, rows)
}

/// Downsampled frame, one BGR triple per glyph cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRaster {
    pub columns: u32,
    pub rows: u32,
    pub pixels: Vec<[u8; 3]>,
}

pub fn downsample(frame: &Frame, columns: u32, rows: u32) -> CellRaster {
    let (w, h) = (frame.width(), frame.height());
    let pixels = match frame.layout() {
        PixelLayout::Bgr => {
            // The filter works per channel, so BGR order survives the resize.
            let src: ImageBuffer<Rgb<u8>, &[u8]> =
                ImageBuffer::from_raw(w, h, frame.data()).expect("frame length validated on construction");
            imageops::resize(&src, columns, rows, FilterType::Triangle)
                .pixels()
                .map(|p| p.0)
                .collect()
        }
        PixelLayout::Gray => {
            let src: ImageBuffer<Luma<u8>, &[u8]> =
                ImageBuffer::from_raw(w, h, frame.data()).expect("frame length validated on construction");
            imageops::resize(&src, columns, rows, FilterType::Triangle)
                .pixels()
                .map(|p| [p.0[0]; 3])
                .collect()
        }
    };
    CellRaster { columns, rows, pixels }
}

/// `clamp(contrast * v + (brightness - 1) * 128, 0, 255)`, rounded.
pub fn adjust_channel(value: u8, brightness: f32, contrast: f32) -> u8 {
    let v = contrast * value as f32 + (brightness - 1.0) * 128.0;
    v.round().clamp(0.0, 255.0) as u8
}

pub fn adjust(raster: &mut CellRaster, brightness: f32, contrast: f32) {
    for px in raster.pixels.iter_mut() {
        for c in px.iter_mut() {
            *c = adjust_channel(*c, brightness, contrast);
        }
    }
}

/// Glyph and ink color for one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub glyph: char,
    pub color: Rgb<u8>,
}

pub fn select_cell(bgr: [u8; 3], color: bool) -> Cell {
    let [b, g, r] = bgr;
    if color {
        let brightness = (b as u16 + g as u16 + r as u16) as f32 / 3.0;
        Cell { glyph: ramp::glyph_for(brightness), color: Rgb([r, g, b]) }
    } else {
        Cell { glyph: ramp::glyph_for(b as f32), color: MONOCHROME_INK }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellGrid {
    pub columns: u32,
    pub rows: u32,
    pub cells: Vec<Cell>,
}

pub fn select_cells(raster: &CellRaster, color: bool) -> CellGrid {
    CellGrid {
        columns: raster.columns,
        rows: raster.rows,
        cells: raster.pixels.iter().map(|&px| select_cell(px, color)).collect(),
    }
}

/// Draw every cell onto a fresh black canvas.
///
/// Each character row owns a disjoint horizontal band of the canvas, so bands
/// are drawn in parallel. Ink that spills past a band edge is clipped.
pub fn rasterize(grid: &CellGrid, font_size: u32, font: &FontResource) -> RgbImage {
    let geometry = CellGeometry::new(font_size);
    let (width, height) = geometry.canvas_size(grid.columns, grid.rows);
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);
    if grid.columns == 0 || grid.rows == 0 {
        return canvas;
    }
    let band_height = geometry.cell_height.max(1);
    let band_len = width as usize * 3 * band_height as usize;

    canvas
        .par_chunks_mut(band_len)
        .zip(grid.cells.par_chunks(grid.columns as usize))
        .for_each(|(band, row)| {
            let band_rows = (band.len() / (width as usize * 3)) as i32;
            for (col, cell) in row.iter().enumerate() {
                if cell.glyph == ' ' {
                    continue;
                }
                let x = col as f32 * geometry.cell_width;
                font.draw_glyph(cell.glyph, x, 0.0, |px, py, coverage| {
                    if px < 0 || py < 0 || px >= width as i32 || py >= band_rows {
                        return;
                    }
                    let idx = (py as usize * width as usize + px as usize) * 3;
                    blend(&mut band[idx..idx + 3], cell.color, coverage);
                });
            }
        });
    canvas
}

fn blend(dst: &mut [u8], color: Rgb<u8>, coverage: f32) {
    let alpha = (coverage.clamp(0.0, 1.0) * 255.0).round() as u16;
    if alpha == 0 {
        return;
    }
    let inv = 255 - alpha;
    for (d, s) in dst.iter_mut().zip(color.0) {
        *d = ((s as u16 * alpha + *d as u16 * inv + 127) / 255) as u8;
    }
}

/// Darken the canvas towards its edges with a radial falloff.
pub fn apply_vignette(canvas: &mut RgbImage) {
    let (w, h) = canvas.dimensions();
    let (cx, cy) = ((w / 2) as f32, (h / 2) as f32);
    let radius = w.min(h) as f32 * 0.6;
    let row_len = w as usize * 3;
    canvas.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        let dy = y as f32 - cy;
        for (x, px) in row.chunks_exact_mut(3).enumerate() {
            let dx = x as f32 - cx;
            let distance = (dx * dx + dy * dy).sqrt();
            let mask = (1.0 - (distance - radius) / (radius * 0.5)).clamp(0.0, 1.0);
            for c in px.iter_mut() {
                *c = (*c as f32 * mask) as u8;
            }
        }
    });
}

/// Render one frame as ASCII art.
///
/// A zero-column grid renders as a single black pixel; callers that need an
/// error should run [`RenderOptions::validate`] first.
pub fn transform(frame: &Frame, options: &RenderOptions, font: &FontResource) -> RgbImage {
    if options.columns == 0 {
        return RgbImage::from_pixel(1, 1, BACKGROUND);
    }
    let rows = grid_height(options.columns, frame.width(), frame.height());
    let mut raster = downsample(frame, options.columns, rows);
    adjust(&mut raster, options.brightness, options.contrast);
    let grid = select_cells(&raster, options.color);
    let mut canvas = rasterize(&grid, options.font_size, font);
    if options.vignette {
        apply_vignette(&mut canvas);
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::BuiltinFont;

    fn builtin(font_size: u32) -> FontResource {
        FontResource::Builtin(BuiltinFont::new(font_size))
    }

    fn options(columns: u32) -> RenderOptions {
        RenderOptions::default()
            .with_columns(columns)
            .with_contrast(1.0)
            .with_brightness(1.0)
    }

    #[test]
    fn grid_height_rounds_and_clamps() {
        assert_eq!(grid_height(120, 1920, 1080), 34);
        assert_eq!(grid_height(2, 4, 2), 1);
        assert_eq!(grid_height(10, 10_000, 1), 1);
        assert_eq!(grid_height(10, 0, 10), 1);
        assert_eq!(grid_height(4, 4, 4), 2);
    }

    #[test]
    fn canvas_size_truncates_cell_width() {
        let geometry = CellGeometry::new(12);
        assert_eq!(geometry.canvas_size(2, 1), (14, 12));
        assert_eq!(geometry.canvas_size(120, 34), (864, 408));
    }

    #[test]
    fn adjust_is_identity_at_defaults() {
        for v in 0..=255u8 {
            assert_eq!(adjust_channel(v, 1.0, 1.0), v);
        }
    }

    #[test]
    fn adjust_clamps_to_byte_range() {
        assert_eq!(adjust_channel(200, 1.0, 1.5), 255);
        assert_eq!(adjust_channel(10, 0.0, 1.0), 0);
        assert_eq!(adjust_channel(100, 1.5, 1.0), 164);
    }

    #[test]
    fn monochrome_cells_are_white_and_use_first_channel() {
        let cell = select_cell([0, 200, 30], false);
        assert_eq!(cell.color, Rgb([255, 255, 255]));
        assert_eq!(cell.glyph, '@');
    }

    #[test]
    fn color_cells_keep_their_own_color() {
        let cell = select_cell([10, 20, 240], true);
        assert_eq!(cell.color, Rgb([240, 20, 10]));
        // (10 + 20 + 240) / 3 = 90
        assert_eq!(cell.glyph, ramp::glyph_for(90.0));
    }

    #[test]
    fn zero_columns_render_a_single_black_pixel() {
        let frame = Frame::solid_bgr(4, 2, [0, 0, 0]).unwrap();
        let canvas = transform(&frame, &options(0), &builtin(12));
        assert_eq!(canvas.dimensions(), (1, 1));
        assert_eq!(canvas.get_pixel(0, 0), &BACKGROUND);

        let empty = CellGrid { columns: 0, rows: 3, cells: Vec::new() };
        assert_eq!(rasterize(&empty, 12, &builtin(12)).dimensions(), (1, 36));
    }

    #[test]
    fn gray_frames_broadcast_to_three_channels() {
        let frame = Frame::gray(4, 4, vec![77; 16]).unwrap();
        let raster = downsample(&frame, 2, 2);
        assert_eq!(raster.pixels, vec![[77, 77, 77]; 4]);
    }

    #[test]
    fn output_matches_computed_canvas_size() {
        let frame = Frame::solid_bgr(4, 2, [0, 0, 0]).unwrap();
        let opts = options(2).with_font_size(12);
        let canvas = transform(&frame, &opts, &builtin(12));
        assert_eq!(canvas.dimensions(), output_size(&opts, 4, 2));
        assert_eq!(canvas.dimensions(), (14, 12));
    }

    #[test]
    fn black_frame_draws_dense_white_glyphs() {
        let frame = Frame::solid_bgr(8, 8, [0, 0, 0]).unwrap();
        let canvas = transform(&frame, &options(2), &builtin(12));
        assert!(canvas.pixels().any(|p| *p == Rgb([255, 255, 255])));
        assert!(canvas.pixels().all(|p| p[0] == p[1] && p[1] == p[2]));
    }

    #[test]
    fn white_frame_renders_blank_canvas() {
        let frame = Frame::solid_bgr(8, 8, [255, 255, 255]).unwrap();
        let canvas = transform(&frame, &options(2), &builtin(12));
        assert!(canvas.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn color_mode_inks_with_source_color() {
        // Dark red stays on the dense end of the ramp.
        let frame = Frame::solid_bgr(8, 8, [0, 0, 90]).unwrap();
        let opts = options(2).with_color(true);
        let canvas = transform(&frame, &opts, &builtin(12));
        assert!(canvas.pixels().any(|p| *p == Rgb([90, 0, 0])));
        assert!(canvas.pixels().all(|p| p[1] == 0 && p[2] == 0));
    }

    #[test]
    fn transform_is_deterministic() {
        let data: Vec<u8> = (0..16 * 9 * 3).map(|i| (i * 7 % 256) as u8).collect();
        let frame = Frame::bgr(16, 9, data).unwrap();
        let opts = options(8).with_color(true);
        let font = builtin(10);
        assert_eq!(transform(&frame, &opts, &font), transform(&frame, &opts, &font));
    }

    #[test]
    fn vignette_keeps_center_and_darkens_corners() {
        let mut canvas = RgbImage::from_pixel(100, 100, Rgb([200, 200, 200]));
        apply_vignette(&mut canvas);
        assert_eq!(*canvas.get_pixel(50, 50), Rgb([200, 200, 200]));
        assert!(canvas.get_pixel(0, 0)[0] < 200);
    }
}
