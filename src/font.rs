//! Glyph rasterizers and the font fallback chain.
//!
//! A font is resolved once per run and shared read-only by every frame. The
//! chain is: the requested TrueType file, then the configured system
//! monospace fonts in order, then a small built-in bitmap font that covers the
//! density ramp. Resolution never fails; falling below the requested font is
//! reported through [`FontTier`] and a logged warning.

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Glyph cells are this fraction of the font size wide.
pub const CELL_WIDTH_RATIO: f32 = 0.6;

/// Font requested when nothing else is configured.
pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf";

/// Known monospace fonts, tried in order when the requested font is unusable.
pub const SYSTEM_MONOSPACE_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/truetype/ubuntu/UbuntuMono-R.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "/Library/Fonts/Courier New.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
];

pub fn system_monospace_fonts() -> Vec<PathBuf> {
    SYSTEM_MONOSPACE_FONTS.iter().map(PathBuf::from).collect()
}

/// Which link of the fallback chain produced the font.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontTier {
    Requested(PathBuf),
    SystemFallback(PathBuf),
    Builtin,
}

impl std::fmt::Display for FontTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FontTier::Requested(p) => write!(f, "{}", p.display()),
            FontTier::SystemFallback(p) => write!(f, "{} (fallback)", p.display()),
            FontTier::Builtin => f.write_str("built-in bitmap font"),
        }
    }
}

/// Outcome of [`resolve_font`].
pub struct FontResolution {
    pub font: FontResource,
    pub tier: FontTier,
}

/// A fixed-size glyph rasterizer.
pub enum FontResource {
    Outline(OutlineFont),
    Builtin(BuiltinFont),
}

impl FontResource {
    /// Rasterize `ch` with the top-left of its cell at `(x, y)`.
    ///
    /// `put` receives absolute pixel coordinates and a coverage in `0.0..=1.0`.
    /// Coordinates may fall outside the caller's canvas.
    pub fn draw_glyph<F>(&self, ch: char, x: f32, y: f32, put: F)
    where
        F: FnMut(i32, i32, f32),
    {
        match self {
            FontResource::Outline(font) => font.draw_glyph(ch, x, y, put),
            FontResource::Builtin(font) => font.draw_glyph(ch, x, y, put),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, FontResource::Builtin(_))
    }
}

/// A TrueType/OpenType face scaled so that one em equals the font size in pixels.
pub struct OutlineFont {
    font: FontVec,
    scale: PxScale,
    ascent: f32,
}

impl OutlineFont {
    pub fn load(path: &Path, font_size: u32) -> Result<Self> {
        let data = fs::read(path)?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| Error::Font(format!("{}: {}", path.display(), e)))?;
        let units_per_em = font
            .units_per_em()
            .ok_or_else(|| Error::Font(format!("{}: missing units-per-em", path.display())))?;
        // PxScale is the ascent-to-descent height, not the em size.
        let scale = PxScale::from(font_size as f32 * font.height_unscaled() / units_per_em);
        let ascent = font.as_scaled(scale).ascent();
        Ok(Self { font, scale, ascent })
    }

    fn draw_glyph<F>(&self, ch: char, x: f32, y: f32, mut put: F)
    where
        F: FnMut(i32, i32, f32),
    {
        let glyph = self
            .font
            .glyph_id(ch)
            .with_scale_and_position(self.scale, point(x, y + self.ascent));
        if let Some(outlined) = self.font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            let (ox, oy) = (bounds.min.x as i32, bounds.min.y as i32);
            outlined.draw(|gx, gy, coverage| put(ox + gx as i32, oy + gy as i32, coverage));
        }
    }
}

// 5x7 glyphs on a 6x8 pitch, one row per byte, bit 4 is the leftmost column.
const BUILTIN_COLS: u32 = 6;
const BUILTIN_ROWS: u32 = 8;
const BUILTIN_GLYPHS: &[(char, [u8; 7])] = &[
    ('@', [0x0E, 0x11, 0x17, 0x15, 0x17, 0x10, 0x0F]),
    ('#', [0x0A, 0x1F, 0x0A, 0x0A, 0x1F, 0x0A, 0x00]),
    ('8', [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E]),
    ('&', [0x0C, 0x12, 0x14, 0x08, 0x15, 0x12, 0x0D]),
    ('o', [0x00, 0x00, 0x0E, 0x11, 0x11, 0x11, 0x0E]),
    (':', [0x00, 0x04, 0x04, 0x00, 0x04, 0x04, 0x00]),
    ('*', [0x00, 0x04, 0x15, 0x0E, 0x15, 0x04, 0x00]),
    ('.', [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C]),
    (' ', [0x00; 7]),
];
const MISSING_GLYPH: [u8; 7] = [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F];

/// Minimal bitmap font stretched to fill one glyph cell.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinFont {
    cell_width: u32,
    cell_height: u32,
}

impl BuiltinFont {
    pub fn new(font_size: u32) -> Self {
        Self {
            cell_width: ((font_size as f32 * CELL_WIDTH_RATIO) as u32).max(1),
            cell_height: font_size.max(1),
        }
    }

    fn rows(ch: char) -> &'static [u8; 7] {
        BUILTIN_GLYPHS
            .iter()
            .find(|(c, _)| *c == ch)
            .map(|(_, rows)| rows)
            .unwrap_or(&MISSING_GLYPH)
    }

    fn draw_glyph<F>(&self, ch: char, x: f32, y: f32, mut put: F)
    where
        F: FnMut(i32, i32, f32),
    {
        let rows = Self::rows(ch);
        let (x0, y0) = (x.floor() as i32, y.floor() as i32);
        for py in 0..self.cell_height {
            let gy = (py * BUILTIN_ROWS / self.cell_height) as usize;
            let Some(bits) = rows.get(gy) else { continue };
            for px in 0..self.cell_width {
                let gx = px * BUILTIN_COLS / self.cell_width;
                if gx < 5 && bits & (0x10 >> gx) != 0 {
                    put(x0 + px as i32, y0 + py as i32, 1.0);
                }
            }
        }
    }
}

enum FontCandidate<'a> {
    Requested(&'a Path),
    System(&'a Path),
}

impl FontCandidate<'_> {
    fn path(&self) -> &Path {
        match self {
            FontCandidate::Requested(p) | FontCandidate::System(p) => p,
        }
    }

    fn tier(&self) -> FontTier {
        match self {
            FontCandidate::Requested(p) => FontTier::Requested(p.to_path_buf()),
            FontCandidate::System(p) => FontTier::SystemFallback(p.to_path_buf()),
        }
    }
}

/// Walk the fallback chain and return the first usable font.
pub fn resolve_font(requested: Option<&Path>, fallbacks: &[PathBuf], font_size: u32) -> FontResolution {
    let candidates = requested
        .into_iter()
        .map(FontCandidate::Requested)
        .chain(fallbacks.iter().map(|p| FontCandidate::System(p.as_path())));

    for candidate in candidates {
        let path = candidate.path();
        if !path.exists() {
            match candidate {
                FontCandidate::Requested(_) => {
                    warn!("font {} not found, trying system monospace fonts", path.display())
                }
                FontCandidate::System(_) => debug!("fallback font {} not present", path.display()),
            }
            continue;
        }
        match OutlineFont::load(path, font_size) {
            Ok(font) => {
                let tier = candidate.tier();
                if let FontTier::SystemFallback(_) = tier {
                    warn!("using system font {}", path.display());
                }
                return FontResolution { font: FontResource::Outline(font), tier };
            }
            Err(e) => warn!("cannot load font: {}", e),
        }
    }

    warn!("no usable TrueType font found, using the built-in bitmap font");
    FontResolution {
        font: FontResource::Builtin(BuiltinFont::new(font_size)),
        tier: FontTier::Builtin,
    }
}
