//! # vidascii - ASCII Art Video Renderer
//!
//! `vidascii` re-renders every frame of a video as character art and encodes
//! the result back into a playable video, optionally keeping the original
//! audio track.
//!
//! ## Features
//!
//! - Nine-glyph density ramp, monochrome or per-cell color
//! - Brightness and contrast control applied at glyph resolution
//! - TrueType rendering with a fallback chain ending in a built-in bitmap font
//! - ffmpeg for decoding, the intermediate stream, and the final H.264 encode
//! - Progress reporting for integration with UI applications
//!
//! ## Example
//!
//! ```no_run
//! use vidascii::{RenderOptions, VideoConverter, VideoOptions};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let converter = VideoConverter::new();
//! let render = RenderOptions::default().with_columns(160).with_color(true);
//! let video = VideoOptions::default().with_keep_audio(true);
//! converter.convert(Path::new("input.mp4"), Path::new("ascii.mp4"), &render, &video)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Progress Reporting
//!
//! ```no_run
//! use vidascii::{ProgressPhase, RenderOptions, VideoConverter, VideoOptions};
//! use std::path::Path;
//!
//! let converter = VideoConverter::new();
//! converter.convert_with_progress(
//!     Path::new("input.mp4"),
//!     Path::new("ascii.mp4"),
//!     &RenderOptions::default(),
//!     &VideoOptions::default(),
//!     |progress| match progress.phase {
//!         ProgressPhase::RenderingFrames => {
//!             println!("Rendering: {}/{}", progress.completed, progress.total)
//!         }
//!         ProgressPhase::ExtractingAudio => println!("Extracting audio..."),
//!         ProgressPhase::Encoding => println!("Encoding..."),
//!         ProgressPhase::Complete => println!("Done!"),
//!     },
//! ).unwrap();
//! ```

pub mod driver;
pub mod error;
pub mod ffmpeg;
pub mod font;
pub mod frame;
pub mod ramp;
pub mod transform;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use driver::{
    process, FrameSink, FrameSource, MediaBackend, RunConfig, RunSummary, SinkSpec, ToolInvocation,
    ToolOutcome, VideoInfo,
};
pub use error::{Error, FinalizeStage, Result};
pub use ffmpeg::{EncodeSettings, FfmpegBackend, FfmpegConfig};
pub use font::{resolve_font, FontResolution, FontResource, FontTier};
pub use frame::{Frame, PixelLayout};

/// Represents the current phase of a conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Rendering decoded frames to ASCII and writing the intermediate video
    RenderingFrames,
    /// Copying the original audio track out of the source
    ExtractingAudio,
    /// Running the final encode
    Encoding,
    /// Conversion completed successfully
    Complete,
}

/// Progress information for conversion operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub phase: ProgressPhase,
    /// Number of frames completed in the current phase
    pub completed: usize,
    /// Total number of frames (0 if the source does not report a count)
    pub total: usize,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: f64,
    pub message: String,
}

impl Progress {
    pub fn rendering_frames(completed: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            (completed as f64 / total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        Self {
            phase: ProgressPhase::RenderingFrames,
            completed,
            total,
            percentage,
            message: format!("Rendering frame {} of {}", completed, total),
        }
    }

    pub fn extracting_audio() -> Self {
        Self {
            phase: ProgressPhase::ExtractingAudio,
            completed: 0,
            total: 0,
            percentage: 0.0,
            message: "Extracting audio from source...".to_string(),
        }
    }

    pub fn encoding() -> Self {
        Self {
            phase: ProgressPhase::Encoding,
            completed: 0,
            total: 0,
            percentage: 0.0,
            message: "Encoding final video...".to_string(),
        }
    }

    pub fn complete(total_frames: usize) -> Self {
        Self {
            phase: ProgressPhase::Complete,
            completed: total_frames,
            total: total_frames,
            percentage: 100.0,
            message: format!("Conversion complete: {} frames", total_frames),
        }
    }
}

/// Named bundle of render settings
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Preset {
    pub columns: u32,
    pub font_size: u32,
    pub brightness: f32,
    pub contrast: f32,
}

fn default_font() -> PathBuf {
    PathBuf::from(font::DEFAULT_FONT_PATH)
}

fn default_fallback_fonts() -> Vec<PathBuf> {
    font::system_monospace_fonts()
}

/// Application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub presets: HashMap<String, Preset>,
    pub default_preset: String,
    #[serde(default = "default_font")]
    pub font: PathBuf,
    /// Fonts tried in order when `font` is missing or unreadable
    #[serde(default = "default_fallback_fonts")]
    pub fallback_fonts: Vec<PathBuf>,
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
    #[serde(default)]
    pub encode: EncodeSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut presets = HashMap::new();
        presets.insert(
            "default".to_string(),
            Preset { columns: 120, font_size: 12, brightness: 1.0, contrast: 1.5 },
        );
        presets.insert(
            "small".to_string(),
            Preset { columns: 80, font_size: 10, brightness: 1.0, contrast: 1.5 },
        );
        presets.insert(
            "large".to_string(),
            Preset { columns: 200, font_size: 14, brightness: 1.0, contrast: 1.3 },
        );
        Self {
            presets,
            default_preset: "default".to_string(),
            font: default_font(),
            fallback_fonts: default_fallback_fonts(),
            ffmpeg: FfmpegConfig::default(),
            encode: EncodeSettings::default(),
        }
    }
}

impl AppConfig {
    /// Parse a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("parsing {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.presets.contains_key(&self.default_preset) {
            return Err(Error::Config(format!(
                "default_preset '{}' is not defined in presets",
                self.default_preset
            )));
        }
        Ok(())
    }
}

/// Options controlling how each frame is rendered
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Grid width in characters; the row count follows from the aspect ratio
    pub columns: u32,
    /// Glyph height in pixels; cells are 0.6 of this wide
    pub font_size: u32,
    /// 1.0 leaves brightness unchanged
    pub brightness: f32,
    /// 1.0 leaves contrast unchanged
    pub contrast: f32,
    /// Ink each glyph with its cell's color instead of white
    pub color: bool,
    /// Darken the edges of every rendered frame
    pub vignette: bool,
    /// Preferred TrueType font; `None` goes straight to the fallbacks
    pub font_path: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            columns: 120,
            font_size: 12,
            brightness: 1.0,
            contrast: 1.5,
            color: false,
            vignette: false,
            font_path: Some(default_font()),
        }
    }
}

impl RenderOptions {
    pub fn with_columns(mut self, columns: u32) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_font_size(mut self, font_size: u32) -> Self {
        self.font_size = font_size;
        self
    }

    pub fn with_brightness(mut self, brightness: f32) -> Self {
        self.brightness = brightness;
        self
    }

    pub fn with_contrast(mut self, contrast: f32) -> Self {
        self.contrast = contrast;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_vignette(mut self, vignette: bool) -> Self {
        self.vignette = vignette;
        self
    }

    pub fn with_font_path(mut self, font_path: Option<PathBuf>) -> Self {
        self.font_path = font_path;
        self
    }

    /// Create options from a preset
    pub fn from_preset(preset: &Preset, font_path: Option<PathBuf>) -> Self {
        Self {
            columns: preset.columns,
            font_size: preset.font_size,
            brightness: preset.brightness,
            contrast: preset.contrast,
            color: false,
            vignette: false,
            font_path,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns == 0 {
            return Err(Error::InvalidParameter("width must be at least 1 character".into()));
        }
        if self.font_size == 0 {
            return Err(Error::InvalidParameter("font size must be at least 1 pixel".into()));
        }
        if !self.brightness.is_finite() || !self.contrast.is_finite() {
            return Err(Error::InvalidParameter("brightness and contrast must be finite".into()));
        }
        Ok(())
    }
}

/// Options for reading the source and producing the output container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoOptions {
    /// Output frame rate; 0 keeps the source rate
    pub fps: u32,
    /// Mux the source's audio track into the output
    pub keep_audio: bool,
    /// Where temporaries go; the system temp dir when `None`
    pub temp_dir: Option<PathBuf>,
}

impl VideoOptions {
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_keep_audio(mut self, keep_audio: bool) -> Self {
        self.keep_audio = keep_audio;
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: PathBuf) -> Self {
        self.temp_dir = Some(temp_dir);
        self
    }
}

/// Main entry point for converting videos
pub struct VideoConverter {
    config: AppConfig,
}

impl VideoConverter {
    pub fn new() -> Self {
        Self { config: AppConfig::default() }
    }

    pub fn with_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self { config: AppConfig::from_file(path)? })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_preset(&self, name: &str) -> Option<&Preset> {
        self.config.presets.get(name)
    }

    /// Render options for a named preset, using the configured font
    pub fn options_from_preset(&self, preset_name: &str) -> Result<RenderOptions> {
        let preset = self
            .get_preset(preset_name)
            .ok_or_else(|| Error::Config(format!("preset '{}' not found", preset_name)))?;
        Ok(RenderOptions::from_preset(preset, Some(self.config.font.clone())))
    }

    /// Verify that ffmpeg can be executed, returning its version banner
    pub fn check_tools(&self) -> Result<String> {
        ffmpeg::check_ffmpeg(&self.config.ffmpeg)
    }

    /// Convert `input` into an ASCII-art video at `output`
    pub fn convert(&self, input: &Path, output: &Path, render: &RenderOptions, video: &VideoOptions) -> Result<RunSummary> {
        self.convert_with_progress(input, output, render, video, |_| {})
    }

    /// Convert with a callback receiving detailed [`Progress`] updates
    pub fn convert_with_progress<F>(
        &self,
        input: &Path,
        output: &Path,
        render: &RenderOptions,
        video: &VideoOptions,
        progress_callback: F,
    ) -> Result<RunSummary>
    where
        F: FnMut(Progress),
    {
        let banner = self.check_tools()?;
        tracing::debug!("{}", banner);
        let config = RunConfig {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            render: render.clone(),
            video: video.clone(),
            fallback_fonts: self.config.fallback_fonts.clone(),
            encode: self.config.encode.clone(),
        };
        let backend = FfmpegBackend::new(self.config.ffmpeg.clone());
        process(&backend, &config, progress_callback)
    }
}

impl Default for VideoConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_its_default_preset() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        let converter = VideoConverter::new();
        let opts = converter.options_from_preset("small").unwrap();
        assert_eq!(opts.columns, 80);
        assert_eq!(opts.font_path, Some(PathBuf::from(font::DEFAULT_FONT_PATH)));
    }

    #[test]
    fn config_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vidascii.json");
        fs::write(
            &path,
            r#"{
                "presets": {"tiny": {"columns": 40, "font_size": 8, "brightness": 1.2, "contrast": 1.0}},
                "default_preset": "tiny",
                "encode": {"crf": 18}
            }"#,
        )
        .unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.presets["tiny"].columns, 40);
        assert_eq!(config.encode.crf, 18);
        assert_eq!(config.encode.preset, "medium");
        assert_eq!(config.ffmpeg.ffmpeg, "ffmpeg");
        assert_eq!(config.fallback_fonts, font::system_monospace_fonts());
    }

    #[test]
    fn config_with_unknown_default_preset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vidascii.json");
        fs::write(&path, r#"{"presets": {}, "default_preset": "missing"}"#).unwrap();
        assert!(matches!(AppConfig::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn render_options_validation() {
        assert!(RenderOptions::default().validate().is_ok());
        assert!(RenderOptions::default().with_columns(0).validate().is_err());
        assert!(RenderOptions::default().with_font_size(0).validate().is_err());
        assert!(RenderOptions::default().with_contrast(f32::NAN).validate().is_err());
    }

    #[test]
    fn progress_percentage() {
        assert_eq!(Progress::rendering_frames(5, 10).percentage, 50.0);
        assert_eq!(Progress::rendering_frames(3, 0).percentage, 0.0);
        assert_eq!(Progress::complete(7).completed, 7);
    }
}
