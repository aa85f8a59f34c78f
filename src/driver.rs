//! Frame-by-frame driver: decode, render, write, then finalize.
//!
//! The driver owns no codec logic. It talks to a [`MediaBackend`] that opens
//! the frame source and sink and runs the external finalize tool, which keeps
//! the loop itself testable without ffmpeg.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::error::{Error, FinalizeStage, Result};
use crate::ffmpeg::{self, EncodeSettings};
use crate::font::{resolve_font, FontResolution, FontTier};
use crate::frame::Frame;
use crate::transform::transform;
use crate::{Progress, RenderOptions, VideoOptions};

/// Stream metadata reported by a frame source.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// 0.0 when the source does not report a rate
    pub fps: f64,
    /// 0 when the source does not report a count
    pub frame_count: u64,
    pub has_audio: bool,
}

pub trait FrameSource {
    fn info(&self) -> &VideoInfo;

    /// Next frame in decode order, `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Restart from the first frame.
    fn rewind(&mut self) -> Result<()>;
}

pub trait FrameSink {
    fn write_frame(&mut self, canvas: &RgbImage) -> Result<()>;

    /// Flush and close the intermediate file.
    fn finish(self) -> Result<()>;
}

/// Geometry and rate of the intermediate stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// One call of the external encode/mux tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub stage: FinalizeStage,
    pub args: Vec<OsString>,
}

/// Exit status and captured diagnostics of a finished tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    pub code: Option<i32>,
    pub stderr: String,
}

impl ToolOutcome {
    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// The external collaborators of a run.
pub trait MediaBackend {
    type Source: FrameSource;
    type Sink: FrameSink;

    fn open_source(&self, input: &Path) -> Result<Self::Source>;
    fn open_sink(&self, path: &Path, spec: &SinkSpec) -> Result<Self::Sink>;
    fn run_tool(&self, invocation: &ToolInvocation) -> Result<ToolOutcome>;
}

/// Everything a run needs, resolved before processing starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub render: RenderOptions,
    pub video: VideoOptions,
    pub fallback_fonts: Vec<PathBuf>,
    pub encode: EncodeSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames_written: usize,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub fps: f64,
    pub font: FontTier,
    pub output: PathBuf,
}

/// Paths of the temporaries a run may leave behind on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempPaths {
    pub intermediate: PathBuf,
    pub audio: PathBuf,
}

impl TempPaths {
    pub fn new(dir: &Path) -> Self {
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let pid = std::process::id();
        Self {
            intermediate: dir.join(format!("vidascii_{}_{}.mkv", pid, stamp)),
            audio: dir.join(format!("vidascii_audio_{}_{}.mka", pid, stamp)),
        }
    }
}

/// Output frame rate: the override when nonzero, otherwise the source's.
pub fn output_fps(info: &VideoInfo, override_fps: u32) -> Option<f64> {
    if override_fps > 0 {
        Some(override_fps as f64)
    } else if info.fps.is_finite() && info.fps > 0.0 {
        Some(info.fps)
    } else {
        None
    }
}

/// Convert every frame of `config.input` and encode the result to `config.output`.
///
/// Frames are processed strictly in order. The first frame is rendered once
/// up front to fix the canvas size, then the source is rewound so it is
/// rendered again as output frame 0. A source without frames fails with
/// [`Error::NoFrames`] before any file is created.
pub fn process<B, F>(backend: &B, config: &RunConfig, mut progress: F) -> Result<RunSummary>
where
    B: MediaBackend,
    F: FnMut(Progress),
{
    config.render.validate()?;

    let mut source = backend.open_source(&config.input)?;
    let info = source.info().clone();
    info!(
        "video info: {}x{}, {:.3} fps, {} frames",
        info.width, info.height, info.fps, info.frame_count
    );
    let fps = output_fps(&info, config.video.fps).ok_or_else(|| Error::SourceOpen {
        path: config.input.clone(),
        reason: "source reports no frame rate; set an output fps".to_string(),
    })?;
    if config.video.keep_audio && !info.has_audio {
        warn!("{} has no audio stream, audio extraction will likely fail", config.input.display());
    }

    let FontResolution { font, tier } = resolve_font(
        config.render.font_path.as_deref(),
        &config.fallback_fonts,
        config.render.font_size,
    );
    info!("font: {}", tier);

    let first = source.read_frame()?.ok_or_else(|| Error::NoFrames(config.input.clone()))?;
    let (width, height) = transform(&first, &config.render, &font).dimensions();
    drop(first);
    source.rewind()?;

    let temp_dir = config.video.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
    let temps = TempPaths::new(&temp_dir);
    debug!("intermediate video: {}", temps.intermediate.display());
    let mut sink = backend.open_sink(&temps.intermediate, &SinkSpec { width, height, fps })?;

    let total = info.frame_count as usize;
    let mut written = 0usize;
    progress(Progress::rendering_frames(0, total));
    let rendered: Result<()> = (|| {
        while let Some(frame) = source.read_frame()? {
            let canvas = transform(&frame, &config.render, &font);
            if canvas.dimensions() != (width, height) {
                return Err(Error::MalformedFrame(format!(
                    "frame {} renders to {}x{}, expected {}x{}",
                    written,
                    canvas.width(),
                    canvas.height(),
                    width,
                    height
                )));
            }
            sink.write_frame(&canvas)?;
            written += 1;
            progress(Progress::rendering_frames(written, total));
        }
        Ok(())
    })();
    drop(source);
    rendered
        .and_then(|()| sink.finish())
        .map_err(|e| e.with_intermediate(&temps.intermediate))?;
    info!("rendered {} frames at {}x{}", written, width, height);

    finalize(backend, config, &temps, &mut progress)?;
    remove_temp(&temps.intermediate);
    if config.video.keep_audio {
        remove_temp(&temps.audio);
    }

    progress(Progress::complete(written));
    info!("video saved to {}", config.output.display());
    Ok(RunSummary {
        frames_written: written,
        canvas_width: width,
        canvas_height: height,
        fps,
        font: tier,
        output: config.output.clone(),
    })
}

fn finalize<B, F>(backend: &B, config: &RunConfig, temps: &TempPaths, progress: &mut F) -> Result<()>
where
    B: MediaBackend,
    F: FnMut(Progress),
{
    let audio = if config.video.keep_audio {
        progress(Progress::extracting_audio());
        run_stage(
            backend,
            ToolInvocation {
                stage: FinalizeStage::ExtractAudio,
                args: ffmpeg::extract_audio_args(&config.input, &temps.audio),
            },
            &temps.intermediate,
        )?;
        Some(temps.audio.as_path())
    } else {
        None
    };

    progress(Progress::encoding());
    run_stage(
        backend,
        ToolInvocation {
            stage: FinalizeStage::Encode,
            args: ffmpeg::encode_args(&temps.intermediate, audio, &config.output, &config.encode),
        },
        &temps.intermediate,
    )
}

fn run_stage<B: MediaBackend>(backend: &B, invocation: ToolInvocation, intermediate: &Path) -> Result<()> {
    info!("running {}", invocation.stage);
    let outcome = backend
        .run_tool(&invocation)
        .map_err(|e| e.with_intermediate(intermediate))?;
    if !outcome.success {
        return Err(Error::Encode {
            stage: invocation.stage,
            status: outcome.status_text(),
            stderr: outcome.stderr.trim().to_string(),
            intermediate: intermediate.to_path_buf(),
        });
    }
    Ok(())
}

fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("could not remove temporary file {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(fps: f64) -> VideoInfo {
        VideoInfo { width: 4, height: 2, fps, frame_count: 1, has_audio: false }
    }

    #[test]
    fn fps_override_wins_when_nonzero() {
        assert_eq!(output_fps(&info(29.97), 12), Some(12.0));
        assert_eq!(output_fps(&info(29.97), 0), Some(29.97));
    }

    #[test]
    fn missing_source_rate_needs_an_override() {
        assert_eq!(output_fps(&info(0.0), 0), None);
        assert_eq!(output_fps(&info(f64::NAN), 0), None);
        assert_eq!(output_fps(&info(0.0), 24), Some(24.0));
    }

    #[test]
    fn temp_paths_live_in_the_given_directory() {
        let temps = TempPaths::new(Path::new("/scratch"));
        assert!(temps.intermediate.starts_with("/scratch"));
        assert!(temps.audio.starts_with("/scratch"));
        assert_ne!(temps.intermediate, temps.audio);
    }

    #[test]
    fn status_text_reports_exit_code_or_signal() {
        let outcome = ToolOutcome { success: false, code: Some(1), stderr: String::new() };
        assert_eq!(outcome.status_text(), "exit code 1");
        let killed = ToolOutcome { code: None, ..outcome };
        assert_eq!(killed.status_text(), "terminated by signal");
    }
}
