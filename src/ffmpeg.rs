//! ffmpeg-backed frame source, frame sink and finalize step.

use std::ffi::OsString;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::driver::{FrameSink, FrameSource, MediaBackend, SinkSpec, ToolInvocation, ToolOutcome, VideoInfo};
use crate::error::{Error, Result};
use crate::frame::Frame;

/// Executables used for probing, decoding and encoding.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FfmpegConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self { ffmpeg: "ffmpeg".to_string(), ffprobe: "ffprobe".to_string() }
    }
}

impl FfmpegConfig {
    pub fn ffmpeg_cmd(&self) -> &str {
        &self.ffmpeg
    }

    pub fn ffprobe_cmd(&self) -> &str {
        &self.ffprobe
    }
}

/// Settings for the final encode.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncodeSettings {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self { codec: "libx264".to_string(), preset: "medium".to_string(), crf: 23 }
    }
}

fn os_args(items: &[&str]) -> Vec<OsString> {
    items.iter().map(OsString::from).collect()
}

/// Decode `input` to raw BGR frames on stdout.
///
/// `0:V:0` is the first video stream that is not an attached picture, the same
/// stream [`parse_probe`] measures.
pub fn decode_args(input: &Path) -> Vec<OsString> {
    let mut args = os_args(&["-hide_banner", "-loglevel", "error", "-noautorotate", "-i"]);
    args.push(input.into());
    args.extend(os_args(&["-map", "0:V:0", "-f", "rawvideo", "-pix_fmt", "bgr24", "-"]));
    args
}

/// Encode raw RGB frames from stdin into the lossless intermediate file.
pub fn intermediate_args(spec: &SinkSpec, output: &Path) -> Vec<OsString> {
    let size = format!("{}x{}", spec.width, spec.height);
    let fps = spec.fps.to_string();
    let mut args = os_args(&[
        "-hide_banner", "-loglevel", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s:v", size.as_str(), "-r",
        fps.as_str(), "-i", "-", "-an", "-c:v", "ffv1",
    ]);
    args.push(output.into());
    args
}

/// Stream-copy the first audio track of `input` into `audio`.
pub fn extract_audio_args(input: &Path, audio: &Path) -> Vec<OsString> {
    let mut args = os_args(&["-hide_banner", "-loglevel", "error", "-y", "-i"]);
    args.push(input.into());
    args.extend(os_args(&["-vn", "-acodec", "copy"]));
    args.push(audio.into());
    args
}

/// Re-encode the intermediate video, muxing `audio` when given.
pub fn encode_args(intermediate: &Path, audio: Option<&Path>, output: &Path, settings: &EncodeSettings) -> Vec<OsString> {
    let crf = settings.crf.to_string();
    let mut args = os_args(&["-hide_banner", "-loglevel", "error", "-y", "-i"]);
    args.push(intermediate.into());
    if let Some(audio) = audio {
        args.push("-i".into());
        args.push(audio.into());
    }
    // yuv420p needs even dimensions.
    args.extend(os_args(&[
        "-vf",
        "pad=ceil(iw/2)*2:ceil(ih/2)*2",
        "-c:v",
        settings.codec.as_str(),
        "-preset",
        settings.preset.as_str(),
        "-crf",
        crf.as_str(),
        "-pix_fmt",
        "yuv420p",
    ]));
    if audio.is_some() {
        args.extend(os_args(&["-c:a", "copy", "-map", "0:v:0", "-map", "1:a:0"]));
    }
    args.push(output.into());
    args
}

pub fn display_args(args: &[OsString]) -> String {
    args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
}

/// Run `ffmpeg -version` and return the first line of its banner.
pub fn check_ffmpeg(config: &FfmpegConfig) -> Result<String> {
    let output = Command::new(config.ffmpeg_cmd())
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::ToolMissing(format!("cannot run {}: {}", config.ffmpeg_cmd(), e)))?;
    if !output.status.success() {
        return Err(Error::ToolMissing(format!(
            "{} -version exited with {}: {}",
            config.ffmpeg_cmd(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).lines().next().unwrap_or_default().to_string())
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    #[serde(default)]
    disposition: ProbeDisposition,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

/// Parse `"30000/1001"` or `"25"`. Zero or malformed rates are `None`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Extract [`VideoInfo`] from `ffprobe -of json` output.
pub fn parse_probe(json: &str) -> std::result::Result<VideoInfo, String> {
    let probe: ProbeOutput = serde_json::from_str(json).map_err(|e| format!("unreadable ffprobe output: {}", e))?;
    let is_type = |s: &ProbeStream, kind: &str| s.codec_type.as_deref() == Some(kind);
    let video = probe
        .streams
        .iter()
        .find(|s| is_type(s, "video") && s.disposition.attached_pic == 0)
        .ok_or_else(|| "no video stream".to_string())?;
    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };
    let fps = video
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.avg_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);
    let frame_count = video.nb_frames.as_deref().and_then(|n| n.parse().ok()).unwrap_or(0);
    Ok(VideoInfo {
        width,
        height,
        fps,
        frame_count,
        has_audio: probe.streams.iter().any(|s| is_type(s, "audio")),
    })
}

pub fn probe(config: &FfmpegConfig, input: &Path) -> Result<VideoInfo> {
    let source_err = |reason: String| Error::SourceOpen { path: input.to_path_buf(), reason };
    if !input.is_file() {
        return Err(source_err("file not found".to_string()));
    }
    let output = Command::new(config.ffprobe_cmd())
        .args([
            "-v",
            "error",
            "-show_entries",
            "stream=codec_type,width,height,r_frame_rate,avg_frame_rate,nb_frames:stream_disposition=attached_pic",
            "-of",
            "json",
        ])
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::ToolMissing(format!("cannot run {}: {}", config.ffprobe_cmd(), e)),
            _ => source_err(format!("running {}: {}", config.ffprobe_cmd(), e)),
        })?;
    if !output.status.success() {
        return Err(source_err(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }
    parse_probe(&String::from_utf8_lossy(&output.stdout)).map_err(source_err)
}

struct Decoder {
    child: Child,
    stdout: ChildStdout,
}

impl Decoder {
    fn spawn(ffmpeg: &str, input: &Path) -> io::Result<Self> {
        let args = decode_args(input);
        debug!("spawning decoder: {} {}", ffmpeg, display_args(&args));
        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("failed to capture ffmpeg stdout"))?;
        Ok(Self { child, stdout })
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Frames decoded by an ffmpeg child process, BGR order.
pub struct FfmpegSource {
    ffmpeg: String,
    input: PathBuf,
    info: VideoInfo,
    frame_len: usize,
    decoder: Decoder,
}

impl FfmpegSource {
    pub fn open(config: &FfmpegConfig, input: &Path) -> Result<Self> {
        let info = probe(config, input)?;
        let decoder = Decoder::spawn(config.ffmpeg_cmd(), input).map_err(|e| Error::SourceOpen {
            path: input.to_path_buf(),
            reason: format!("starting decoder: {}", e),
        })?;
        Ok(Self {
            ffmpeg: config.ffmpeg.clone(),
            input: input.to_path_buf(),
            frame_len: info.width as usize * info.height as usize * 3,
            info,
            decoder,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut buffer = vec![0u8; self.frame_len];
        match self.decoder.stdout.read_exact(&mut buffer) {
            Ok(()) => Frame::bgr(self.info.width, self.info.height, buffer).map(Some),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                if let Ok(status) = self.decoder.child.wait() {
                    if !status.success() {
                        warn!("decoder for {} exited with {}", self.input.display(), status);
                    }
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.decoder = Decoder::spawn(&self.ffmpeg, &self.input)?;
        Ok(())
    }
}

/// Raw RGB frames piped into an ffmpeg child writing the intermediate file.
pub struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<ChildStderr>,
    frame_len: usize,
}

impl FfmpegSink {
    pub fn spawn(ffmpeg: &str, output: &Path, spec: &SinkSpec) -> Result<Self> {
        let args = intermediate_args(spec, output);
        debug!("spawning intermediate encoder: {} {}", ffmpeg, display_args(&args));
        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take();
        Ok(Self {
            child,
            stdin,
            stderr,
            frame_len: spec.width as usize * spec.height as usize * 3,
        })
    }
}

impl FrameSink for FfmpegSink {
    fn write_frame(&mut self, canvas: &RgbImage) -> Result<()> {
        let raw = canvas.as_raw();
        if raw.len() != self.frame_len {
            return Err(Error::MalformedFrame(format!(
                "canvas has {} bytes, sink expects {}",
                raw.len(),
                self.frame_len
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::other("intermediate encoder already finished"))?;
        stdin.write_all(raw)?;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
        }
        // Drain stderr before waiting or a full pipe stalls the encoder.
        let mut stderr = String::new();
        if let Some(mut pipe) = self.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        let status = self.child.wait()?;
        if !status.success() {
            return Err(io::Error::other(format!("intermediate encoder exited with {}: {}", status, stderr.trim())).into());
        }
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.wait();
    }
}

/// [`MediaBackend`] that shells out to ffmpeg and ffprobe.
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    config: FfmpegConfig,
}

impl FfmpegBackend {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }
}

impl MediaBackend for FfmpegBackend {
    type Source = FfmpegSource;
    type Sink = FfmpegSink;

    fn open_source(&self, input: &Path) -> Result<FfmpegSource> {
        FfmpegSource::open(&self.config, input)
    }

    fn open_sink(&self, path: &Path, spec: &SinkSpec) -> Result<FfmpegSink> {
        FfmpegSink::spawn(self.config.ffmpeg_cmd(), path, spec)
    }

    fn run_tool(&self, invocation: &ToolInvocation) -> Result<ToolOutcome> {
        debug!("running: {} {}", self.config.ffmpeg_cmd(), display_args(&invocation.args));
        let output = Command::new(self.config.ffmpeg_cmd())
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::ToolMissing(format!("cannot run {}: {}", self.config.ffmpeg_cmd(), e)),
                _ => Error::Io(e),
            })?;
        Ok(ToolOutcome {
            success: output.status.success(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn parses_fractional_and_plain_frame_rates() {
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn parses_probe_json() {
        let json = r#"{
            "programs": [],
            "streams": [
                {"codec_type": "audio", "r_frame_rate": "0/0", "avg_frame_rate": "0/0"},
                {"codec_type": "video", "width": 640, "height": 360,
                 "r_frame_rate": "24/1", "avg_frame_rate": "24/1", "nb_frames": "48"}
            ]
        }"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(
            info,
            VideoInfo { width: 640, height: 360, fps: 24.0, frame_count: 48, has_audio: true }
        );
    }

    #[test]
    fn probe_without_frame_count_or_audio() {
        let json = r#"{"streams": [{"codec_type": "video", "width": 4, "height": 2, "r_frame_rate": "0/0", "avg_frame_rate": "10/1"}]}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(info.fps, 10.0);
        assert_eq!(info.frame_count, 0);
        assert!(!info.has_audio);
    }

    #[test]
    fn probe_skips_cover_art() {
        let json = r#"{"streams": [
            {"codec_type": "video", "width": 600, "height": 600, "r_frame_rate": "90000/1",
             "disposition": {"default": 0, "attached_pic": 1}},
            {"codec_type": "video", "width": 1920, "height": 1080, "r_frame_rate": "25/1",
             "disposition": {"default": 1, "attached_pic": 0}}
        ]}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.fps, 25.0);
    }

    #[test]
    fn decoder_reads_the_probed_stream() {
        let args = strings(&decode_args(Path::new("in.mp4")));
        assert!(args.windows(2).any(|w| w == ["-map", "0:V:0"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "bgr24"]));
        assert_eq!(args.last().unwrap(), "-");
    }

    #[test]
    fn probe_requires_a_video_stream() {
        let json = r#"{"streams": [{"codec_type": "audio"}]}"#;
        assert_eq!(parse_probe(json).unwrap_err(), "no video stream");
    }

    #[test]
    fn missing_input_is_a_source_open_error() {
        let err = probe(&FfmpegConfig::default(), Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert!(matches!(err, Error::SourceOpen { .. }));
    }

    #[test]
    fn encode_without_audio() {
        let args = encode_args(Path::new("/tmp/i.mkv"), None, Path::new("out.mp4"), &EncodeSettings::default());
        let args = strings(&args);
        assert_eq!(&args[4..6], ["-i", "/tmp/i.mkv"]);
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-crf", "23"]));
        assert!(!args.iter().any(|a| a == "-map"));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn encode_with_audio_maps_both_inputs() {
        let args = encode_args(
            Path::new("/tmp/i.mkv"),
            Some(Path::new("/tmp/a.mka")),
            Path::new("out.mp4"),
            &EncodeSettings::default(),
        );
        let args = strings(&args);
        assert!(args.windows(2).any(|w| w == ["-i", "/tmp/a.mka"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "copy"]));
        assert!(args.windows(2).any(|w| w == ["-map", "0:v:0"]));
        assert!(args.windows(2).any(|w| w == ["-map", "1:a:0"]));
    }

    #[test]
    fn audio_extraction_copies_without_video() {
        let args = strings(&extract_audio_args(Path::new("in.mp4"), Path::new("/tmp/a.mka")));
        assert!(args.windows(3).any(|w| w == ["-vn", "-acodec", "copy"]));
        assert_eq!(args.last().unwrap(), "/tmp/a.mka");
    }

    #[test]
    fn intermediate_declares_canvas_geometry() {
        let spec = SinkSpec { width: 14, height: 12, fps: 30.0 };
        let args = strings(&intermediate_args(&spec, Path::new("/tmp/i.mkv")));
        assert!(args.windows(2).any(|w| w == ["-s:v", "14x12"]));
        assert!(args.windows(2).any(|w| w == ["-r", "30"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
    }

    #[cfg(unix)]
    #[test]
    fn finish_reports_a_failed_encoder_with_heavy_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-ffmpeg");
        std::fs::write(
            &fake,
            "#!/bin/sh\ncat > /dev/null\nhead -c 200000 /dev/zero | tr '\\0' x >&2\nexit 3\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let spec = SinkSpec { width: 2, height: 1, fps: 1.0 };
        let mut sink = FfmpegSink::spawn(fake.to_str().unwrap(), &dir.path().join("i.mkv"), &spec).unwrap();
        sink.write_frame(&RgbImage::new(2, 1)).unwrap();
        let err = sink.finish().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("xxxxxxxx"));
    }
}
