use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vidascii::{AppConfig, ProgressPhase, RenderOptions, RunSummary, VideoConverter, VideoOptions};

fn load_config() -> Result<AppConfig> {
    // Look for vidascii.json in the user config dir, current dir fallback, then built-in default
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(mut d) = dirs::config_dir() {
        d.push("vidascii");
        d.push("vidascii.json");
        tried.push(d);
    }
    tried.push(PathBuf::from("vidascii.json"));

    for p in &tried {
        if p.exists() {
            let cfg = AppConfig::from_file(p).with_context(|| format!("loading config {}", p.display()))?;
            info!("using config {}", p.display());
            return Ok(cfg);
        }
    }

    Ok(AppConfig::default())
}

#[derive(Parser, Debug)]
#[command(version, about = "Re-render a video as ASCII character art.")]
struct Args {
    /// Input video file
    input: PathBuf,

    /// Output video file
    #[arg(short, long, default_value = "output_ascii.mp4")]
    output: PathBuf,

    /// Width of the character grid in columns
    #[arg(long)]
    width: Option<u32>,

    /// Output frame rate (0 keeps the source rate)
    #[arg(long)]
    fps: Option<u32>,

    /// Glyph height in pixels
    #[arg(long)]
    font_size: Option<u32>,

    /// Brightness multiplier (1.0 leaves it unchanged)
    #[arg(long)]
    brightness: Option<f32>,

    /// Contrast multiplier (1.0 leaves it unchanged)
    #[arg(long)]
    contrast: Option<f32>,

    /// Ink each glyph with the color of its cell
    #[arg(long, default_value_t = false)]
    color: bool,

    /// TrueType font to render with
    #[arg(long)]
    font: Option<PathBuf>,

    /// Copy the source audio track into the output
    #[arg(long, default_value_t = false)]
    keep_audio: bool,

    /// Darken the edges of every frame
    #[arg(long, default_value_t = false)]
    vignette: bool,

    /// Use smaller default values for quality settings
    #[arg(long, short, default_value_t = false, conflicts_with = "large")]
    small: bool,

    /// Use larger default values for quality settings
    #[arg(long, short, default_value_t = false, conflicts_with = "small")]
    large: bool,

    /// Overwrite the output without asking
    #[arg(short = 'y', long = "yes", default_value_t = false)]
    yes: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Log details to standard output
    #[arg(long, default_value_t = false)]
    log_details: bool,
}

impl Args {
    fn render_options(&self, cfg: &AppConfig) -> Result<RenderOptions> {
        let preset_name = if self.small {
            "small"
        } else if self.large {
            "large"
        } else {
            cfg.default_preset.as_str()
        };
        let preset = cfg
            .presets
            .get(preset_name)
            .ok_or_else(|| anyhow!("Missing preset '{}' in config", preset_name))?;

        let font = self.font.clone().unwrap_or_else(|| cfg.font.clone());
        let mut opts = RenderOptions::from_preset(preset, Some(font))
            .with_color(self.color)
            .with_vignette(self.vignette);
        if let Some(width) = self.width {
            opts = opts.with_columns(width);
        }
        if let Some(font_size) = self.font_size {
            opts = opts.with_font_size(font_size);
        }
        if let Some(brightness) = self.brightness {
            opts = opts.with_brightness(brightness);
        }
        if let Some(contrast) = self.contrast {
            opts = opts.with_contrast(contrast);
        }
        opts.validate()?;
        Ok(opts)
    }

    fn video_options(&self) -> VideoOptions {
        VideoOptions::default()
            .with_fps(self.fps.unwrap_or(0))
            .with_keep_audio(self.keep_audio)
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn frame_bar(total: usize) -> ProgressBar {
    let pb = if total > 0 {
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    } else {
        ProgressBar::new_spinner()
    };
    pb.set_message("Rendering frames");
    pb
}

/// Ask before clobbering an existing output. Returns false if the user declined.
fn confirm_overwrite(args: &Args) -> Result<bool> {
    if args.yes || !args.output.exists() {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        warn!("{} already exists and will be overwritten", args.output.display());
        return Ok(true);
    }
    let confirmed = Confirm::new()
        .with_prompt(format!("Output file {} already exists. Overwrite?", args.output.display()))
        .default(false)
        .interact()?;
    Ok(confirmed)
}

fn details(summary: &RunSummary, render: &RenderOptions) -> String {
    format!(
        "Version: {}\nFrames: {}\nCanvas: {}x{}\nFPS: {}\nFont: {}\nColumns: {}\nFont Size: {}\nBrightness: {}\nContrast: {}\nColor: {}",
        env!("CARGO_PKG_VERSION"),
        summary.frames_written,
        summary.canvas_width,
        summary.canvas_height,
        summary.fps,
        summary.font,
        render.columns,
        render.font_size,
        render.brightness,
        render.contrast,
        render.color
    )
}

fn run(args: Args) -> Result<()> {
    if !args.input.is_file() {
        return Err(anyhow!("Input file {} does not exist", args.input.display()));
    }

    let cfg = load_config()?;
    let render = args.render_options(&cfg)?;
    let video = args.video_options();
    let converter = VideoConverter::with_config(cfg)?;

    if !confirm_overwrite(&args)? {
        println!("Operation cancelled.");
        return Ok(());
    }

    let mut bar: Option<ProgressBar> = None;
    let result = converter.convert_with_progress(&args.input, &args.output, &render, &video, |progress| {
        match progress.phase {
            ProgressPhase::RenderingFrames => {
                let pb = bar.get_or_insert_with(|| frame_bar(progress.total));
                pb.set_position(progress.completed as u64);
            }
            _ => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message("Frames rendered");
                }
            }
        }
    });
    if let Some(pb) = bar.take() {
        pb.abandon();
    }
    let summary = result.with_context(|| format!("converting {}", args.input.display()))?;

    println!("\nASCII video saved to {}", summary.output.display());
    if args.log_details {
        println!("\n--- Generation Details ---");
        println!("{}", details(&summary, &render));
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_defaults() {
        let args = Args::try_parse_from(["vidascii", "in.mp4"]).unwrap();
        assert_eq!(args.input, PathBuf::from("in.mp4"));
        assert_eq!(args.output, PathBuf::from("output_ascii.mp4"));
        assert!(args.width.is_none());
        assert!(!args.color && !args.keep_audio && !args.yes);
        assert_eq!(args.video_options(), VideoOptions::default());
    }

    #[test]
    fn flags_override_the_preset() {
        let args = Args::try_parse_from([
            "vidascii", "in.mp4", "-o", "out.mp4", "--width", "80", "--font-size", "10",
            "--contrast", "2.0", "--color", "--keep-audio", "--fps", "15",
        ])
        .unwrap();
        let opts = args.render_options(&AppConfig::default()).unwrap();
        assert_eq!(opts.columns, 80);
        assert_eq!(opts.font_size, 10);
        assert_eq!(opts.contrast, 2.0);
        assert_eq!(opts.brightness, 1.0);
        assert!(opts.color);
        let video = args.video_options();
        assert_eq!(video.fps, 15);
        assert!(video.keep_audio);
    }

    #[test]
    fn size_presets_are_exclusive() {
        assert!(Args::try_parse_from(["vidascii", "in.mp4", "--small", "--large"]).is_err());
        let args = Args::try_parse_from(["vidascii", "in.mp4", "--large"]).unwrap();
        let opts = args.render_options(&AppConfig::default()).unwrap();
        assert_eq!(opts.columns, 200);
        assert_eq!(opts.font_size, 14);
    }

    #[test]
    fn zero_width_is_rejected() {
        let args = Args::try_parse_from(["vidascii", "in.mp4", "--width", "0"]).unwrap();
        assert!(args.render_options(&AppConfig::default()).is_err());
    }

    #[test]
    fn input_is_required() {
        assert!(Args::try_parse_from(["vidascii"]).is_err());
    }
}
