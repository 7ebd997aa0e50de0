use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use seekframe::{
    FfmpegLoader, FfmpegLogLevel, FrameOutputOptions, FrameReadyEvent, PixelFormat,
    PlaybackMode, RepositoryRegistry, seconds_to_microseconds,
};
use serde_json::json;
use tokio_stream::StreamExt;

const CLI_AFTER_HELP: &str = "Examples:\n  seekframe grab input.mp4 --at 5 --at 00:01 --at 3000000us --out frames\n  seekframe play input.mp4 --seconds 2 --json\n  seekframe completions zsh > _seekframe";

#[derive(Debug, Parser)]
#[command(
    name = "seekframe",
    version,
    about = "Frame-accurate seeking and playback over video files",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional output.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,

    /// Frame pixel format (rgb8, rgba8, gray8).
    #[arg(long)]
    pixel_format: Option<String>,

    /// Output frame width. The height follows the aspect ratio unless set.
    #[arg(long)]
    width: Option<u32>,

    /// Output frame height. The width follows the aspect ratio unless set.
    #[arg(long)]
    height: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Save the frames at several positions, seeking concurrently.
    #[command(
        about = "Grab frames at given positions",
        after_help = "Positions are timecodes (75, 01:15, 00:01:15.5) or microseconds with a `us` suffix.\n\nExamples:\n  seekframe grab input.mp4 --at 5 --at 1 --at 3 --out frames\n  seekframe grab input.mp4 --at 1500000us --out frames --ext jpg"
    )]
    Grab {
        /// Input video path.
        input: String,
        /// Position to grab; repeat for several frames.
        #[arg(long = "at", required = true)]
        at: Vec<String>,
        /// Output directory for the frame images.
        #[arg(long)]
        out: PathBuf,
        /// Output image extension (png, jpg, jpeg, bmp, tiff).
        #[arg(long, default_value = "png")]
        ext: String,
    },

    /// Play a video and print a line per rendered frame.
    #[command(
        about = "Play and report rendered frames",
        after_help = "Examples:\n  seekframe play input.mp4 --seconds 3\n  seekframe play input.mp4 --from 00:10 --seconds 1 --json"
    )]
    Play {
        /// Input video path.
        input: String,
        /// How long to play, in seconds.
        #[arg(long, default_value_t = 5.0)]
        seconds: f64,
        /// Position to start from.
        #[arg(long)]
        from: Option<String>,
        /// Print frame-ready events as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn parse_timecode(value: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("time value cannot be empty".into());
    }

    if let Ok(seconds) = trimmed.parse::<f64>() {
        return Ok(Duration::from_secs_f64(seconds.max(0.0)));
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("invalid time format: {trimmed}").into());
    }

    let (hours, minutes, seconds_str) = if parts.len() == 3 {
        (parts[0].parse::<u64>()?, parts[1].parse::<u64>()?, parts[2])
    } else {
        (0_u64, parts[0].parse::<u64>()?, parts[1])
    };

    let seconds = seconds_str.parse::<f64>()?;
    let total_seconds = (hours as f64 * 3600.0) + (minutes as f64 * 60.0) + seconds;
    Ok(Duration::from_secs_f64(total_seconds.max(0.0)))
}

/// Parse a position into microseconds: `<n>us` is taken verbatim, anything
/// else is a timecode.
fn parse_position(value: &str) -> Result<i64, Box<dyn std::error::Error>> {
    if let Some(microseconds) = value.trim().strip_suffix("us") {
        return Ok(microseconds.trim().parse::<i64>()?);
    }
    let timecode = parse_timecode(value)?;
    Ok(seconds_to_microseconds(timecode.as_secs_f64()))
}

fn parse_pixel_format(value: &str) -> Option<PixelFormat> {
    match value.to_ascii_lowercase().as_str() {
        "rgb8" | "rgb" => Some(PixelFormat::Rgb8),
        "rgba8" | "rgba" => Some(PixelFormat::Rgba8),
        "gray8" | "gray" | "greyscale" | "grayscale" => Some(PixelFormat::Gray8),
        _ => None,
    }
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn frame_output_options(
    global: &GlobalOptions,
) -> Result<FrameOutputOptions, Box<dyn std::error::Error>> {
    let mut options = FrameOutputOptions::new().with_resolution(global.width, global.height);

    if let Some(pixel_str) = &global.pixel_format {
        let pixel = parse_pixel_format(pixel_str)
            .ok_or(format!("unsupported --pixel-format: {pixel_str}"))?;
        options = options.with_pixel_format(pixel);
    }

    Ok(options)
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = &global.log_level {
        let parsed: FfmpegLogLevel = level.parse()?;
        seekframe::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

fn print_event(event: &FrameReadyEvent, as_json: bool) {
    if as_json {
        let payload = json!({
            "timestamp_us": event.timestamp_us,
            "now_ms": event.now.as_secs_f64() * 1000.0,
            "presented_frames": event.metadata.presented_frames,
            "width": event.metadata.width,
            "height": event.metadata.height,
        });
        println!("{payload}");
    } else {
        println!(
            "{} {} us (#{})",
            "frame".cyan().bold(),
            event.timestamp_us,
            event.metadata.presented_frames
        );
    }
}

async fn grab(
    global: &GlobalOptions,
    input: &str,
    at: &[String],
    out: &Path,
    ext: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let positions = at
        .iter()
        .map(|value| parse_position(value))
        .collect::<Result<Vec<_>, _>>()?;
    fs::create_dir_all(out)?;

    // Every requested frame must still be retrievable after the last seek.
    let loader = FfmpegLoader::new()
        .with_output(frame_output_options(global)?)
        .with_frame_history(positions.len());
    let registry = RepositoryRegistry::new(loader);
    let repository = registry.get_repository(input).await?;
    let source = repository.source()?;

    if global.verbose {
        let info = source.info();
        eprintln!(
            "opened {} ({}x{}, {:.3} fps, {} frames)",
            input, info.width, info.height, info.frames_per_second, info.frame_count
        );
    }

    let requests: Vec<_> = positions
        .iter()
        .map(|&position| (position, repository.get_image(position)))
        .collect();

    let progress_bar = if global.progress {
        let pb = ProgressBar::new(requests.len() as u64);
        let style =
            ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")?;
        pb.set_style(style.progress_chars("##-"));
        Some(pb)
    } else {
        None
    };

    let ext_clean = ext.trim_start_matches('.').to_ascii_lowercase();
    let mut saved = 0_u64;
    for (index, (requested, request)) in requests.into_iter().enumerate() {
        let event = request.await?;
        let image = source
            .frame_image(event.metadata.presented_frames)
            .ok_or("rendered frame is no longer available")?;

        let output_path = out.join(format!("frame_{index:03}_{}us.{ext_clean}", event.timestamp_us));
        ensure_writable_path(&output_path, global.overwrite)?;
        image.save(&output_path)?;
        saved += 1;

        if let Some(pb) = &progress_bar {
            pb.inc(1);
        }
        if global.verbose {
            eprintln!(
                "requested {requested} us, got {} us -> {}",
                event.timestamp_us,
                output_path.display()
            );
        }
    }

    if let Some(pb) = progress_bar {
        pb.finish_with_message("done");
    }
    registry.remove(input).await;

    println!(
        "{} {}",
        "success:".green().bold(),
        format!("Grabbed {saved} frame(s) to {}", out.display()).green()
    );
    Ok(())
}

async fn play(
    global: &GlobalOptions,
    input: &str,
    seconds: f64,
    from: Option<&str>,
    as_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("--seconds must be a non-negative number: {seconds}").into());
    }

    let loader = FfmpegLoader::new().with_output(frame_output_options(global)?);
    let registry = RepositoryRegistry::new(loader);
    let repository = registry.get_repository(input).await?;

    if let Some(from) = from {
        let position = parse_position(from)?;
        let event = repository.get_image(position).await?;
        if global.verbose {
            eprintln!("positioned at {} us", event.timestamp_us);
        }
    }

    let mut frames = repository.frame_stream();
    repository.play().await?;

    let deadline = tokio::time::sleep(Duration::from_secs_f64(seconds));
    tokio::pin!(deadline);
    let mut received = 0_u64;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = frames.next() => match event {
                Some(event) => {
                    received += 1;
                    print_event(&event, as_json);
                }
                None => break,
            },
        }
    }

    if repository.mode() == PlaybackMode::Playing {
        repository.stop().await?;
    }
    registry.remove(input).await;

    if !as_json {
        println!(
            "{} {}",
            "success:".green().bold(),
            format!("Received {received} frame(s)").green()
        );
    }
    Ok(())
}

async fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Grab {
            input,
            at,
            out,
            ext,
        } => grab(&cli.global, &input, &at, &out, &ext).await,
        Commands::Play {
            input,
            seconds,
            from,
            json,
        } => play(&cli.global, &input, seconds, from.as_deref(), json).await,
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "seekframe", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    runtime.block_on(run_command(cli))
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
