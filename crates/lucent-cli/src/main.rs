use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use lucent_engine::{Engine, EngineOptions, OneShotWhence, TimeMode};
use lucent_interface::Color;
use lucent_pipeline::{factory, AtomicRgbaImage, NullImageDisplay, PinholeCamera, StaticScene};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render(args) => execute_render(args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Headless driver for the Lucent frame pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for a fixed number of frames and report throughput.
    Render(RenderArgs),
}

#[derive(Args)]
struct RenderArgs {
    /// Optional session description (JSON); command-line flags override it.
    #[arg(long)]
    session: Option<PathBuf>,
    /// Worker thread count. Defaults to the number of CPUs.
    #[arg(long)]
    workers: Option<usize>,
    /// Stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,
    /// Resolution of the default channel as WIDTHxHEIGHT.
    #[arg(long, default_value = "512x384")]
    res: String,
    /// Image traverser spec.
    #[arg(long, default_value = "tiled(-tilesize 32)")]
    traverser: String,
    /// Load balancer spec.
    #[arg(long, default_value = "contiguous")]
    load_balancer: String,
    /// Pixel sampler spec.
    #[arg(long, default_value = "simple")]
    sampler: String,
    /// Renderer spec.
    #[arg(long, default_value = "flat")]
    renderer: String,
    /// Sample generator spec.
    #[arg(long, default_value = "uniform")]
    sample_generator: String,
    /// Shadow algorithm spec.
    #[arg(long, default_value = "noshadows")]
    shadows: String,
    /// Run animation time at a fixed frame rate instead of the wall clock.
    #[arg(long)]
    fps: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionSpec {
    #[serde(default)]
    workers: Option<usize>,
    #[serde(default)]
    frames: Option<u64>,
    #[serde(default)]
    fps: Option<f64>,
    #[serde(default)]
    background: Option<[f32; 3]>,
    #[serde(default)]
    channels: Vec<ChannelSpec>,
}

#[derive(Debug, Deserialize)]
struct ChannelSpec {
    xres: u32,
    yres: u32,
    #[serde(default)]
    stereo: bool,
}

fn execute_render(args: RenderArgs) -> Result<()> {
    let session = match &args.session {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("failed to read session file {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("{} is not a valid session file", path.display()))?
        }
        None => SessionSpec::default(),
    };

    let defaults = EngineOptions::default();
    let workers = args.workers.or(session.workers).unwrap_or(defaults.workers);
    let frames = args.frames.or(session.frames).unwrap_or(100);
    let time_mode = match args.fps.or(session.fps) {
        Some(fps) if fps > 0.0 => TimeMode::FixedRate { fps },
        Some(fps) => bail!("frame rate must be positive, got {fps}"),
        None => TimeMode::default(),
    };
    let background = session
        .background
        .map(|[r, g, b]| Color::new(r, g, b))
        .unwrap_or_else(|| Color::new(0.2, 0.3, 0.5));

    let engine = Engine::new(EngineOptions {
        workers,
        time_mode,
        ..EngineOptions::default()
    });
    engine.set_scene(Arc::new(StaticScene::new(background)));
    engine.set_image_traverser(factory::create_image_traverser(&args.traverser)?);
    engine.set_load_balancer(factory::create_load_balancer(&args.load_balancer)?);
    engine.set_pixel_sampler(factory::create_pixel_sampler(&args.sampler)?);
    engine.set_renderer(factory::create_renderer(&args.renderer)?);
    engine.set_sample_generator(factory::create_sample_generator(&args.sample_generator)?);
    engine.set_shadow_algorithm(factory::create_shadow_algorithm(&args.shadows)?);
    engine.set_create_image(Arc::new(|spec| Arc::new(AtomicRgbaImage::new(*spec))));

    let mut displays = Vec::new();
    if session.channels.is_empty() {
        let (xres, yres) = parse_resolution(&args.res)?;
        displays.push(create_channel(&engine, false, xres, yres)?);
    } else {
        for channel in &session.channels {
            displays.push(create_channel(
                &engine,
                channel.stereo,
                channel.xres,
                channel.yres,
            )?);
        }
    }

    let weak = Arc::downgrade(&engine);
    engine.add_one_shot_callback(OneShotWhence::Absolute, frames, move |_, _| {
        if let Some(engine) = weak.upgrade() {
            engine.finish();
        }
    });

    let started = std::time::Instant::now();
    tracing::info!(workers, frames, channels = displays.len(), "starting render");
    engine.begin_rendering(true)?;
    let elapsed = started.elapsed().as_secs_f64();

    println!(
        "Rendered {frames} frames on {workers} workers in {elapsed:.2}s ({:.1} fps)",
        frames as f64 / elapsed.max(f64::EPSILON)
    );
    for (index, display) in displays.iter().enumerate() {
        println!("  channel {index}: {} frames displayed", display.displayed());
    }
    Ok(())
}

fn create_channel(
    engine: &Arc<Engine>,
    stereo: bool,
    xres: u32,
    yres: u32,
) -> Result<Arc<NullImageDisplay>> {
    let display = Arc::new(NullImageDisplay::new());
    engine.create_channel(
        Arc::clone(&display) as Arc<dyn lucent_interface::ImageDisplay>,
        Arc::new(PinholeCamera::default()),
        stereo,
        xres,
        yres,
    )?;
    Ok(display)
}

fn parse_resolution(input: &str) -> Result<(u32, u32)> {
    let (xres, yres) = input
        .split_once(['x', 'X'])
        .with_context(|| format!("expected WIDTHxHEIGHT, got {input:?}"))?;
    let xres = xres
        .trim()
        .parse()
        .with_context(|| format!("bad width in {input:?}"))?;
    let yres = yres
        .trim()
        .parse()
        .with_context(|| format!("bad height in {input:?}"))?;
    Ok((xres, yres))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolutions_parse_with_either_separator_case() {
        assert_eq!(parse_resolution("512x384").unwrap(), (512, 384));
        assert_eq!(parse_resolution("64X48").unwrap(), (64, 48));
        assert!(parse_resolution("512").is_err());
        assert!(parse_resolution("wide x tall").is_err());
    }

    #[test]
    fn sessions_deserialize_with_defaults() {
        let spec: SessionSpec =
            serde_json::from_str(r#"{"frames": 10, "channels": [{"xres": 64, "yres": 48}]}"#)
                .unwrap();
        assert_eq!(spec.frames, Some(10));
        assert!(spec.workers.is_none());
        assert_eq!(spec.channels.len(), 1);
        assert!(!spec.channels[0].stereo);
    }
}
