use anyhow::{Context, Result};
use clap::Parser;
use dashmap::DashMap;
use env_logger::Builder;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn, LevelFilter};
use minimp4::Mp4Muxer;
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate};
use openh264::formats::YUVBuffer;
use particle_life_common::{Snapshot, SnapshotReader};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::PathBuf;
use std::time::Instant;

mod render;

use render::{draw_frame, parse_color, rgb_to_yuv420, FrameSettings, TypePalette};

/// Command-line arguments for the visualizer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input snapshot stream (.bin, written with output.format = "bincode")
    #[arg(short, long)]
    input: PathBuf,

    /// Output video file path (.mp4)
    #[arg(short, long, default_value = "particle_life.mp4")]
    output: PathBuf,

    /// Width of the output video in pixels
    #[arg(long, default_value_t = 1024)]
    width: u32,

    /// Height of the output video in pixels (from the domain aspect ratio if not provided)
    #[arg(long)]
    height: Option<u32>,

    /// Frames per second for the output video
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Radius of each particle dot in pixels
    #[arg(long, default_value_t = 2)]
    particle_radius_px: i32,

    /// Background color name
    #[arg(long, default_value = "black")]
    bg_color: String,

    /// Number of snapshots rendered in parallel before encoding
    #[arg(long, default_value_t = 32)]
    chunk_size: usize,
}

/// H.264 needs even frame dimensions.
fn even(v: u32) -> u32 {
    (v.max(2) + 1) & !1
}

fn main() -> Result<()> {
    let args = Args::parse();

    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    run_with_args(args)
}

fn run_with_args(args: Args) -> Result<()> {
    info!("Starting Particle Life Visualizer...");
    info!("Input file: {}", args.input.display());
    info!("Output video: {}", args.output.display());

    let input_file = File::open(&args.input)
        .with_context(|| format!("Failed to open input file: {}", args.input.display()))?;
    let mut reader = SnapshotReader::new(BufReader::new(input_file))?;
    let snapshot_count = reader.len();
    info!("Found {} snapshots in the file", snapshot_count);
    if reader.is_empty() {
        warn!("Input file contains no snapshots. Exiting.");
        return Ok(());
    }

    // The first snapshot fixes the domain and the palette.
    let first: Snapshot = reader.next().context("Snapshot stream ended early")??;
    if first.positions.is_none() {
        warn!("Snapshots carry no positions (save_positions_in_snapshot = false); the video will be blank.");
    }
    let aspect_ratio = first.domain_width / first.domain_height;
    let width = even(args.width);
    let height = even(args.height.unwrap_or_else(|| (args.width as f32 / aspect_ratio) as u32));
    let settings = FrameSettings {
        width,
        height,
        particle_radius_px: args.particle_radius_px.max(0),
        bg_color: parse_color(&args.bg_color),
    };
    let palette = TypePalette::new(first.num_types);
    info!(
        "Domain {:.1} x {:.1}, {} types, video {}x{} px @ {} fps",
        first.domain_width, first.domain_height, palette.len(), width, height, args.fps
    );

    let progress_bar = ProgressBar::new(snapshot_count as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({percent}%) [{eta}]")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );

    let mut encoder = Encoder::with_api_config(
        openh264::OpenH264API::from_source(),
        EncoderConfig::new()
            .max_frame_rate(FrameRate::from_hz(args.fps as f32))
            .bitrate(BitRate::from_bps(5_000_000)),
    )
    .context("Failed to initialize H.264 encoder")?;

    let start_time = Instant::now();
    let mut h264_data = Vec::new();
    let mut frame_count = 0usize;
    let mut pending = vec![first];
    let chunk_size = args.chunk_size.max(1);
    let frames_map: DashMap<usize, Vec<u8>> = DashMap::new();

    loop {
        // Fill the next chunk from the stream.
        let mut stream_done = false;
        while pending.len() < chunk_size {
            match reader.next() {
                Some(Ok(snapshot)) => pending.push(snapshot),
                Some(Err(e)) => {
                    error!("Error deserializing snapshot {}: {}", frame_count + pending.len(), e);
                    stream_done = true;
                    break;
                }
                None => {
                    stream_done = true;
                    break;
                }
            }
        }
        if pending.is_empty() {
            break;
        }

        // Render and convert in parallel, then encode in order.
        pending.par_iter().enumerate().for_each(|(i, snapshot)| {
            let image = draw_frame(snapshot, &settings, &palette);
            frames_map.insert(i, rgb_to_yuv420(&image));
            progress_bar.inc(1);
        });
        for i in 0..pending.len() {
            let Some((_, yuv_data)) = frames_map.remove(&i) else {
                continue;
            };
            let yuv_source = YUVBuffer::from_vec(yuv_data, width as usize, height as usize);
            match encoder.encode(&yuv_source) {
                Ok(bitstream) => {
                    bitstream.write_vec(&mut h264_data);
                    frame_count += 1;
                }
                Err(e) => error!("Error encoding frame {}: {}", frame_count, e),
            }
        }
        pending.clear();
        if stream_done {
            break;
        }
    }
    progress_bar.finish_with_message(format!("Rendered {} frames", frame_count));

    if (frame_count as u32) < snapshot_count {
        warn!("Only {} of {} snapshots became frames.", frame_count, snapshot_count);
    }

    info!("Creating MP4 file...");
    let mut video_buffer = Cursor::new(Vec::new());
    {
        let mut mp4muxer = Mp4Muxer::new(&mut video_buffer);
        mp4muxer.init_video(width as i32, height as i32, false, "Particle life simulation");
        mp4muxer.write_video(&h264_data);
        mp4muxer.close();
    }

    std::fs::write(&args.output, video_buffer.into_inner())
        .with_context(|| format!("Failed to write video file to {}", args.output.display()))?;

    let duration = start_time.elapsed();
    info!(
        "Video generation completed in {:.2?} ({:.1} frames per second)",
        duration,
        frame_count as f64 / duration.as_secs_f64().max(1e-9)
    );
    info!("Output saved to: {}", args.output.display());
    Ok(())
}
