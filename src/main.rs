//! gonogo - Real-time go/no-go visual inspection
//!
//! Calibrate a reference template and inspection regions on a scene, then
//! continuously re-detect the template in incoming frames, align each frame
//! to it, and verify every region to produce an aggregate OK/NG.

mod capture;
mod config;
mod geometry;
mod pipeline;
mod program;
mod session;
mod storage;
mod vision;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::capture::ImageSequenceSource;
use crate::config::AppConfig;
use crate::geometry::DragRect;
use crate::session::{InspectionSession, RoiSpec, SessionCommand};
use crate::vision::VisionStack;

/// gonogo - template alignment and region verification
#[derive(Parser, Debug)]
#[command(name = "gonogo")]
#[command(about = "Real-time go/no-go visual inspection over camera frames")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calibrate a program from a reference frame and save it
    Calibrate {
        /// Reference frame image
        #[arg(long)]
        image: PathBuf,
        /// Template rectangle in frame coordinates: x,y,w,h
        #[arg(long, value_parser = parse_rect)]
        template: DragRect,
        /// Inspection region: template:x,y,w,h[:threshold] or
        /// barcode:x,y,w,h[:expected-text]
        #[arg(long = "roi", value_parser = parse_roi)]
        rois: Vec<RoiArg>,
        /// Where to write the program document
        #[arg(long)]
        out: PathBuf,
        /// Also write the cropped template image, needed later by `run`
        #[arg(long)]
        reference_out: Option<PathBuf>,
    },
    /// Run the inspection loop over frame images
    Run {
        /// Program document to load
        #[arg(long)]
        program: PathBuf,
        /// Reference template image saved at calibration time
        #[arg(long)]
        reference: PathBuf,
        /// Stop after this many ticks (default: run until interrupted)
        #[arg(long)]
        ticks: Option<u64>,
        /// Frame images, cycled in order
        frames: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone)]
struct RoiArg {
    rect: DragRect,
    spec: RoiSpec,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_or_create_config();

    match args.command {
        Command::Calibrate {
            image,
            template,
            rois,
            out,
            reference_out,
        } => calibrate(&config, image, template, rois, out, reference_out),
        Command::Run {
            program,
            reference,
            ticks,
            frames,
        } => run(&config, program, reference, ticks, frames).await,
    }
}

/// Load configuration from the config directory or fall back to defaults.
fn load_or_create_config() -> AppConfig {
    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn calibrate(
    config: &AppConfig,
    image: PathBuf,
    template: DragRect,
    rois: Vec<RoiArg>,
    out: PathBuf,
    reference_out: Option<PathBuf>,
) -> Result<()> {
    let frame = image::open(&image)
        .with_context(|| format!("failed to load reference frame {}", image.display()))?
        .to_luma8();

    let source = ImageSequenceSource::from_images(vec![frame.clone()])?;
    let mut session = InspectionSession::new(Box::new(source), VisionStack::builtin());

    session.define_template(&frame, template)?;
    for roi in rois {
        let spec = match roi.spec {
            // Fill the threshold from config when the CLI left it at 0.
            RoiSpec::Template { ok_threshold } if ok_threshold <= 0.0 => RoiSpec::Template {
                ok_threshold: config.pipeline.ok_threshold,
            },
            spec => spec,
        };
        session.add_roi(roi.rect, spec)?;
    }

    session.save_program_to(&out)?;

    if let Some(reference_path) = reference_out {
        let rect = template.to_pixel_rect();
        let crop = image::imageops::crop_imm(&frame, rect.x, rect.y, rect.w, rect.h).to_image();
        crop.save(&reference_path)
            .with_context(|| format!("failed to write {}", reference_path.display()))?;
        info!("Reference template written to {:?}", reference_path);
    }

    info!("Calibration complete: {:?}", out);
    Ok(())
}

async fn run(
    config: &AppConfig,
    program: PathBuf,
    reference: PathBuf,
    ticks: Option<u64>,
    frames: Vec<PathBuf>,
) -> Result<()> {
    // A missing frame source is fatal to the whole session.
    let source = ImageSequenceSource::from_paths(&frames)
        .context("frame source unavailable, cannot start inspection")?;
    let mut session = InspectionSession::new(Box::new(source), VisionStack::builtin());

    session
        .load_program_from(&program)
        .with_context(|| format!("failed to load program {}", program.display()))?;

    let reference_image = image::open(&reference)
        .with_context(|| format!("failed to load reference template {}", reference.display()))?
        .to_luma8();
    session.attach_reference(reference_image)?;

    if config.capture.start_frozen {
        session.freeze(true);
    }
    session.set_running(true);

    let (command_tx, command_rx) = crossbeam_channel::unbounded::<SessionCommand>();
    forward_interrupt(command_tx);

    info!("Inspection running (tick period {} ms)", config.capture.tick_ms);
    session
        .run(
            command_rx,
            Duration::from_millis(config.capture.tick_ms),
            ticks,
        )
        .await
}

/// Translate Ctrl-C into a session shutdown command.
fn forward_interrupt(command_tx: crossbeam_channel::Sender<SessionCommand>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = command_tx.send(SessionCommand::Shutdown);
        }
    });
}

fn parse_rect(s: &str) -> Result<DragRect, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return Err(format!("expected x,y,w,h, got {s:?}"));
    }
    let mut vals = [0.0f32; 4];
    for (slot, part) in vals.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| format!("invalid number {part:?}"))?;
    }
    Ok(DragRect {
        x: vals[0],
        y: vals[1],
        w: vals[2],
        h: vals[3],
    })
}

fn parse_roi(s: &str) -> Result<RoiArg, String> {
    let mut parts = s.splitn(3, ':');
    let kind = parts.next().unwrap_or_default();
    let rect = parse_rect(parts.next().ok_or("missing rectangle")?)?;
    let extra = parts.next();

    let spec = match kind {
        "template" => {
            let ok_threshold = match extra {
                Some(v) => v
                    .parse()
                    .map_err(|_| format!("invalid threshold {v:?}"))?,
                None => 0.0, // resolved against config at calibration
            };
            RoiSpec::Template { ok_threshold }
        }
        "barcode" => RoiSpec::Barcode {
            symbologies: vision::default_symbologies(),
            expected_text: extra.unwrap_or_default().to_string(),
        },
        other => return Err(format!("unknown ROI kind {other:?}, use template or barcode")),
    };

    Ok(RoiArg { rect, spec })
}
