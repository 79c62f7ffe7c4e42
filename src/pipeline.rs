//! Script → scheduler → painter → assembler.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::command::{CommandRunner, ProcessRunner};
use crate::config::{read_config_layer, resolve_config, RenderConfig};
use crate::encoding::{FfmpegMode, VideoAssembler};
use crate::reel::{compose, FrameSink, ReelSummary};
use crate::render::TerminalPainter;
use crate::scene::Scene;
use crate::scheduler::{Frame, ScheduleSettings};
use crate::script::Script;

/// Frames painted per rayon batch for each worker thread.
const FRAMES_PER_JOB: usize = 4;

/// A script with its config layers resolved and scenes validated.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub script: Script,
    pub config: RenderConfig,
    pub scenes: Vec<Scene>,
}

/// Resolves `defaults < config file < script config block < overrides` and
/// builds the scenes. Runs no commands.
pub fn prepare(
    script_path: &Path,
    config_path: Option<&Path>,
    overrides: Value,
) -> Result<Prepared> {
    let script = Script::load(script_path)?;

    let mut layers = Vec::with_capacity(3);
    if let Some(path) = config_path {
        layers.push(read_config_layer(path)?);
    }
    if let Some(layer) = script.config_layer() {
        layers.push(layer.clone());
    }
    layers.push(overrides);
    let mut config = resolve_config(layers)
        .with_context(|| format!("invalid configuration for {}", script_path.display()))?;
    if config.command.cwd.is_none() {
        config.command.cwd = Some(script.base_dir());
    }

    let scenes = script.build_scenes(&config)?;
    debug!(scenes = scenes.len(), fps = config.fps, "script prepared");
    Ok(Prepared {
        script,
        config,
        scenes,
    })
}

/// Consumes painted rasters in frame order.
pub trait RasterWriter {
    fn write_raster(&mut self, index: u64, rgba: Vec<u8>) -> Result<()>;
}

impl RasterWriter for VideoAssembler {
    fn write_raster(&mut self, index: u64, rgba: Vec<u8>) -> Result<()> {
        self.write_frame(rgba)
            .with_context(|| format!("failed to encode frame {index}"))
    }
}

impl RasterWriter for Vec<Vec<u8>> {
    fn write_raster(&mut self, _index: u64, rgba: Vec<u8>) -> Result<()> {
        self.push(rgba);
        Ok(())
    }
}

/// Collects scheduled frames into batches, paints each batch in parallel and
/// hands the rasters on strictly in index order.
pub struct PaintingSink<'a, W: RasterWriter> {
    painter: &'a TerminalPainter,
    writer: &'a mut W,
    pool: rayon::ThreadPool,
    batch: Vec<Frame>,
    batch_size: usize,
    digest: Option<Sha256>,
    written: u64,
}

impl<'a, W: RasterWriter> PaintingSink<'a, W> {
    pub fn new(painter: &'a TerminalPainter, writer: &'a mut W, jobs: usize) -> Result<Self> {
        let jobs = jobs.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|index| format!("termreel-paint-{index}"))
            .build()
            .context("failed to build painting thread pool")?;
        Ok(Self {
            painter,
            writer,
            pool,
            batch: Vec::with_capacity(jobs * FRAMES_PER_JOB),
            batch_size: jobs * FRAMES_PER_JOB,
            digest: None,
            written: 0,
        })
    }

    /// Also hash every raster, in order, into one sequence digest.
    pub fn with_digest(mut self) -> Self {
        self.digest = Some(Sha256::new());
        self
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let painter = self.painter;
        let frames = std::mem::take(&mut self.batch);
        let rasters = self.pool.install(|| {
            frames
                .par_iter()
                .map(|frame| (frame.index, painter.render(frame)))
                .collect::<Vec<_>>()
        });
        for (index, raster) in rasters {
            if let Some(digest) = self.digest.as_mut() {
                digest.update(&raster);
            }
            self.writer.write_raster(index, raster)?;
            self.written += 1;
        }
        Ok(())
    }

    /// Flushes the tail batch; returns how many rasters were written and the
    /// sequence digest if one was requested.
    pub fn finish(mut self) -> Result<(u64, Option<String>)> {
        self.flush()?;
        let digest = self.digest.take().map(|digest| {
            digest
                .finalize()
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<String>()
        });
        Ok((self.written, digest))
    }
}

impl<W: RasterWriter> FrameSink for PaintingSink<'_, W> {
    fn accept(&mut self, frame: Frame) -> Result<()> {
        self.batch.push(frame);
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub output: PathBuf,
    pub frames_dir: Option<PathBuf>,
    pub jobs: usize,
    pub mode: FfmpegMode,
    pub digest: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderSummary {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub font: String,
    pub frames_written: u64,
    pub elapsed_ms: u64,
    pub sequence_sha256: Option<String>,
    pub reel: ReelSummary,
}

/// Paints every frame of `scenes` and writes them through `writer`.
pub fn paint_reel<W: RasterWriter>(
    scenes: &[Scene],
    settings: &ScheduleSettings,
    painter: &TerminalPainter,
    runner: &mut dyn CommandRunner,
    writer: &mut W,
    jobs: usize,
    digest: bool,
) -> Result<(ReelSummary, u64, Option<String>)> {
    let mut sink = PaintingSink::new(painter, writer, jobs)?;
    if digest {
        sink = sink.with_digest();
    }
    let reel = compose(scenes, settings, runner, &mut sink)?;
    let (written, sequence_digest) = sink.finish()?;
    Ok((reel, written, sequence_digest))
}

/// Full render of a prepared script to a video file.
pub fn render_video(prepared: &Prepared, options: &RenderOptions) -> Result<RenderSummary> {
    let started = Instant::now();
    let config = &prepared.config;
    let settings = ScheduleSettings::from_config(config)?;
    let painter = TerminalPainter::new(config)?;
    let mut runner = ProcessRunner::new(&config.command);

    info!(
        script = %prepared.script.path().display(),
        output = %options.output.display(),
        scenes = prepared.scenes.len(),
        fps = config.fps,
        font = %painter.origin().describe(),
        "rendering"
    );

    let mut assembler = VideoAssembler::open(
        config,
        &options.output,
        options.frames_dir.as_deref(),
        options.mode,
    )?;
    let (reel, frames_written, sequence_sha256) = paint_reel(
        &prepared.scenes,
        &settings,
        &painter,
        &mut runner,
        &mut assembler,
        options.jobs,
        options.digest,
    )?;
    assembler.finish()?;

    let summary = RenderSummary {
        output: options.output.clone(),
        width: config.width,
        height: config.height,
        font: painter.origin().describe(),
        frames_written,
        elapsed_ms: started.elapsed().as_millis() as u64,
        sequence_sha256,
        reel,
    };
    info!(
        output = %summary.output.display(),
        frames = summary.frames_written,
        duration_ms = summary.reel.duration_ms(),
        elapsed_ms = summary.elapsed_ms,
        "render complete"
    );
    Ok(summary)
}
