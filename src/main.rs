use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use termreel::encoding::FfmpegMode;
use termreel::logging::{self, Verbosity};
use termreel::pipeline::{prepare, render_video, Prepared, RenderOptions};
use termreel::scheduler::ScheduleSettings;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("TERMREEL_GIT_HASH"),
    ")"
);

#[derive(Debug, Parser)]
#[command(name = "termreel")]
#[command(version = VERSION)]
#[command(about = "Render scripted terminal sessions to video, frame by frame")]
struct Cli {
    /// Log debug details (commands, expansions, encoder setup).
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
    /// Only log warnings and errors.
    #[arg(short = 'q', long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a script without running any command or encoder.
    Check {
        script: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the scene summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Render a script to a video file.
    Render(RenderArgs),
}

#[derive(Debug, Args)]
struct RenderArgs {
    script: PathBuf,
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    fps: Option<u32>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Stage numbered PNG frames here before encoding.
    #[arg(long)]
    frames_dir: Option<PathBuf>,
    /// Keep staged PNG frames after encoding.
    #[arg(long)]
    keep_frames: bool,
    /// Stage PNG frames in a temporary directory instead of piping raw frames.
    #[arg(long)]
    png: bool,
    /// Painting threads.
    #[arg(long, default_value_t = default_jobs())]
    jobs: usize,
    /// Use the ffmpeg binary managed by ffmpeg-sidecar.
    #[arg(long)]
    sidecar: bool,
    /// Print a sha256 over every painted frame.
    #[arg(long)]
    digest: bool,
}

impl RenderArgs {
    /// CLI flags as the last config layer.
    fn overrides(&self) -> Value {
        let mut root = Mapping::new();
        for (key, value) in [("fps", self.fps), ("width", self.width), ("height", self.height)] {
            if let Some(value) = value {
                root.insert(key_of(key), Value::Number(u64::from(value).into()));
            }
        }

        let mut encoding = Mapping::new();
        if self.png || self.frames_dir.is_some() {
            encoding.insert(key_of("staging"), Value::String("png".to_owned()));
        }
        if self.keep_frames {
            encoding.insert(key_of("keep_frames"), Value::Bool(true));
        }
        if !encoding.is_empty() {
            root.insert(key_of("encoding"), Value::Mapping(encoding));
        }
        Value::Mapping(root)
    }
}

fn key_of(name: &str) -> Value {
    Value::String(name.to_owned())
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));

    match cli.command {
        Commands::Check {
            script,
            config,
            json,
        } => run_check(&script, config.as_deref(), json),
        Commands::Render(args) => run_render(&args),
    }
}

#[derive(Debug, Serialize)]
struct CheckReport {
    script: PathBuf,
    width: u32,
    height: u32,
    fps: u32,
    scenes: Vec<SceneReport>,
}

#[derive(Debug, Serialize)]
struct SceneReport {
    title: String,
    actions: usize,
    commands: usize,
    /// Exact when the scene runs no commands, a lower bound otherwise.
    estimated_ms: u64,
    estimated_frames: u64,
    exact: bool,
}

fn check_report(prepared: &Prepared) -> Result<CheckReport> {
    let settings = ScheduleSettings::from_config(&prepared.config)?;
    let scenes = prepared
        .scenes
        .iter()
        .map(|scene| {
            let estimated_ms = scene.estimated_duration_ms();
            SceneReport {
                title: scene.title().to_owned(),
                actions: scene.cues().len(),
                commands: scene.command_count(),
                estimated_ms,
                estimated_frames: settings.frames_for(estimated_ms),
                exact: scene.command_count() == 0
                    || matches!(scene.duration(), termreel::SceneDuration::Explicit(_)),
            }
        })
        .collect();
    Ok(CheckReport {
        script: prepared.script.path().to_path_buf(),
        width: prepared.config.width,
        height: prepared.config.height,
        fps: prepared.config.fps,
        scenes,
    })
}

fn run_check(script: &Path, config: Option<&Path>, json: bool) -> Result<()> {
    let prepared = prepare(script, config, Value::Mapping(Mapping::new()))?;
    let report = check_report(&prepared)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "OK: {} ({}x{}, {} fps, {} scene(s))",
        report.script.display(),
        report.width,
        report.height,
        report.fps,
        report.scenes.len()
    );
    for (index, scene) in report.scenes.iter().enumerate() {
        let bound = if scene.exact { "" } else { ">= " };
        println!(
            "  #{index} '{}': {} action(s), {} command(s), {bound}{} ms, {bound}{} frames",
            scene.title, scene.actions, scene.commands, scene.estimated_ms, scene.estimated_frames
        );
    }
    Ok(())
}

fn run_render(args: &RenderArgs) -> Result<()> {
    let prepared = prepare(&args.script, args.config.as_deref(), args.overrides())?;
    let options = RenderOptions {
        output: args.output.clone(),
        frames_dir: args.frames_dir.clone(),
        jobs: args.jobs,
        mode: if args.sidecar {
            FfmpegMode::Sidecar
        } else {
            FfmpegMode::System
        },
        digest: args.digest,
    };
    let summary = render_video(&prepared, &options)?;

    println!(
        "Wrote {} ({} frames, {} ms)",
        summary.output.display(),
        summary.frames_written,
        summary.reel.duration_ms()
    );
    if let Some(digest) = &summary.sequence_sha256 {
        println!("sequence sha256: {digest}");
    }
    Ok(())
}
