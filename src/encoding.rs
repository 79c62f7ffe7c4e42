use std::fmt;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbaImage;
use tempfile::TempDir;
use tracing::info;

use crate::config::{RenderConfig, Staging};

pub const FRAME_PATTERN: &str = "frame_%05d.png";
const STDERR_TAIL_CHARS: usize = 500;

/// Stage of video assembly, named in every encoder error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStep {
    Spawn,
    WriteFrames,
    StageFrames,
    Finalize,
}

impl fmt::Display for EncodeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncodeStep::Spawn => "spawn ffmpeg",
            EncodeStep::WriteFrames => "write frames",
            EncodeStep::StageFrames => "stage png frames",
            EncodeStep::Finalize => "finalize video",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfmpegMode {
    System,
    Sidecar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crf: u8,
    pub preset: String,
    pub output_path: PathBuf,
}

impl EncodeSettings {
    pub fn new(config: &RenderConfig, output_path: &Path) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            crf: config.encoding.crf,
            preset: config.encoding.preset.clone(),
            output_path: output_path.to_path_buf(),
        }
    }

    fn size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn frame_bytes(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4)
    }
}

trait FfmpegBackend: Send {
    fn mode_label(&self) -> &'static str;
    fn ffmpeg_path(&self) -> Result<PathBuf>;
}

struct SystemFfmpegBackend;

#[cfg(feature = "sidecar_ffmpeg")]
struct SidecarFfmpegBackend;

impl FfmpegBackend for SystemFfmpegBackend {
    fn mode_label(&self) -> &'static str {
        "system"
    }

    fn ffmpeg_path(&self) -> Result<PathBuf> {
        Ok(PathBuf::from("ffmpeg"))
    }
}

#[cfg(feature = "sidecar_ffmpeg")]
impl FfmpegBackend for SidecarFfmpegBackend {
    fn mode_label(&self) -> &'static str {
        "sidecar"
    }

    fn ffmpeg_path(&self) -> Result<PathBuf> {
        let path = ffmpeg_sidecar::paths::ffmpeg_path();
        if !path.exists() {
            ffmpeg_sidecar::download::auto_download()
                .context("failed to auto-download ffmpeg sidecar binary")?;
        }
        Ok(path)
    }
}

fn select_backend(mode: FfmpegMode) -> Result<Box<dyn FfmpegBackend>> {
    match mode {
        FfmpegMode::System => Ok(Box::new(SystemFfmpegBackend)),
        FfmpegMode::Sidecar => {
            #[cfg(feature = "sidecar_ffmpeg")]
            {
                Ok(Box::new(SidecarFfmpegBackend))
            }
            #[cfg(not(feature = "sidecar_ffmpeg"))]
            {
                Err(anyhow!(
                    "ffmpeg sidecar mode requested but termreel was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`."
                ))
            }
        }
    }
}

/// Streams raw RGBA frames into ffmpeg from a dedicated writer thread.
pub struct FfmpegPipe {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
    frame_bytes: usize,
}

impl FfmpegPipe {
    pub fn spawn(settings: &EncodeSettings, mode: FfmpegMode) -> Result<Self> {
        let backend = select_backend(mode)?;
        let ffmpeg_path = backend
            .ffmpeg_path()
            .with_context(|| format!("encoder step '{}' failed", EncodeStep::Spawn))?;
        let mode_label = backend.mode_label();
        let args = pipe_args(settings);
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);

        let worker = thread::Builder::new()
            .name(format!("termreel-ffmpeg-{mode_label}"))
            .spawn(move || run_ffmpeg_process(&ffmpeg_path, &args, Some(receiver), mode_label))
            .context("failed to spawn ffmpeg writer thread")?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            frame_bytes: settings.frame_bytes(),
        })
    }

    pub fn write_frame(&mut self, rgba_frame: Vec<u8>) -> Result<()> {
        if rgba_frame.len() != self.frame_bytes {
            bail!(
                "frame size mismatch: expected {} bytes, got {}",
                self.frame_bytes,
                rgba_frame.len()
            );
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        if sender.send(rgba_frame).is_ok() {
            return Ok(());
        }

        // The worker hung up early; its own error says why.
        drop(self.sender.take());
        let worker_result = match self.worker.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(anyhow!("ffmpeg worker thread panicked"))),
            None => Ok(()),
        };
        worker_result?;
        Err(anyhow!(
            "encoder step '{}' failed: ffmpeg stopped accepting frames",
            EncodeStep::WriteFrames
        ))
    }

    pub fn finish(mut self) -> Result<()> {
        drop(self.sender.take());

        let handle = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("ffmpeg worker thread missing"))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("ffmpeg worker thread panicked")),
        }
    }
}

/// Writes numbered PNGs into a directory and encodes them in one ffmpeg run.
pub struct PngStage {
    dir: PathBuf,
    temp: Option<TempDir>,
    keep_frames: bool,
    written: u64,
    settings: EncodeSettings,
    mode: FfmpegMode,
}

impl PngStage {
    pub fn create(
        settings: &EncodeSettings,
        frames_dir: Option<&Path>,
        keep_frames: bool,
        mode: FfmpegMode,
    ) -> Result<Self> {
        let (dir, temp) = match frames_dir {
            Some(dir) => {
                fs::create_dir_all(dir).with_context(|| {
                    format!("failed to create frames directory '{}'", dir.display())
                })?;
                (dir.to_path_buf(), None)
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("termreel-frames-")
                    .tempdir()
                    .context("failed to create temporary frames directory")?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };
        Ok(Self {
            dir,
            temp,
            keep_frames,
            written: 0,
            settings: settings.clone(),
            mode,
        })
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index:05}.png"))
    }

    pub fn write_frame(&mut self, rgba_frame: Vec<u8>) -> Result<()> {
        let path = self.frame_path(self.written);
        let image = RgbaImage::from_raw(self.settings.width, self.settings.height, rgba_frame)
            .ok_or_else(|| {
                anyhow!(
                    "encoder step '{}' failed: frame {} does not match {}",
                    EncodeStep::StageFrames,
                    self.written,
                    self.settings.size()
                )
            })?;
        image.save(&path).with_context(|| {
            format!(
                "encoder step '{}' failed writing '{}'",
                EncodeStep::StageFrames,
                path.display()
            )
        })?;
        self.written += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        if self.written == 0 {
            bail!("encoder step '{}' failed: no frames were staged", EncodeStep::Finalize);
        }
        let backend = select_backend(self.mode)?;
        let ffmpeg_path = backend
            .ffmpeg_path()
            .with_context(|| format!("encoder step '{}' failed", EncodeStep::Spawn))?;
        let args = png_sequence_args(&self.settings, &self.dir);
        run_ffmpeg_process(&ffmpeg_path, &args, None, backend.mode_label())?;

        match self.temp {
            Some(temp) if self.keep_frames => {
                let kept = temp.keep();
                info!(dir = %kept.display(), frames = self.written, "kept staged frames");
            }
            Some(temp) => temp
                .close()
                .context("failed to remove temporary frames directory")?,
            None => {}
        }
        Ok(())
    }
}

/// Either assembly path behind one interface.
pub enum VideoAssembler {
    Pipe(FfmpegPipe),
    Png(PngStage),
}

impl VideoAssembler {
    pub fn open(
        config: &RenderConfig,
        output_path: &Path,
        frames_dir: Option<&Path>,
        mode: FfmpegMode,
    ) -> Result<Self> {
        check_output_path(output_path)?;
        let settings = EncodeSettings::new(config, output_path);
        match (config.encoding.staging, frames_dir) {
            (Staging::Pipe, None) => Ok(Self::Pipe(FfmpegPipe::spawn(&settings, mode)?)),
            (_, frames_dir) => Ok(Self::Png(PngStage::create(
                &settings,
                frames_dir,
                config.encoding.keep_frames,
                mode,
            )?)),
        }
    }

    pub fn write_frame(&mut self, rgba_frame: Vec<u8>) -> Result<()> {
        match self {
            VideoAssembler::Pipe(pipe) => pipe.write_frame(rgba_frame),
            VideoAssembler::Png(stage) => stage.write_frame(rgba_frame),
        }
    }

    pub fn finish(self) -> Result<()> {
        match self {
            VideoAssembler::Pipe(pipe) => pipe.finish(),
            VideoAssembler::Png(stage) => stage.finish(),
        }
    }
}

fn check_output_path(output_path: &Path) -> Result<()> {
    let path_str = output_path.to_string_lossy();
    if path_str.trim().is_empty() {
        bail!("output path is empty");
    }
    if path_str.chars().any(|c| c.is_control()) {
        bail!("output path contains control characters");
    }
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            bail!("output directory '{}' does not exist", parent.display());
        }
    }
    Ok(())
}

fn run_ffmpeg_process(
    ffmpeg_path: &Path,
    args: &[String],
    frames: Option<mpsc::Receiver<Vec<u8>>>,
    mode_label: &str,
) -> Result<()> {
    let mut command = Command::new(ffmpeg_path);
    command
        .args(args.iter().map(String::as_str))
        .stdin(if frames.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = command.spawn().map_err(|error| {
        if error.kind() == ErrorKind::NotFound {
            anyhow!(
                "encoder step '{}' failed: ffmpeg executable not found (mode={mode_label}, resolved_path={}). Install ffmpeg or build with `--features sidecar_ffmpeg` and pass --sidecar.",
                EncodeStep::Spawn,
                ffmpeg_path.display()
            )
        } else {
            anyhow!(
                "encoder step '{}' failed (mode={mode_label}, resolved_path={}, args='{}'): {error}",
                EncodeStep::Spawn,
                ffmpeg_path.display(),
                args.join(" ")
            )
        }
    })?;

    // Drain stderr concurrently so a chatty ffmpeg cannot block on a full pipe.
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let mut write_error = None;
    let mut frames_written = 0_u64;
    if let Some(receiver) = frames {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
        while let Ok(frame) = receiver.recv() {
            if let Err(error) = stdin.write_all(&frame) {
                write_error = Some(error);
                break;
            }
            frames_written += 1;
        }
        if write_error.is_none() {
            if let Err(error) = stdin.flush() {
                write_error = Some(error);
            }
        }
        drop(stdin);
    }

    let status = child.wait().with_context(|| {
        format!("encoder step '{}' failed waiting for ffmpeg", EncodeStep::Finalize)
    })?;
    let stderr_tail = stderr_reader
        .and_then(|reader| reader.join().ok())
        .map(|buf| last_n_chars(&String::from_utf8_lossy(&buf), STDERR_TAIL_CHARS))
        .unwrap_or_default();

    if let Some(error) = write_error {
        return Err(anyhow!(
            "encoder step '{}' failed after {frames_written} frame(s): {error} (ffmpeg exited with {status}, stderr_tail='{}')",
            EncodeStep::WriteFrames,
            stderr_tail
        ));
    }
    if !status.success() {
        return Err(anyhow!(
            "encoder step '{}' failed: ffmpeg exited with {status} (mode={mode_label}, resolved_path={}, args='{}', stderr_tail='{}')",
            EncodeStep::Finalize,
            ffmpeg_path.display(),
            args.join(" "),
            stderr_tail
        ));
    }

    info!(mode = mode_label, "ffmpeg finished");
    Ok(())
}

pub fn pipe_args(settings: &EncodeSettings) -> Vec<String> {
    let mut args = ffmpeg_rawvideo_input_args(&settings.size(), &settings.fps.to_string());
    args.extend(ffmpeg_output_args(settings));
    args
}

pub fn png_sequence_args(settings: &EncodeSettings, frames_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-framerate".to_owned(),
        settings.fps.to_string(),
        "-i".to_owned(),
        frames_dir.join(FRAME_PATTERN).to_string_lossy().into_owned(),
        "-an".to_owned(),
    ];
    args.extend(ffmpeg_output_args(settings));
    args
}

pub fn ffmpeg_rawvideo_input_args(size: &str, fps: &str) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-s:v".to_owned(),
        size.to_owned(),
        "-r".to_owned(),
        fps.to_owned(),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
    ]
}

/// Codec flags chosen by the output container, followed by the output path.
pub fn ffmpeg_output_args(settings: &EncodeSettings) -> Vec<String> {
    let ext = settings
        .output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut args = if ext == "mov" {
        vec![
            "-c:v".to_owned(),
            "prores_ks".to_owned(),
            "-profile:v".to_owned(),
            "4444".to_owned(),
            "-pix_fmt".to_owned(),
            "yuva444p10le".to_owned(),
        ]
    } else {
        vec![
            "-c:v".to_owned(),
            "libx264".to_owned(),
            "-pix_fmt".to_owned(),
            "yuv420p".to_owned(),
            "-crf".to_owned(),
            settings.crf.to_string(),
            "-preset".to_owned(),
            settings.preset.clone(),
            "-movflags".to_owned(),
            "+faststart".to_owned(),
        ]
    };
    args.push(settings.output_path.to_string_lossy().into_owned());
    args
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars().collect::<Vec<_>>();
    if chars.len() > max_chars {
        chars = chars[chars.len().saturating_sub(max_chars)..].to_vec();
    }
    chars.into_iter().collect::<String>().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(output: &str) -> EncodeSettings {
        EncodeSettings::new(&RenderConfig::default(), Path::new(output))
    }

    #[test]
    fn mp4_uses_x264_with_faststart() {
        let args = pipe_args(&settings("out/demo.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s:v 720x420 -r 30 -i -"));
        assert!(joined.contains("-c:v libx264 -pix_fmt yuv420p -crf 23 -preset medium"));
        assert!(joined.contains("-movflags +faststart"));
        assert_eq!(args.last().map(String::as_str), Some("out/demo.mp4"));
    }

    #[test]
    fn mov_uses_prores_4444() {
        let joined = pipe_args(&settings("clip.MOV")).join(" ");
        assert!(joined.contains("-c:v prores_ks -profile:v 4444"));
        assert!(!joined.contains("libx264"));
    }

    #[test]
    fn png_sequence_reads_numbered_frames() {
        let args = png_sequence_args(&settings("demo.mp4"), Path::new("/tmp/frames"));
        let joined = args.join(" ");
        assert!(joined.contains("-framerate 30 -i /tmp/frames/frame_%05d.png"));
        assert!(!joined.contains("rawvideo"));
    }

    #[test]
    fn staged_frames_are_numbered_pngs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RenderConfig {
            width: 4,
            height: 2,
            ..RenderConfig::default()
        };
        let settings = EncodeSettings::new(&config, Path::new("demo.mp4"));
        let mut stage =
            PngStage::create(&settings, Some(dir.path()), false, FfmpegMode::System)
                .expect("stage");
        stage.write_frame(vec![255; 4 * 2 * 4]).expect("frame 0");
        stage.write_frame(vec![0; 4 * 2 * 4]).expect("frame 1");

        assert!(dir.path().join("frame_00000.png").is_file());
        assert!(dir.path().join("frame_00001.png").is_file());
        assert!(stage.write_frame(vec![0; 3]).is_err());
    }

    #[test]
    fn step_names_are_readable() {
        assert_eq!(EncodeStep::WriteFrames.to_string(), "write frames");
        assert_eq!(EncodeStep::Finalize.to_string(), "finalize video");
    }

    #[test]
    fn output_path_checks() {
        assert!(check_output_path(Path::new("")).is_err());
        assert!(check_output_path(Path::new("bad\u{7}.mp4")).is_err());
        assert!(check_output_path(Path::new("/definitely/missing/dir/out.mp4")).is_err());
        assert!(check_output_path(Path::new("out.mp4")).is_ok());
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        assert_eq!(last_n_chars("abcdef", 3), "def");
        assert_eq!(last_n_chars("  ab \n", 10), "ab");
    }
}
