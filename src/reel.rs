//! Scene sequencing: scenes play back to back on one global frame counter.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::command::CommandRunner;
use crate::scene::Scene;
use crate::scheduler::{Frame, SceneRun, ScheduleSettings};

/// Global frame index shared by every scene of a reel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounter {
    next: u64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_index(&self) -> u64 {
        self.next
    }

    pub fn advance(&mut self, frames: u64) {
        self.next = self.next.saturating_add(frames);
    }
}

/// Receives frames in emission order.
pub trait FrameSink {
    fn accept(&mut self, frame: Frame) -> Result<()>;
}

impl FrameSink for Vec<Frame> {
    fn accept(&mut self, frame: Frame) -> Result<()> {
        self.push(frame);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneSummary {
    pub title: String,
    pub first_frame: u64,
    pub frames: u64,
    pub duration_ms: u64,
    pub commands_run: usize,
    pub truncated_actions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReelSummary {
    pub fps: u32,
    pub total_frames: u64,
    pub scenes: Vec<SceneSummary>,
}

impl ReelSummary {
    pub fn duration_ms(&self) -> u64 {
        self.scenes.iter().map(|scene| scene.duration_ms).sum()
    }
}

/// Plays every scene in order, streaming frames into `sink`. Frame indices are
/// contiguous across scene boundaries.
pub fn compose(
    scenes: &[Scene],
    settings: &ScheduleSettings,
    runner: &mut dyn CommandRunner,
    sink: &mut dyn FrameSink,
) -> Result<ReelSummary> {
    let mut counter = FrameCounter::new();
    let mut summary = ReelSummary {
        fps: settings.fps,
        ..ReelSummary::default()
    };

    for (scene_index, scene) in scenes.iter().enumerate() {
        let first_frame = counter.next_index();
        let mut run = SceneRun::new(scene, scene_index, first_frame, settings);
        while let Some(frame) = run.next_frame(runner) {
            let index = frame.index;
            sink.accept(frame)
                .with_context(|| format!("frame sink rejected frame {index}"))?;
        }
        let outcome = run
            .outcome()
            .with_context(|| format!("scene '{}' stopped before completing", scene.title()))?;
        counter.advance(outcome.frames);

        summary.scenes.push(SceneSummary {
            title: scene.title().to_owned(),
            first_frame,
            frames: outcome.frames,
            duration_ms: outcome.duration_ms,
            commands_run: outcome.commands_run,
            truncated_actions: outcome.truncated,
        });
    }

    summary.total_frames = counter.next_index();
    info!(
        scenes = summary.scenes.len(),
        frames = summary.total_frames,
        duration_ms = summary.duration_ms(),
        "timeline composed"
    );
    Ok(summary)
}

/// Collects the whole reel in memory.
pub fn collect_frames(
    scenes: &[Scene],
    settings: &ScheduleSettings,
    runner: &mut dyn CommandRunner,
) -> Result<(Vec<Frame>, ReelSummary)> {
    let mut frames = Vec::new();
    let summary = compose(scenes, settings, runner, &mut frames)?;
    Ok((frames, summary))
}
