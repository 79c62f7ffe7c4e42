//! Fixed-rate timeline walk for a single scene.
//!
//! Cue times are relative: each cue is due `gap_ms` after the previous cue's
//! scheduled time plus that cue's hold. Expanding a `RunAndReveal` pushes its
//! output lines to the front of the queue, so everything scheduled after it
//! shifts by however long the real output takes to reveal. The total frame
//! count of a derived-duration scene is therefore only known once the queue is
//! empty; until then it is tracked as a lower bound that only grows.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::action::{Action, Cue, LineContent};
use crate::classify::LineClassifier;
use crate::command::CommandRunner;
use crate::config::RenderConfig;
use crate::scene::{Scene, SceneDuration};
use crate::terminal::TerminalBuffer;

/// Scheduler knobs shared by every scene of a reel.
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub fps: u32,
    pub line_delay_ms: u64,
    pub prompt: String,
    pub classifier: LineClassifier,
}

impl ScheduleSettings {
    pub fn new(fps: u32, line_delay_ms: u64) -> Self {
        Self {
            fps: fps.max(1),
            line_delay_ms,
            prompt: crate::terminal::DEFAULT_PROMPT.to_owned(),
            classifier: LineClassifier::default(),
        }
    }

    pub fn from_config(config: &RenderConfig) -> Result<Self> {
        Ok(Self {
            fps: config.fps.max(1),
            line_delay_ms: config.timing.line_delay_ms,
            prompt: config.prompt.clone(),
            classifier: config.command.classifier()?,
        })
    }

    /// Frames needed to cover `duration_ms`: `ceil(duration_ms * fps / 1000)`.
    pub fn frames_for(&self, duration_ms: u64) -> u64 {
        let scaled = duration_ms.saturating_mul(u64::from(self.fps));
        scaled / 1000 + u64::from(scaled % 1000 != 0)
    }

    /// True once `frame` has reached time `at_ms`.
    fn is_due(&self, at_ms: u64, frame: u64) -> bool {
        at_ms.saturating_mul(u64::from(self.fps)) <= frame.saturating_mul(1000)
    }
}

/// Whether the blinking cursor is lit on a given global frame. Depends only on
/// the frame counter so the blink never stutters when the buffer changes.
pub fn blink_on(global_frame: u64, fps: u32) -> bool {
    let half_period = u64::from((fps / 2).max(1));
    (global_frame / half_period) % 2 == 0
}

/// One emitted tick: the buffer as it stands after every action due by then.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the whole video.
    pub index: u64,
    pub scene_index: usize,
    /// Position within the scene, starting at 0.
    pub scene_frame: u64,
    /// Scene-local time of this tick, rounded down to whole milliseconds.
    pub time_ms: u64,
    pub snapshot: Arc<TerminalBuffer>,
    /// Cursor visibility after applying the blink phase.
    pub cursor_drawn: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneState {
    Idle,
    Active,
    Complete,
}

/// An action as it was actually applied, for inspection and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedAction {
    pub at_ms: u64,
    pub frame: u64,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneOutcome {
    pub frames: u64,
    pub duration_ms: u64,
    pub commands_run: usize,
    /// Cues never applied because an explicit duration ended first.
    pub truncated: usize,
}

/// Drives one scene through `Idle → Active → Complete`, yielding one frame
/// per call to [`SceneRun::next_frame`].
pub struct SceneRun<'a> {
    scene: &'a Scene,
    scene_index: usize,
    settings: &'a ScheduleSettings,
    state: SceneState,
    queue: VecDeque<Cue>,
    buffer: Arc<TerminalBuffer>,
    last_end_ms: u64,
    frame: u64,
    first_index: u64,
    commands_run: usize,
    history: Vec<AppliedAction>,
}

impl<'a> SceneRun<'a> {
    pub fn new(
        scene: &'a Scene,
        scene_index: usize,
        first_index: u64,
        settings: &'a ScheduleSettings,
    ) -> Self {
        let buffer = TerminalBuffer::with_prompt(scene.title(), settings.prompt.clone());
        Self {
            scene,
            scene_index,
            settings,
            state: SceneState::Idle,
            queue: scene.cues().iter().cloned().collect(),
            buffer: Arc::new(buffer),
            last_end_ms: 0,
            frame: 0,
            first_index,
            commands_run: 0,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn history(&self) -> &[AppliedAction] {
        &self.history
    }

    fn front_due_ms(&self) -> Option<u64> {
        self.queue
            .front()
            .map(|cue| self.last_end_ms.saturating_add(cue.gap_ms))
    }

    /// Scene end as far as it is known. Exact for explicit durations and once
    /// the queue is drained, a lower bound before that.
    fn end_bound_ms(&self) -> u64 {
        match self.scene.duration() {
            SceneDuration::Explicit(ms) => ms,
            SceneDuration::Trailing(trailing) => self
                .front_due_ms()
                .unwrap_or(self.last_end_ms)
                .saturating_add(trailing),
        }
    }

    /// Advances one tick. Returns `None` once the scene is complete.
    pub fn next_frame(&mut self, runner: &mut dyn CommandRunner) -> Option<Frame> {
        match self.state {
            SceneState::Complete => return None,
            SceneState::Idle => {
                self.state = SceneState::Active;
                info!(
                    scene = self.scene_index,
                    title = %self.scene.title(),
                    first_frame = self.first_index,
                    "scene started"
                );
            }
            SceneState::Active => {}
        }

        if let SceneDuration::Explicit(ms) = self.scene.duration() {
            if self.frame >= self.settings.frames_for(ms) {
                self.complete();
                return None;
            }
        }

        while let Some(due_ms) = self.front_due_ms() {
            if !self.settings.is_due(due_ms, self.frame) {
                break;
            }
            let Some(cue) = self.queue.pop_front() else {
                break;
            };
            self.apply(cue, due_ms, runner);
        }

        if self.frame >= self.settings.frames_for(self.end_bound_ms()) {
            self.complete();
            return None;
        }

        let index = self.first_index + self.frame;
        let frame = Frame {
            index,
            scene_index: self.scene_index,
            scene_frame: self.frame,
            time_ms: self.frame.saturating_mul(1000) / u64::from(self.settings.fps),
            snapshot: Arc::clone(&self.buffer),
            cursor_drawn: self.buffer.cursor_visible && blink_on(index, self.settings.fps),
        };
        self.frame += 1;
        Some(frame)
    }

    fn apply(&mut self, cue: Cue, due_ms: u64, runner: &mut dyn CommandRunner) {
        self.last_end_ms = due_ms.saturating_add(cue.action.hold_ms());

        if let Action::RunAndReveal(spec) = &cue.action {
            let output = runner.run(spec);
            self.commands_run += 1;
            let expansion = self.reveal_cues(output.visible_lines());
            let revealed = expansion
                .iter()
                .filter(|revealed| matches!(revealed.action, Action::AddLine(_)))
                .count();
            debug!(
                scene = self.scene_index,
                command = %spec.display(),
                status = ?output.status,
                at_ms = due_ms,
                revealed,
                "expanded command output"
            );
            for revealed in expansion.into_iter().rev() {
                self.queue.push_front(revealed);
            }
        } else {
            Arc::make_mut(&mut self.buffer).apply(&cue.action);
        }

        self.history.push(AppliedAction {
            at_ms: due_ms,
            frame: self.frame,
            action: cue.action,
        });
    }

    /// One `AddLine` per visible output line, the first immediately and each
    /// next one `line_delay_ms` later, then a final hold of the same length.
    fn reveal_cues<'l>(&self, lines: impl Iterator<Item = &'l str>) -> Vec<Cue> {
        let delay = self.settings.line_delay_ms;
        let mut cues = lines
            .enumerate()
            .map(|(position, line)| Cue {
                gap_ms: if position == 0 { 0 } else { delay },
                action: Action::AddLine(LineContent::Segments(
                    self.settings.classifier.segment(line),
                )),
            })
            .collect::<Vec<_>>();
        if !cues.is_empty() && delay > 0 {
            cues.push(Cue {
                gap_ms: 0,
                action: Action::Pause(delay),
            });
        }
        cues
    }

    fn complete(&mut self) {
        self.state = SceneState::Complete;
        let truncated = self.queue.len();
        if truncated > 0 {
            warn!(
                scene = self.scene_index,
                title = %self.scene.title(),
                truncated,
                "explicit scene duration ended before every action ran"
            );
        }
        info!(
            scene = self.scene_index,
            frames = self.frame,
            duration_ms = self.end_bound_ms(),
            commands = self.commands_run,
            "scene complete"
        );
    }

    /// Summary once the run is complete; `None` while frames remain.
    pub fn outcome(&self) -> Option<SceneOutcome> {
        if self.state != SceneState::Complete {
            return None;
        }
        Some(SceneOutcome {
            frames: self.frame,
            duration_ms: self.end_bound_ms(),
            commands_run: self.commands_run,
            truncated: self.queue.len(),
        })
    }
}
