use crate::action::{Action, CommandSpec, Cue, LineContent, RowTarget, TimedAction, Timing};
use crate::config::TimingConfig;
use crate::error::SceneError;
use crate::terminal::Segment;

/// How long a scene runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneDuration {
    /// Fixed length; actions scheduled past it are never applied.
    Explicit(u64),
    /// Last action's scheduled time plus its hold, plus this many ms.
    Trailing(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scene {
    title: String,
    cues: Vec<Cue>,
    duration: SceneDuration,
}

impl Scene {
    /// Resolves timings into relative gaps and rejects malformed timelines.
    pub fn new(
        title: impl Into<String>,
        actions: Vec<TimedAction>,
        duration: SceneDuration,
    ) -> Result<Self, SceneError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(SceneError::EmptyTitle);
        }
        if duration == SceneDuration::Explicit(0) {
            return Err(SceneError::ZeroDuration { title });
        }

        let mut rows = RowCheck::default();
        let mut cues = Vec::with_capacity(actions.len());
        let mut previous_end = 0_u64;

        for (index, timed) in actions.into_iter().enumerate() {
            let gap_ms = match timed.timing {
                Timing::After(gap) => gap,
                Timing::At(at_ms) => {
                    if at_ms < previous_end {
                        return Err(SceneError::TimeWentBackwards {
                            title,
                            index,
                            tag: timed.action.tag(),
                            at_ms,
                            previous_ms: previous_end,
                        });
                    }
                    at_ms - previous_end
                }
            };

            if let Err(message) = rows.check(&timed.action) {
                return Err(SceneError::InvalidAction {
                    title,
                    index,
                    tag: timed.action.tag(),
                    message,
                });
            }

            previous_end = previous_end
                .saturating_add(gap_ms)
                .saturating_add(timed.action.hold_ms());
            cues.push(Cue {
                gap_ms,
                action: timed.action,
            });
        }

        Ok(Self {
            title,
            cues,
            duration,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn duration(&self) -> SceneDuration {
        self.duration
    }

    pub fn command_count(&self) -> usize {
        self.cues
            .iter()
            .filter(|cue| matches!(cue.action, Action::RunAndReveal(_)))
            .count()
    }

    /// End of the scripted timeline, ignoring any stretch from command output.
    pub fn scripted_end_ms(&self) -> u64 {
        self.cues.iter().fold(0_u64, |end, cue| {
            end.saturating_add(cue.gap_ms)
                .saturating_add(cue.action.hold_ms())
        })
    }

    /// Total length if every command printed nothing. Exact for scenes without
    /// `RunAndReveal`, a lower bound otherwise.
    pub fn estimated_duration_ms(&self) -> u64 {
        match self.duration {
            SceneDuration::Explicit(ms) => ms,
            SceneDuration::Trailing(trailing) => self.scripted_end_ms().saturating_add(trailing),
        }
    }
}

/// Tracks which rows are guaranteed to exist while walking a scene in order.
#[derive(Debug)]
struct RowCheck {
    rows: usize,
    exact: bool,
    typing: bool,
}

impl Default for RowCheck {
    fn default() -> Self {
        Self {
            rows: 0,
            exact: true,
            typing: false,
        }
    }
}

impl RowCheck {
    fn check(&mut self, action: &Action) -> Result<(), String> {
        match action {
            Action::Clear => *self = Self::default(),
            Action::TypeChar { row, .. } => {
                match row {
                    RowTarget::Active => {
                        if !self.typing {
                            self.rows += 1;
                        }
                    }
                    RowTarget::Index(index) => {
                        let index = *index;
                        if index < self.rows {
                            // rewrites an existing row
                        } else if self.exact && index == self.rows {
                            self.rows += 1;
                        } else if self.exact {
                            return Err(format!(
                                "row {index} has not been created; the buffer has {} row(s)",
                                self.rows
                            ));
                        } else {
                            return Err(format!(
                                "row {index} is not guaranteed to exist after command output; type into the active row instead"
                            ));
                        }
                    }
                }
                self.typing = true;
            }
            Action::FinishCommand { row } => {
                match row {
                    RowTarget::Active => {
                        if !self.typing {
                            return Err("no command is being typed".to_owned());
                        }
                    }
                    RowTarget::Index(index) => {
                        if *index >= self.rows {
                            return Err(format!("row {index} has not been created"));
                        }
                    }
                }
                self.typing = false;
            }
            Action::AddLine(_) => self.rows += 1,
            Action::Pause(_) => {}
            Action::RunAndReveal(spec) => {
                if spec.program.trim().is_empty() {
                    return Err("command program is empty".to_owned());
                }
                self.exact = false;
            }
        }
        Ok(())
    }
}

/// Fluent scene construction with the configured pacing applied.
#[derive(Debug, Clone)]
pub struct SceneBuilder {
    title: String,
    timing: TimingConfig,
    actions: Vec<TimedAction>,
    pending_gap: u64,
    pending_at: Option<u64>,
    duration: SceneDuration,
}

impl SceneBuilder {
    pub fn new(title: impl Into<String>, timing: &TimingConfig) -> Self {
        Self {
            title: title.into(),
            timing: timing.clone(),
            actions: Vec::new(),
            pending_gap: timing.lead_in_ms,
            pending_at: None,
            duration: SceneDuration::Trailing(timing.trailing_ms),
        }
    }

    /// Anchors the next pushed action: `After` extends its gap, `At` pins it to
    /// an absolute scene time.
    pub fn anchor(mut self, timing: Timing) -> Self {
        match timing {
            Timing::After(gap) => self.pending_gap = self.pending_gap.saturating_add(gap),
            Timing::At(at_ms) => self.pending_at = Some(at_ms),
        }
        self
    }

    pub fn push(mut self, timed: TimedAction) -> Self {
        let timed = match (self.pending_at.take(), timed.timing) {
            (Some(at_ms), _) => TimedAction::at(at_ms, timed.action),
            (None, Timing::After(gap)) => {
                TimedAction::after(gap.saturating_add(self.pending_gap), timed.action)
            }
            (None, Timing::At(_)) => timed,
        };
        self.pending_gap = 0;
        self.actions.push(timed);
        self
    }

    pub fn clear(self) -> Self {
        self.push(TimedAction::now(Action::Clear))
    }

    pub fn pause(self, ms: u64) -> Self {
        self.push(TimedAction::now(Action::Pause(ms)))
    }

    /// Types `text` into a fresh prompt row and finishes it.
    pub fn type_command(mut self, text: &str) -> Self {
        for timed in self.timing.cadence().expand(text) {
            self = self.push(timed);
        }
        self
    }

    pub fn line(self, segments: Vec<Segment>) -> Self {
        self.push(TimedAction::now(Action::AddLine(LineContent::Segments(
            segments,
        ))))
    }

    pub fn blank(self) -> Self {
        let hold = self.timing.blank_hold_ms;
        let builder = self.push(TimedAction::now(Action::AddLine(LineContent::Blank)));
        if hold > 0 {
            builder.pause(hold)
        } else {
            builder
        }
    }

    pub fn reveal(self, spec: CommandSpec) -> Self {
        self.push(TimedAction::now(Action::RunAndReveal(spec)))
    }

    /// Types `text`, lets it sit briefly, then reveals the real output of `spec`.
    pub fn command(self, text: &str, spec: CommandSpec) -> Self {
        let post_type = self.timing.post_type_ms;
        self.type_command(text).pause(post_type).reveal(spec)
    }

    pub fn trailing(mut self, ms: u64) -> Self {
        self.duration = SceneDuration::Trailing(ms);
        self
    }

    pub fn duration(mut self, ms: u64) -> Self {
        self.duration = SceneDuration::Explicit(ms);
        self
    }

    pub fn build(self) -> Result<Scene, SceneError> {
        Scene::new(self.title, self.actions, self.duration)
    }
}
