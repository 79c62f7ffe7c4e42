use serde::{Deserialize, Serialize};

use crate::terminal::Segment;

/// Which row a typing action writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTarget {
    /// The row currently being typed; created on first use, released by
    /// `FinishCommand`.
    Active,
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineContent {
    Segments(Vec<Segment>),
    Blank,
}

/// External program whose captured output is spliced into the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Clear,
    TypeChar { row: RowTarget, text: String },
    FinishCommand { row: RowTarget },
    AddLine(LineContent),
    Pause(u64),
    RunAndReveal(CommandSpec),
}

impl Action {
    /// Time the action occupies on the timeline after it is applied.
    pub fn hold_ms(&self) -> u64 {
        match self {
            Action::Pause(ms) => *ms,
            _ => 0,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Action::Clear => "clear",
            Action::TypeChar { .. } => "type_char",
            Action::FinishCommand { .. } => "finish_command",
            Action::AddLine(LineContent::Blank) => "blank",
            Action::AddLine(LineContent::Segments(_)) => "add_line",
            Action::Pause(_) => "pause",
            Action::RunAndReveal(_) => "run_and_reveal",
        }
    }
}

/// How an action is anchored on its scene's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Gap after the previous action's scheduled time plus its hold.
    After(u64),
    /// Absolute scene time, before any stretch from revealed command output.
    At(u64),
}

impl Default for Timing {
    fn default() -> Self {
        Timing::After(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedAction {
    pub timing: Timing,
    pub action: Action,
}

impl TimedAction {
    pub fn after(gap_ms: u64, action: Action) -> Self {
        Self {
            timing: Timing::After(gap_ms),
            action,
        }
    }

    pub fn at(at_ms: u64, action: Action) -> Self {
        Self {
            timing: Timing::At(at_ms),
            action,
        }
    }

    pub fn now(action: Action) -> Self {
        Self::after(0, action)
    }
}

/// A queued action with its gap resolved relative to the previous cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub gap_ms: u64,
    pub action: Action,
}

/// Human-ish typing rhythm: a fixed delay per character, longer after a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingCadence {
    pub per_char_ms: u64,
    pub after_space_ms: u64,
}

impl Default for TypingCadence {
    fn default() -> Self {
        Self {
            per_char_ms: 35,
            after_space_ms: 15,
        }
    }
}

impl TypingCadence {
    pub fn delay_after(&self, ch: char) -> u64 {
        if ch == ' ' {
            self.per_char_ms.saturating_add(self.after_space_ms)
        } else {
            self.per_char_ms
        }
    }

    /// True when two consecutive keystrokes can land in the same frame, in
    /// which case only the later one is ever visible.
    pub fn collapses_at(&self, fps: u32) -> bool {
        self.per_char_ms.saturating_mul(u64::from(fps)) < 1000
    }

    /// Expands `text` into one `TypeChar` per character followed by a
    /// `FinishCommand`, spaced by this cadence.
    pub fn expand(&self, text: &str) -> Vec<TimedAction> {
        let mut timed = Vec::with_capacity(text.chars().count() + 1);
        let mut typed = String::with_capacity(text.len());
        let mut gap = 0;

        for ch in text.chars() {
            typed.push(ch);
            timed.push(TimedAction::after(
                gap,
                Action::TypeChar {
                    row: RowTarget::Active,
                    text: typed.clone(),
                },
            ));
            gap = self.delay_after(ch);
        }

        timed.push(TimedAction::after(
            gap,
            Action::FinishCommand {
                row: RowTarget::Active,
            },
        ));
        timed
    }
}
