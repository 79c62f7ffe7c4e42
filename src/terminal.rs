use serde::{Deserialize, Serialize};

use crate::action::{Action, LineContent, RowTarget};

pub const DEFAULT_PROMPT: &str = "$ ";

/// Semantic color of a text segment. The painter maps tags to theme colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTag {
    Text,
    Accent,
    Muted,
    Faint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub color: ColorTag,
}

impl Segment {
    pub fn new(text: impl Into<String>, color: ColorTag) -> Self {
        Self {
            text: text.into(),
            color,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyledLine {
    pub segments: Vec<Segment>,
}

impl StyledLine {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn blank() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect()
    }

    pub fn char_len(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| segment.text.chars().count())
            .sum()
    }
}

/// Width of rendered text in pixels. The painter and the cursor math must share
/// one implementation or the cursor drifts away from the glyphs it follows.
pub trait TextMeasure {
    fn text_width(&self, text: &str) -> f32;
}

/// Visible state of the fake terminal for one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalBuffer {
    pub title: String,
    pub lines: Vec<StyledLine>,
    pub cursor_visible: bool,
    pub cursor_row: usize,
    pub cursor_column: usize,
    active_row: Option<usize>,
    prompt: String,
}

impl TerminalBuffer {
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_prompt(title, DEFAULT_PROMPT)
    }

    pub fn with_prompt(title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lines: Vec::new(),
            cursor_visible: false,
            cursor_row: 0,
            cursor_column: 0,
            active_row: None,
            prompt: prompt.into(),
        }
    }

    pub fn active_row(&self) -> Option<usize> {
        self.active_row
    }

    pub fn row_text(&self, row: usize) -> Option<String> {
        self.lines.get(row).map(StyledLine::text)
    }

    /// Applies one buffer mutation. Total over every action: timing-only and
    /// composite actions are no-ops here, the scheduler handles them.
    pub fn apply(&mut self, action: &Action) {
        match action {
            Action::Clear => {
                self.lines.clear();
                self.cursor_visible = false;
                self.cursor_row = 0;
                self.cursor_column = 0;
                self.active_row = None;
            }
            Action::TypeChar { row, text } => self.type_into(*row, text),
            Action::FinishCommand { row } => self.finish(*row),
            Action::AddLine(content) => {
                let line = match content {
                    LineContent::Segments(segments) => StyledLine::new(segments.clone()),
                    LineContent::Blank => StyledLine::blank(),
                };
                self.lines.push(line);
            }
            Action::Pause(_) | Action::RunAndReveal(_) => {}
        }
    }

    fn type_into(&mut self, target: RowTarget, text: &str) {
        let line = StyledLine::new(vec![
            Segment::new(self.prompt.clone(), ColorTag::Accent),
            Segment::new(text, ColorTag::Text),
        ]);
        let cursor_column = line.char_len();

        let row = match target {
            RowTarget::Active => self.active_row.unwrap_or(self.lines.len()),
            RowTarget::Index(index) => index,
        };
        let row = if row < self.lines.len() {
            self.lines[row] = line;
            row
        } else {
            // Out-of-range rows are rejected at scene validation; at runtime
            // they degrade to an append so the buffer stays consistent.
            self.lines.push(line);
            self.lines.len() - 1
        };

        self.active_row = Some(row);
        self.cursor_visible = true;
        self.cursor_row = row;
        self.cursor_column = cursor_column;
    }

    fn finish(&mut self, target: RowTarget) {
        self.cursor_visible = false;
        match target {
            RowTarget::Active => self.active_row = None,
            RowTarget::Index(index) => {
                if self.active_row == Some(index) {
                    self.active_row = None;
                }
            }
        }
    }

    /// Horizontal pixel offset of the cursor from the start of its row.
    pub fn cursor_pixel_offset(&self, measure: &dyn TextMeasure) -> f32 {
        let Some(line) = self.lines.get(self.cursor_row) else {
            return 0.0;
        };

        let mut remaining = self.cursor_column;
        let mut offset = 0.0;
        for segment in &line.segments {
            if remaining == 0 {
                break;
            }
            let take = segment.text.chars().count().min(remaining);
            let prefix = segment.text.chars().take(take).collect::<String>();
            offset += measure.text_width(&prefix);
            remaining -= take;
        }
        offset
    }
}
