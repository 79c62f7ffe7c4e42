//! Color tagging for captured command output.
//!
//! Rules are checked in a fixed order on the left-trimmed line and the first
//! match wins:
//!
//! 1. a success marker prefix (`✓`, `●`) gives [`ColorTag::Accent`]
//! 2. a continuation marker prefix (`↳`) gives [`ColorTag::Faint`]
//! 3. a muted keyword anywhere in the line, case-insensitive, gives
//!    [`ColorTag::Faint`]; `total_earned` counts as containing `total`
//! 4. anything else is [`ColorTag::Muted`]

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::terminal::{ColorTag, Segment};

pub const DEFAULT_ACCENT_PREFIXES: [&str; 2] = ["✓", "●"];
pub const DEFAULT_FAINT_PREFIXES: [&str; 1] = ["↳"];
pub const DEFAULT_FAINT_KEYWORDS: [&str; 4] = ["balance", "pending", "total", "status"];

#[derive(Debug, Clone)]
pub struct LineClassifier {
    accent_prefixes: Vec<String>,
    faint_prefixes: Vec<String>,
    faint_keywords: Option<Regex>,
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self {
            accent_prefixes: DEFAULT_ACCENT_PREFIXES.map(str::to_owned).to_vec(),
            faint_prefixes: DEFAULT_FAINT_PREFIXES.map(str::to_owned).to_vec(),
            faint_keywords: keyword_pattern(&DEFAULT_FAINT_KEYWORDS.map(str::to_owned))
                .ok()
                .flatten(),
        }
    }
}

impl LineClassifier {
    pub fn new(
        accent_prefixes: &[String],
        faint_prefixes: &[String],
        faint_keywords: &[String],
    ) -> Result<Self> {
        for marker in accent_prefixes.iter().chain(faint_prefixes) {
            if marker.trim().is_empty() {
                bail!("classifier prefixes must not be blank");
            }
        }
        Ok(Self {
            accent_prefixes: accent_prefixes.to_vec(),
            faint_prefixes: faint_prefixes.to_vec(),
            faint_keywords: keyword_pattern(faint_keywords)?,
        })
    }

    pub fn classify(&self, line: &str) -> ColorTag {
        let trimmed = line.trim_start();
        if self
            .accent_prefixes
            .iter()
            .any(|marker| trimmed.starts_with(marker.as_str()))
        {
            return ColorTag::Accent;
        }
        if self
            .faint_prefixes
            .iter()
            .any(|marker| trimmed.starts_with(marker.as_str()))
        {
            return ColorTag::Faint;
        }
        if self
            .faint_keywords
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(trimmed))
        {
            return ColorTag::Faint;
        }
        ColorTag::Muted
    }

    /// One single-segment line per captured output line, colored by `classify`.
    pub fn segment(&self, line: &str) -> Vec<Segment> {
        vec![Segment::new(line, self.classify(line))]
    }
}

fn keyword_pattern(keywords: &[String]) -> Result<Option<Regex>> {
    let words = keywords
        .iter()
        .map(|word| word.trim())
        .filter(|word| !word.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>();
    if words.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)(?:{})", words.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .with_context(|| format!("invalid keyword pattern '{pattern}'"))
}
