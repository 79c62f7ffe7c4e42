use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::action::TypingCadence;
use crate::classify::{
    LineClassifier, DEFAULT_ACCENT_PREFIXES, DEFAULT_FAINT_KEYWORDS, DEFAULT_FAINT_PREFIXES,
};

const X264_PRESETS: [&str; 10] = [
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
    "placebo",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub fn rgba(self) -> [u8; 4] {
        [self.0[0], self.0[1], self.0[2], 255]
    }
}

/// Everything the renderer, scheduler and encoder need besides the scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub prompt: String,
    pub layout: LayoutConfig,
    pub theme: Theme,
    pub timing: TimingConfig,
    pub command: CommandConfig,
    pub encoding: EncodingConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 420,
            fps: 30,
            prompt: "$ ".to_owned(),
            layout: LayoutConfig::default(),
            theme: Theme::default(),
            timing: TimingConfig::default(),
            command: CommandConfig::default(),
            encoding: EncodingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    pub font_size: f32,
    pub title_size: f32,
    pub line_height: u32,
    pub padding: u32,
    pub bar_height: u32,
    pub cursor_width: u32,
    pub font_path: Option<PathBuf>,
    /// Pins the font file; a mismatch falls back to block glyphs.
    pub font_sha256: Option<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            font_size: 14.0,
            title_size: 10.0,
            line_height: 22,
            padding: 20,
            bar_height: 36,
            cursor_width: 8,
            font_path: None,
            font_sha256: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Theme {
    pub background: Rgb,
    pub border: Rgb,
    pub bar: Rgb,
    pub text: Rgb,
    pub muted: Rgb,
    pub faint: Rgb,
    pub accent: Rgb,
    pub close: Rgb,
    pub minimize: Rgb,
    pub zoom: Rgb,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: Rgb([8, 8, 10]),
            border: Rgb([30, 30, 32]),
            bar: Rgb([14, 14, 18]),
            text: Rgb([232, 232, 232]),
            muted: Rgb([136, 136, 136]),
            faint: Rgb([68, 68, 68]),
            accent: Rgb([52, 211, 153]),
            close: Rgb([255, 95, 87]),
            minimize: Rgb([255, 189, 46]),
            zoom: Rgb([40, 200, 64]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    pub per_char_ms: u64,
    pub after_space_ms: u64,
    /// Idle time before a scene's first action.
    pub lead_in_ms: u64,
    /// Pause between finishing a typed command and running it.
    pub post_type_ms: u64,
    /// Gap between revealed output lines.
    pub line_delay_ms: u64,
    pub blank_hold_ms: u64,
    /// Default hold after a scene's last action.
    pub trailing_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            per_char_ms: 35,
            after_space_ms: 15,
            lead_in_ms: 500,
            post_type_ms: 267,
            line_delay_ms: 130,
            blank_hold_ms: 100,
            trailing_ms: 2500,
        }
    }
}

impl TimingConfig {
    pub fn cadence(&self) -> TypingCadence {
        TypingCadence {
            per_char_ms: self.per_char_ms,
            after_space_ms: self.after_space_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    pub timeout_ms: u64,
    /// Appended to every command so the demonstrated CLI runs offline.
    pub mode_flag: Option<String>,
    pub cwd: Option<PathBuf>,
    pub accent_prefixes: Vec<String>,
    pub faint_prefixes: Vec<String>,
    pub faint_keywords: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            mode_flag: Some("--local".to_owned()),
            cwd: None,
            accent_prefixes: DEFAULT_ACCENT_PREFIXES.map(str::to_owned).to_vec(),
            faint_prefixes: DEFAULT_FAINT_PREFIXES.map(str::to_owned).to_vec(),
            faint_keywords: DEFAULT_FAINT_KEYWORDS.map(str::to_owned).to_vec(),
        }
    }
}

impl CommandConfig {
    pub fn classifier(&self) -> Result<LineClassifier> {
        LineClassifier::new(
            &self.accent_prefixes,
            &self.faint_prefixes,
            &self.faint_keywords,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Staging {
    /// Raw RGBA frames piped straight into the encoder.
    Pipe,
    /// Numbered PNG files written to a directory, then encoded.
    Png,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    pub crf: u8,
    pub preset: String,
    pub staging: Staging,
    pub keep_frames: bool,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            crf: 23,
            preset: "medium".to_owned(),
            staging: Staging::Pipe,
            keep_frames: false,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!(
                "resolution must be positive, got {}x{}",
                self.width,
                self.height
            );
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            bail!(
                "resolution must be even for yuv420p output, got {}x{}",
                self.width,
                self.height
            );
        }
        if self.fps == 0 || self.fps > 240 {
            bail!("fps must be in 1..=240, got {}", self.fps);
        }
        if !self.layout.font_size.is_finite() || self.layout.font_size <= 0.0 {
            bail!("layout.font_size must be > 0");
        }
        if !self.layout.title_size.is_finite() || self.layout.title_size <= 0.0 {
            bail!("layout.title_size must be > 0");
        }
        if self.layout.line_height == 0 {
            bail!("layout.line_height must be > 0");
        }
        if self.layout.bar_height >= self.height {
            bail!(
                "layout.bar_height ({}) must be smaller than the frame height ({})",
                self.layout.bar_height,
                self.height
            );
        }
        if self.command.timeout_ms == 0 {
            bail!("command.timeout_ms must be > 0");
        }
        if self.encoding.crf > 51 {
            bail!("encoding.crf must be in 0..=51, got {}", self.encoding.crf);
        }
        if !X264_PRESETS.contains(&self.encoding.preset.as_str()) {
            bail!(
                "unknown encoding.preset '{}'. Supported: {}",
                self.encoding.preset,
                X264_PRESETS.join(", ")
            );
        }
        self.command
            .classifier()
            .context("invalid command classifier markers")?;
        Ok(())
    }
}

/// Reads a YAML config file into an untyped tree so later layers can overlay it.
pub fn read_config_layer(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Value::Mapping(Default::default()));
    }
    serde_yaml::from_str(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(
            "failed to parse config yaml in {} at {}: {}",
            path.display(),
            location,
            error
        )
    })
}

/// Deep-merges `overlay` into `base`. Mappings merge key by key, anything
/// else replaces.
pub fn merge_layer(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Null => {}
        Value::Mapping(overlay_map) => {
            if let Value::Mapping(base_map) = base {
                for (key, value) in overlay_map {
                    match base_map.get_mut(&key) {
                        Some(existing) => merge_layer(existing, value),
                        None => {
                            base_map.insert(key, value);
                        }
                    }
                }
            } else {
                *base = Value::Mapping(overlay_map);
            }
        }
        other => *base = other,
    }
}

/// Resolves layered YAML into a validated config. Layers apply in order, later
/// ones win.
pub fn resolve_config(layers: Vec<Value>) -> Result<RenderConfig> {
    let mut merged = Value::Mapping(Default::default());
    for layer in layers {
        merge_layer(&mut merged, layer);
    }
    let config: RenderConfig =
        serde_yaml::from_value(merged).context("failed to interpret render config")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).expect("test yaml should parse")
    }

    #[test]
    fn defaults_validate() {
        RenderConfig::default()
            .validate()
            .expect("defaults should be valid");
    }

    #[test]
    fn later_layers_override_nested_fields_only() {
        let config = resolve_config(vec![
            yaml("fps: 24\ntiming: { per_char_ms: 20, line_delay_ms: 90 }"),
            yaml("timing: { per_char_ms: 45 }"),
        ])
        .expect("config should resolve");

        assert_eq!(config.fps, 24);
        assert_eq!(config.timing.per_char_ms, 45);
        assert_eq!(config.timing.line_delay_ms, 90);
        assert_eq!(config.timing.after_space_ms, 15);
        assert_eq!(config.width, 720);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = resolve_config(vec![yaml("fsp: 30")]).expect_err("typo should fail");
        assert!(format!("{error:#}").contains("fsp"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = RenderConfig::default();
        config.fps = 0;
        assert!(config.validate().is_err());

        let mut config = RenderConfig::default();
        config.width = 721;
        assert!(config.validate().is_err());

        let mut config = RenderConfig::default();
        config.encoding.preset = "warp".to_owned();
        let message = config.validate().expect_err("preset").to_string();
        assert!(message.contains("warp"));

        let mut config = RenderConfig::default();
        config.encoding.crf = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn theme_colors_parse_as_triples() {
        let config = resolve_config(vec![yaml("theme: { accent: [1, 2, 3] }")])
            .expect("config should resolve");
        assert_eq!(config.theme.accent, Rgb([1, 2, 3]));
        assert_eq!(config.theme.accent.rgba(), [1, 2, 3, 255]);
        assert_eq!(config.theme.background, Theme::default().background);
    }

    #[test]
    fn null_overlay_keeps_base() {
        let config = resolve_config(vec![yaml("fps: 25"), Value::Null])
            .expect("config should resolve");
        assert_eq!(config.fps, 25);
    }
}
