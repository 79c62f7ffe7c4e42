//! YAML scene scripts.
//!
//! A script is a list of scenes, each a list of steps tagged by `do:`. Steps
//! are high level (`type`, `command`, `line`) and expand into buffer actions
//! through [`SceneBuilder`], so pacing comes from the render config rather
//! than from hand-written timestamps.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::action::{Action, CommandSpec, RowTarget, TimedAction, Timing};
use crate::classify::LineClassifier;
use crate::config::RenderConfig;
use crate::scene::{Scene, SceneBuilder};
use crate::terminal::{ColorTag, Segment};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptDocument {
    #[serde(default)]
    config: Option<Value>,
    scenes: Vec<SceneDocument>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SceneDocument {
    title: String,
    #[serde(default)]
    trailing_ms: Option<u64>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    actions: Vec<Value>,
}

/// One scripted step, before timing is attached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "do", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    Clear,
    Type {
        text: String,
    },
    RunAndReveal {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Command {
        text: String,
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    AddLine {
        segments: Vec<Segment>,
    },
    Line {
        text: String,
        #[serde(default)]
        color: Option<ColorTag>,
    },
    Blank,
    Pause {
        ms: u64,
    },
    TypeChar {
        #[serde(default)]
        row: Option<usize>,
        text: String,
    },
    FinishCommand {
        #[serde(default)]
        row: Option<usize>,
    },
}

/// A parsed script: scenes still in document form plus the optional config
/// overlay carried in the file.
#[derive(Debug, Clone)]
pub struct Script {
    path: PathBuf,
    config_layer: Option<Value>,
    scenes: Vec<SceneDocument>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        Self::parse(&contents, path)
    }

    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let document: ScriptDocument = serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(
                "failed to parse script yaml in {} at {}: {}",
                path.display(),
                location,
                error
            )
        })?;
        if document.scenes.is_empty() {
            bail!("script {} defines no scenes", path.display());
        }
        Ok(Self {
            path: path.to_path_buf(),
            config_layer: document.config,
            scenes: document.scenes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory commands run from unless the config names one.
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    pub fn config_layer(&self) -> Option<&Value> {
        self.config_layer.as_ref()
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    /// Expands every step with the pacing of `config` and validates the result.
    pub fn build_scenes(&self, config: &RenderConfig) -> Result<Vec<Scene>> {
        let classifier = config.command.classifier()?;
        self.scenes
            .iter()
            .enumerate()
            .map(|(index, document)| {
                build_scene(document, config, &classifier)
                    .with_context(|| format!("scene #{index} '{}' is invalid", document.title))
            })
            .collect()
    }
}

fn build_scene(
    document: &SceneDocument,
    config: &RenderConfig,
    classifier: &LineClassifier,
) -> Result<Scene> {
    let mut builder = SceneBuilder::new(document.title.clone(), &config.timing);
    builder = match (document.trailing_ms, document.duration_ms) {
        (Some(_), Some(_)) => bail!("set either trailing_ms or duration_ms, not both"),
        (Some(trailing), None) => builder.trailing(trailing),
        (None, Some(duration)) => builder.duration(duration),
        (None, None) => builder,
    };

    for (index, raw) in document.actions.iter().enumerate() {
        let (timing, step) =
            parse_step(raw).with_context(|| format!("step #{index} is malformed"))?;
        if let Some(timing) = timing {
            builder = builder.anchor(timing);
        }
        builder = apply_step(builder, step, classifier);
    }

    Ok(builder.build()?)
}

/// Splits the timing keys off a step mapping and decodes the rest.
fn parse_step(raw: &Value) -> Result<(Option<Timing>, Step)> {
    let Value::Mapping(mapping) = raw else {
        bail!("expected a mapping with a `do:` key");
    };
    let mut mapping: Mapping = mapping.clone();
    let at = take_millis(&mut mapping, "at")?;
    let after = take_millis(&mut mapping, "after")?;
    let timing = match (at, after) {
        (Some(_), Some(_)) => bail!("use either `at` or `after`, not both"),
        (Some(at_ms), None) => Some(Timing::At(at_ms)),
        (None, Some(gap_ms)) => Some(Timing::After(gap_ms)),
        (None, None) => None,
    };
    let step = serde_yaml::from_value(Value::Mapping(mapping))?;
    Ok((timing, step))
}

fn take_millis(mapping: &mut Mapping, key: &str) -> Result<Option<u64>> {
    match mapping.remove(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| anyhow!("`{key}` must be a non-negative integer of milliseconds")),
    }
}

fn row_target(row: Option<usize>) -> RowTarget {
    row.map_or(RowTarget::Active, RowTarget::Index)
}

fn apply_step(builder: SceneBuilder, step: Step, classifier: &LineClassifier) -> SceneBuilder {
    match step {
        Step::Clear => builder.clear(),
        Step::Type { text } => builder.type_command(&text),
        Step::RunAndReveal { program, args } => builder.reveal(CommandSpec::new(program, args)),
        Step::Command {
            text,
            program,
            args,
        } => builder.command(&text, CommandSpec::new(program, args)),
        Step::AddLine { segments } => builder.line(segments),
        Step::Line { text, color } => {
            let color = color.unwrap_or_else(|| classifier.classify(&text));
            builder.line(vec![Segment::new(text, color)])
        }
        Step::Blank => builder.blank(),
        Step::Pause { ms } => builder.pause(ms),
        Step::TypeChar { row, text } => builder.push(TimedAction::now(Action::TypeChar {
            row: row_target(row),
            text,
        })),
        Step::FinishCommand { row } => builder.push(TimedAction::now(Action::FinishCommand {
            row: row_target(row),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::LineContent;
    use crate::config::TimingConfig;
    use crate::scene::SceneDuration;

    fn config() -> RenderConfig {
        RenderConfig {
            timing: TimingConfig {
                lead_in_ms: 0,
                ..TimingConfig::default()
            },
            ..RenderConfig::default()
        }
    }

    fn build(yaml: &str) -> Result<Vec<Scene>> {
        Script::parse(yaml, Path::new("demo.yaml"))?.build_scenes(&config())
    }

    #[test]
    fn steps_expand_into_actions() {
        let scenes = build(
            r#"
scenes:
  - title: browse
    trailing_ms: 1000
    actions:
      - do: clear
      - do: type
        text: "ls"
      - do: run_and_reveal
        program: ls
      - do: line
        text: "  ✓ done"
      - do: blank
      - do: pause
        ms: 800
"#,
        )
        .expect("script should build");

        assert_eq!(scenes.len(), 1);
        let scene = &scenes[0];
        assert_eq!(scene.title(), "browse");
        assert_eq!(scene.duration(), SceneDuration::Trailing(1000));
        let tags = scene
            .cues()
            .iter()
            .map(|cue| cue.action.tag())
            .collect::<Vec<_>>();
        assert_eq!(
            tags,
            vec![
                "clear",
                "type_char",
                "type_char",
                "finish_command",
                "run_and_reveal",
                "add_line",
                "blank",
                "pause",
                "pause"
            ]
        );
    }

    #[test]
    fn line_without_color_is_classified() {
        let scenes = build(
            r#"
scenes:
  - title: t
    actions:
      - do: line
        text: "  ✓ done"
      - do: line
        text: "plain"
        color: text
"#,
        )
        .expect("script should build");
        let colors = scenes[0]
            .cues()
            .iter()
            .filter_map(|cue| match &cue.action {
                Action::AddLine(LineContent::Segments(segments)) => Some(segments[0].color),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(colors, vec![ColorTag::Accent, ColorTag::Text]);
    }

    #[test]
    fn at_and_after_anchor_steps() {
        let scenes = build(
            r#"
scenes:
  - title: t
    duration_ms: 5000
    actions:
      - do: add_line
        segments: [{ text: "a", color: muted }]
        at: 1000
      - do: blank
        after: 250
"#,
        )
        .expect("script should build");
        let gaps = scenes[0].cues().iter().map(|cue| cue.gap_ms).collect::<Vec<_>>();
        assert_eq!(gaps, vec![1000, 250, 0]);
        assert_eq!(scenes[0].duration(), SceneDuration::Explicit(5000));
    }

    #[test]
    fn errors_name_scene_and_step() {
        let error = build(
            r#"
scenes:
  - title: ok
  - title: broken
    actions:
      - do: teleport
"#,
        )
        .expect_err("unknown step must fail");
        let message = format!("{error:#}");
        assert!(message.contains("scene #1 'broken'"), "{message}");
        assert!(message.contains("step #0"), "{message}");
    }

    #[test]
    fn scene_errors_carry_action_index() {
        let error = build(
            r#"
scenes:
  - title: rows
    actions:
      - do: type_char
        row: 3
        text: "x"
"#,
        )
        .expect_err("row 3 does not exist");
        let message = format!("{error:#}");
        assert!(message.contains("scene #0 'rows'"), "{message}");
        assert!(message.contains("row 3"), "{message}");
    }

    #[test]
    fn conflicting_timing_keys_are_rejected() {
        let error = build(
            r#"
scenes:
  - title: t
    actions:
      - { do: clear, at: 10, after: 20 }
"#,
        )
        .expect_err("both timing keys");
        assert!(format!("{error:#}").contains("either `at` or `after`"));

        assert!(build("scenes:\n  - { title: t, trailing_ms: 1, duration_ms: 2 }\n").is_err());
    }

    #[test]
    fn yaml_errors_report_location() {
        let error = Script::parse("scenes: [", Path::new("bad.yaml")).expect_err("bad yaml");
        assert!(error.to_string().contains("failed to parse script yaml in bad.yaml"));
        assert!(Script::parse("scenes: []", Path::new("empty.yaml")).is_err());
    }

    #[test]
    fn config_block_and_base_dir_are_exposed() {
        let script = Script::parse(
            "config: { fps: 24 }\nscenes:\n  - title: t\n",
            Path::new("demos/intro.yaml"),
        )
        .expect("script");
        assert_eq!(script.base_dir(), PathBuf::from("demos"));
        assert_eq!(
            script
                .config_layer()
                .and_then(|layer| layer.get("fps"))
                .and_then(Value::as_u64),
            Some(24)
        );
        assert_eq!(
            Script::parse("scenes:\n  - title: t\n", Path::new("intro.yaml"))
                .expect("script")
                .base_dir(),
            PathBuf::from(".")
        );
    }
}
