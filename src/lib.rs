pub mod action;
pub mod classify;
pub mod command;
pub mod config;
pub mod encoding;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod reel;
pub mod render;
pub mod scene;
pub mod scheduler;
pub mod script;
pub mod terminal;

pub use action::{Action, CommandSpec, LineContent, RowTarget, TimedAction, Timing};
pub use command::{CommandOutput, CommandRunner, CommandStatus, ProcessRunner};
pub use config::RenderConfig;
pub use error::SceneError;
pub use reel::{compose, FrameCounter, FrameSink, ReelSummary};
pub use render::TerminalPainter;
pub use scene::{Scene, SceneBuilder, SceneDuration};
pub use scheduler::{Frame, SceneRun, ScheduleSettings};
pub use terminal::{ColorTag, Segment, StyledLine, TerminalBuffer};
