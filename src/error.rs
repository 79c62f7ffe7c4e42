//! Typed failures for scene construction.

/// A scene description that cannot produce a coherent timeline. Raised before
/// any frame is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    #[error("scene has an empty title")]
    EmptyTitle,

    #[error("scene '{title}' action #{index} ({tag}): {message}")]
    InvalidAction {
        title: String,
        index: usize,
        tag: &'static str,
        message: String,
    },

    #[error("scene '{title}' action #{index} ({tag}) is scheduled at {at_ms}ms, before the previous action ends at {previous_ms}ms")]
    TimeWentBackwards {
        title: String,
        index: usize,
        tag: &'static str,
        at_ms: u64,
        previous_ms: u64,
    },

    #[error("scene '{title}' has an explicit duration of 0ms")]
    ZeroDuration { title: String },
}
