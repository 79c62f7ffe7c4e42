//! Subscriber setup for the binary. The library only emits events.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Verbosity::Verbose,
            (false, true) => Verbosity::Quiet,
            (false, false) => Verbosity::Normal,
        }
    }

    pub fn default_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "termreel=warn",
            Verbosity::Normal => "termreel=info",
            Verbosity::Verbose => "termreel=debug",
        }
    }
}

/// `RUST_LOG` wins when set; otherwise the verbosity flags pick the level.
pub fn filter_for(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()))
}

/// Installs the stderr `fmt` subscriber. Safe to call more than once.
pub fn init(verbosity: Verbosity) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
