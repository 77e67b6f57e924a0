mod config;
mod driver;
pub mod logging;

pub use config::{
    ConfigLoadError, HearthConfig, LoggingConfig, RunnerConfig, ScriptsConfig, project_dirs,
};
pub use driver::{CompletionToken, RemoteSetter, TickContext, TickDriver, TickReport, WorkItem};
pub use logging::init_logging;
