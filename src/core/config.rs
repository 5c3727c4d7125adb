use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a [`crate::store::Store`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory under which `records/`, `indexes`, and per-index id
    /// hashes are kept.
    pub base_path: PathBuf,

    /// Poll interval used by `JobManager::wait_for_all` while draining
    /// in-flight admin jobs at shutdown.
    pub job_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_path: PathBuf::from("./data"),
            job_poll_interval: Duration::from_millis(250),
        }
    }
}

impl Config {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Config {
            base_path: base_path.into(),
            ..Default::default()
        }
    }
}
