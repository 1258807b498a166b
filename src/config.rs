use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockConfig {
    // Sleep between attempts to create the lock marker.
    pub poll_interval: Duration,
    // How long a holder may keep the lock before waiters treat it as abandoned.
    pub lease: Duration,
    // None waits for the holder indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            lease: DEFAULT_LOCK_LEASE,
            timeout: None,
        }
    }
}

impl LockConfig {
    pub fn bounded(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub visibility_timeout: Duration,
    pub lock: LockConfig,
    // sync_all the log after every append and rewrite.
    pub fsync: bool,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            lock: LockConfig::default(),
            fsync: true,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Skips fsync calls. Faster, but a power loss may drop recent writes.
    pub fn unsynced(mut self) -> Self {
        self.fsync = false;
        self
    }
}
