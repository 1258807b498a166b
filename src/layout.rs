use std::path::{Path, PathBuf};

pub const MESSAGES_FILE: &str = "messages";
pub const LOCK_DIR: &str = ".lock";
pub const NAME_FILE: &str = "name";
pub const TEMP_PREFIX: &str = ".tmp";

const QUEUE_ID_HEX_LEN: usize = 32;

/// Maps queue names onto directories under a storage root.
#[derive(Debug, Clone)]
pub struct QueueLayout {
    root: PathBuf,
}

impl QueueLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn queue_dir(&self, queue_name: &str) -> PathBuf {
        self.root.join(queue_id(queue_name))
    }

    pub fn messages_path(&self, queue_name: &str) -> PathBuf {
        self.queue_dir(queue_name).join(MESSAGES_FILE)
    }

    pub fn lock_path(&self, queue_name: &str) -> PathBuf {
        self.queue_dir(queue_name).join(LOCK_DIR)
    }

    pub fn name_path(&self, queue_name: &str) -> PathBuf {
        self.queue_dir(queue_name).join(NAME_FILE)
    }
}

/// Filesystem-safe directory name for a queue.
///
/// Hex of the BLAKE3 digest of the name itself, so distinct names never share
/// a log whatever characters they contain.
pub fn queue_id(queue_name: &str) -> String {
    let digest = blake3::hash(queue_name.as_bytes());
    let mut id = digest.to_hex().to_string();
    id.truncate(QUEUE_ID_HEX_LEN);
    id
}
