use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::debug;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::layout::{QueueLayout, TEMP_PREFIX};
use crate::lock::QueueLock;
use crate::message::{Message, MessageState};
use crate::rewrite::{self, DeleteTransform, PullTransform};
use crate::{Error, Result};

/// Point-in-time counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
}

/// Durable queue store: one append/rewrite log per queue name under a root
/// directory, shared safely by any number of threads and processes.
#[derive(Debug)]
pub struct FileQueue<C: Clock = SystemClock> {
    layout: QueueLayout,
    config: StoreConfig,
    clock: C,
}

impl FileQueue<SystemClock> {
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_clock(config, SystemClock)
    }
}

impl<C: Clock> FileQueue<C> {
    pub fn open_with_clock(config: StoreConfig, clock: C) -> Result<Self> {
        fs::create_dir_all(config.root())?;
        Ok(Self {
            layout: QueueLayout::new(config.root()),
            config,
            clock,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn queue_dir(&self, queue_name: &str) -> PathBuf {
        self.layout.queue_dir(queue_name)
    }

    pub fn push(&self, queue_name: &str, body: impl AsRef<[u8]>) -> Result<()> {
        validate_queue_name(queue_name)?;
        self.ensure_queue(queue_name)?;

        let lock = self.lock(queue_name)?;
        let message = Message::pending(body.as_ref());
        rewrite::append(
            &self.layout.messages_path(queue_name),
            &message,
            self.config.fsync,
        )?;
        lock.release()?;
        debug!("pushed {} bytes to queue {queue_name:?}", body.as_ref().len());
        Ok(())
    }

    pub fn pull(&self, queue_name: &str) -> Result<Option<Message>> {
        validate_queue_name(queue_name)?;
        self.ensure_queue(queue_name)?;

        let lock = self.lock(queue_name)?;
        let mut pull = PullTransform::new(self.clock.now_millis(), self.config.visibility_timeout);
        rewrite::rewrite(
            &self.layout.queue_dir(queue_name),
            &self.layout.messages_path(queue_name),
            self.config.fsync,
            |message| pull.apply(message),
        )?;
        lock.release()?;

        let pulled = pull.into_pulled();
        if let Some(message) = &pulled {
            debug!(
                "pulled from queue {queue_name:?} attempt {} visible_from {}",
                message.attempts(),
                message.visible_from()
            );
        }
        Ok(pulled)
    }

    pub fn delete(&self, queue_name: &str, receipt_handle: &str) -> Result<()> {
        validate_queue_name(queue_name)?;
        if receipt_handle.is_empty() {
            return Err(Error::InvalidArgument("receipt handle must not be empty"));
        }
        self.ensure_queue(queue_name)?;

        let lock = self.lock(queue_name)?;
        let mut delete = DeleteTransform::new(receipt_handle, self.clock.now_millis());
        rewrite::rewrite(
            &self.layout.queue_dir(queue_name),
            &self.layout.messages_path(queue_name),
            self.config.fsync,
            |message| delete.apply(message),
        )?;
        lock.release()?;

        if delete.deleted() == 0 {
            debug!("delete on queue {queue_name:?} matched no live lease");
        }
        Ok(())
    }

    pub fn stats(&self, queue_name: &str) -> Result<QueueStats> {
        validate_queue_name(queue_name)?;
        self.ensure_queue(queue_name)?;

        let lock = self.lock(queue_name)?;
        let now = self.clock.now_millis();
        let mut stats = QueueStats::default();
        rewrite::scan(&self.layout.messages_path(queue_name), |message| {
            match message.state(now) {
                MessageState::Pending => stats.pending += 1,
                MessageState::InFlight => stats.in_flight += 1,
            }
        })?;
        lock.release()?;
        Ok(stats)
    }

    /// Names of every queue created under the root.
    pub fn list_queues(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.layout.root())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match fs::read_to_string(entry.path().join(crate::layout::NAME_FILE)) {
                Ok(name) => names.push(name),
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
        }
        names.sort();
        Ok(names)
    }

    fn lock(&self, queue_name: &str) -> Result<QueueLock> {
        QueueLock::acquire(
            &self.layout.lock_path(queue_name),
            &self.config.lock,
            &self.clock,
        )
    }

    fn ensure_queue(&self, queue_name: &str) -> Result<()> {
        let messages = self.layout.messages_path(queue_name);
        if messages.exists() {
            return Ok(());
        }
        fs::create_dir_all(self.layout.queue_dir(queue_name))?;
        // The name goes first so a queue with a log is always listed.
        write_name_file(&self.layout.name_path(queue_name), queue_name)?;
        match OpenOptions::new().write(true).create_new(true).open(&messages) {
            Ok(_) => {
                debug!("created queue {queue_name:?} at {}", messages.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

pub(crate) fn validate_queue_name(queue_name: &str) -> Result<()> {
    if queue_name.is_empty() {
        return Err(Error::InvalidArgument("queue name must not be empty"));
    }
    Ok(())
}

/// Writes `name` through a temp file and rename, so a concurrent
/// `list_queues` sees either no file or the whole name.
fn write_name_file(path: &Path, queue_name: &str) -> Result<()> {
    let tmp_path =
        path.with_file_name(format!("{TEMP_PREFIX}-name-{}", Uuid::new_v4().simple()));
    let written = fs::write(&tmp_path, queue_name).and_then(|()| fs::rename(&tmp_path, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
