use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::DEFAULT_VISIBILITY_TIMEOUT;
use crate::message::{Message, MessageState};
use crate::rewrite::{DeleteTransform, LineAction, PullTransform};
use crate::store::{validate_queue_name, QueueStats};
use crate::{Error, Result};

/// Process-local queue with the same delivery semantics as
/// [`FileQueue`](crate::FileQueue), without touching the filesystem.
#[derive(Debug)]
pub struct MemoryQueue<C: Clock = SystemClock> {
    queues: Mutex<HashMap<String, Vec<Message>>>,
    visibility_timeout: Duration,
    clock: C,
}

impl Default for MemoryQueue<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> MemoryQueue<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            clock,
        }
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    pub fn push(&self, queue_name: &str, body: impl AsRef<[u8]>) -> Result<()> {
        validate_queue_name(queue_name)?;
        let mut queues = self.lock_queues()?;
        queues
            .entry(queue_name.to_string())
            .or_default()
            .push(Message::pending(body.as_ref()));
        Ok(())
    }

    pub fn pull(&self, queue_name: &str) -> Result<Option<Message>> {
        validate_queue_name(queue_name)?;
        let mut queues = self.lock_queues()?;
        let queue = queues.entry(queue_name.to_string()).or_default();
        let mut pull = PullTransform::new(self.clock.now_millis(), self.visibility_timeout);
        apply_in_place(queue, |message| pull.apply(message));
        Ok(pull.into_pulled())
    }

    pub fn delete(&self, queue_name: &str, receipt_handle: &str) -> Result<()> {
        validate_queue_name(queue_name)?;
        if receipt_handle.is_empty() {
            return Err(Error::InvalidArgument("receipt handle must not be empty"));
        }
        let mut queues = self.lock_queues()?;
        let queue = queues.entry(queue_name.to_string()).or_default();
        let mut delete = DeleteTransform::new(receipt_handle, self.clock.now_millis());
        apply_in_place(queue, |message| delete.apply(message));
        Ok(())
    }

    pub fn stats(&self, queue_name: &str) -> Result<QueueStats> {
        validate_queue_name(queue_name)?;
        let queues = self.lock_queues()?;
        let now = self.clock.now_millis();
        let mut stats = QueueStats::default();
        for message in queues.get(queue_name).into_iter().flatten() {
            match message.state(now) {
                MessageState::Pending => stats.pending += 1,
                MessageState::InFlight => stats.in_flight += 1,
            }
        }
        Ok(stats)
    }

    fn lock_queues(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<Message>>>> {
        self.queues
            .lock()
            .map_err(|_| Error::Poisoned("memory queue"))
    }
}

fn apply_in_place<F>(queue: &mut Vec<Message>, mut transform: F)
where
    F: FnMut(&Message) -> LineAction,
{
    let mut kept = Vec::with_capacity(queue.len());
    for message in queue.drain(..) {
        match transform(&message) {
            LineAction::Keep => kept.push(message),
            LineAction::Replace(replacement) => kept.push(replacement),
            LineAction::Remove => {}
        }
    }
    *queue = kept;
}
