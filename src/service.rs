use crate::clock::Clock;
use crate::memory::MemoryQueue;
use crate::message::Message;
use crate::store::FileQueue;
use crate::Result;

/// The push/pull/delete contract shared by every queue backend.
///
/// Delivery is at-least-once: a pulled message stays leased for the backend's
/// visibility timeout and reappears unless deleted with its receipt handle.
pub trait QueueService: Send + Sync {
    fn push(&self, queue_name: &str, body: &[u8]) -> Result<()>;

    /// Leases the oldest visible message, if any.
    fn pull(&self, queue_name: &str) -> Result<Option<Message>>;

    /// Removes the message leased under `receipt_handle`. Unknown or expired
    /// handles are ignored.
    fn delete(&self, queue_name: &str, receipt_handle: &str) -> Result<()>;
}

impl<C: Clock> QueueService for FileQueue<C> {
    fn push(&self, queue_name: &str, body: &[u8]) -> Result<()> {
        FileQueue::push(self, queue_name, body)
    }

    fn pull(&self, queue_name: &str) -> Result<Option<Message>> {
        FileQueue::pull(self, queue_name)
    }

    fn delete(&self, queue_name: &str, receipt_handle: &str) -> Result<()> {
        FileQueue::delete(self, queue_name, receipt_handle)
    }
}

impl<C: Clock> QueueService for MemoryQueue<C> {
    fn push(&self, queue_name: &str, body: &[u8]) -> Result<()> {
        MemoryQueue::push(self, queue_name, body)
    }

    fn pull(&self, queue_name: &str) -> Result<Option<Message>> {
        MemoryQueue::pull(self, queue_name)
    }

    fn delete(&self, queue_name: &str, receipt_handle: &str) -> Result<()> {
        MemoryQueue::delete(self, queue_name, receipt_handle)
    }
}
