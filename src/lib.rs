//! Durable file-backed message queue with visibility-timeout redelivery.
//!
//! Each queue is a line-oriented log under a root directory. Pushes append a
//! line; pulls and deletes rewrite the whole log into a temporary file and
//! rename it into place, all under a per-queue directory lock shared by every
//! process using the same root.

pub mod clock;
pub mod config;
pub mod error;
pub mod layout;
pub mod lock;
pub mod memory;
pub mod message;
pub mod rewrite;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LockConfig, StoreConfig};
pub use error::{Error, MalformedRecord, Result};
pub use memory::MemoryQueue;
pub use message::{Message, MessageState, ReceiptHandle};
pub use service::QueueService;
pub use store::{FileQueue, QueueStats};
