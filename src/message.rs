//! Message records and their single-line log encoding.
//!
//! A record is stored as `attempts:visibleFrom:receiptHandle:base64(body)`.
//! Neither the numeric fields, the receipt handle, nor the base64 alphabet
//! contain the separator, so splitting into at most four fields is lossless.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use uuid::Uuid;

use crate::error::MalformedRecord;

const FIELD_SEPARATOR: char = ':';

/// Token identifying one delivery lease of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Returns `None` for values that cannot round-trip through a log line.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() || value.contains([FIELD_SEPARATOR, '\n', '\r']) {
            return None;
        }
        Some(Self(value))
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery state of a record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Visible and eligible for the next pull.
    Pending,
    /// Leased to a consumer until `visible_from`.
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    attempts: u32,
    visible_from: u64,
    receipt_handle: Option<ReceiptHandle>,
    body: Vec<u8>,
}

impl Message {
    pub fn new(
        attempts: u32,
        visible_from: u64,
        receipt_handle: Option<ReceiptHandle>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            attempts,
            visible_from,
            receipt_handle,
            body: body.into(),
        }
    }

    /// A freshly pushed record: never delivered, visible immediately.
    pub fn pending(body: impl Into<Vec<u8>>) -> Self {
        Self::new(0, 0, None, body)
    }

    /// The record handed out by a pull at `now`: one more attempt, a new
    /// lease, hidden until `now + visibility_timeout`.
    pub fn redeliver(&self, now_millis: u64, visibility_timeout: Duration) -> Self {
        let timeout_ms = u64::try_from(visibility_timeout.as_millis()).unwrap_or(u64::MAX);
        Self {
            attempts: self.attempts.saturating_add(1),
            visible_from: now_millis.saturating_add(timeout_ms),
            receipt_handle: Some(ReceiptHandle::generate()),
            body: self.body.clone(),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn visible_from(&self) -> u64 {
        self.visible_from
    }

    pub fn receipt_handle(&self) -> Option<&ReceiptHandle> {
        self.receipt_handle.as_ref()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn is_visible(&self, now_millis: u64) -> bool {
        self.visible_from <= now_millis
    }

    pub fn state(&self, now_millis: u64) -> MessageState {
        if self.is_visible(now_millis) {
            MessageState::Pending
        } else {
            MessageState::InFlight
        }
    }

    /// True when both records carry the same, present receipt handle.
    pub fn same_delivery(&self, other: &Message) -> bool {
        match (&self.receipt_handle, &other.receipt_handle) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// True when this record is the live lease identified by `receipt_handle`.
    /// An expired lease no longer counts; the message is pending again.
    pub fn holds_lease(&self, receipt_handle: &str, now_millis: u64) -> bool {
        self.state(now_millis) == MessageState::InFlight
            && self
                .receipt_handle
                .as_ref()
                .is_some_and(|handle| handle.as_str() == receipt_handle)
    }

    /// Encodes the record as one log line, without the trailing newline.
    pub fn encode(&self) -> String {
        let handle = self
            .receipt_handle
            .as_ref()
            .map(ReceiptHandle::as_str)
            .unwrap_or("");
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.attempts,
            self.visible_from,
            handle,
            STANDARD.encode(&self.body),
            sep = FIELD_SEPARATOR,
        )
    }

    pub fn decode(line: &str) -> Result<Self, MalformedRecord> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let mut fields = line.splitn(4, FIELD_SEPARATOR);
        let attempts = fields
            .next()
            .ok_or(MalformedRecord::new("missing attempts field"))?
            .parse::<u32>()
            .map_err(|_| MalformedRecord::new("attempts is not a number"))?;
        let visible_from = fields
            .next()
            .ok_or(MalformedRecord::new("missing visible_from field"))?
            .parse::<u64>()
            .map_err(|_| MalformedRecord::new("visible_from is not a number"))?;
        let handle = fields
            .next()
            .ok_or(MalformedRecord::new("missing receipt handle field"))?;
        let body = fields
            .next()
            .ok_or(MalformedRecord::new("missing body field"))?;
        let body = STANDARD
            .decode(body)
            .map_err(|_| MalformedRecord::new("body is not valid base64"))?;
        let receipt_handle = if handle.is_empty() {
            None
        } else {
            Some(ReceiptHandle(handle.to_string()))
        };
        Ok(Self {
            attempts,
            visible_from,
            receipt_handle,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Message, MessageState, ReceiptHandle};

    fn handle(value: &str) -> ReceiptHandle {
        ReceiptHandle::new(value).expect("valid handle")
    }

    #[test]
    fn encodes_pending_record() {
        assert_eq!(Message::pending("hello").encode(), "0:0::aGVsbG8=");
    }

    #[test]
    fn encodes_leased_record() {
        let message = Message::new(1, 123, Some(handle("hash")), "message");
        assert_eq!(message.encode(), "1:123:hash:bWVzc2FnZQ==");
    }

    #[test]
    fn decode_reverses_encode() {
        let body = b"line one\nline:two\r\n\x00\xff".to_vec();
        let message = Message::new(7, 42_000, Some(ReceiptHandle::generate()), body);
        let decoded = Message::decode(&message.encode()).expect("decode");
        assert_eq!(decoded, message);

        let empty = Message::pending(Vec::new());
        assert_eq!(Message::decode(&empty.encode()).expect("decode"), empty);
    }

    #[test]
    fn decode_tolerates_crlf() {
        let decoded = Message::decode("0:0::aGVsbG8=\r").expect("decode");
        assert_eq!(decoded.body(), b"hello");
    }

    #[test]
    fn decode_rejects_malformed_lines() {
        for line in [
            "",
            "1:2:handle",
            "x:0::aGVsbG8=",
            "0:-1::aGVsbG8=",
            "0:0::not base64!",
        ] {
            assert!(Message::decode(line).is_err(), "accepted {line:?}");
        }
    }

    #[test]
    fn receipt_handle_rejects_line_unsafe_values() {
        assert!(ReceiptHandle::new("").is_none());
        assert!(ReceiptHandle::new("a:b").is_none());
        assert!(ReceiptHandle::new("a\nb").is_none());
        assert_ne!(ReceiptHandle::generate(), ReceiptHandle::generate());
    }

    #[test]
    fn redeliver_starts_a_new_lease() {
        let pushed = Message::pending("body");
        let pulled = pushed.redeliver(1_000, Duration::from_secs(30));
        assert_eq!(pulled.attempts(), 1);
        assert_eq!(pulled.visible_from(), 31_000);
        assert_eq!(pulled.body(), b"body");
        assert!(pulled.receipt_handle().is_some());

        let again = pulled.redeliver(31_000, Duration::from_secs(30));
        assert_eq!(again.attempts(), 2);
        assert!(!again.same_delivery(&pulled));
    }

    #[test]
    fn state_follows_visibility_boundary() {
        let leased = Message::new(1, 30_000, Some(handle("r1")), "x");
        assert_eq!(leased.state(29_999), MessageState::InFlight);
        assert_eq!(leased.state(30_000), MessageState::Pending);
        assert!(leased.holds_lease("r1", 29_999));
        assert!(!leased.holds_lease("r1", 30_000));
        assert!(!leased.holds_lease("r2", 0));
    }

    #[test]
    fn same_delivery_requires_present_handles() {
        let a = Message::pending("a");
        let b = Message::pending("b");
        assert!(!a.same_delivery(&b));

        let leased = Message::new(1, 10, Some(handle("r1")), "a");
        let other_body = Message::new(3, 99, Some(handle("r1")), "b");
        assert!(leased.same_delivery(&other_body));
    }
}
