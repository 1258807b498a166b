//! Behaviour every `QueueService` backend must share, run against each one.

use fileq::{FileQueue, ManualClock, MemoryQueue, QueueService, StoreConfig};
use tempfile::TempDir;

const QUEUE: &str = "orders";
const TIMEOUT_MS: u64 = 30_000;

struct Fixture {
    clock: ManualClock,
    service: Box<dyn QueueService>,
    _dir: Option<TempDir>,
}

fn file_fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = ManualClock::new(0);
    let config = StoreConfig::new(dir.path()).unsynced();
    let service = FileQueue::open_with_clock(config, clock.clone()).expect("open file queue");
    Fixture {
        clock,
        service: Box::new(service),
        _dir: Some(dir),
    }
}

fn memory_fixture() -> Fixture {
    let clock = ManualClock::new(0);
    let service = MemoryQueue::with_clock(clock.clone());
    Fixture {
        clock,
        service: Box::new(service),
        _dir: None,
    }
}

fn handle_of(message: &fileq::Message) -> String {
    message.receipt_handle().expect("receipt handle").to_string()
}

fn push_rejects_empty_queue_name(f: Fixture) {
    let err = f.service.push("", b"body").expect_err("empty queue name");
    assert!(matches!(err, fileq::Error::InvalidArgument(_)));
}

fn pull_rejects_empty_queue_name(f: Fixture) {
    let err = f.service.pull("").expect_err("empty queue name");
    assert!(matches!(err, fileq::Error::InvalidArgument(_)));
}

fn delete_rejects_empty_arguments(f: Fixture) {
    for (queue, handle) in [("", "handle"), (QUEUE, ""), ("", "")] {
        let err = f.service.delete(queue, handle).expect_err("empty argument");
        assert!(matches!(err, fileq::Error::InvalidArgument(_)));
    }
}

fn pull_returns_pushed_message(f: Fixture) {
    f.service.push(QUEUE, b"hello\nworld").expect("push");
    let message = f.service.pull(QUEUE).expect("pull").expect("message");
    assert_eq!(message.body(), b"hello\nworld");
    assert_eq!(message.attempts(), 1);
    assert_eq!(message.visible_from(), TIMEOUT_MS);
    assert!(message.receipt_handle().is_some());
}

fn binary_body_survives(f: Fixture) {
    let body: Vec<u8> = (0..=255).collect();
    f.service.push(QUEUE, &body).expect("push");
    f.service.push(QUEUE, b"").expect("push empty");
    assert_eq!(f.service.pull(QUEUE).expect("pull").expect("message").body(), &body[..]);
    assert!(f.service.pull(QUEUE).expect("pull").expect("message").body().is_empty());
}

fn pull_from_empty_queue_returns_nothing(f: Fixture) {
    assert!(f.service.pull(QUEUE).expect("pull").is_none());
}

fn delete_on_empty_queue_is_noop(f: Fixture) {
    f.service.delete(QUEUE, "no-such-handle").expect("delete");
}

fn delete_with_unknown_handle_is_noop(f: Fixture) {
    f.service.push(QUEUE, b"kept").expect("push");
    f.service.pull(QUEUE).expect("pull").expect("message");
    f.service.delete(QUEUE, "no-such-handle").expect("delete");

    f.clock.set(TIMEOUT_MS);
    let again = f.service.pull(QUEUE).expect("pull").expect("redelivered");
    assert_eq!(again.body(), b"kept");
}

fn queue_is_fifo(f: Fixture) {
    f.service.push(QUEUE, b"first").expect("push");
    f.service.push(QUEUE, b"second").expect("push");
    let first = f.service.pull(QUEUE).expect("pull").expect("first");
    let second = f.service.pull(QUEUE).expect("pull").expect("second");
    assert_eq!(first.body(), b"first");
    assert_eq!(second.body(), b"second");
    assert!(f.service.pull(QUEUE).expect("pull").is_none());
}

fn message_hidden_until_visibility_timeout(f: Fixture) {
    f.service.push(QUEUE, b"body").expect("push");
    f.service.pull(QUEUE).expect("pull").expect("message");
    f.clock.set(TIMEOUT_MS - 1);
    assert!(f.service.pull(QUEUE).expect("pull").is_none());
}

fn message_redelivered_at_visibility_timeout(f: Fixture) {
    f.service.push(QUEUE, b"body").expect("push");
    let first = f.service.pull(QUEUE).expect("pull").expect("message");
    f.clock.set(first.visible_from());

    let second = f.service.pull(QUEUE).expect("pull").expect("redelivered");
    assert_eq!(second.body(), b"body");
    assert_eq!(second.attempts(), 2);
    assert_eq!(second.visible_from(), 2 * TIMEOUT_MS);
    assert_ne!(handle_of(&first), handle_of(&second));
}

fn message_redelivered_after_visibility_timeout(f: Fixture) {
    f.service.push(QUEUE, b"body").expect("push");
    f.service.pull(QUEUE).expect("pull").expect("message");
    f.clock.set(TIMEOUT_MS + 1);
    let again = f.service.pull(QUEUE).expect("pull").expect("redelivered");
    assert_eq!(again.body(), b"body");
}

fn deleted_message_never_returns(f: Fixture) {
    f.service.push(QUEUE, b"body").expect("push");
    let message = f.service.pull(QUEUE).expect("pull").expect("message");
    f.service.delete(QUEUE, &handle_of(&message)).expect("delete");

    assert!(f.service.pull(QUEUE).expect("pull").is_none());
    f.clock.set(10 * TIMEOUT_MS);
    assert!(f.service.pull(QUEUE).expect("pull").is_none());
}

fn expired_lease_cannot_be_deleted(f: Fixture) {
    f.service.push(QUEUE, b"body").expect("push");
    let stale = f.service.pull(QUEUE).expect("pull").expect("message");
    f.clock.set(TIMEOUT_MS);
    f.service.delete(QUEUE, &handle_of(&stale)).expect("delete");

    let again = f.service.pull(QUEUE).expect("pull").expect("still queued");
    assert_eq!(again.attempts(), 2);
}

fn redelivery_keeps_original_position(f: Fixture) {
    f.service.push(QUEUE, b"a").expect("push");
    f.service.push(QUEUE, b"b").expect("push");
    assert_eq!(f.service.pull(QUEUE).expect("pull").expect("a").body(), b"a");
    assert_eq!(f.service.pull(QUEUE).expect("pull").expect("b").body(), b"b");

    // "a" is leased again at 30s, so "b" has been visible longer at 60s.
    f.clock.set(TIMEOUT_MS);
    assert_eq!(f.service.pull(QUEUE).expect("pull").expect("a").body(), b"a");
    f.clock.set(2 * TIMEOUT_MS);
    assert_eq!(f.service.pull(QUEUE).expect("pull").expect("a").body(), b"a");
}

fn queues_are_isolated(f: Fixture) {
    f.service.push("left", b"l").expect("push");
    f.service.push("right", b"r").expect("push");
    assert_eq!(f.service.pull("right").expect("pull").expect("r").body(), b"r");
    assert!(f.service.pull("right").expect("pull").is_none());
    assert_eq!(f.service.pull("left").expect("pull").expect("l").body(), b"l");
}

fn scenario_from_push_to_delete(f: Fixture) {
    f.service.push("Q", b"hello").expect("push");

    let r1 = f.service.pull("Q").expect("pull").expect("message");
    assert_eq!(r1.body(), b"hello");
    assert_eq!(r1.attempts(), 1);
    assert_eq!(r1.visible_from(), 30_000);

    f.clock.set(29_999);
    assert!(f.service.pull("Q").expect("pull").is_none());

    f.clock.set(30_000);
    let r2 = f.service.pull("Q").expect("pull").expect("redelivered");
    assert_eq!(r2.body(), b"hello");
    assert_eq!(r2.attempts(), 2);
    assert_ne!(handle_of(&r1), handle_of(&r2));

    f.service.delete("Q", &handle_of(&r2)).expect("delete");
    f.clock.set(60_000);
    assert!(f.service.pull("Q").expect("pull").is_none());
}

macro_rules! conformance {
    ($backend:ident, $fixture:path) => {
        mod $backend {
            conformance!(@cases $fixture;
                push_rejects_empty_queue_name,
                pull_rejects_empty_queue_name,
                delete_rejects_empty_arguments,
                pull_returns_pushed_message,
                binary_body_survives,
                pull_from_empty_queue_returns_nothing,
                delete_on_empty_queue_is_noop,
                delete_with_unknown_handle_is_noop,
                queue_is_fifo,
                message_hidden_until_visibility_timeout,
                message_redelivered_at_visibility_timeout,
                message_redelivered_after_visibility_timeout,
                deleted_message_never_returns,
                expired_lease_cannot_be_deleted,
                redelivery_keeps_original_position,
                queues_are_isolated,
                scenario_from_push_to_delete,
            );
        }
    };
    (@cases $fixture:path; $($case:ident),* $(,)?) => {
        $(
            #[test]
            fn $case() {
                super::$case($fixture());
            }
        )*
    };
}

conformance!(file, super::file_fixture);
conformance!(memory, super::memory_fixture);
