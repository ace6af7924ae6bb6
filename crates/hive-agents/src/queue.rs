//! Bounded priority queue for pending management commands.
//!
//! Many producers (protocol sessions) and many consumers (the
//! scheduler's drain workers) share one queue. Higher priority classes
//! drain first; within a class, order is strictly FIFO via a
//! monotonically increasing sequence number. Overflow rejects the
//! command rather than blocking the producer.

use std::collections::BinaryHeap;
use std::sync::Mutex;

use hive_types::Command;

use crate::error::QueueError;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Heap entry ordering: priority class descending, then sequence
/// ascending (FIFO within a class).
#[derive(Debug)]
struct QueuedCommand {
    command: Command,
    seq: u64,
}

impl PartialEq for QueuedCommand {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedCommand {}

impl PartialOrd for QueuedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedCommand {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.command
            .priority
            .level()
            .cmp(&other.command.priority.level())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Queue state behind the lock.
#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedCommand>,
    seq: u64,
}

/// The bounded, thread-safe command queue.
#[derive(Debug)]
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl CommandQueue {
    /// Build a queue bounded to `capacity` commands (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a command.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueFull`] when the queue is at capacity;
    /// the command is dropped and the caller decides how to surface it.
    pub fn enqueue(&self, command: Command) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if inner.heap.len() >= self.capacity {
            return Err(QueueError::QueueFull);
        }
        inner.seq = inner.seq.saturating_add(1);
        let seq = inner.seq;
        inner.heap.push(QueuedCommand { command, seq });
        Ok(())
    }

    /// Pop the highest-priority command, or `None` when empty.
    pub fn dequeue(&self) -> Option<Command> {
        self.lock().heap.pop().map(|entry| entry.command)
    }

    /// Pop up to `max` commands in priority order.
    pub fn dequeue_batch(&self, max: usize) -> Vec<Command> {
        let mut inner = self.lock();
        let mut batch = Vec::with_capacity(max.min(inner.heap.len()));
        while batch.len() < max {
            match inner.heap.pop() {
                Some(entry) => batch.push(entry.command),
                None => break,
            }
        }
        batch
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// The configured capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take the lock, recovering from poisoning.
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hive_types::{CommandKind, CommandPriority};

    use super::*;

    fn command(priority: CommandPriority, tag: u64) -> Command {
        Command::new(
            CommandKind::Update,
            None,
            serde_json::json!({ "tag": tag }),
            priority,
        )
    }

    fn tag_of(command: &Command) -> u64 {
        command.payload.get("tag").and_then(serde_json::Value::as_u64).unwrap()
    }

    #[test]
    fn higher_priority_drains_first() {
        let queue = CommandQueue::default();
        queue.enqueue(command(CommandPriority::Low, 1)).unwrap();
        queue.enqueue(command(CommandPriority::Critical, 2)).unwrap();
        queue.enqueue(command(CommandPriority::Normal, 3)).unwrap();

        assert_eq!(tag_of(&queue.dequeue().unwrap()), 2);
        assert_eq!(tag_of(&queue.dequeue().unwrap()), 3);
        assert_eq!(tag_of(&queue.dequeue().unwrap()), 1);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn fifo_within_priority_class() {
        let queue = CommandQueue::default();
        for tag in 0..20 {
            queue.enqueue(command(CommandPriority::Normal, tag)).unwrap();
        }
        for expected in 0..20 {
            assert_eq!(tag_of(&queue.dequeue().unwrap()), expected);
        }
    }

    #[test]
    fn overflow_rejects() {
        let queue = CommandQueue::with_capacity(2);
        queue.enqueue(command(CommandPriority::Normal, 1)).unwrap();
        queue.enqueue(command(CommandPriority::Normal, 2)).unwrap();
        assert_eq!(
            queue.enqueue(command(CommandPriority::Critical, 3)),
            Err(QueueError::QueueFull)
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn dequeue_batch_respects_order_and_limit() {
        let queue = CommandQueue::default();
        queue.enqueue(command(CommandPriority::Normal, 1)).unwrap();
        queue.enqueue(command(CommandPriority::High, 2)).unwrap();
        queue.enqueue(command(CommandPriority::Normal, 3)).unwrap();

        let batch = queue.dequeue_batch(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(tag_of(batch.first().unwrap()), 2);
        assert_eq!(tag_of(batch.get(1).unwrap()), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn concurrent_producers_and_consumers() {
        use std::sync::Arc;

        let queue = Arc::new(CommandQueue::default());
        let mut handles = Vec::new();
        for t in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                for i in 0..100_u64 {
                    let tag = t * 1000 + i;
                    queue
                        .enqueue(command(CommandPriority::Normal, tag))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut drained = 0;
        while queue.dequeue().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 400);
    }
}
