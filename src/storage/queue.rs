//! In-memory queue store backing the queue sub-protocol.
//!
//! One structure serves both the simple queue/deque compatibility class and
//! the paged class; the registry keeps the classes apart, this store only
//! cares about head/tail discipline and byte accounting.

use super::{QueueEnd, QueueKind, QueueStore, StoreError, StoreResult};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Default, Debug)]
struct QueueInner {
    entries: VecDeque<Bytes>,
    total_bytes: u64,
    destroyed: bool,
}

/// Unbounded in-memory queue with durable head/tail order.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    kind: QueueKind,
    inner: Mutex<QueueInner>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, kind: QueueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    fn alive(&self) -> StoreResult<parking_lot::MutexGuard<'_, QueueInner>> {
        let inner = self.inner.lock();
        if inner.destroyed {
            return Err(StoreError::Destroyed(self.name.clone()));
        }
        Ok(inner)
    }
}

impl QueueStore for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn offer(&self, end: QueueEnd, value: Bytes) -> StoreResult<bool> {
        let mut inner = self.alive()?;
        inner.total_bytes = inner.total_bytes.saturating_add(value.len() as u64);
        match end {
            QueueEnd::Head => inner.entries.push_front(value),
            QueueEnd::Tail => inner.entries.push_back(value),
        }
        Ok(true)
    }

    fn peek(&self, end: QueueEnd) -> StoreResult<Option<Bytes>> {
        let inner = self.alive()?;
        let value = match end {
            QueueEnd::Head => inner.entries.front(),
            QueueEnd::Tail => inner.entries.back(),
        };
        Ok(value.cloned())
    }

    fn poll(&self, end: QueueEnd) -> StoreResult<Option<Bytes>> {
        let mut inner = self.alive()?;
        let value = match end {
            QueueEnd::Head => inner.entries.pop_front(),
            QueueEnd::Tail => inner.entries.pop_back(),
        };
        if let Some(value) = &value {
            inner.total_bytes = inner.total_bytes.saturating_sub(value.len() as u64);
        }
        Ok(value)
    }

    fn size(&self) -> StoreResult<usize> {
        Ok(self.alive()?.entries.len())
    }

    fn clear(&self) -> StoreResult<()> {
        let mut inner = self.alive()?;
        inner.entries.clear();
        inner.total_bytes = 0;
        Ok(())
    }

    fn destroy(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.destroyed = true;
        inner.entries.clear();
        inner.total_bytes = 0;
        Ok(())
    }

    fn is_ready(&self) -> StoreResult<bool> {
        // Unbounded queues always accept offers; reserved for bounded kinds.
        Ok(!self.inner.lock().destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn fifo_discipline_via_tail_offer_head_poll() {
        let queue = MemoryQueue::new("q", QueueKind::Queue);
        queue.offer(QueueEnd::Tail, b("a")).unwrap();
        queue.offer(QueueEnd::Tail, b("b")).unwrap();
        assert_eq!(queue.peek(QueueEnd::Head).unwrap(), Some(b("a")));
        assert_eq!(queue.poll(QueueEnd::Head).unwrap(), Some(b("a")));
        assert_eq!(queue.poll(QueueEnd::Head).unwrap(), Some(b("b")));
        assert_eq!(queue.poll(QueueEnd::Head).unwrap(), None);
    }

    #[test]
    fn deque_discipline_at_both_ends() {
        let queue = MemoryQueue::new("q", QueueKind::Deque);
        queue.offer(QueueEnd::Head, b("middle")).unwrap();
        queue.offer(QueueEnd::Head, b("first")).unwrap();
        queue.offer(QueueEnd::Tail, b("last")).unwrap();
        assert_eq!(queue.size().unwrap(), 3);
        assert_eq!(queue.peek(QueueEnd::Tail).unwrap(), Some(b("last")));
        assert_eq!(queue.poll(QueueEnd::Tail).unwrap(), Some(b("last")));
        assert_eq!(queue.poll(QueueEnd::Head).unwrap(), Some(b("first")));
    }

    #[test]
    fn destroy_rejects_further_operations() {
        let queue = MemoryQueue::new("q", QueueKind::Queue);
        queue.offer(QueueEnd::Tail, b("a")).unwrap();
        queue.destroy().unwrap();
        assert!(matches!(
            queue.peek(QueueEnd::Head).unwrap_err(),
            StoreError::Destroyed(_)
        ));
        assert!(!queue.is_ready().unwrap());
    }
}
