//! Keyed registry of replay buffers.

use super::buffer::{BufferKey, ReplayBuffer};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct BufferRegistry {
    buffers: DashMap<BufferKey, Arc<ReplayBuffer>>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer for `key`, created empty on first use
    pub fn acquire(&self, key: BufferKey) -> Arc<ReplayBuffer> {
        self.buffers
            .entry(key.clone())
            .or_insert_with(|| {
                debug!("Creating log buffer for {}/{}", key.subject_id, key.task_id);
                Arc::new(ReplayBuffer::new(key))
            })
            .clone()
    }

    pub fn get(&self, key: &BufferKey) -> Option<Arc<ReplayBuffer>> {
        self.buffers.get(key).map(|entry| entry.clone())
    }

    /// Tear a buffer down; its subscriptions end and a later `acquire` starts fresh
    pub fn release(&self, key: &BufferKey) -> Option<Arc<ReplayBuffer>> {
        let (_, buffer) = self.buffers.remove(key)?;
        buffer.release();
        Some(buffer)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::buffer::LogEvent;

    #[test]
    fn test_acquire_is_shared_per_key() {
        let registry = BufferRegistry::new();
        let a = registry.acquire(BufferKey::new("pb-1", "0"));
        let b = registry.acquire(BufferKey::new("pb-1", "0"));
        let other = registry.acquire(BufferKey::new("pb-1", "1"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_release_discards_history() {
        let registry = BufferRegistry::new();
        let key = BufferKey::new("pb-1", "0");
        let old = registry.acquire(key.clone());
        old.emit(LogEvent::Logs("old".into()));
        old.mark_reached_end();

        assert!(registry.release(&key).is_some());
        assert!(registry.get(&key).is_none());
        assert!(registry.release(&key).is_none());

        let fresh = registry.acquire(key);
        assert!(fresh.snapshot().is_empty());
        assert!(!fresh.has_reached_end());
    }
}
