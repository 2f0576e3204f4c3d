use super::types::{CacheKey, Operation};
use std::collections::HashMap;

/// Coalescing accumulator of pending operations.
///
/// Holds only the latest operation per key. Owned exclusively by a flusher,
/// so it needs no locking of its own.
#[derive(Debug)]
pub struct Buffer<K, V> {
    queue: HashMap<K, Operation<V>>,
    limit: usize,
}

impl<K: CacheKey, V> Buffer<K, V> {
    pub fn new(limit: usize) -> Self {
        Self {
            queue: HashMap::new(),
            limit,
        }
    }

    /// Record an operation, replacing whatever was pending for the key
    pub fn add(&mut self, key: K, operation: Operation<V>) {
        self.queue.insert(key, operation);
    }

    /// Re-queue an operation that failed to apply, unless a newer one
    /// for the same key arrived meanwhile
    pub fn restore(&mut self, key: K, operation: Operation<V>) {
        self.queue.entry(key).or_insert(operation);
    }

    /// True once the number of distinct pending keys exceeds the limit
    pub fn over_limit(&self) -> bool {
        self.queue.len() > self.limit
    }

    /// Take every pending operation, leaving the buffer empty
    pub fn take(&mut self) -> HashMap<K, Operation<V>> {
        std::mem::take(&mut self.queue)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_last_write_wins() {
        let mut buffer: Buffer<&str, u32> = Buffer::new(5);

        buffer.add("a", Operation::Set(1));
        buffer.add("a", Operation::Set(2));
        buffer.add("b", Operation::Set(3));
        buffer.add("b", Operation::Remove);

        assert_eq!(buffer.len(), 2);
        let batch = buffer.take();
        assert_eq!(batch.get("a"), Some(&Operation::Set(2)));
        assert_eq!(batch.get("b"), Some(&Operation::Remove));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_limit_counts_distinct_keys() {
        let mut buffer: Buffer<String, u32> = Buffer::new(5);

        for i in 0..5 {
            buffer.add(format!("k{}", i), Operation::Set(i));
        }
        assert!(!buffer.over_limit());

        // Rewriting a pending key does not grow the buffer
        buffer.add("k0".to_string(), Operation::Set(42));
        assert!(!buffer.over_limit());

        buffer.add("k5".to_string(), Operation::Set(5));
        assert!(buffer.over_limit());
    }

    #[test]
    fn test_buffer_restore_keeps_newer_operation() {
        let mut buffer: Buffer<&str, u32> = Buffer::new(5);

        buffer.add("a", Operation::Set(2));
        buffer.restore("a", Operation::Set(1));
        buffer.restore("b", Operation::Remove);

        let batch = buffer.take();
        assert_eq!(batch.get("a"), Some(&Operation::Set(2)));
        assert_eq!(batch.get("b"), Some(&Operation::Remove));
    }
}
