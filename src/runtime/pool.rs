use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

/// A bounded pool of reusable byte buffers.
///
/// Connection loops check a buffer out for the lifetime of a connection
/// and return it on close; when the pool is empty a fresh buffer is
/// allocated, and returns beyond capacity are dropped. Shared across
/// workers with interior synchronization only at checkout/checkin.
#[derive(Debug, Clone)]
pub(crate) struct BufferPool {
    queue: Arc<ArrayQueue<Vec<u8>>>,
    buffer_size: usize,
}

impl BufferPool {
    pub(crate) fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            buffer_size,
        }
    }

    /// A cleared buffer of `buffer_size` capacity, pooled or fresh.
    pub(crate) fn checkout(&self) -> Vec<u8> {
        match self.queue.pop() {
            Some(mut buffer) => {
                buffer.clear();
                buffer
            }
            None => Vec::with_capacity(self.buffer_size),
        }
    }

    /// Returns a buffer. Oversized or surplus buffers are dropped so the
    /// pool cannot grow past its configured footprint.
    pub(crate) fn checkin(&self, buffer: Vec<u8>) {
        if buffer.capacity() <= self.buffer_size * 2 {
            let _ = self.queue.push(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_reuses_returned_buffers() {
        let pool = BufferPool::new(2, 1024);

        let mut buffer = pool.checkout();
        buffer.extend_from_slice(b"residue");
        let ptr = buffer.as_ptr();
        pool.checkin(buffer);

        let reused = pool.checkout();
        assert!(reused.is_empty());
        assert_eq!(reused.as_ptr(), ptr);
    }

    #[test]
    fn empty_pool_allocates() {
        let pool = BufferPool::new(1, 64);
        let buffer = pool.checkout();
        assert!(buffer.capacity() >= 64);
    }

    #[test]
    fn oversized_buffers_are_dropped() {
        let pool = BufferPool::new(2, 16);
        pool.checkin(Vec::with_capacity(1024));

        // The bloated buffer was not retained.
        assert!(pool.checkout().capacity() < 1024);
    }

    #[test]
    fn returns_beyond_capacity_are_dropped() {
        let pool = BufferPool::new(1, 16);
        pool.checkin(Vec::with_capacity(16));
        pool.checkin(Vec::with_capacity(16));
        // No panic; the second return is simply discarded.
    }
}
