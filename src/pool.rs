use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use crate::util::lock_unpoisoned;

const MAX_POOLED_BUFFERS: usize = 8;

/// Free-list of staging buffers for outgoing bodies.
///
/// Owned by the execution engine and scoped to its lifetime. Checkout hands
/// back a guard; dropping the guard clears the buffer and returns it, so a
/// buffer can never re-enter the pool while an in-flight request still
/// references it.
pub(crate) struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub(crate) fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn checkout(&self) -> PooledBuf<'_> {
        let buffer = lock_unpoisoned(&self.free).pop().unwrap_or_default();
        PooledBuf { pool: self, buffer }
    }

    fn put_back(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        let mut free = lock_unpoisoned(&self.free);
        if free.len() < MAX_POOLED_BUFFERS {
            free.push(buffer);
        }
    }
}

pub(crate) struct PooledBuf<'a> {
    pool: &'a BufferPool,
    buffer: Vec<u8>,
}

impl Deref for PooledBuf<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buffer
    }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        self.pool.put_back(std::mem::take(&mut self.buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::BufferPool;

    #[test]
    fn returned_buffers_are_reused_and_cleared() {
        let pool = BufferPool::new();
        {
            let mut staged = pool.checkout();
            staged.extend_from_slice(b"payload");
            assert_eq!(staged.len(), 7);
        }
        let reused = pool.checkout();
        assert!(reused.is_empty());
        assert!(reused.capacity() >= 7);
    }

    #[test]
    fn concurrent_checkouts_get_distinct_buffers() {
        let pool = BufferPool::new();
        let mut first = pool.checkout();
        let mut second = pool.checkout();
        first.extend_from_slice(b"a");
        second.extend_from_slice(b"bb");
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
    }
}
