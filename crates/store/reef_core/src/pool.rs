//! A bounded free-list of packing buffers.
//!
//! Steady-state send/receive paths borrow a scratch buffer per message;
//! returning it on every exit path keeps the allocator out of the hot
//! loop.

use parking_lot::Mutex;

pub struct BufPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_free: usize,
    buf_size: usize,
}

impl BufPool {
    pub fn new(max_free: usize, buf_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_free)),
            max_free,
            buf_size,
        }
    }

    pub fn alloc(&self) -> Vec<u8> {
        if let Some(buf) = self.free.lock().pop() {
            return buf;
        }
        Vec::with_capacity(self.buf_size)
    }

    /// Return a buffer. Oversized or surplus buffers are dropped instead
    /// of hoarded.
    pub fn free(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.buf_size * 2 {
            return;
        }
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_free {
            free.push(buf);
        }
    }

    #[cfg(test)]
    fn num_free(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for BufPool {
    fn default() -> Self {
        Self::new(64, 32 * 1024)
    }
}
