//! Bounded frame FIFO with a drop-oldest overflow policy.
//!
//! Producers (plugin threads) enqueue concurrently while a single tick
//! thread dequeues. Each queue has its own lock; nothing here ever blocks
//! for longer than a `VecDeque` push/pop.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use super::Frame;

pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// Lifetime counters for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub enqueued: u64,
    pub dropped: u64,
}

impl FrameQueue {
    /// Creates a queue holding at most `capacity` frames (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends `frame`. When full, the oldest frame is evicted and returned.
    pub fn enqueue(&self, frame: Frame) -> Option<Frame> {
        let evicted = {
            let mut frames = self.frames.lock();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(frame);
            evicted
        };

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Removes and returns the oldest frame.
    pub fn dequeue(&self) -> Option<Frame> {
        self.frames.lock().pop_front()
    }

    /// Drops every queued frame, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        let n = frames.len();
        frames.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            capacity: self.capacity,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(tag: u8) -> Frame {
        Frame::from(vec![tag; 4])
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(4);
        assert!(queue.is_empty());
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(), Some(frame(1)));
        assert_eq!(queue.dequeue(), Some(frame(2)));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_drop_oldest_keeps_newest_in_order() {
        let capacity = 5;
        let extra = 3;
        let queue = FrameQueue::new(capacity);

        for i in 0..(capacity + extra) as u8 {
            let evicted = queue.enqueue(frame(i));
            if (i as usize) < capacity {
                assert!(evicted.is_none());
            } else {
                assert_eq!(evicted, Some(frame(i - capacity as u8)));
            }
        }

        assert_eq!(queue.len(), capacity);
        let drained: Vec<u8> = std::iter::from_fn(|| queue.dequeue())
            .map(|f| f[0])
            .collect();
        assert_eq!(drained, vec![3, 4, 5, 6, 7]);

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 8);
        assert_eq!(stats.dropped, 3);
    }

    #[test]
    fn test_clear_reports_discarded() {
        let queue = FrameQueue::new(10);
        for i in 0..6 {
            queue.enqueue(frame(i));
        }
        assert_eq!(queue.clear(), 6);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = FrameQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        assert_eq!(queue.dequeue(), Some(frame(2)));
    }

    #[test]
    fn test_concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(FrameQueue::new(50));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        queue.enqueue(frame(t));
                        assert!(queue.len() <= 50);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(queue.len(), 50);
        assert_eq!(queue.stats().enqueued, 1600);
        assert_eq!(queue.dropped(), 1550);
    }
}
