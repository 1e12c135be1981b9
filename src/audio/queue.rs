//! Bounded drop-oldest frame queue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::AudioFrame;

/// Granularity at which a waiting producer rechecks its cancel flag
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// How long [`FrameQueue::next_frame`] may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately
    NonBlocking,
    /// Wait up to the given duration
    Timeout(Duration),
    /// Wait until a frame arrives or the queue is closed
    Blocking,
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<AudioFrame>,
    closed: bool,
}

/// Bounded single-producer / single-consumer frame queue
///
/// [`push`](Self::push) never blocks: when full, the oldest queued frame is
/// discarded and the drop counter incremented. Finite sources that must not
/// lose frames use [`push_waiting`](Self::push_waiting) instead.
#[derive(Debug)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    space: Condvar,
    capacity: usize,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            ready: Condvar::new(),
            space: Condvar::new(),
            capacity: capacity.max(1),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Enqueue a frame, dropping the oldest one if full
    ///
    /// Returns `true` if a frame was dropped. Frames pushed after
    /// [`close`](Self::close) are discarded and counted as dropped.
    pub fn push(&self, frame: AudioFrame) -> bool {
        let state = self.lock();
        self.push_locked(state, frame)
    }

    /// Enqueue a frame, waiting while the queue is full
    ///
    /// Once `cancel` is set the wait ends and the frame is pushed as by
    /// [`push`](Self::push). Returns `true` if a frame was dropped.
    pub fn push_waiting(&self, frame: AudioFrame, cancel: &AtomicBool) -> bool {
        let mut state = self.lock();
        while state.frames.len() >= self.capacity && !state.closed && !cancel.load(Ordering::Acquire) {
            state = self
                .space
                .wait_timeout(state, CANCEL_POLL)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        }
        self.push_locked(state, frame)
    }

    fn push_locked(&self, mut state: MutexGuard<'_, QueueState>, frame: AudioFrame) -> bool {
        self.pushed.fetch_add(1, Ordering::Relaxed);

        if state.closed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let mut dropped = false;
        if state.frames.len() >= self.capacity
            && let Some(old) = state.frames.pop_front()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(seq = old.seq, "frame queue full, dropped oldest frame");
            dropped = true;
        }

        state.frames.push_back(frame);
        drop(state);
        self.ready.notify_one();
        dropped
    }

    /// Dequeue the next frame
    ///
    /// Returns `None` when nothing arrived within `wait` or the queue is closed
    /// and empty.
    #[must_use]
    pub fn next_frame(&self, wait: Wait) -> Option<AudioFrame> {
        let mut state = self.lock();

        match wait {
            Wait::NonBlocking => {}
            Wait::Blocking => {
                while state.frames.is_empty() && !state.closed {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
            }
            Wait::Timeout(timeout) => {
                let deadline = Instant::now() + timeout;
                while state.frames.is_empty() && !state.closed {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    state = self
                        .ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0;
                }
            }
        }

        let frame = state.frames.pop_front();
        drop(state);
        if frame.is_some() {
            self.space.notify_one();
        }
        frame
    }

    /// Stop accepting frames and wake any waiting consumer
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
        self.space.notify_all();
    }

    /// Whether the queue is closed and fully consumed
    #[must_use]
    pub fn is_finished(&self) -> bool {
        let state = self.lock();
        state.closed && state.frames.is_empty()
    }

    /// Remove and return every queued frame
    #[must_use]
    pub fn drain(&self) -> Vec<AudioFrame> {
        let frames: Vec<_> = self.lock().frames.drain(..).collect();
        self.space.notify_all();
        frames
    }

    /// Discard every queued frame, returning how many were discarded
    #[must_use]
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let n = state.frames.len();
        state.frames.clear();
        drop(state);
        self.space.notify_all();
        n
    }

    /// Frames currently queued
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    /// Whether no frames are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued frames
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames pushed so far
    #[must_use]
    pub fn frames_pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Frames discarded because the queue was full or closed
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
