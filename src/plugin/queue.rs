//! Bounded drop-oldest buffer queue and the drain worker that empties it.
//!
//! Producers (the channel adapter or an upstream `push_data`) never block:
//! when the queue is full the oldest buffer is evicted. The worker waits on
//! the queue for at most one wait interval at a time, so a stop request is
//! observed promptly even when no data arrives.

use crate::buffer::AvTransBuffer;
use crate::error::{PluginError, PluginResult};
use crate::observability::{record_buffer_dropped, span_plugin};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A bounded queue that drops the oldest buffer when full.
pub struct BufferQueue {
    name: String,
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

struct QueueState {
    buffers: VecDeque<AvTransBuffer>,
    capacity: usize,
    total_pushed: u64,
    total_popped: u64,
    total_dropped: u64,
}

/// Counters describing queue activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Buffers currently queued.
    pub current_buffers: usize,
    /// Buffers ever pushed.
    pub total_pushed: u64,
    /// Buffers ever popped.
    pub total_popped: u64,
    /// Buffers evicted because the queue was full.
    pub total_dropped: u64,
}

impl BufferQueue {
    /// Create a queue holding at most `capacity` buffers (minimum 1).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                buffers: VecDeque::with_capacity(capacity),
                capacity,
                total_pushed: 0,
                total_popped: 0,
                total_dropped: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueue a buffer, returning the evicted one if the queue was full.
    pub fn push(&self, buffer: AvTransBuffer) -> Option<AvTransBuffer> {
        let mut state = self.state.lock().unwrap();
        let evicted = if state.buffers.len() >= state.capacity {
            state.total_dropped += 1;
            state.buffers.pop_front()
        } else {
            None
        };
        state.buffers.push_back(buffer);
        state.total_pushed += 1;
        drop(state);

        self.not_empty.notify_one();
        if evicted.is_some() {
            tracing::debug!(queue = %self.name, "queue full, dropped oldest buffer");
            record_buffer_dropped(&self.name);
        }
        evicted
    }

    /// Dequeue a buffer, waiting at most `wait` for one to arrive.
    pub fn pop_timeout(&self, wait: Duration) -> Option<AvTransBuffer> {
        let state = self.state.lock().unwrap();
        let (mut state, _) = self
            .not_empty
            .wait_timeout_while(state, wait, |s| s.buffers.is_empty())
            .unwrap();
        let buffer = state.buffers.pop_front();
        if buffer.is_some() {
            state.total_popped += 1;
        }
        buffer
    }

    /// Drop every queued buffer.
    pub fn clear(&self) {
        self.state.lock().unwrap().buffers.clear();
    }

    /// Wake every waiting consumer.
    pub fn wake_all(&self) {
        self.not_empty.notify_all();
    }

    /// Buffers currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued buffers.
    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().capacity
    }

    /// Activity counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().unwrap();
        QueueStats {
            current_buffers: state.buffers.len(),
            total_pushed: state.total_pushed,
            total_popped: state.total_popped,
            total_dropped: state.total_dropped,
        }
    }
}

impl std::fmt::Debug for BufferQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferQueue")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A dedicated thread that drains a [`BufferQueue`] into a handler.
///
/// The worker is created stopped. [`DrainWorker::start`] spawns the thread;
/// [`DrainWorker::stop`] signals it and joins it, so the handler is not
/// running once `stop` returns. Stopping from the worker's own thread (for
/// example from inside the handler) signals without joining.
pub struct DrainWorker {
    name: String,
    queue: Arc<BufferQueue>,
    wait: Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DrainWorker {
    /// Create a stopped worker.
    pub fn new(name: impl Into<String>, queue: Arc<BufferQueue>, wait: Duration) -> Self {
        Self {
            name: name.into(),
            queue,
            wait,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// [`PluginError::WrongState`] if already running,
    /// [`PluginError::InvalidOperation`] if the thread cannot be spawned.
    pub fn start<F>(&mut self, mut handler: F) -> PluginResult
    where
        F: FnMut(AvTransBuffer) + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(PluginError::WrongState);
        }
        // A thread detached by a self-stop keeps the flag it was started with.
        self.running = Arc::new(AtomicBool::new(true));

        let running = Arc::clone(&self.running);
        let queue = Arc::clone(&self.queue);
        let wait = self.wait;
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _span = span_plugin(&name).entered();
                tracing::debug!("drain worker started");
                while running.load(Ordering::Acquire) {
                    let Some(buffer) = queue.pop_timeout(wait) else {
                        continue;
                    };
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    handler(buffer);
                }
                tracing::debug!("drain worker exited");
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                tracing::error!(worker = %self.name, error = %err, "failed to spawn drain worker");
                Err(PluginError::InvalidOperation)
            }
        }
    }

    /// Signal the worker and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.queue.wake_all();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!(worker = %self.name, "drain worker panicked");
        }
    }

    /// Whether the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for DrainWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
