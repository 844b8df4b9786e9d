//! Time- and size-bounded batching of outbound actions.
//!
//! A queue flushes when it reaches `max_size`, when the oldest queued action
//! has waited `max_latency`, or when the flush timer fires. The timer is
//! armed on the first enqueue after a flush with a delay of
//! `min(flush_interval, max_latency)`, so silence after an enqueue still
//! flushes inside the latency ceiling.
//!
//! The timer needs a tokio runtime. Without one the queue still batches and
//! flushes on size and latency.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, Weak};

use paintnook_core::Action;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::BatchConfig;
use crate::error::QueueError;
use crate::lock;

/// Receives each flushed batch, oldest action first. An error puts the batch
/// back at the head of the queue.
pub type FlushFn = Arc<dyn Fn(&[Action]) -> Result<(), QueueError> + Send + Sync>;

struct QueueState {
    items: Vec<Action>,
    first_enqueued: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is cancelled, so a timer that already woke
    /// up can tell it has been superseded.
    timer_generation: u64,
    paused: bool,
    config: BatchConfig,
}

impl QueueState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_generation = self.timer_generation.wrapping_add(1);
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    on_flush: FlushFn,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            state.cancel_timer();
        }
    }
}

/// Outbound action batcher. Cloning shares the same queue.
#[derive(Clone)]
pub struct ActionQueue {
    inner: Arc<QueueInner>,
}

impl ActionQueue {
    pub fn new<F>(config: BatchConfig, on_flush: F) -> Self
    where
        F: Fn(&[Action]) -> Result<(), QueueError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: Vec::with_capacity(config.max_size.min(1024)),
                    first_enqueued: None,
                    timer: None,
                    timer_generation: 0,
                    paused: false,
                    config,
                }),
                on_flush: Arc::new(on_flush),
            }),
        }
    }

    /// Queue an action. Ignored while paused.
    ///
    /// Flushes synchronously when the size or latency ceiling is reached;
    /// the flush callback's error is returned in that case.
    pub fn enqueue(&self, action: Action) -> Result<(), QueueError> {
        let flush_now = {
            let mut st = lock(&self.inner.state);
            if st.paused {
                log::debug!("Queue paused, dropping action {}", action.id);
                return Ok(());
            }

            st.items.push(action);
            let first = *st.first_enqueued.get_or_insert_with(Instant::now);
            let full = st.items.len() >= st.config.max_size;
            let overdue = first.elapsed() >= st.config.max_latency();

            if !full && !overdue && st.timer.is_none() {
                self.arm_timer(&mut st);
            }
            full || overdue
        };

        if flush_now {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Hand everything queued to the flush callback.
    pub fn flush(&self) -> Result<(), QueueError> {
        let batch = {
            let mut st = lock(&self.inner.state);
            st.cancel_timer();
            st.first_enqueued = None;
            if st.items.is_empty() {
                return Ok(());
            }
            mem::take(&mut st.items)
        };

        if let Err(e) = (self.inner.on_flush)(&batch) {
            let mut st = lock(&self.inner.state);
            let newer = mem::replace(&mut st.items, batch);
            st.items.extend(newer);
            log::warn!("Flush of {} actions failed, requeued: {}", st.items.len(), e);
            return Err(e);
        }
        Ok(())
    }

    /// Drop queued actions without flushing.
    pub fn clear(&self) {
        let mut st = lock(&self.inner.state);
        st.cancel_timer();
        st.items.clear();
        st.first_enqueued = None;
    }

    /// Stop accepting actions. Queued actions are kept.
    pub fn pause(&self) {
        let mut st = lock(&self.inner.state);
        st.paused = true;
        st.cancel_timer();
    }

    /// Accept actions again. Does not flush.
    pub fn resume(&self) {
        lock(&self.inner.state).paused = false;
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.inner.state).paused
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.state).items.is_empty()
    }

    pub fn config(&self) -> BatchConfig {
        lock(&self.inner.state).config.clone()
    }

    /// Applies to the next timer and the next ceiling checks.
    pub fn update_config(&self, config: BatchConfig) {
        lock(&self.inner.state).config = config;
    }

    fn arm_timer(&self, st: &mut QueueState) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let delay = st.config.timer_delay();
        let generation = st.timer_generation;
        let weak: Weak<QueueInner> = Arc::downgrade(&self.inner);

        st.timer = Some(handle.spawn(async move {
            time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut st = lock(&inner.state);
                if st.timer_generation != generation {
                    return;
                }
                // Detach ourselves so flush() does not abort this task.
                st.timer = None;
            }
            if let Err(e) = (ActionQueue { inner }).flush() {
                log::warn!("Timed flush failed: {}", e);
            }
        }));
    }
}

impl fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = lock(&self.inner.state);
        f.debug_struct("ActionQueue")
            .field("len", &st.items.len())
            .field("paused", &st.paused)
            .field("config", &st.config)
            .finish()
    }
}
