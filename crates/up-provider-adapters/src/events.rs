//! Queue-then-flush event emitter.
//!
//! Events emitted before anyone listens are buffered. The first subscription schedules a flush
//! after a short delay so that several listeners attached in the same tick all see the replay.
//! Events emitted while the flush is pending join the back of the queue, keeping overall order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum Phase<E> {
    Buffering(VecDeque<E>),
    Flushing(VecDeque<E>),
    Live,
}

struct QueueState<E> {
    phase: Phase<E>,
    listeners: Vec<(ListenerId, Listener<E>)>,
    next_id: u64,
}

pub struct EventQueue<E> {
    inner: Arc<Mutex<QueueState<E>>>,
    resume_delay: Duration,
}

impl<E> Clone for EventQueue<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            resume_delay: self.resume_delay,
        }
    }
}

impl<E: Send + 'static> EventQueue<E> {
    pub fn new(resume_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueState {
                phase: Phase::Buffering(VecDeque::new()),
                listeners: Vec::new(),
                next_id: 0,
            })),
            resume_delay,
        }
    }

    /// Returns `true` when the event went straight to listeners.
    pub fn emit(&self, event: E) -> bool {
        let listeners = {
            let mut g = lock(&self.inner);
            match &mut g.phase {
                Phase::Buffering(queue) | Phase::Flushing(queue) => {
                    queue.push_back(event);
                    return false;
                }
                Phase::Live => snapshot(&g.listeners),
            }
        };
        deliver(&listeners, &event);
        true
    }

    /// Adds a listener and schedules the replay of anything buffered.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut g = lock(&self.inner);
            g.next_id += 1;
            let id = ListenerId(g.next_id);
            g.listeners.push((id, Arc::new(listener)));
            id
        };
        self.resume(self.resume_delay);
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut g = lock(&self.inner);
        let before = g.listeners.len();
        g.listeners.retain(|(lid, _)| *lid != id);
        g.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn is_buffering(&self) -> bool {
        matches!(lock(&self.inner).phase, Phase::Buffering(_))
    }

    /// Stops buffering and replays queued events after `delay`. No-op unless still buffering.
    pub fn resume(&self, delay: Duration) {
        {
            let mut g = lock(&self.inner);
            let queued = match std::mem::replace(&mut g.phase, Phase::Live) {
                Phase::Buffering(queued) => queued,
                other => {
                    g.phase = other;
                    return;
                }
            };
            g.phase = Phase::Flushing(queued);
        }

        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    drain(&inner);
                });
            }
            Err(_) => drain(&inner),
        }
    }
}

fn lock<E>(inner: &Mutex<QueueState<E>>) -> MutexGuard<'_, QueueState<E>> {
    // Listeners never run under the lock, so a poisoned guard still holds consistent state.
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn snapshot<E>(listeners: &[(ListenerId, Listener<E>)]) -> Vec<Listener<E>> {
    listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
}

fn deliver<E>(listeners: &[Listener<E>], event: &E) {
    for listener in listeners {
        listener(event);
    }
}

fn drain<E>(inner: &Mutex<QueueState<E>>) {
    loop {
        let (batch, listeners) = {
            let mut g = lock(inner);
            let batch = match &mut g.phase {
                Phase::Flushing(queue) => std::mem::take(queue),
                _ => return,
            };
            if batch.is_empty() {
                g.phase = Phase::Live;
                return;
            }
            (batch, snapshot(&g.listeners))
        };
        for event in &batch {
            deliver(&listeners, event);
        }
    }
}
