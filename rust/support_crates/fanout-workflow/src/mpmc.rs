//! A blocking multi-producer, multi-consumer (MPMC) channel.
//!
//! The API mirrors `std::sync::mpsc` (and reuses its error types) but the
//! [`Receiver`] can be cloned, so several worker threads can pull from the
//! same queue. Both unbounded ([`channel`]) and bounded ([`sync_channel`])
//! variants are provided.
//!
//! **Note**: this can be replaced with `std::sync::mpmc` once it is stabilized.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex,
        mpsc::{RecvError, SendError},
    },
};

use fanout_common::sync::lock;

/// Creates an unbounded channel: [`Sender::send`] never blocks.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared::new(None));
    (Sender(shared.clone()), Receiver(shared))
}

/// Creates a bounded channel holding at most `bound` queued messages.
///
/// When the buffer is full, [`Sender::send`] blocks until a receiver makes room.
///
/// # Panics
///
/// Panics if `bound` is 0; rendezvous channels are not supported.
pub fn sync_channel<T>(bound: usize) -> (Sender<T>, Receiver<T>) {
    assert_ne!(bound, 0, "sync_channel does not support zero bound");
    let shared = Arc::new(Shared::new(Some(bound)));
    (Sender(shared.clone()), Receiver(shared))
}

/// The sending half of a channel. Cloning registers another producer.
pub struct Sender<T>(Arc<Shared<T>>);

impl<T> Sender<T> {
    /// Sends a message, blocking while a bounded channel is full.
    ///
    /// Returns the message back if every receiver has been dropped.
    pub fn send(&self, msg: T) -> Result<(), SendError<T>> {
        let mut state = lock(&self.0.state);
        loop {
            if state.consumers == 0 {
                return Err(SendError(msg));
            }
            match state.capacity {
                Some(cap) if state.queue.len() >= cap => {
                    state = self
                        .0
                        .not_full
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                }
                _ => break,
            }
        }
        state.queue.push_back(msg);
        drop(state);
        self.0.not_empty.notify_one();
        Ok(())
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        lock(&self.0.state).producers += 1;
        Sender(self.0.clone())
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut state = lock(&self.0.state);
        state.producers -= 1;
        if state.producers == 0 {
            drop(state);
            // Blocked receivers must observe the disconnect.
            self.0.not_empty.notify_all();
        }
    }
}

/// The receiving half of a channel. Cloning registers another consumer;
/// each message is delivered to exactly one of them.
pub struct Receiver<T>(Arc<Shared<T>>);

impl<T> Receiver<T> {
    /// Blocks until a message is available.
    ///
    /// Messages queued before the last sender was dropped are still delivered;
    /// after that, returns [`RecvError`].
    pub fn recv(&self) -> Result<T, RecvError> {
        let mut state = lock(&self.0.state);
        loop {
            if let Some(msg) = state.queue.pop_front() {
                drop(state);
                self.0.not_full.notify_one();
                return Ok(msg);
            }
            if state.producers == 0 {
                return Err(RecvError);
            }
            state = self
                .0
                .not_empty
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        lock(&self.0.state).consumers += 1;
        Receiver(self.0.clone())
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut state = lock(&self.0.state);
        state.consumers -= 1;
        if state.consumers == 0 {
            // Nobody can receive the remaining messages anymore.
            let orphaned = std::mem::take(&mut state.queue);
            drop(state);
            self.0.not_full.notify_all();
            drop(orphaned);
        }
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> Shared<T> {
    fn new(capacity: Option<usize>) -> Self {
        Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                capacity,
                producers: 1,
                consumers: 1,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }
}

struct State<T> {
    queue: VecDeque<T>,
    capacity: Option<usize>,
    producers: usize,
    consumers: usize,
}
