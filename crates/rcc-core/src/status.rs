//! Status propagation.
//!
//! [`StatusCell`] holds a status value and pushes every transition to its
//! subscribers. Subscribers attached late receive the current value first.
//! Delivery never runs subscriber code on the thread that changes the status:
//! channel subscribers get a message, callback subscribers are invoked on the
//! [`Notifier`] thread.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{CoreError, CoreResult};

type Job = Box<dyn FnOnce() + Send>;

/// Single-thread, strictly ordered queue for listener notifications.
///
/// Cloning a notifier shares the same queue. The worker thread exits once
/// every clone has been dropped and the queue is drained.
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<Job>,
}

impl Notifier {
    /// Spawn the notification thread.
    pub fn spawn(thread_name: &str) -> CoreResult<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                        tracing::error!("notification listener panicked");
                    }
                }
            })
            .map_err(|e| CoreError::Thread {
                name: thread_name.to_string(),
                what: e.to_string(),
            })?;
        Ok(Self { tx })
    }

    /// Enqueue a notification. Never blocks.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            tracing::debug!("notification queue closed, dropping notification");
        }
    }

    /// Block until every notification posted before this call has run.
    ///
    /// Returns `false` if the queue did not drain within `timeout`.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = mpsc::channel();
        self.post(move || {
            let _ = done_tx.send(());
        });
        done_rx.recv_timeout(timeout).is_ok()
    }
}

enum Subscriber<S> {
    Channel(Sender<S>),
    Callback {
        notifier: Notifier,
        callback: Arc<dyn Fn(S) + Send + Sync>,
    },
}

impl<S: Copy + Send + 'static> Subscriber<S> {
    /// Deliver a status; returns `false` once the subscriber is gone.
    fn deliver(&self, status: S) -> bool {
        match self {
            Subscriber::Channel(tx) => tx.send(status).is_ok(),
            Subscriber::Callback { notifier, callback } => {
                let callback = Arc::clone(callback);
                notifier.post(move || callback(status));
                true
            }
        }
    }
}

struct CellState<S> {
    current: S,
    subscribers: Vec<Subscriber<S>>,
}

/// A status value with replay-on-subscribe change notification.
pub struct StatusCell<S> {
    state: Mutex<CellState<S>>,
    changed: Condvar,
}

impl<S: Copy + PartialEq + Send + 'static> StatusCell<S> {
    pub fn new(initial: S) -> Self {
        Self {
            state: Mutex::new(CellState {
                current: initial,
                subscribers: Vec::new(),
            }),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> S {
        self.state.lock().current
    }

    /// Set the status. Subscribers are only notified on an actual change.
    pub fn set(&self, next: S) -> bool {
        self.transition(|_| Some(next)).is_some()
    }

    /// Atomically compute and apply a transition.
    ///
    /// `step` sees the current status and returns the next one, or `None`
    /// to leave it unchanged. Returns the previous status when a change was
    /// applied.
    pub fn transition(&self, step: impl FnOnce(S) -> Option<S>) -> Option<S> {
        let mut state = self.state.lock();
        let previous = state.current;
        let next = step(previous)?;
        if next == previous {
            return None;
        }
        state.current = next;
        state.subscribers.retain(|sub| sub.deliver(next));
        drop(state);
        self.changed.notify_all();
        Some(previous)
    }

    /// Subscribe with a channel. The current status is sent immediately.
    pub fn subscribe(&self) -> Receiver<S> {
        let (tx, rx) = mpsc::channel();
        let mut state = self.state.lock();
        let sub = Subscriber::Channel(tx);
        if sub.deliver(state.current) {
            state.subscribers.push(sub);
        }
        rx
    }

    /// Subscribe with a callback run on the notifier thread. The current
    /// status is delivered immediately.
    pub fn listen(&self, notifier: &Notifier, callback: impl Fn(S) + Send + Sync + 'static) {
        let mut state = self.state.lock();
        let sub = Subscriber::Callback {
            notifier: notifier.clone(),
            callback: Arc::new(callback),
        };
        sub.deliver(state.current);
        state.subscribers.push(sub);
    }

    /// Block until `done` holds for the current status or `timeout` elapses.
    ///
    /// Returns the status observed last.
    pub fn wait_until(&self, done: impl Fn(S) -> bool, timeout: Option<Duration>) -> S {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        while !done(state.current) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        state.current
    }
}

impl<S: Copy + std::fmt::Debug> std::fmt::Debug for StatusCell<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StatusCell")
            .field("current", &state.current)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        A,
        B,
        C,
    }

    #[test]
    fn subscribers_get_replay_then_transitions() {
        let cell = StatusCell::new(Phase::A);
        let rx = cell.subscribe();
        assert!(cell.set(Phase::B));
        assert!(!cell.set(Phase::B));
        assert!(cell.set(Phase::C));

        let seen: Vec<Phase> = rx.try_iter().collect();
        assert_eq!(seen, vec![Phase::A, Phase::B, Phase::C]);
    }

    #[test]
    fn late_subscriber_sees_current() {
        let cell = StatusCell::new(Phase::A);
        cell.set(Phase::C);
        let rx = cell.subscribe();
        assert_eq!(rx.try_recv().unwrap(), Phase::C);
    }

    #[test]
    fn transition_is_conditional() {
        let cell = StatusCell::new(Phase::A);
        let prev = cell.transition(|s| (s == Phase::B).then_some(Phase::C));
        assert_eq!(prev, None);
        assert_eq!(cell.get(), Phase::A);

        let prev = cell.transition(|s| (s == Phase::A).then_some(Phase::B));
        assert_eq!(prev, Some(Phase::A));
        assert_eq!(cell.get(), Phase::B);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let cell = StatusCell::new(Phase::A);
        drop(cell.subscribe());
        cell.set(Phase::B);
        assert_eq!(cell.state.lock().subscribers.len(), 0);
    }

    #[test]
    fn callbacks_run_on_notifier_in_order() {
        let notifier = Notifier::spawn("test-notify").unwrap();
        let cell = StatusCell::new(Phase::A);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cell.listen(&notifier, move |s| sink.lock().push(s));
        cell.set(Phase::B);
        cell.set(Phase::C);

        assert!(notifier.flush(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), vec![Phase::A, Phase::B, Phase::C]);
    }

    #[test]
    fn wait_until_wakes_on_change() {
        let cell = Arc::new(StatusCell::new(Phase::A));
        let setter = Arc::clone(&cell);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set(Phase::C);
        });
        let seen = cell.wait_until(|s| s == Phase::C, Some(Duration::from_secs(5)));
        assert_eq!(seen, Phase::C);
        handle.join().unwrap();
    }

    #[test]
    fn wait_until_times_out() {
        let cell = StatusCell::new(Phase::A);
        let seen = cell.wait_until(|s| s == Phase::C, Some(Duration::from_millis(10)));
        assert_eq!(seen, Phase::A);
    }
}
