//! The blocking completion primitive the thread-per-pump model (§5) uses everywhere the
//! teacher's async code awaited a `Future`/`Event`: KEX completion, a pending service
//! request's reply, a channel open confirmation. One value or error is ever written;
//! every waiter blocks on a `Condvar` until it is, or until an optional timeout expires.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::Error;

enum Slot<T> {
    Pending,
    Ready(T),
    Failed(Error),
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    signal: Condvar,
}

/// A single-assignment, multi-waiter completion. Cloning shares the same underlying
/// slot -- the write side and every read side can each hold their own handle.
pub struct Completion<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Pending),
                signal: Condvar::new(),
            }),
        }
    }
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve with a value. A no-op if already resolved (first writer wins).
    pub fn complete(&self, value: T) {
        let mut slot = self.inner.slot.lock().expect("completion mutex poisoned");
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Ready(value);
            self.inner.signal.notify_all();
        }
    }

    /// Resolve with an error. Used both for the operation's own failure and for fatal
    /// transport errors fanned out via `notify_error` (§6 "Cancellation").
    pub fn fail(&self, error: Error) {
        let mut slot = self.inner.slot.lock().expect("completion mutex poisoned");
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Failed(error);
            self.inner.signal.notify_all();
        }
    }

    /// Block until resolved, or until `timeout` elapses (resolving to `Error::Timeout`).
    /// `None` blocks indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<T, Error>
    where
        T: Clone,
    {
        let mut slot = self.inner.slot.lock().expect("completion mutex poisoned");

        loop {
            match &*slot {
                Slot::Ready(v) => return Ok(v.clone()),
                Slot::Failed(e) => return Err(e.clone()),
                Slot::Pending => {}
            }

            slot = match timeout {
                None => self.inner.signal.wait(slot).expect("completion mutex poisoned"),
                Some(timeout) => {
                    let (guard, result) = self
                        .inner
                        .signal
                        .wait_timeout(slot, timeout)
                        .expect("completion mutex poisoned");
                    if result.timed_out() && matches!(*guard, Slot::Pending) {
                        return Err(Error::Timeout);
                    }
                    guard
                }
            };
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(*self.inner.slot.lock().expect("completion mutex poisoned"), Slot::Pending)
    }
}

/// A registry of outstanding [`Completion`]s that all need to hear about one fatal
/// error at once -- the fan-out half of `notifyError` (§6).
#[derive(Default)]
pub struct ErrorFanout<T> {
    waiters: Mutex<Vec<Completion<T>>>,
}

impl<T: Clone> ErrorFanout<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, completion: Completion<T>) {
        self.waiters.lock().expect("fanout mutex poisoned").push(completion);
    }

    pub fn notify_error(&self, error: Error) {
        let waiters = self.waiters.lock().expect("fanout mutex poisoned");
        for waiter in waiters.iter() {
            waiter.fail(error.clone());
        }
    }
}

/// Anything that can be told a fatal error happened. Implemented for [`Completion`] so
/// it can sit in a [`FatalRegistry`] alongside completions of unrelated result types.
pub trait Notifiable: Send + Sync {
    fn notify_error(&self, error: Error);
}

impl<T: Clone + Send + Sync + 'static> Notifiable for Completion<T> {
    fn notify_error(&self, error: Error) {
        self.fail(error);
    }
}

/// The whole-transport fan-out registry (§5 "Cancellation", §7): every awaitable that
/// must hear about a fatal transport error registers here once, regardless of which
/// crate or result type it's built from -- KEX completion, a pending service-accept,
/// channel opens and requests owned by `ssh-transport-connect`, the user-auth future
/// owned by `ssh-transport-auth`.
#[derive(Default)]
pub struct FatalRegistry {
    waiters: Mutex<Vec<Box<dyn Notifiable>>>,
}

impl FatalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, notifiable: Box<dyn Notifiable>) {
        self.waiters.lock().expect("fatal registry mutex poisoned").push(notifiable);
    }

    pub fn notify_error(&self, error: Error) {
        let waiters = self.waiters.lock().expect("fatal registry mutex poisoned");
        for waiter in waiters.iter() {
            waiter.notify_error(error.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_blocks_until_complete_is_called_from_another_thread() {
        let completion = Completion::<u32>::new();
        let writer = completion.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.complete(42);
        });

        assert_eq!(completion.wait(None).unwrap(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn wait_times_out_when_never_resolved() {
        let completion = Completion::<u32>::new();
        let err = completion.wait(Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn fail_propagates_to_every_waiter() {
        let completion = Completion::<u32>::new();
        completion.fail(Error::Stopped);
        assert!(matches!(completion.wait(None).unwrap_err(), Error::Stopped));
    }

    #[test]
    fn fanout_notifies_every_registered_completion() {
        let fanout = ErrorFanout::<u32>::new();
        let a = Completion::new();
        let b = Completion::new();
        fanout.register(a.clone());
        fanout.register(b.clone());

        fanout.notify_error(Error::Stopped);

        assert!(a.is_resolved());
        assert!(b.is_resolved());
    }

    #[test]
    fn fatal_registry_notifies_completions_of_unlike_types() {
        let registry = FatalRegistry::new();
        let kex_done = Completion::<()>::new();
        let service_accept = Completion::<String>::new();
        registry.register(Box::new(kex_done.clone()));
        registry.register(Box::new(service_accept.clone()));

        registry.notify_error(Error::Stopped);

        assert!(matches!(kex_done.wait(None).unwrap_err(), Error::Stopped));
        assert!(matches!(service_accept.wait(None).unwrap_err(), Error::Stopped));
    }
}
