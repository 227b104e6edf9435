//! Low-level synchronization primitives for inter-thread synchronization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

use parking_lot::Mutex;

/// State information for a thread which is waiting on a wait list.
#[derive(Debug)]
struct ThreadWaitState {
    thread: Thread,
    woken: Arc<AtomicBool>
}

impl ThreadWaitState {
    fn wake(self) {
        self.woken.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// A struct representing that the thread has been placed on a wait list and needs to be suspended.
///
/// The thread is already on the wait list by the time a value of this type exists, so any wakeup issued after [`ThreadWaitList::wait`]
/// returns will be seen by [`ThreadWait::suspend`], even if it happens before the thread actually parks.
#[derive(Debug)]
#[must_use]
pub struct ThreadWait<'a> {
    woken: Arc<AtomicBool>,
    _list: &'a ThreadWaitList
}

impl<'a> ThreadWait<'a> {
    /// Suspends the current thread until it is woken up from the wait list it was placed on, consuming this guard.
    ///
    /// Spurious wakeups from [`thread::park`] are absorbed here, so this only returns once a call to [`ThreadWaitList::wake_all`] has
    /// actually removed this thread from the list.
    pub fn suspend(self) {
        while !self.woken.load(Ordering::Acquire) {
            thread::park();
        }
    }
}

/// A wait list onto which threads can enqueue themselves to be woken up later.
#[derive(Debug, Default)]
pub struct ThreadWaitList {
    internal: Mutex<Vec<ThreadWaitState>>
}

impl ThreadWaitList {
    /// Creates an empty wait list.
    pub fn new() -> ThreadWaitList {
        ThreadWaitList {
            internal: Mutex::new(Vec::new())
        }
    }

    /// Adds the current thread to the wait list. Returns a [`ThreadWait`] that should be used to suspend the current thread by calling
    /// [`ThreadWait::suspend`] after releasing any held locks.
    ///
    /// # Lock Ordering
    ///
    /// This is meant to be called while holding the lock protecting the condition being waited on, so that a waker which updates that
    /// condition under the same lock cannot miss this thread. The lock must then be released before calling [`ThreadWait::suspend`].
    pub fn wait(&self) -> ThreadWait {
        let woken = Arc::new(AtomicBool::new(false));

        self.internal.lock().push(ThreadWaitState {
            thread: thread::current(),
            woken: woken.clone()
        });

        ThreadWait { woken, _list: self }
    }

    /// Removes all threads from the wait list and wakes them up. Returns the number of threads awoken by this call.
    pub fn wake_all(&self) -> usize {
        let waiting = std::mem::take(&mut *self.internal.lock());
        let num_woken = waiting.len();

        for state in waiting {
            state.wake();
        }

        num_woken
    }

    /// Gets the number of threads currently enqueued on this wait list. The result is immediately stale and is only useful for
    /// diagnostics and tests.
    pub fn len(&self) -> usize {
        self.internal.lock().len()
    }

    /// Checks whether no threads are currently enqueued on this wait list.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
