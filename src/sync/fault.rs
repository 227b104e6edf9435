//! Captured panics of the work behind a future.
//!
//! A panic payload is a `Box<dyn Any + Send>`, which can be neither cloned nor shared between threads. Since every reader of a future must
//! observe the same fault, a [`Fault`] keeps the original payload behind a lock and hands out fresh, equivalent payloads when the fault
//! is re-raised in a reader.

use std::any::Any;
use std::fmt;
use std::panic;
use std::sync::Arc;

use parking_lot::Mutex;

struct FaultInner {
    message: Option<String>,
    payload: Mutex<Box<dyn Any + Send>>
}

/// An abnormal termination of the work behind a future, i.e. a panic.
///
/// This is distinct from the error type of a future: an error is something the work chose to report, whereas a fault means the work
/// itself broke. Faults are re-raised as panics in every thread that waits on the faulted future via
/// [`Future::wait`](super::Future::wait).
#[derive(Clone)]
pub struct Fault(Arc<FaultInner>);

impl Fault {
    /// Creates a fault from a panic payload, as returned by [`std::panic::catch_unwind`].
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Fault {
        let message = if let Some(&s) = payload.downcast_ref::<&'static str>() {
            Some(s.to_owned())
        } else {
            payload.downcast_ref::<String>().cloned()
        };

        Fault(Arc::new(FaultInner {
            message,
            payload: Mutex::new(payload)
        }))
    }

    /// Creates a fault carrying the provided payload, as if the work had called `panic_any(payload)`.
    pub fn new(payload: impl Any + Send) -> Fault {
        Fault::from_panic(Box::new(payload))
    }

    /// Gets the panic message if the payload was a string, which is the case for all panics raised by the `panic!` macro.
    pub fn message(&self) -> Option<&str> {
        self.0.message.as_deref()
    }

    /// Checks whether the original payload is of type `P`.
    pub fn payload_is<P: Any>(&self) -> bool {
        self.0.payload.lock().is::<P>()
    }

    /// Calls the provided function with a reference to the original payload.
    pub fn with_payload<U>(&self, f: impl FnOnce(&(dyn Any + Send)) -> U) -> U {
        f(&**self.0.payload.lock())
    }

    /// Checks whether two faults were captured from the same panic.
    pub fn ptr_eq(&self, other: &Fault) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Builds a payload suitable for re-raising this fault in another thread.
    ///
    /// String payloads are reproduced with the same type so that code inspecting the payload of a caught panic behaves as it would have on
    /// the thread that originally panicked. Any other payload is represented by a clone of this fault.
    pub fn to_payload(&self) -> Box<dyn Any + Send> {
        let payload = self.0.payload.lock();

        if let Some(&s) = payload.downcast_ref::<&'static str>() {
            return Box::new(s);
        }
        if let Some(s) = payload.downcast_ref::<String>() {
            return Box::new(s.clone());
        }

        Box::new(self.clone())
    }

    /// Re-raises this fault as a panic on the current thread.
    ///
    /// This uses [`std::panic::resume_unwind`], so the panic hook does not run a second time for a fault that has already been reported on
    /// the thread where it originally occurred.
    pub fn resume(&self) -> ! {
        panic::resume_unwind(self.to_payload())
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fault").field(&self.message().unwrap_or("<non-string payload>")).finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "task panicked: {}", msg),
            None => write!(f, "task panicked")
        }
    }
}
