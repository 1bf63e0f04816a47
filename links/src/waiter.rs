use crate::error::LinkError;

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};

pub(crate) type Outcome<L> = Result<Arc<L>, LinkError>;

/// Gives back a reference that was counted for a caller who never claimed it.
pub(crate) type Releaser = Box<dyn FnOnce() + Send>;

/// How a parked acquirer wants to be woken.
enum Parked {
  Sync(Thread),
  Async(Waker),
}

impl Parked {
  fn wake(self) {
    match self {
      Parked::Sync(thread) => thread.unpark(),
      Parked::Async(waker) => waker.wake(),
    }
  }
}

/// The one-shot meeting point between a pending acquirer and the handle.
struct Slot<L> {
  outcome: Option<Outcome<L>>,
  /// Gives the reference back to the handle that resolved this slot.
  releaser: Option<Releaser>,
  parked: Option<Parked>,
  abandoned: bool,
}

/// The handle's side of a pending acquire.
pub(crate) struct Waiter<L> {
  slot: Arc<Mutex<Slot<L>>>,
}

impl<L> Waiter<L> {
  /// Hands the outcome to the acquirer and wakes it. A link comes with the
  /// releaser of the handle that counted it.
  ///
  /// Returns `false` if the acquirer already dropped its future, in which case
  /// the outcome is discarded and must not be counted as a held reference.
  pub(crate) fn resolve(self, outcome: Outcome<L>, releaser: Option<Releaser>) -> bool {
    let mut slot = self.slot.lock();
    if slot.abandoned {
      return false;
    }
    slot.outcome = Some(outcome);
    slot.releaser = releaser;
    if let Some(parked) = slot.parked.take() {
      parked.wake();
    }
    true
  }

  pub(crate) fn is_abandoned(&self) -> bool {
    self.slot.lock().abandoned
  }
}

enum Inner<L> {
  Ready(Option<Outcome<L>>),
  Waiting(Arc<Mutex<Slot<L>>>),
}

/// The result of `LinkCache::acquire`.
///
/// Resolves to the shared link once it is established, or to the error that
/// prevented it. It can be `.await`ed from async code or resolved on a plain
/// thread with [`AcquireFuture::wait`].
///
/// A reference is held from the moment this future yields a link: the caller
/// must pair it with exactly one `release`. Dropping the future before it
/// yields gives any reference it was granted back to the cache.
#[must_use = "an acquired link must be released; futures do nothing unless you .await or poll them"]
pub struct AcquireFuture<L> {
  inner: Inner<L>,
  releaser: Option<Releaser>,
}

impl<L> AcquireFuture<L> {
  pub(crate) fn ready(outcome: Outcome<L>, releaser: Option<Releaser>) -> Self {
    Self {
      inner: Inner::Ready(Some(outcome)),
      releaser,
    }
  }

  /// Creates a pending acquire and the waiter a handle will resolve.
  pub(crate) fn pending() -> (Waiter<L>, Self) {
    let slot = Arc::new(Mutex::new(Slot {
      outcome: None,
      releaser: None,
      parked: None,
      abandoned: false,
    }));
    let waiter = Waiter { slot: slot.clone() };
    let future = Self {
      inner: Inner::Waiting(slot),
      releaser: None,
    };
    (waiter, future)
  }

  /// Returns `true` if the outcome is already known.
  pub fn is_ready(&self) -> bool {
    match &self.inner {
      Inner::Ready(outcome) => outcome.is_some(),
      Inner::Waiting(slot) => slot.lock().outcome.is_some(),
    }
  }

  /// Blocks the current thread until the link is available.
  pub fn wait(mut self) -> Result<Arc<L>, LinkError> {
    loop {
      if let Some(outcome) = self.try_take(None) {
        return outcome;
      }
      thread::park();
    }
  }

  fn try_take(&mut self, cx: Option<&Context<'_>>) -> Option<Outcome<L>> {
    match &mut self.inner {
      Inner::Ready(outcome) => Some(
        outcome
          .take()
          .expect("AcquireFuture polled after completion"),
      ),
      Inner::Waiting(slot) => {
        let mut slot = slot.lock();
        match slot.outcome.take() {
          Some(outcome) => {
            slot.releaser = None;
            drop(slot);
            self.inner = Inner::Ready(None);
            Some(outcome)
          }
          None => {
            slot.parked = Some(match cx {
              Some(cx) => Parked::Async(cx.waker().clone()),
              None => Parked::Sync(thread::current()),
            });
            None
          }
        }
      }
    }
  }
}

impl<L> Future for AcquireFuture<L> {
  type Output = Result<Arc<L>, LinkError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    match this.try_take(Some(cx)) {
      Some(outcome) => Poll::Ready(outcome),
      None => Poll::Pending,
    }
  }
}

impl<L> Drop for AcquireFuture<L> {
  fn drop(&mut self) {
    let releaser = match &mut self.inner {
      Inner::Ready(outcome) => match outcome.take() {
        Some(Ok(_)) => self.releaser.take(),
        _ => None,
      },
      Inner::Waiting(slot) => {
        let mut slot = slot.lock();
        slot.abandoned = true;
        match slot.outcome.take() {
          Some(Ok(_)) => slot.releaser.take(),
          _ => None,
        }
      }
    };
    // Outside the slot lock: releasing takes the handle lock.
    if let Some(release) = releaser {
      release();
    }
  }
}

impl<L> fmt::Debug for AcquireFuture<L> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AcquireFuture")
      .field("ready", &self.is_ready())
      .finish_non_exhaustive()
  }
}
