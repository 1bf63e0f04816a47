use crate::cache::CacheShared;
use crate::error::{BoxError, LinkError};
use crate::key::LinkKey;
use crate::link::{Link, LinkProvider, LinkRequest};
use crate::metrics::Metrics;
use crate::runtime::TaskSpawner;
use crate::waiter::{AcquireFuture, Releaser, Waiter};

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

/// The lifecycle of one cached link.
enum State<L> {
  /// Creation is in flight; acquirers queue up in FIFO order.
  Pending { waiters: VecDeque<Waiter<L>> },
  /// The link is established and `refs` callers hold it.
  Live { link: Arc<L>, refs: usize },
  /// Unlinked by `close_all`, which closed the link. `refs` holders have yet
  /// to release it.
  Orphaned { refs: usize },
  /// Terminal. The handle has been forgotten by the cache.
  Closed,
}

/// The cache's record for one key: creation, waiters, reference count and
/// teardown of a single link.
pub(crate) struct LinkHandle<P: LinkProvider> {
  key: LinkKey,
  state: Mutex<State<P::Link>>,
  cache: Weak<CacheShared<P>>,
  spawner: Arc<dyn TaskSpawner>,
  metrics: Arc<Metrics>,
}

impl<P: LinkProvider> fmt::Debug for LinkHandle<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match &*self.state.lock() {
      State::Pending { waiters } => format!("pending({} waiters)", waiters.len()),
      State::Live { refs, .. } => format!("live({} refs)", refs),
      State::Orphaned { refs } => format!("orphaned({} refs)", refs),
      State::Closed => "closed".to_string(),
    };
    f.debug_struct("LinkHandle")
      .field("key", &self.key)
      .field("state", &state)
      .finish_non_exhaustive()
  }
}

impl<P: LinkProvider> LinkHandle<P> {
  pub(crate) fn new(
    key: LinkKey,
    cache: Weak<CacheShared<P>>,
    spawner: Arc<dyn TaskSpawner>,
    metrics: Arc<Metrics>,
  ) -> Self {
    Self {
      key,
      state: Mutex::new(State::Pending {
        waiters: VecDeque::new(),
      }),
      cache,
      spawner,
      metrics,
    }
  }

  /// Kicks off creation of the underlying link on the spawner.
  ///
  /// Must be called exactly once per handle.
  pub(crate) fn start(self: &Arc<Self>, provider: &P, request: LinkRequest) {
    debug!(key = %self.key, link = %request.link_name, target = %request.target_address, "creating link");
    Metrics::incr(&self.metrics.creations);

    let creation = provider.create_link(request);
    let handle = Arc::clone(self);
    self.spawner.spawn(Box::pin(async move {
      let outcome = creation.await;
      handle.complete(outcome).await;
    }));
  }

  /// Settles every queued waiter with the outcome of creation.
  async fn complete(self: Arc<Self>, outcome: Result<P::Link, BoxError>) {
    let link = match outcome {
      Ok(link) => Arc::new(link),
      Err(source) => {
        self.fail(source);
        return;
      }
    };

    let orphan = {
      let mut state = self.state.lock();
      match mem::replace(&mut *state, State::Closed) {
        State::Pending { waiters } => {
          let queued = waiters.len();
          let mut refs = 0;
          for waiter in waiters {
            if waiter.resolve(Ok(Arc::clone(&link)), Some(self.releaser())) {
              refs += 1;
            }
          }
          info!(key = %self.key, link = link.identity(), refs, "created link");
          if refs > 0 {
            *state = State::Live {
              link: Arc::clone(&link),
              refs,
            };
            None
          } else {
            debug!(key = %self.key, queued, "every waiter gave up before the link was created");
            self.forget();
            Some(link)
          }
        }
        State::Closed => {
          debug!(key = %self.key, link = link.identity(), "link created after its handle was closed");
          Some(link)
        }
        other => {
          warn!(key = %self.key, "link creation completed twice; dropping the second link");
          *state = other;
          Some(link)
        }
      }
    };

    if let Some(link) = orphan {
      Metrics::incr(&self.metrics.closes);
      let _ = self.close_link(link).await;
    }
  }

  fn fail(self: &Arc<Self>, source: BoxError) {
    let error = LinkError::creation(self.key.clone(), source);
    error!(key = %self.key, error = %error, cause = %display_cause(&error), "link creation failed");
    Metrics::incr(&self.metrics.creation_failures);

    let mut state = self.state.lock();
    match mem::replace(&mut *state, State::Closed) {
      State::Pending { waiters } => {
        self.forget();
        for waiter in waiters {
          waiter.resolve(Err(error.clone()), None);
        }
      }
      other => *state = other,
    }
  }

  /// Takes one reference on the link.
  ///
  /// Returns `None` if the handle is already closed; the caller has to look the
  /// key up again, which yields a fresh handle.
  pub(crate) fn acquire(self: &Arc<Self>) -> Option<AcquireFuture<P::Link>> {
    let mut state = self.state.lock();
    match &mut *state {
      State::Live { link, refs } => {
        *refs += 1;
        Metrics::incr(&self.metrics.hits);
        Some(AcquireFuture::ready(Ok(Arc::clone(link)), Some(self.releaser())))
      }
      State::Pending { waiters } => {
        let (waiter, future) = AcquireFuture::pending();
        waiters.push_back(waiter);
        Metrics::incr(&self.metrics.waits);
        Some(future)
      }
      State::Orphaned { .. } | State::Closed => None,
    }
  }

  /// Takes over waiters queued on a handle that `close_all` unlinked before
  /// its link existed.
  ///
  /// Hands the waiters back if this handle can no longer accept them.
  pub(crate) fn adopt(
    self: &Arc<Self>,
    mut adopted: VecDeque<Waiter<P::Link>>,
  ) -> Result<(), VecDeque<Waiter<P::Link>>> {
    let mut state = self.state.lock();
    match &mut *state {
      State::Pending { waiters } => {
        waiters.append(&mut adopted);
        Ok(())
      }
      State::Live { link, refs } => {
        for waiter in adopted {
          if waiter.resolve(Ok(Arc::clone(link)), Some(self.releaser())) {
            *refs += 1;
            Metrics::incr(&self.metrics.hits);
          }
        }
        Ok(())
      }
      State::Orphaned { .. } | State::Closed => Err(adopted),
    }
  }

  /// Drops one reference. The last one forgets the handle and closes the link
  /// in the background.
  pub(crate) fn release(self: &Arc<Self>) -> Result<(), LinkError> {
    self.release_ref(true)
  }

  /// Gives back a reference taken before `close_all` unlinked this handle.
  /// Fails quietly if the handle holds none.
  pub(crate) fn release_orphaned(self: &Arc<Self>) -> Result<(), LinkError> {
    self.release_ref(false)
  }

  fn release_ref(self: &Arc<Self>, report_unbalanced: bool) -> Result<(), LinkError> {
    let link = {
      let mut state = self.state.lock();
      match mem::replace(&mut *state, State::Closed) {
        State::Live { link, refs } if refs > 1 => {
          *state = State::Live {
            link,
            refs: refs - 1,
          };
          Metrics::incr(&self.metrics.releases);
          return Ok(());
        }
        State::Live { link, refs: 1 } => {
          self.forget();
          link
        }
        State::Orphaned { refs } if refs > 1 => {
          *state = State::Orphaned { refs: refs - 1 };
          Metrics::incr(&self.metrics.releases);
          return Ok(());
        }
        State::Orphaned { refs: 1 } => {
          // `close_all` already closed the link.
          self.forget();
          Metrics::incr(&self.metrics.releases);
          debug!(key = %self.key, "last holder released an orphaned link");
          return Ok(());
        }
        other => {
          // A closed handle was forgotten after the caller looked it up.
          let stale = matches!(other, State::Closed);
          *state = other;
          if report_unbalanced && !stale {
            Metrics::incr(&self.metrics.unbalanced_releases);
            error!(key = %self.key, "release without a matching acquire");
          }
          return Err(LinkError::UnbalancedRelease {
            key: self.key.clone(),
          });
        }
      }
    };

    Metrics::incr(&self.metrics.releases);
    Metrics::incr(&self.metrics.closes);
    let handle = Arc::clone(self);
    self.spawner.spawn(Box::pin(async move {
      let _ = handle.close_link(link).await;
    }));
    Ok(())
  }

  /// Closes the link regardless of outstanding references.
  ///
  /// Only called by `close_all`, after the cache has moved this handle out of
  /// lookup. Holders of a live link keep their references against the
  /// orphaned handle until they release them. A handle that is still pending
  /// hands its waiters to whichever handle now serves the key, and the link
  /// its own creation eventually produces is closed on arrival.
  pub(crate) async fn force_close(
    self: Arc<Self>,
    cache: Arc<CacheShared<P>>,
  ) -> Result<(), LinkError> {
    let (link, waiters) = {
      let mut state = self.state.lock();
      match mem::replace(&mut *state, State::Closed) {
        State::Live { link, refs } => {
          debug!(key = %self.key, refs, "orphaning link with outstanding references");
          *state = State::Orphaned { refs };
          (Some(link), VecDeque::new())
        }
        State::Pending { waiters } => {
          self.forget();
          (None, waiters)
        }
        other => {
          *state = other;
          (None, VecDeque::new())
        }
      }
    };

    if !waiters.is_empty() {
      debug!(
        key = %self.key,
        waiters = waiters.len(),
        "link still being created; moving its waiters to a fresh handle"
      );
      cache.requeue(&self.key, waiters);
    }

    match link {
      Some(link) => {
        Metrics::incr(&self.metrics.force_closes);
        info!(key = %self.key, link = link.identity(), "force closing link");
        self.close_link(link).await
      }
      None => Ok(()),
    }
  }

  /// The current reference count, if the link is established.
  pub(crate) fn ref_count(&self) -> Option<usize> {
    match &*self.state.lock() {
      State::Live { refs, .. } => Some(*refs),
      _ => None,
    }
  }

  pub(crate) fn is_closed(&self) -> bool {
    matches!(*self.state.lock(), State::Closed)
  }

  async fn close_link(&self, link: Arc<P::Link>) -> Result<(), LinkError> {
    info!(key = %self.key, link = link.identity(), "closing link");
    match link.close().await {
      Ok(()) => {
        debug!(key = %self.key, link = link.identity(), "closed link");
        Ok(())
      }
      Err(source) => {
        let error = LinkError::close(self.key.clone(), link.identity(), source);
        Metrics::incr(&self.metrics.close_failures);
        error!(key = %self.key, error = %error, cause = %display_cause(&error), "closing link failed");
        Err(error)
      }
    }
  }

  /// Unlinks this handle from the cache. Called with the state lock held.
  fn forget(self: &Arc<Self>) {
    if let Some(cache) = self.cache.upgrade() {
      cache.forget(&self.key, self);
    }
  }

  fn releaser(self: &Arc<Self>) -> Releaser {
    let handle = Arc::clone(self);
    Box::new(move || {
      debug!(key = %handle.key, "acquire dropped before its link was claimed");
      let _ = handle.release_ref(false);
    })
  }
}

fn display_cause(error: &LinkError) -> String {
  std::error::Error::source(error)
    .map(|cause| cause.to_string())
    .unwrap_or_default()
}
