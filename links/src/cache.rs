use crate::builder::LinkCacheBuilder;
use crate::error::LinkError;
use crate::handle::LinkHandle;
use crate::key::LinkKey;
use crate::link::{LinkProvider, LinkRequest};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::naming::LinkNamer;
use crate::runtime::TaskSpawner;
use crate::waiter::{AcquireFuture, Waiter};

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use ahash::HashMap;
use futures_util::future;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Every handle the cache still answers for.
pub(crate) struct Entries<P: LinkProvider> {
  /// The handle serving each key.
  pub(crate) live: HashMap<LinkKey, Arc<LinkHandle<P>>>,
  /// Handles unlinked by `close_all` whose holders still owe a release.
  /// Releases for a key drain these before they reach its live handle.
  pub(crate) orphaned: HashMap<LinkKey, Vec<Arc<LinkHandle<P>>>>,
}

impl<P: LinkProvider> Default for Entries<P> {
  fn default() -> Self {
    Self {
      live: HashMap::default(),
      orphaned: HashMap::default(),
    }
  }
}

/// The internal, thread-safe core of the link cache.
pub(crate) struct CacheShared<P: LinkProvider> {
  pub(crate) entries: Mutex<Entries<P>>,
  pub(crate) provider: P,
  pub(crate) spawner: Arc<dyn TaskSpawner>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) namer: LinkNamer,
  pub(crate) management_node: String,
}

impl<P: LinkProvider> fmt::Debug for CacheShared<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("cached_links", &self.entries.lock().live.len())
      .field("management_node", &self.management_node)
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<P: LinkProvider> Drop for CacheShared<P> {
  fn drop(&mut self) {
    let remaining = self.entries.get_mut().live.len();
    if remaining > 0 {
      warn!(remaining, "link cache dropped without close_all; cached links are left open");
    }
  }
}

impl<P: LinkProvider> CacheShared<P> {
  /// Removes `handle` from the cache, but only if it is still the handle the
  /// cache knows it by.
  ///
  /// A handle that failed or drained may race a newer handle for the same
  /// key; the newer one must survive.
  pub(crate) fn forget(&self, key: &LinkKey, handle: &Arc<LinkHandle<P>>) {
    let mut entries = self.entries.lock();
    if entries
      .live
      .get(key)
      .is_some_and(|current| Arc::ptr_eq(current, handle))
    {
      entries.live.remove(key);
      debug!(%key, "forgot link handle");
    } else if let Some(orphans) = entries.orphaned.get_mut(key) {
      orphans.retain(|orphan| !Arc::ptr_eq(orphan, handle));
      if orphans.is_empty() {
        entries.orphaned.remove(key);
      }
    }
  }

  /// Finds the handle serving `key`, inserting a new pending one if there is
  /// none. The flag tells whether the caller must start its creation.
  fn handle_for(self: &Arc<Self>, key: &LinkKey) -> (Arc<LinkHandle<P>>, bool) {
    let mut entries = self.entries.lock();
    match entries.live.get(key) {
      Some(handle) => (Arc::clone(handle), false),
      None => {
        let handle = Arc::new(LinkHandle::new(
          key.clone(),
          Arc::downgrade(self),
          Arc::clone(&self.spawner),
          Arc::clone(&self.metrics),
        ));
        entries.live.insert(key.clone(), Arc::clone(&handle));
        (handle, true)
      }
    }
  }

  fn start(&self, handle: &Arc<LinkHandle<P>>, key: &LinkKey) {
    let request = LinkRequest::new(key.clone(), self.namer.next_name(), &self.management_node);
    handle.start(&self.provider, request);
  }

  /// Queues waiters of a force-closed pending handle on the handle that now
  /// serves their key.
  pub(crate) fn requeue(
    self: &Arc<Self>,
    key: &LinkKey,
    mut waiters: VecDeque<Waiter<P::Link>>,
  ) {
    waiters.retain(|waiter| !waiter.is_abandoned());
    while !waiters.is_empty() {
      let (handle, created) = self.handle_for(key);
      match handle.adopt(waiters) {
        Ok(()) => {
          if created {
            self.start(&handle, key);
          }
          return;
        }
        Err(rest) => waiters = rest,
      }
    }
  }

  /// Routes one release for `key`, draining orphaned holders first.
  fn release(&self, key: &LinkKey) -> Result<(), LinkError> {
    loop {
      let (orphans, live) = {
        let entries = self.entries.lock();
        (
          entries.orphaned.get(key).cloned().unwrap_or_default(),
          entries.live.get(key).cloned(),
        )
      };

      // An orphan whose link never went live holds nothing; try the next.
      if orphans.iter().any(|orphan| orphan.release_orphaned().is_ok()) {
        return Ok(());
      }

      match live {
        Some(handle) => match handle.release() {
          Err(_) if handle.is_closed() => {
            debug!(%key, "handle closed during release; retrying");
          }
          result => return result,
        },
        // A concurrent release may have used up the orphan this caller's
        // reference was counted on while a fresh handle took the key.
        None if self.entries.lock().live.contains_key(key) => {}
        None => {
          debug!(%key, "release of a key that is not cached; ignoring");
          return Ok(());
        }
      }
    }
  }
}

/// A cache of shared request-response links, keyed by entity path and
/// optional transfer path.
///
/// At most one link is created per key at a time. Every caller that acquires a
/// key shares that link, and the link is closed once the last of them releases
/// it. The cache is cheap to clone; clones share the same links.
pub struct LinkCache<P: LinkProvider> {
  pub(crate) shared: Arc<CacheShared<P>>,
}

impl<P: LinkProvider> Clone for LinkCache<P> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<P: LinkProvider> fmt::Debug for LinkCache<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LinkCache")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<P: LinkProvider> LinkCache<P> {
  /// Returns a builder for configuring a new cache.
  pub fn builder() -> LinkCacheBuilder<P> {
    LinkCacheBuilder::new()
  }

  /// A point-in-time copy of the cache's lifecycle counters.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Takes a reference on the link for `path` (via `transfer_path`, if given).
  ///
  /// If no link exists for the key, one is created in the background and the
  /// returned future resolves once it is established. Concurrent callers for
  /// the same key share a single creation. If creation fails, every caller
  /// waiting on it receives the same [`LinkError::Creation`] and the next
  /// acquire starts over.
  ///
  /// Each successful acquire must be paired with one [`release`](Self::release).
  pub fn acquire(&self, path: &str, transfer_path: Option<&str>) -> AcquireFuture<P::Link> {
    let key = LinkKey::new(path, transfer_path);
    Metrics::incr(&self.shared.metrics.acquires);

    loop {
      let (handle, created) = self.shared.handle_for(&key);

      // The creator queues itself before creation starts, so even a creation
      // that completes inline has someone to hand the link to.
      match handle.acquire() {
        Some(future) => {
          if created {
            self.shared.start(&handle, &key);
          }
          return future;
        }
        None => debug!(%key, "handle closed during acquire; retrying with a fresh handle"),
      }
    }
  }

  /// Gives back one reference on the link for the key.
  ///
  /// Releasing the last reference removes the key from the cache and closes
  /// the link in the background; close failures are logged, not returned.
  /// Releasing a key that is not cached is a no-op.
  ///
  /// References taken before a [`close_all`](Self::close_all) are given back
  /// to the links it closed before any reference on a newer link for the same
  /// key, so a late release never closes a link that is still held.
  ///
  /// Returns [`LinkError::UnbalancedRelease`] if the key is cached but no
  /// reference is outstanding.
  pub fn release(&self, path: &str, transfer_path: Option<&str>) -> Result<(), LinkError> {
    self.shared.release(&LinkKey::new(path, transfer_path))
  }

  /// Empties the cache and closes every link it held, regardless of
  /// outstanding references.
  ///
  /// Every close is attempted and awaited, even if some fail. All failures are
  /// returned together in [`LinkError::CloseAll`].
  ///
  /// Callers still holding a closed link owe their `release` as usual. A link
  /// that is still being created is closed as soon as it arrives; callers
  /// waiting for it are moved to a fresh creation for the same key.
  pub async fn close_all(&self) -> Result<(), LinkError> {
    let handles: Vec<_> = {
      let mut entries = self.shared.entries.lock();
      let drained: Vec<_> = entries.live.drain().collect();
      for (key, handle) in &drained {
        entries
          .orphaned
          .entry(key.clone())
          .or_default()
          .push(Arc::clone(handle));
      }
      drained.into_iter().map(|(_, handle)| handle).collect()
    };
    info!(count = handles.len(), "closing all cached links");

    let results = future::join_all(
      handles
        .into_iter()
        .map(|handle| handle.force_close(Arc::clone(&self.shared))),
    )
    .await;
    let failures: Vec<LinkError> = results.into_iter().filter_map(Result::err).collect();
    if failures.is_empty() {
      Ok(())
    } else {
      warn!(failed = failures.len(), "some links failed to close");
      Err(LinkError::CloseAll(failures))
    }
  }

  /// The number of keys currently cached, pending ones included.
  pub fn len(&self) -> usize {
    self.shared.entries.lock().live.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Returns `true` if the key has a live or pending link.
  pub fn contains(&self, path: &str, transfer_path: Option<&str>) -> bool {
    let key = LinkKey::new(path, transfer_path);
    self.shared.entries.lock().live.contains_key(&key)
  }

  /// The number of outstanding references on the key's link, or `None` if the
  /// key is not cached or its link is still being created.
  pub fn ref_count(&self, path: &str, transfer_path: Option<&str>) -> Option<usize> {
    let key = LinkKey::new(path, transfer_path);
    let handle = self.shared.entries.lock().live.get(&key).cloned();
    handle.and_then(|handle| handle.ref_count())
  }
}
