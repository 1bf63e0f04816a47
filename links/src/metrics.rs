use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the link cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Acquire/Release ---
  pub(crate) acquires: CachePadded<AtomicU64>,
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) waits: CachePadded<AtomicU64>,
  pub(crate) releases: CachePadded<AtomicU64>,
  pub(crate) unbalanced_releases: CachePadded<AtomicU64>,

  // --- Link Lifecycle ---
  pub(crate) creations: CachePadded<AtomicU64>,
  pub(crate) creation_failures: CachePadded<AtomicU64>,
  pub(crate) closes: CachePadded<AtomicU64>,
  pub(crate) close_failures: CachePadded<AtomicU64>,
  pub(crate) force_closes: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      acquires: CachePadded::new(AtomicU64::new(0)),
      hits: CachePadded::new(AtomicU64::new(0)),
      waits: CachePadded::new(AtomicU64::new(0)),
      releases: CachePadded::new(AtomicU64::new(0)),
      unbalanced_releases: CachePadded::new(AtomicU64::new(0)),
      creations: CachePadded::new(AtomicU64::new(0)),
      creation_failures: CachePadded::new(AtomicU64::new(0)),
      closes: CachePadded::new(AtomicU64::new(0)),
      close_failures: CachePadded::new(AtomicU64::new(0)),
      force_closes: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &CachePadded<AtomicU64>) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      acquires: self.acquires.load(Ordering::Relaxed),
      hits: self.hits.load(Ordering::Relaxed),
      waits: self.waits.load(Ordering::Relaxed),
      releases: self.releases.load(Ordering::Relaxed),
      unbalanced_releases: self.unbalanced_releases.load(Ordering::Relaxed),
      creations: self.creations.load(Ordering::Relaxed),
      creation_failures: self.creation_failures.load(Ordering::Relaxed),
      closes: self.closes.load(Ordering::Relaxed),
      close_failures: self.close_failures.load(Ordering::Relaxed),
      force_closes: self.force_closes.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of `acquire` calls.
  pub acquires: u64,
  /// Acquires served immediately by an established link.
  pub hits: u64,
  /// Acquires that had to wait for a link to be created.
  pub waits: u64,
  /// The number of balanced `release` calls.
  pub releases: u64,
  /// Releases that did not match an outstanding acquire.
  pub unbalanced_releases: u64,
  /// Link creations started.
  pub creations: u64,
  /// Link creations that failed.
  pub creation_failures: u64,
  /// Links closed after their last reference was released.
  pub closes: u64,
  /// Closes (of either kind) that failed.
  pub close_failures: u64,
  /// Links closed by `close_all`.
  pub force_closes: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let hit_ratio = if self.acquires == 0 {
      0.0
    } else {
      self.hits as f64 / self.acquires as f64
    };
    f.debug_struct("MetricsSnapshot")
      .field("acquires", &self.acquires)
      .field("hits", &self.hits)
      .field("hit_ratio", &format!("{:.2}%", hit_ratio * 100.0))
      .field("waits", &self.waits)
      .field("releases", &self.releases)
      .field("unbalanced_releases", &self.unbalanced_releases)
      .field("creations", &self.creations)
      .field("creation_failures", &self.creation_failures)
      .field("closes", &self.closes)
      .field("close_failures", &self.close_failures)
      .field("force_closes", &self.force_closes)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
