#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fibre_links::{Link, LinkCache, LinkFuture, LinkProvider, LinkRequest, TaskSpawner};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

#[derive(Debug, thiserror::Error)]
#[error("mock {0} failed")]
pub struct MockError(&'static str);

/// Shared, inspectable state behind a `MockProvider` and all of its links.
#[derive(Default)]
pub struct MockState {
  pub creations: AtomicUsize,
  pub closes: AtomicUsize,
  pub requests: Mutex<Vec<LinkRequest>>,
  pub closed: Mutex<Vec<String>>,
  /// The number of upcoming creations that should fail.
  pub fail_creations: AtomicUsize,
  pub fail_closes: AtomicBool,
  /// When set, each creation waits for one permit before completing.
  pub gate: Option<Semaphore>,
  next_id: AtomicUsize,
}

impl MockState {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Creations block until `open` hands out permits.
  pub fn gated() -> Arc<Self> {
    Arc::new(Self {
      gate: Some(Semaphore::new(0)),
      ..Default::default()
    })
  }

  pub fn open(&self, creations: usize) {
    if let Some(gate) = &self.gate {
      gate.add_permits(creations);
    }
  }

  pub fn creations(&self) -> usize {
    self.creations.load(Ordering::SeqCst)
  }

  pub fn closes(&self) -> usize {
    self.closes.load(Ordering::SeqCst)
  }
}

pub struct MockProvider {
  pub state: Arc<MockState>,
}

pub struct MockLink {
  id: String,
  state: Arc<MockState>,
}

impl MockLink {
  pub fn id(&self) -> &str {
    &self.id
  }
}

impl Link for MockLink {
  fn identity(&self) -> &str {
    &self.id
  }

  fn close(&self) -> LinkFuture<()> {
    let state = self.state.clone();
    let id = self.id.clone();
    Box::pin(async move {
      state.closes.fetch_add(1, Ordering::SeqCst);
      state.closed.lock().push(id);
      if state.fail_closes.load(Ordering::SeqCst) {
        return Err(MockError("close").into());
      }
      Ok(())
    })
  }
}

impl LinkProvider for MockProvider {
  type Link = MockLink;

  fn create_link(&self, request: LinkRequest) -> LinkFuture<MockLink> {
    let state = self.state.clone();
    Box::pin(async move {
      state.creations.fetch_add(1, Ordering::SeqCst);
      let id = format!(
        "{}#{}",
        request.key,
        state.next_id.fetch_add(1, Ordering::SeqCst)
      );
      state.requests.lock().push(request);

      if let Some(gate) = &state.gate {
        gate.acquire().await.expect("gate closed").forget();
      }

      let should_fail = state
        .fail_creations
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
      if should_fail {
        return Err(MockError("creation").into());
      }
      Ok(MockLink { id, state })
    })
  }
}

/// Builds a cache on the current Tokio runtime.
pub fn build_cache(state: &Arc<MockState>) -> LinkCache<MockProvider> {
  LinkCache::builder()
    .provider(MockProvider {
      state: state.clone(),
    })
    .build()
    .unwrap()
}

/// A spawner that drives each future to completion on its own OS thread.
pub struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    std::thread::spawn(move || futures_executor::block_on(future));
  }
}

/// Polls `condition` until it holds, panicking after a second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
  for _ in 0..200 {
    if condition() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  panic!("condition was not met within 1s");
}

/// Routes `tracing` output to the test harness. Set `RUST_LOG` to see it.
pub fn init_logging() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}
