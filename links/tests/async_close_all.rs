mod common;

use common::{build_cache, eventually, MockState};
use fibre_links::LinkError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Barrier;

#[tokio::test]
async fn test_close_all_closes_every_link_once() {
  let state = MockState::new();
  let cache = build_cache(&state);

  let _a = cache.acquire("a", None).await.unwrap();
  let _b1 = cache.acquire("b", None).await.unwrap();
  let _b2 = cache.acquire("b", None).await.unwrap();
  let _c = cache.acquire("c", Some("t")).await.unwrap();
  assert_eq!(cache.len(), 3);

  cache.close_all().await.unwrap();
  assert!(cache.is_empty());
  assert_eq!(state.closes(), 3);
  assert_eq!(cache.metrics().force_closes, 3);

  // Holders of orphaned links may still release; nothing is cached any more.
  cache.release("b", None).unwrap();
  cache.release("a", None).unwrap();
  tokio::task::yield_now().await;
  assert_eq!(state.closes(), 3, "a force-closed link must not be closed again");

  let fresh = cache.acquire("a", None).await.unwrap();
  assert_eq!(state.creations(), 4);
  assert_eq!(cache.ref_count("a", None), Some(1));
  drop(fresh);
}

#[tokio::test]
async fn test_close_all_waits_for_every_close_despite_failures() {
  let state = MockState::new();
  let cache = build_cache(&state);

  for path in ["x", "y", "z"] {
    let _ = cache.acquire(path, None).await.unwrap();
  }
  state.fail_closes.store(true, Ordering::SeqCst);

  match cache.close_all().await {
    Err(LinkError::CloseAll(failures)) => {
      assert_eq!(failures.len(), 3);
      assert!(failures
        .iter()
        .all(|failure| matches!(failure, LinkError::Close { .. })));
    }
    other => panic!("expected aggregated close failures, got {:?}", other),
  }
  assert_eq!(state.closes(), 3, "every close must be attempted");
  assert!(cache.is_empty());
  assert_eq!(cache.metrics().close_failures, 3);
}

#[tokio::test]
async fn test_close_all_on_empty_cache() {
  let state = MockState::new();
  let cache = build_cache(&state);
  assert!(cache.close_all().await.is_ok());
  assert_eq!(state.closes(), 0);
}

#[tokio::test]
async fn test_close_all_while_creation_is_pending() {
  let state = MockState::gated();
  let cache = build_cache(&state);

  let waiter = cache.acquire("slow", None);
  cache.close_all().await.unwrap();

  // The waiter moved to a fresh creation for the same key.
  assert!(cache.contains("slow", None));
  assert_eq!(cache.ref_count("slow", None), None);

  state.open(2);
  let link = waiter.await.unwrap();
  assert_eq!(cache.ref_count("slow", None), Some(1));

  // The link the first creation produced is closed on arrival.
  eventually(|| state.closes() == 1).await;
  assert_eq!(state.creations(), 2);
  assert_ne!(state.closed.lock()[0], link.id());

  cache.release("slow", None).unwrap();
  eventually(|| state.closes() == 2).await;
  assert!(cache.is_empty());
}

#[tokio::test]
async fn test_release_after_close_all_does_not_touch_newer_link() {
  let state = MockState::new();
  let cache = build_cache(&state);

  let old = cache.acquire("a", None).await.unwrap();
  cache.close_all().await.unwrap();
  let new = cache.acquire("a", None).await.unwrap();
  assert_eq!(cache.ref_count("a", None), Some(1));

  // Gives back the reference on the link close_all already closed.
  cache.release("a", None).unwrap();
  tokio::task::yield_now().await;
  assert!(cache.contains("a", None));
  assert_eq!(cache.ref_count("a", None), Some(1));
  assert_eq!(*state.closed.lock(), vec![old.id().to_string()]);

  cache.release("a", None).unwrap();
  eventually(|| state.closes() == 2).await;
  assert_eq!(state.closed.lock()[1], new.id());
  assert!(cache.is_empty());
  assert_eq!(cache.metrics().unbalanced_releases, 0);
}

#[tokio::test]
async fn test_release_order_across_close_all_keeps_held_link_open() {
  let state = MockState::new();
  let cache = build_cache(&state);

  let _old = cache.acquire("a", None).await.unwrap();
  cache.close_all().await.unwrap();
  let _new = cache.acquire("a", None).await.unwrap();

  // Whichever holder releases first, the live link stays open until both did.
  cache.release("a", None).unwrap();
  tokio::task::yield_now().await;
  assert_eq!(state.closes(), 1);
  cache.release("a", None).unwrap();
  eventually(|| state.closes() == 2).await;

  cache.release("a", None).unwrap();
  assert_eq!(cache.metrics().unbalanced_releases, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_acquires_racing_close_all_always_get_a_link() {
  let state = MockState::new();
  let cache = build_cache(&state);
  let num_tasks = 8;
  let rounds = 50;

  for _ in 0..rounds {
    let barrier = Arc::new(Barrier::new(num_tasks + 1));
    let mut tasks = vec![];
    for _ in 0..num_tasks {
      let cache = cache.clone();
      let barrier = barrier.clone();
      tasks.push(tokio::spawn(async move {
        barrier.wait().await;
        let link = cache.acquire("k", None).await.unwrap();
        tokio::task::yield_now().await;
        cache.release("k", None).unwrap();
        drop(link);
      }));
    }

    barrier.wait().await;
    cache.close_all().await.unwrap();
    for task in tasks {
      task.await.unwrap();
    }
  }

  cache.close_all().await.unwrap();
  eventually(|| state.closes() == state.creations()).await;

  let mut closed = state.closed.lock().clone();
  let total = closed.len();
  closed.sort();
  closed.dedup();
  assert_eq!(closed.len(), total, "a link was closed twice");
  assert_eq!(cache.metrics().acquires, (num_tasks * rounds) as u64);
  assert_eq!(cache.metrics().unbalanced_releases, 0);
}

#[tokio::test]
async fn test_acquire_after_close_all_creates_fresh_link() {
  let state = MockState::new();
  let cache = build_cache(&state);

  let old = cache.acquire("a", None).await.unwrap();
  cache.close_all().await.unwrap();

  let new = cache.acquire("a", None).await.unwrap();
  assert_ne!(old.id(), new.id());
  assert_eq!(state.creations(), 2);
  assert!(cache.contains("a", None));
}
