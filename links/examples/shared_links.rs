use fibre_links::{Link, LinkCache, LinkFuture, LinkProvider, LinkRequest};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tokio::time::{sleep, Duration};

// A simulated transport link.
struct DemoLink {
  name: String,
}

impl Link for DemoLink {
  fn identity(&self) -> &str {
    &self.name
  }

  fn close(&self) -> LinkFuture<()> {
    let name = self.name.clone();
    Box::pin(async move {
      println!("--- Transport: closing '{}'", name);
      Ok(())
    })
  }
}

// A simulated connection that takes a while to attach each link.
struct DemoProvider {
  attach_count: Arc<AtomicUsize>,
}

impl LinkProvider for DemoProvider {
  type Link = DemoLink;

  fn create_link(&self, request: LinkRequest) -> LinkFuture<DemoLink> {
    let attach_count = self.attach_count.clone();
    Box::pin(async move {
      println!(
        "--- Transport: attaching '{}' to '{}'...",
        request.link_name, request.target_address
      );
      attach_count.fetch_add(1, Ordering::SeqCst);
      sleep(Duration::from_millis(300)).await;
      Ok(DemoLink {
        name: request.link_name,
      })
    })
  }
}

#[tokio::main]
async fn main() {
  let attach_count = Arc::new(AtomicUsize::new(0));

  let cache = LinkCache::builder()
    .provider(DemoProvider {
      attach_count: attach_count.clone(),
    })
    .build()
    .expect("Failed to build link cache");

  println!("--- Spawning 10 tasks that all need a link to 'orders' ---\n");

  let mut tasks = Vec::new();
  for i in 0..10 {
    let cache = cache.clone();
    tasks.push(tokio::spawn(async move {
      let link = cache.acquire("orders", None).await.unwrap();
      println!("[Task {}] Using link '{}'", i, link.identity());
      sleep(Duration::from_millis(50)).await;
      cache.release("orders", None).unwrap();
    }));
  }

  for task in tasks {
    task.await.unwrap();
  }

  // Give the background close a moment to run.
  sleep(Duration::from_millis(50)).await;

  println!("\n--- Verification ---");
  println!(
    "Links attached: {} (expected 1)",
    attach_count.load(Ordering::SeqCst)
  );
  println!("Links cached now: {}", cache.len());
  println!("{:#?}", cache.metrics());

  cache.close_all().await.unwrap();
}
