//! A concurrent, reference-counted cache of expensive request-response links.
//!
//! # Features
//! - **Exactly-once creation**: concurrent acquirers of the same key share a
//!   single in-flight creation and receive the same link.
//! - **Last-release teardown**: a link is closed once, in the background, when
//!   its last holder releases it.
//! - **Clean failure**: a failed creation is reported to every waiter and then
//!   forgotten, so the next acquire starts fresh.
//! - **Sync & Async**: acquires can be `.await`ed or waited on from a plain
//!   thread.
//! - **Observability**: `tracing` events for every lifecycle step and a
//!   lock-free metrics snapshot.
//!
//! ```no_run
//! # use fibre_links::{LinkCache, LinkProvider};
//! # async fn demo<P: LinkProvider>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
//! let cache = LinkCache::builder().provider(provider).build()?;
//!
//! let link = cache.acquire("orders", None).await?;
//! // ... use `link` ...
//! cache.release("orders", None)?;
//!
//! cache.close_all().await?;
//! # Ok(())
//! # }
//! ```

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod link;
pub mod metrics;
pub mod runtime;

// Internal, crate-only modules
mod cache;
mod handle;
mod key;
mod naming;
mod waiter;

// Re-export the primary user-facing types for convenience
pub use builder::LinkCacheBuilder;
pub use cache::LinkCache;
pub use error::{BoxError, BuildError, LinkError};
pub use key::LinkKey;
pub use link::{Link, LinkFuture, LinkProvider, LinkRequest};
pub use metrics::MetricsSnapshot;
pub use runtime::TaskSpawner;
pub use waiter::AcquireFuture;

#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
