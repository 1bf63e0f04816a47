use crate::key::LinkKey;

use std::error::Error;
use std::sync::Arc;

/// A boxed, thread-safe error as returned by link providers and links.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A shared error cause. One creation failure is handed to every waiter that
/// was queued on the failed handle, so the cause must be cheaply cloneable.
pub type SharedCause = Arc<dyn Error + Send + Sync + 'static>;

/// Errors that can occur when building a `LinkCache`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
  /// No `LinkProvider` was configured on the builder.
  #[error("a link cache requires a link provider")]
  ProviderRequired,
  /// No `TaskSpawner` was configured and the default `tokio` feature is not
  /// enabled.
  #[error("a link cache requires a task spawner or the 'tokio' feature")]
  SpawnerRequired,
  /// The link name suffix or the management node name was empty.
  #[error("the {0} must not be empty")]
  EmptyName(&'static str),
}

/// Errors surfaced by the link cache.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LinkError {
  /// The underlying link could not be established. Every caller waiting on
  /// the failed attempt receives a clone of this error.
  #[error("failed to create link for '{key}'")]
  Creation {
    key: LinkKey,
    #[source]
    source: SharedCause,
  },

  /// The underlying link failed to close.
  #[error("failed to close link '{identity}' for '{key}'")]
  Close {
    key: LinkKey,
    identity: String,
    #[source]
    source: SharedCause,
  },

  /// One or more links failed to close during `close_all`.
  #[error("{} link(s) failed to close", .0.len())]
  CloseAll(Vec<LinkError>),

  /// `release` was called without a matching, resolved `acquire`.
  #[error("release of '{key}' does not match any outstanding acquire")]
  UnbalancedRelease { key: LinkKey },
}

impl LinkError {
  pub(crate) fn creation(key: LinkKey, source: BoxError) -> Self {
    LinkError::Creation {
      key,
      source: Arc::from(source),
    }
  }

  pub(crate) fn close(key: LinkKey, identity: &str, source: BoxError) -> Self {
    LinkError::Close {
      key,
      identity: identity.to_string(),
      source: Arc::from(source),
    }
  }

  /// Returns the key this error relates to, if it concerns a single link.
  pub fn key(&self) -> Option<&LinkKey> {
    match self {
      LinkError::Creation { key, .. }
      | LinkError::Close { key, .. }
      | LinkError::UnbalancedRelease { key } => Some(key),
      LinkError::CloseAll(_) => None,
    }
  }
}
