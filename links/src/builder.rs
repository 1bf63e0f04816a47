use crate::cache::{CacheShared, Entries, LinkCache};
use crate::error::BuildError;
use crate::link::LinkProvider;
use crate::metrics::Metrics;
use crate::naming::LinkNamer;
use crate::runtime::TaskSpawner;

use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// The default suffix of generated link names.
pub const DEFAULT_LINK_NAME_SUFFIX: &str = "RequestResponse";

/// The default node that request-response links attach to under an entity.
pub const DEFAULT_MANAGEMENT_NODE: &str = "$management";

/// A builder for creating `LinkCache` instances.
pub struct LinkCacheBuilder<P> {
  provider: Option<P>,
  spawner: Option<Arc<dyn TaskSpawner>>,
  link_name_suffix: String,
  management_node: String,
}

impl<P> fmt::Debug for LinkCacheBuilder<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LinkCacheBuilder")
      .field("has_provider", &self.provider.is_some())
      .field("has_spawner", &self.spawner.is_some())
      .field("link_name_suffix", &self.link_name_suffix)
      .field("management_node", &self.management_node)
      .finish()
  }
}

impl<P> Default for LinkCacheBuilder<P> {
  fn default() -> Self {
    Self::new()
  }
}

impl<P> LinkCacheBuilder<P> {
  /// Creates a new `LinkCacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      provider: None,
      spawner: None,
      link_name_suffix: DEFAULT_LINK_NAME_SUFFIX.to_string(),
      management_node: DEFAULT_MANAGEMENT_NODE.to_string(),
    }
  }

  /// Sets the provider that creates the underlying links. Required.
  pub fn provider(mut self, provider: P) -> Self {
    self.provider = Some(provider);
    self
  }

  /// Sets the spawner that drives link creation and teardown.
  ///
  /// With the `tokio` feature enabled this defaults to the Tokio runtime that
  /// is current when `build` is called.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Sets the suffix of generated link names, which take the form
  /// `1a2b3c4d-<suffix>`.
  pub fn link_name_suffix(mut self, suffix: &str) -> Self {
    self.link_name_suffix = suffix.to_string();
    self
  }

  /// Sets the node under each entity path that links attach to.
  ///
  /// Defaults to `$management`, so a link for `orders` targets
  /// `orders/$management`.
  pub fn management_node(mut self, node: &str) -> Self {
    self.management_node = node.to_string();
    self
  }
}

impl<P: LinkProvider> LinkCacheBuilder<P> {
  /// Builds the `LinkCache`.
  pub fn build(mut self) -> Result<LinkCache<P>, BuildError> {
    self.validate()?;
    let provider = self.provider.take().ok_or(BuildError::ProviderRequired)?;
    let spawner = self.resolve_spawner()?;

    let shared = Arc::new(CacheShared {
      entries: Mutex::new(Entries::default()),
      provider,
      spawner,
      metrics: Arc::new(Metrics::new()),
      namer: LinkNamer::new(&self.link_name_suffix),
      management_node: self.management_node,
    });
    Ok(LinkCache { shared })
  }

  fn resolve_spawner(&mut self) -> Result<Arc<dyn TaskSpawner>, BuildError> {
    if let Some(spawner) = self.spawner.take() {
      return Ok(spawner);
    }
    #[cfg(feature = "tokio")]
    {
      if let Some(spawner) = crate::runtime::TokioSpawner::current() {
        return Ok(Arc::new(spawner));
      }
    }
    Err(BuildError::SpawnerRequired)
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.provider.is_none() {
      return Err(BuildError::ProviderRequired);
    }
    if self.link_name_suffix.is_empty() {
      return Err(BuildError::EmptyName("link name suffix"));
    }
    if self.management_node.is_empty() {
      return Err(BuildError::EmptyName("management node"));
    }
    Ok(())
  }
}
