//! The narrow interfaces through which the cache talks to the transport layer.

use crate::error::BoxError;
use crate::key::LinkKey;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Link property naming the destination of a transfer (send-via) link.
pub const TRANSFER_DESTINATION_PROPERTY: &str = "com.microsoft:transfer-destination-address";

/// A boxed future returned by providers and links.
pub type LinkFuture<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send>>;

/// An established request-response link to a remote endpoint.
///
/// The cache shares one link between all current holders as an `Arc` and
/// closes it at most once.
pub trait Link: Send + Sync + 'static {
  /// A human-readable identity used in diagnostics only.
  fn identity(&self) -> &str;

  /// Closes the link.
  fn close(&self) -> LinkFuture<()>;
}

/// Creates links on behalf of the cache.
///
/// Credentials, endpoint naming and the transport itself live behind this
/// trait.
pub trait LinkProvider: Send + Sync + 'static {
  type Link: Link;

  /// Starts creating a link for the given request.
  fn create_link(&self, request: LinkRequest) -> LinkFuture<Self::Link>;
}

/// Everything a provider needs to establish one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
  /// The cache key the link is created for.
  pub key: LinkKey,
  /// A unique name for this creation attempt, used for log correlation.
  pub link_name: String,
  /// The address the link attaches to, e.g. `orders/$management`.
  pub target_address: String,
  /// Extra properties to attach to the link.
  pub properties: BTreeMap<String, String>,
}

impl LinkRequest {
  pub(crate) fn new(key: LinkKey, link_name: String, management_node: &str) -> Self {
    let target_address = format!("{}/{}", key.path(), management_node);
    let mut properties = BTreeMap::new();
    if let Some(transfer) = key.transfer_path() {
      properties.insert(TRANSFER_DESTINATION_PROPERTY.to_string(), transfer.to_string());
    }
    Self {
      key,
      link_name,
      target_address,
      properties,
    }
  }
}
