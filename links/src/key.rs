use std::fmt;
use std::sync::Arc;

/// The identity of a cached link: an entity path plus an optional transfer
/// destination path.
///
/// A key without a transfer path is distinct from one with a transfer path,
/// even if that transfer path is empty. Both components are shared, so cloning
/// a key is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
  path: Arc<str>,
  transfer_path: Option<Arc<str>>,
}

impl LinkKey {
  pub fn new(path: &str, transfer_path: Option<&str>) -> Self {
    Self {
      path: Arc::from(path),
      transfer_path: transfer_path.map(Arc::from),
    }
  }

  /// The primary entity path.
  pub fn path(&self) -> &str {
    &self.path
  }

  /// The transfer destination path, if any.
  pub fn transfer_path(&self) -> Option<&str> {
    self.transfer_path.as_deref()
  }
}

impl fmt::Display for LinkKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.transfer_path {
      Some(transfer) => write!(f, "{}:{}", self.path, transfer),
      None => write!(f, "{}", self.path),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn transfer_path_is_part_of_identity() {
    let plain = LinkKey::new("queue", None);
    let via = LinkKey::new("queue", Some("dest"));
    let empty = LinkKey::new("queue", Some(""));

    assert_ne!(plain, via);
    assert_ne!(plain, empty);
    assert_eq!(via, LinkKey::new("queue", Some("dest")));

    let set: HashSet<_> = [plain, via, empty].into_iter().collect();
    assert_eq!(set.len(), 3);
  }

  #[test]
  fn separator_in_path_does_not_collide() {
    // "a:b" with no transfer and "a" via "b" print the same but are different links.
    let joined = LinkKey::new("a:b", None);
    let split = LinkKey::new("a", Some("b"));
    assert_eq!(joined.to_string(), split.to_string());
    assert_ne!(joined, split);
  }
}
