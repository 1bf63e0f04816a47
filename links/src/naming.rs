use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const WEYL_CONSTANT: u64 = 0x9E3779B97F4A7C15;

/// Generates short, unique-enough link names for log correlation.
///
/// A Weyl sequence on an atomic integer, finished with the splitmix64 mixer so
/// consecutive names don't share a prefix. Not cryptographically secure.
#[derive(Debug)]
pub(crate) struct LinkNamer {
  state: AtomicU64,
  suffix: String,
}

impl LinkNamer {
  pub fn new(suffix: &str) -> Self {
    let seed = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_nanos() as u64)
      .unwrap_or(WEYL_CONSTANT);
    Self::with_seed(seed, suffix)
  }

  pub fn with_seed(seed: u64, suffix: &str) -> Self {
    Self {
      state: AtomicU64::new(if seed == 0 { 1 } else { seed }),
      suffix: suffix.to_string(),
    }
  }

  #[inline(always)]
  fn next_u64(&self) -> u64 {
    let mut z = self.state.fetch_add(WEYL_CONSTANT, Ordering::Relaxed);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
  }

  /// Returns a fresh name of the form `1a2b3c4d-<suffix>`.
  pub fn next_name(&self) -> String {
    format!("{:08x}-{}", self.next_u64() as u32, self.suffix)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_carry_suffix_and_differ() {
    let namer = LinkNamer::with_seed(42, "RequestResponse");
    let a = namer.next_name();
    let b = namer.next_name();
    assert!(a.ends_with("-RequestResponse"));
    assert_eq!(a.len(), 8 + 1 + "RequestResponse".len());
    assert_ne!(a, b);
  }
}
