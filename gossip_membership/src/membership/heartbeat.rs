use crate::error::{MembershipError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Logical clock attached to every peer record. Ordered by `generation`, then `version`; the
/// smaller heartbeat carries older information.
#[derive(Serialize, Deserialize, Hash, PartialEq, Eq, Clone, Copy, Debug, Default)]
pub struct Heartbeat {
  generation: u64,
  version: u32,
}
impl Heartbeat {
  pub const SIZE: usize = 12;

  pub fn new(generation: u64, version: u32) -> Heartbeat {
    Heartbeat {
      generation: generation,
      version: version,
    }
  }

  /// Starts a fresh generation, usually the node's startup time in epoch millis.
  pub fn new_generation(generation: u64) -> Heartbeat {
    Heartbeat::new(generation, 0)
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn version(&self) -> u32 {
    self.version
  }

  pub fn wrap(&mut self, other: &Heartbeat) {
    self.generation = other.generation;
    self.version = other.version;
  }

  /// Advances the version within the current generation. Wraps into the next generation if
  /// the version space is exhausted, so the result is always strictly newer. Past the last
  /// generation there is no newer heartbeat, and the clock is left as it was.
  pub fn increment(&mut self) -> Result<()> {
    match self.version.checked_add(1) {
      Some(v) => self.version = v,
      None => {
        self.generation = self
          .generation
          .checked_add(1)
          .ok_or(MembershipError::HeartbeatExhausted)?;
        self.version = 0;
      }
    }
    Ok(())
  }
}
impl Ord for Heartbeat {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .generation
      .cmp(&other.generation)
      .then(self.version.cmp(&other.version))
  }
}
impl PartialOrd for Heartbeat {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

#[test]
fn test_heartbeat_order() {
  use itertools::Itertools;
  use Ordering::*;

  let beats = [(0u64, 0u32), (0, 1), (0, u32::MAX), (1, 0), (1, 7), (9, 3), (u64::MAX, 0)];
  for ((g1, v1), (g2, v2)) in beats.iter().cartesian_product(beats.iter()) {
    let a = Heartbeat::new(*g1, *v1);
    let b = Heartbeat::new(*g2, *v2);
    assert_eq!(a.cmp(&b), (g1, v1).cmp(&(g2, v2)));
    assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
  }
  assert_eq!(Heartbeat::new(5, 0).cmp(&Heartbeat::new(5, 0)), Equal);
  assert_eq!(Heartbeat::new(4, 100).cmp(&Heartbeat::new(5, 0)), Less);
}

#[test]
fn test_heartbeat_increment() {
  let mut hb = Heartbeat::new_generation(3);
  let before = hb;
  hb.increment().unwrap();
  assert!(hb > before);
  assert_eq!(hb, Heartbeat::new(3, 1));

  let mut hb = Heartbeat::new(3, u32::MAX);
  hb.increment().unwrap();
  assert_eq!(hb, Heartbeat::new(4, 0));

  let mut last = Heartbeat::new(u64::MAX, u32::MAX - 1);
  last.increment().unwrap();
  assert_eq!(last.increment(), Err(MembershipError::HeartbeatExhausted));
  assert_eq!(last, Heartbeat::new(u64::MAX, u32::MAX));

  let mut copy = Heartbeat::default();
  copy.wrap(&hb);
  assert_eq!(copy, hb);
}
