use crate::error::{MembershipError, Result};
use crate::membership::{Endpoint, Peer, RaftMembership};
use bytes::Buf;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Longest host name, in bytes, an [`Endpoint`] may carry.
pub const MAX_HOST_LENGTH: usize = 128;
/// Longest topic name, in bytes, a [`RaftMembership`] may carry.
pub const MAX_TOPIC_NAME_LENGTH: usize = 128;
/// Number of raft memberships a single peer may advertise.
pub const MAX_RAFT_MEMBERSHIPS: usize = 20;
/// Upper bound on the encoded size of one peer record. Every slot of a
/// [`PeerList`](crate::membership::PeerList) is sized for it.
pub const MAX_PEER_LENGTH: usize =
  Peer::HEADER_SIZE + 3 * Endpoint::MAX_LENGTH + MAX_RAFT_MEMBERSHIPS * RaftMembership::MAX_LENGTH;

/// Configures a [`MembershipService`](crate::membership::MembershipService).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct MembershipConfig {
  /// The number of peers the resident [`PeerList`](crate::membership::PeerList) can hold. A
  /// gossip merge that would discover more peers than this fails instead of dropping any. Diffs
  /// sent back to gossip senders are bounded by the same number.
  ///
  /// default: `1000`
  pub peer_capacity: usize,
  /// How often the local heartbeat is advanced. Only the simulation binary schedules rounds;
  /// the service itself advances on request.
  ///
  /// default: `1 second`
  pub heartbeat_interval: Duration,
  /// The number of peers each gossip round is sent to. Only used by the simulation binary.
  ///
  /// default: `2`
  pub gossip_fanout: usize,
}
impl Default for MembershipConfig {
  #[inline]
  fn default() -> Self {
    MembershipConfig {
      peer_capacity: 1000,
      heartbeat_interval: Duration::from_millis(1000),
      gossip_fanout: 2,
    }
  }
}

/// Wall clock in epoch millis, used for state change timestamps.
pub fn now_millis() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as i64)
    .unwrap_or(0)
}

pub(crate) fn ensure(buf: &[u8], needed: usize) -> Result<()> {
  if buf.len() < needed {
    Err(MembershipError::Truncated {
      needed: needed,
      remaining: buf.len(),
    })
  } else {
    Ok(())
  }
}

pub(crate) fn get_str(buf: &mut &[u8], len: usize, what: &'static str) -> Result<String> {
  ensure(buf, len)?;
  let s = std::str::from_utf8(&buf[..len])
    .map_err(|_| MembershipError::InvalidUtf8(what))?
    .to_string();
  buf.advance(len);
  Ok(s)
}

#[test]
fn test_max_peer_length() {
  assert_eq!(Peer::HEADER_SIZE, 21);
  assert_eq!(Endpoint::MAX_LENGTH, 135);
  assert_eq!(RaftMembership::MAX_LENGTH, 139);
  assert_eq!(MAX_PEER_LENGTH, 21 + 3 * 135 + 20 * 139);
}

#[test]
fn test_get_str() {
  let bytes = b"topic-arest";
  let mut buf = &bytes[..];
  assert_eq!(get_str(&mut buf, 5, "topic"), Ok("topic".to_string()));
  assert_eq!(buf, b"-arest");
  assert_eq!(
    get_str(&mut buf, 7, "topic"),
    Err(MembershipError::Truncated {
      needed: 7,
      remaining: 6
    })
  );
  let bad = [0xffu8, 0xfe];
  assert_eq!(
    get_str(&mut &bad[..], 2, "topic"),
    Err(MembershipError::InvalidUtf8("topic"))
  );
}
