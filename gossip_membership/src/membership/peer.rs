use crate::error::{MembershipError, Result};
use crate::membership::utils::{ensure, now_millis, MAX_PEER_LENGTH, MAX_RAFT_MEMBERSHIPS};
use crate::membership::{Endpoint, EndpointType, Heartbeat, RaftMembership, RaftMembershipList};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::convert::TryFrom;

use PeerState::*;

/// Lifecycle of a peer as seen by the local failure detector.
#[derive(
  Serialize,
  Deserialize,
  Hash,
  PartialEq,
  Eq,
  Clone,
  Copy,
  Debug,
  IntoPrimitive,
  TryFromPrimitive,
)]
#[repr(u8)]
pub enum PeerState {
  Null = 0,
  Alive = 1,
  Suspect = 2,
  Dead = 3,
}
impl Default for PeerState {
  fn default() -> Self {
    Null
  }
}

/// Outcome of asking a peer in state `current` to move to some requested state.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Transition {
  pub state: PeerState,
  /// Whether the state actually changed, and with it the state change timestamp.
  pub changed: bool,
}

/// Moving to the state a peer is already in is a no-op. Every other request is honored; the
/// merge rules decide which requests are made.
pub fn transition(current: PeerState, requested: PeerState) -> Transition {
  Transition {
    state: requested,
    changed: current != requested,
  }
}

/// One cluster member's gossip record.
///
/// Peers are identified, and ordered by [`Peer::compare`], through their management endpoint
/// alone. The derived `PartialEq` compares every field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Peer {
  state: PeerState,
  change_state_time: i64,
  heartbeat: Heartbeat,
  client_endpoint: Endpoint,
  management_endpoint: Endpoint,
  replication_endpoint: Endpoint,
  raft_memberships: RaftMembershipList,
}
impl Peer {
  /// state:u8 generation:u64 version:u32 changeStateTime:i64
  pub const HEADER_SIZE: usize = 1 + Heartbeat::SIZE + 8;

  pub fn new(client: Endpoint, management: Endpoint, replication: Endpoint) -> Peer {
    Peer {
      client_endpoint: client,
      management_endpoint: management,
      replication_endpoint: replication,
      ..Peer::default()
    }
  }

  pub fn state(&self) -> PeerState {
    self.state
  }

  pub fn change_state_time(&self) -> i64 {
    self.change_state_time
  }

  pub fn heartbeat(&self) -> &Heartbeat {
    &self.heartbeat
  }

  pub fn heartbeat_mut(&mut self) -> &mut Heartbeat {
    &mut self.heartbeat
  }

  pub fn client_endpoint(&self) -> &Endpoint {
    &self.client_endpoint
  }

  pub fn management_endpoint(&self) -> &Endpoint {
    &self.management_endpoint
  }

  pub fn replication_endpoint(&self) -> &Endpoint {
    &self.replication_endpoint
  }

  pub fn endpoint(&self, tpe: EndpointType) -> &Endpoint {
    match tpe {
      EndpointType::Client => &self.client_endpoint,
      EndpointType::Management => &self.management_endpoint,
      EndpointType::Replication => &self.replication_endpoint,
    }
  }

  pub fn endpoint_mut(&mut self, tpe: EndpointType) -> &mut Endpoint {
    match tpe {
      EndpointType::Client => &mut self.client_endpoint,
      EndpointType::Management => &mut self.management_endpoint,
      EndpointType::Replication => &mut self.replication_endpoint,
    }
  }

  pub fn raft_memberships(&self) -> &RaftMembershipList {
    &self.raft_memberships
  }

  pub fn raft_memberships_mut(&mut self) -> &mut RaftMembershipList {
    &mut self.raft_memberships
  }

  pub fn alive(&mut self) -> bool {
    self.transition_at(Alive, now_millis())
  }

  pub fn suspect(&mut self) -> bool {
    self.transition_at(Suspect, now_millis())
  }

  pub fn dead(&mut self) -> bool {
    self.transition_at(Dead, now_millis())
  }

  /// Applies [`transition`], stamping `now` only if the state changed. Returns whether it did.
  pub fn transition_at(&mut self, requested: PeerState, now: i64) -> bool {
    let t = transition(self.state, requested);
    if t.changed {
      self.state = t.state;
      self.change_state_time = now;
    }
    t.changed
  }

  /// Total order over peers: the order of their management endpoints.
  pub fn compare(&self, other: &Peer) -> Ordering {
    self.management_endpoint.cmp(&other.management_endpoint)
  }

  /// Deep copy of `other`. Memberships backed by live partitions are copied detached.
  pub fn wrap(&mut self, other: &Peer) {
    self.state = other.state;
    self.change_state_time = other.change_state_time;
    self.heartbeat.wrap(&other.heartbeat);
    self.adopt_details(other);
  }

  /// Copies endpoints and raft memberships, leaving heartbeat and state alone.
  pub(crate) fn adopt_details(&mut self, other: &Peer) {
    self.client_endpoint.wrap(&other.client_endpoint);
    self.management_endpoint.wrap(&other.management_endpoint);
    self.replication_endpoint.wrap(&other.replication_endpoint);
    self.raft_memberships.wrap(&other.raft_memberships);
  }

  /// Exact number of bytes [`write`](Peer::write) produces.
  pub fn encoded_len(&self) -> usize {
    Self::HEADER_SIZE
      + self.client_endpoint.encoded_len()
      + self.management_endpoint.encoded_len()
      + self.replication_endpoint.encoded_len()
      + self.raft_memberships.encoded_len()
  }

  // Serialization is big endian
  pub fn write<B: BufMut>(&self, buf: &mut B) {
    buf.put_u8(self.state.into());
    buf.put_u64(self.heartbeat.generation());
    buf.put_u32(self.heartbeat.version());
    buf.put_i64(self.change_state_time);
    self.client_endpoint.write(EndpointType::Client, buf);
    self.management_endpoint.write(EndpointType::Management, buf);
    self.replication_endpoint.write(EndpointType::Replication, buf);
    self.raft_memberships.write(buf);
  }

  pub fn encode(&self) -> Bytes {
    let mut buf = BytesMut::with_capacity(self.encoded_len());
    self.write(&mut buf);
    buf.freeze()
  }

  /// Decodes one record. The whole of `record` must be consumed: a membership running past its
  /// end is a framing error, and so is anything left over after the endpoints that does not
  /// parse as memberships.
  pub fn decode(record: &[u8]) -> Result<Peer> {
    if record.len() > MAX_PEER_LENGTH {
      return Err(MembershipError::RecordTooLong {
        len: record.len(),
        max: MAX_PEER_LENGTH,
      });
    }
    let mut buf = record;
    match Self::decode_from(&mut buf) {
      Err(MembershipError::Truncated { needed, remaining }) => Err(MembershipError::Framing {
        declared: record.len(),
        consumed: record.len() - remaining + needed,
      }),
      res => res,
    }
  }

  fn decode_from(buf: &mut &[u8]) -> Result<Peer> {
    ensure(buf, Self::HEADER_SIZE)?;
    let tag = buf.get_u8();
    let state = PeerState::try_from(tag).map_err(|_| MembershipError::UnknownPeerState(tag))?;
    let generation = buf.get_u64();
    let version = buf.get_u32();
    let change_state_time = buf.get_i64();

    let mut peer = Peer {
      state: state,
      change_state_time: change_state_time,
      heartbeat: Heartbeat::new(generation, version),
      ..Peer::default()
    };
    let mut seen = [false; 3];
    for _ in 0..3 {
      let (tpe, endpoint) = Endpoint::read(buf)?;
      let slot = u8::from(tpe) as usize;
      if seen[slot] {
        return Err(MembershipError::DuplicateEndpoint(tpe));
      }
      seen[slot] = true;
      *peer.endpoint_mut(tpe) = endpoint;
    }
    while !buf.is_empty() {
      if peer.raft_memberships.len() == MAX_RAFT_MEMBERSHIPS {
        return Err(MembershipError::CapacityExceeded {
          what: "raft membership list",
          capacity: MAX_RAFT_MEMBERSHIPS,
        });
      }
      peer.raft_memberships.push(RaftMembership::read(buf)?)?;
    }
    Ok(peer)
  }
}

/// Borrowed management endpoint of an encoded record, without decoding anything else.
pub(crate) fn management_key(record: &[u8]) -> Result<(&[u8], u16)> {
  let mut buf = record;
  ensure(buf, Peer::HEADER_SIZE)?;
  buf.advance(Peer::HEADER_SIZE);
  for _ in 0..3 {
    let (tpe, host, port) = Endpoint::read_borrowed(&mut buf)?;
    if tpe == EndpointType::Management {
      return Ok((host, port));
    }
  }
  Err(MembershipError::MissingEndpoint(EndpointType::Management))
}

#[cfg(test)]
use crate::membership::RaftMembershipState;

#[cfg(test)]
fn test_peer(port: u16, memberships: usize) -> Peer {
  let mut peer = Peer::new(
    Endpoint::new("10.1.0.4", port).unwrap(),
    Endpoint::new("10.1.0.4", port + 1).unwrap(),
    Endpoint::new("broker-4.internal", port + 2).unwrap(),
  );
  *peer.heartbeat_mut() = Heartbeat::new(1_600_000_000_000, 42);
  peer.transition_at(Suspect, 1_600_000_000_500);
  for i in 0..memberships {
    peer
      .raft_memberships_mut()
      .add_detached(i as i32, 3, RaftMembershipState::Candidate, &format!("topic-{}", i))
      .unwrap();
  }
  peer
}

#[test]
fn test_transition_is_idempotent() {
  assert_eq!(
    transition(Alive, Alive),
    Transition {
      state: Alive,
      changed: false
    }
  );
  assert!(transition(Alive, Suspect).changed);
  assert!(transition(Dead, Alive).changed);

  let mut peer = Peer::default();
  assert!(peer.transition_at(Alive, 10));
  assert_eq!(peer.change_state_time(), 10);
  assert!(!peer.transition_at(Alive, 20));
  assert_eq!(peer.change_state_time(), 10);
  assert!(peer.transition_at(Suspect, 30));
  assert_eq!((peer.state(), peer.change_state_time()), (Suspect, 30));
  assert!(peer.dead());
  assert!(!peer.dead());
  assert_eq!(peer.state(), Dead);
}

#[test]
fn test_peer_roundtrip() {
  for n in [0usize, 1, 7, MAX_RAFT_MEMBERSHIPS].iter() {
    let peer = test_peer(26500, *n);
    let bytes = peer.encode();
    assert_eq!(bytes.len(), peer.encoded_len());
    assert!(bytes.len() <= MAX_PEER_LENGTH);
    assert_eq!(Peer::decode(&bytes), Ok(peer));
  }
}

#[test]
fn test_peer_endpoint_order_on_wire() {
  let peer = test_peer(26500, 1);
  let mut buf = BytesMut::new();
  buf.put_u8(peer.state().into());
  buf.put_u64(peer.heartbeat().generation());
  buf.put_u32(peer.heartbeat().version());
  buf.put_i64(peer.change_state_time());
  peer.replication_endpoint().write(EndpointType::Replication, &mut buf);
  peer.client_endpoint().write(EndpointType::Client, &mut buf);
  peer.management_endpoint().write(EndpointType::Management, &mut buf);
  peer.raft_memberships().write(&mut buf);
  assert_eq!(Peer::decode(&buf), Ok(peer.clone()));
  assert_eq!(
    management_key(&buf),
    Ok((&b"10.1.0.4"[..], 26501))
  );
}

#[test]
fn test_peer_decode_rejects() {
  let peer = test_peer(26500, 2);
  let bytes = peer.encode();

  let cut = &bytes[..bytes.len() - 3];
  assert_eq!(
    Peer::decode(cut),
    Err(MembershipError::Framing {
      declared: cut.len(),
      consumed: bytes.len()
    })
  );

  let mut bad_state = bytes.to_vec();
  bad_state[0] = 17;
  assert_eq!(
    Peer::decode(&bad_state),
    Err(MembershipError::UnknownPeerState(17))
  );

  let mut dup = bytes.to_vec();
  dup[Peer::HEADER_SIZE] = EndpointType::Management.into();
  assert_eq!(
    Peer::decode(&dup),
    Err(MembershipError::DuplicateEndpoint(EndpointType::Management))
  );
}

#[test]
fn test_peer_wrap_is_deep() {
  let source = test_peer(26500, 3);
  let mut copy = Peer::default();
  copy.wrap(&source);
  assert_eq!(copy, source);
  copy.raft_memberships_mut().clear();
  copy.heartbeat_mut().increment().unwrap();
  assert_eq!(source.raft_memberships().len(), 3);
  assert_eq!(source.heartbeat().version(), 42);
}
