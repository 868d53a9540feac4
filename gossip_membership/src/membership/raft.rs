use crate::error::{MembershipError, Result};
use crate::membership::utils::{ensure, get_str, MAX_RAFT_MEMBERSHIPS, MAX_TOPIC_NAME_LENGTH};
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

/// Role a node plays in one partition's raft group.
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
pub enum RaftMembershipState {
  Follower = 0,
  Candidate = 1,
  Leader = 2,
}
impl Default for RaftMembershipState {
  fn default() -> Self {
    RaftMembershipState::Follower
  }
}

/// Read accessors of a local raft partition. The consensus module owns the implementor and may
/// change `term` and `state` at any time, so implementors must be safe to read concurrently.
pub trait RaftPartition: Send + Sync {
  fn partition_id(&self) -> i32;
  fn term(&self) -> i32;
  fn state(&self) -> RaftMembershipState;
  fn topic_name(&self) -> &str;
}

/// One partition membership advertised by a peer.
///
/// The local node advertises its own partitions by [`Reference`](RaftMembership::Reference),
/// reading through to the live partition every time. Memberships decoded from gossip are
/// [`Detached`](RaftMembership::Detached) copies.
#[derive(Clone)]
pub enum RaftMembership {
  Reference(Arc<dyn RaftPartition>),
  Detached {
    partition_id: i32,
    term: i32,
    state: RaftMembershipState,
    topic_name: String,
  },
}
impl RaftMembership {
  /// partitionId:i32 term:i32 state:u8 topicLen:u16
  pub const HEADER_SIZE: usize = 11;
  pub const MAX_LENGTH: usize = Self::HEADER_SIZE + MAX_TOPIC_NAME_LENGTH;

  pub fn detached<S: Into<String>>(
    partition_id: i32,
    term: i32,
    state: RaftMembershipState,
    topic_name: S,
  ) -> Result<RaftMembership> {
    let topic_name = topic_name.into();
    check_topic(&topic_name)?;
    Ok(RaftMembership::Detached {
      partition_id: partition_id,
      term: term,
      state: state,
      topic_name: topic_name,
    })
  }

  pub fn reference(partition: Arc<dyn RaftPartition>) -> RaftMembership {
    RaftMembership::Reference(partition)
  }

  pub fn is_reference(&self) -> bool {
    matches!(self, RaftMembership::Reference(_))
  }

  pub fn partition_id(&self) -> i32 {
    match self {
      RaftMembership::Reference(p) => p.partition_id(),
      RaftMembership::Detached { partition_id, .. } => *partition_id,
    }
  }

  pub fn term(&self) -> i32 {
    match self {
      RaftMembership::Reference(p) => p.term(),
      RaftMembership::Detached { term, .. } => *term,
    }
  }

  pub fn state(&self) -> RaftMembershipState {
    match self {
      RaftMembership::Reference(p) => p.state(),
      RaftMembership::Detached { state, .. } => *state,
    }
  }

  pub fn topic_name(&self) -> &str {
    match self {
      RaftMembership::Reference(p) => p.topic_name(),
      RaftMembership::Detached { topic_name, .. } => topic_name,
    }
  }

  pub fn set_partition_id(&mut self, value: i32) -> Result<()> {
    match self {
      RaftMembership::Reference(_) => Err(MembershipError::ReferenceMutation {
        field: "partition_id",
      }),
      RaftMembership::Detached { partition_id, .. } => {
        *partition_id = value;
        Ok(())
      }
    }
  }

  pub fn set_term(&mut self, value: i32) -> Result<()> {
    match self {
      RaftMembership::Reference(_) => Err(MembershipError::ReferenceMutation { field: "term" }),
      RaftMembership::Detached { term, .. } => {
        *term = value;
        Ok(())
      }
    }
  }

  pub fn set_state(&mut self, value: RaftMembershipState) -> Result<()> {
    match self {
      RaftMembership::Reference(_) => Err(MembershipError::ReferenceMutation { field: "state" }),
      RaftMembership::Detached { state, .. } => {
        *state = value;
        Ok(())
      }
    }
  }

  pub fn set_topic_name(&mut self, value: &str) -> Result<()> {
    match self {
      RaftMembership::Reference(_) => Err(MembershipError::ReferenceMutation {
        field: "topic_name",
      }),
      RaftMembership::Detached { topic_name, .. } => {
        check_topic(value)?;
        topic_name.clear();
        topic_name.push_str(value);
        Ok(())
      }
    }
  }

  /// Drops any partition reference and leaves an empty detached membership.
  pub fn reset(&mut self) {
    *self = RaftMembership::Detached {
      partition_id: 0,
      term: 0,
      state: RaftMembershipState::default(),
      topic_name: String::new(),
    };
  }

  /// Copies the current values into a membership that no longer reads through.
  pub fn detach(&self) -> RaftMembership {
    RaftMembership::Detached {
      partition_id: self.partition_id(),
      term: self.term(),
      state: self.state(),
      topic_name: self.topic_name().to_string(),
    }
  }

  fn matches(&self, partition: &dyn RaftPartition) -> bool {
    self.partition_id() == partition.partition_id() && self.topic_name() == partition.topic_name()
  }

  pub fn encoded_len(&self) -> usize {
    Self::HEADER_SIZE + self.topic_name().len()
  }

  pub(crate) fn write<B: BufMut>(&self, buf: &mut B) {
    let topic = self.topic_name();
    buf.put_i32(self.partition_id());
    buf.put_i32(self.term());
    buf.put_u8(self.state().into());
    buf.put_u16(topic.len() as u16);
    buf.put_slice(topic.as_bytes());
  }

  pub(crate) fn read(buf: &mut &[u8]) -> Result<RaftMembership> {
    ensure(buf, Self::HEADER_SIZE)?;
    let partition_id = buf.get_i32();
    let term = buf.get_i32();
    let tag = buf.get_u8();
    let state =
      RaftMembershipState::try_from(tag).map_err(|_| MembershipError::UnknownRaftState(tag))?;
    let topic_len = buf.get_u16() as usize;
    if topic_len > MAX_TOPIC_NAME_LENGTH {
      return Err(MembershipError::TopicTooLong {
        len: topic_len,
        max: MAX_TOPIC_NAME_LENGTH,
      });
    }
    let topic_name = get_str(buf, topic_len, "topic name")?;
    Ok(RaftMembership::Detached {
      partition_id: partition_id,
      term: term,
      state: state,
      topic_name: topic_name,
    })
  }
}
impl PartialEq for RaftMembership {
  fn eq(&self, other: &Self) -> bool {
    self.partition_id() == other.partition_id()
      && self.term() == other.term()
      && self.state() == other.state()
      && self.topic_name() == other.topic_name()
  }
}
impl fmt::Debug for RaftMembership {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RaftMembership")
      .field("reference", &self.is_reference())
      .field("partition_id", &self.partition_id())
      .field("term", &self.term())
      .field("state", &self.state())
      .field("topic_name", &self.topic_name())
      .finish()
  }
}

fn check_topic(topic: &str) -> Result<()> {
  if topic.len() > MAX_TOPIC_NAME_LENGTH {
    Err(MembershipError::TopicTooLong {
      len: topic.len(),
      max: MAX_TOPIC_NAME_LENGTH,
    })
  } else {
    Ok(())
  }
}

/// The partitions a peer takes part in, at most [`MAX_RAFT_MEMBERSHIPS`] of them. Removal swaps
/// the last entry into the freed slot, so iteration order is not insertion order.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct RaftMembershipList {
  memberships: SmallVec<[RaftMembership; MAX_RAFT_MEMBERSHIPS]>,
}
impl RaftMembershipList {
  pub fn new() -> RaftMembershipList {
    RaftMembershipList::default()
  }

  pub fn len(&self) -> usize {
    self.memberships.len()
  }

  pub fn is_empty(&self) -> bool {
    self.memberships.is_empty()
  }

  pub fn capacity(&self) -> usize {
    MAX_RAFT_MEMBERSHIPS
  }

  pub fn get(&self, idx: usize) -> Option<&RaftMembership> {
    self.memberships.get(idx)
  }

  pub fn iter(&self) -> impl Iterator<Item = &RaftMembership> {
    self.memberships.iter()
  }

  pub fn check_capacity(&self) -> Result<()> {
    if self.memberships.len() >= MAX_RAFT_MEMBERSHIPS {
      Err(MembershipError::CapacityExceeded {
        what: "raft membership list",
        capacity: MAX_RAFT_MEMBERSHIPS,
      })
    } else {
      Ok(())
    }
  }

  /// Adds a detached copy of `membership`, even if it is backed by a live partition.
  pub fn add(&mut self, membership: &RaftMembership) -> Result<()> {
    self.push(membership.detach())
  }

  pub fn add_detached(
    &mut self,
    partition_id: i32,
    term: i32,
    state: RaftMembershipState,
    topic_name: &str,
  ) -> Result<()> {
    self.push(RaftMembership::detached(partition_id, term, state, topic_name)?)
  }

  pub fn add_reference(&mut self, partition: Arc<dyn RaftPartition>) -> Result<()> {
    check_topic(partition.topic_name())?;
    self.push(RaftMembership::reference(partition))
  }

  pub(crate) fn push(&mut self, membership: RaftMembership) -> Result<()> {
    self.check_capacity()?;
    self.memberships.push(membership);
    Ok(())
  }

  /// Removes the membership for the same topic and partition id. Does nothing if absent.
  pub fn remove(&mut self, partition: &dyn RaftPartition) {
    if let Some(idx) = self.memberships.iter().position(|m| m.matches(partition)) {
      self.memberships.swap_remove(idx);
    }
  }

  pub fn clear(&mut self) {
    self.memberships.clear();
  }

  /// Replaces the contents with detached copies of `other`.
  pub fn wrap(&mut self, other: &RaftMembershipList) {
    self.memberships.clear();
    self
      .memberships
      .extend(other.memberships.iter().map(RaftMembership::detach));
  }

  pub fn encoded_len(&self) -> usize {
    self.memberships.iter().map(RaftMembership::encoded_len).sum()
  }

  pub(crate) fn write<B: BufMut>(&self, buf: &mut B) {
    for m in self.memberships.iter() {
      m.write(buf);
    }
  }
}

#[cfg(test)]
use crate::testkit::TestPartition;

#[test]
fn test_reference_reads_through() {
  let live = Arc::new(TestPartition::new("orders", 3));
  live.set_term(1);
  let mut m = RaftMembership::reference(live.clone());
  assert_eq!(m.term(), 1);
  live.set_term(7);
  live.set_state(RaftMembershipState::Leader);
  assert_eq!(m.term(), 7);
  assert_eq!(m.state(), RaftMembershipState::Leader);

  let snapshot = m.detach();
  assert!(!snapshot.is_reference());
  live.set_term(8);
  assert_eq!(snapshot.term(), 7);

  assert_eq!(
    m.set_term(2),
    Err(MembershipError::ReferenceMutation { field: "term" })
  );
  assert!(m.set_partition_id(2).is_err());
  assert!(m.set_state(RaftMembershipState::Follower).is_err());
  assert!(m.set_topic_name("x").is_err());
  assert_eq!(m.term(), 8);

  m.reset();
  assert!(!m.is_reference());
  m.set_term(2).unwrap();
  m.set_topic_name("payments").unwrap();
  assert_eq!(m.term(), 2);
  assert_eq!(m.topic_name(), "payments");
}

#[test]
fn test_detached_topic_bound() {
  let long = "t".repeat(MAX_TOPIC_NAME_LENGTH + 1);
  assert!(RaftMembership::detached(0, 0, RaftMembershipState::Follower, long.as_str()).is_err());
  let mut m = RaftMembership::detached(0, 0, RaftMembershipState::Follower, "ok").unwrap();
  assert_eq!(
    m.set_topic_name(&long),
    Err(MembershipError::TopicTooLong {
      len: MAX_TOPIC_NAME_LENGTH + 1,
      max: MAX_TOPIC_NAME_LENGTH
    })
  );
  assert_eq!(m.topic_name(), "ok");
}

#[test]
fn test_list_capacity() {
  let mut list = RaftMembershipList::new();
  for i in 0..MAX_RAFT_MEMBERSHIPS as i32 {
    list
      .add_detached(i, 1, RaftMembershipState::Follower, "default-topic")
      .unwrap();
  }
  let err = list.add_detached(20, 1, RaftMembershipState::Follower, "default-topic");
  assert_eq!(
    err,
    Err(MembershipError::CapacityExceeded {
      what: "raft membership list",
      capacity: MAX_RAFT_MEMBERSHIPS
    })
  );
  assert_eq!(list.len(), MAX_RAFT_MEMBERSHIPS);
  assert_eq!(list.get(19).map(|m| m.partition_id()), Some(19));
}

#[test]
fn test_list_remove_swaps_last() {
  let partitions = (0..4)
    .map(|i| Arc::new(TestPartition::new("orders", i)))
    .collect::<Vec<_>>();
  let mut list = RaftMembershipList::new();
  for p in partitions.iter() {
    list.add_reference(p.clone()).unwrap();
  }
  list.remove(&*partitions[1]);
  let ids = list.iter().map(|m| m.partition_id()).collect::<Vec<_>>();
  assert_eq!(ids, vec![0, 3, 2]);

  list.remove(&TestPartition::new("payments", 0));
  assert_eq!(list.len(), 3);

  let mut copy = RaftMembershipList::new();
  copy.wrap(&list);
  assert!(copy.iter().all(|m| !m.is_reference()));
  assert_eq!(copy, list);
}
