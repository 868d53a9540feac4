use crate::membership::{Endpoint, Heartbeat, Peer, PeerState, RaftMembershipState, RaftPartition};
use std::convert::TryFrom;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

const HOST: &str = "10.0.0.1";

/// A peer whose management endpoint is `HOST:port`, in `state` at heartbeat `(1, 0)`.
pub fn peer(port: u16, state: PeerState) -> Peer {
  peer_at(port, state, Heartbeat::new(1, 0))
}

/// Like [`peer`], at the given heartbeat. The state change time is left at zero.
pub fn peer_at(port: u16, state: PeerState, heartbeat: Heartbeat) -> Peer {
  let mut p = Peer::new(
    Endpoint::new(HOST, 26501).expect("fixture host fits"),
    Endpoint::new(HOST, port).expect("fixture host fits"),
    Endpoint::new(HOST, 26502).expect("fixture host fits"),
  );
  *p.heartbeat_mut() = heartbeat;
  p.transition_at(state, 0);
  p
}

/// A stand-in for a live raft partition whose term and role can be changed under a reader.
pub struct TestPartition {
  id: i32,
  topic: String,
  term: AtomicI32,
  state: AtomicU8,
}
impl TestPartition {
  pub fn new<S: Into<String>>(topic: S, id: i32) -> TestPartition {
    TestPartition {
      id: id,
      topic: topic.into(),
      term: AtomicI32::new(0),
      state: AtomicU8::new(RaftMembershipState::Follower.into()),
    }
  }

  pub fn set_term(&self, term: i32) {
    self.term.store(term, Ordering::SeqCst);
  }

  pub fn set_state(&self, state: RaftMembershipState) {
    self.state.store(state.into(), Ordering::SeqCst);
  }
}
impl RaftPartition for TestPartition {
  fn partition_id(&self) -> i32 {
    self.id
  }

  fn term(&self) -> i32 {
    self.term.load(Ordering::SeqCst)
  }

  fn state(&self) -> RaftMembershipState {
    RaftMembershipState::try_from(self.state.load(Ordering::SeqCst)).unwrap_or_default()
  }

  fn topic_name(&self) -> &str {
    &self.topic
  }
}
