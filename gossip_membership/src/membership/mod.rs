//! Cluster membership by gossip.
//!
//! Every node keeps a [`PeerList`]: one record per known cluster member, holding the member's
//! client, management and replication [`Endpoint`]s, its [`Heartbeat`], its [`PeerState`] and
//! the raft partitions it takes part in. Nodes periodically send their list (or part of it) to
//! other nodes, which [`merge`](PeerList::merge) it into their own. The merge walks both lists
//! once in management endpoint order and keeps, for every peer, whichever record carries the
//! newer heartbeat, with a fixed precedence between states on ties. Anything the receiver
//! knows better is collected into a diff and sent back, so two nodes that exchange gossip in
//! both directions agree afterwards.
//!
//! ### Records
//! Peer records have a bounded, hand-laid binary encoding (big endian):
//!
//! ```text
//! PeerRecord     := Header Endpoint{3} RaftMembership{0..20}
//! Header         := state:u8 generation:u64 version:u32 changeStateTime:i64
//! Endpoint       := type:u8 port:i32 hostLen:u16 host:bytes[hostLen]
//! RaftMembership := partitionId:i32 term:i32 state:u8 topicLen:u16 topic:bytes[topicLen]
//! ```
//!
//! Host and topic names are bounded, so a record never exceeds [`MAX_PEER_LENGTH`], and a
//! [`PeerList`] stores its peers in slots of exactly that size.
//!
//! ### Ownership
//! None of these types lock. A [`MembershipService`] owns the list on a single task and
//! everything else talks to it through a [`MembershipHandle`].

mod endpoint;
mod heartbeat;
mod merge;
pub mod payload;
mod peer;
mod peer_list;
mod raft;
mod service;
mod utils;

#[rustfmt::skip]
pub use {
  endpoint::Endpoint,
  endpoint::EndpointType,
  heartbeat::Heartbeat,
  merge::merge_peer,
  merge::MergeStats,
  merge::PeerMerge,
  peer::transition,
  peer::Peer,
  peer::PeerState,
  peer::Transition,
  peer_list::PeerList,
  peer_list::PeerListIter,
  peer_list::PeerListListener,
  raft::RaftMembership,
  raft::RaftMembershipList,
  raft::RaftMembershipState,
  raft::RaftPartition,
  service::MembershipCmd,
  service::MembershipHandle,
  service::MembershipService,
  utils::now_millis,
  utils::MembershipConfig,
  utils::MAX_HOST_LENGTH,
  utils::MAX_PEER_LENGTH,
  utils::MAX_RAFT_MEMBERSHIPS,
  utils::MAX_TOPIC_NAME_LENGTH,
};
