use crate::membership::{Endpoint, EndpointType};
use thiserror::Error;

/// Result type for membership operations.
pub type Result<T> = std::result::Result<T, MembershipError>;

/// Everything that can go wrong inside the membership core. None of these are retried here;
/// they are handed to whoever drives the [`PeerList`](crate::membership::PeerList).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
  /// A bounded container is full.
  #[error("capacity exceeded: {what} holds at most {capacity} entries")]
  CapacityExceeded { what: &'static str, capacity: usize },

  #[error("host name of {len} bytes exceeds max {max} bytes")]
  HostTooLong { len: usize, max: usize },

  #[error("topic name of {len} bytes exceeds max {max} bytes")]
  TopicTooLong { len: usize, max: usize },

  #[error("index {index} out of bounds for length {len}")]
  IndexOutOfBounds { index: usize, len: usize },

  /// The bytes consumed by a decoder did not match the length the record declared.
  #[error("framing error: record declared {declared} bytes, decoder consumed {consumed}")]
  Framing { declared: usize, consumed: usize },

  #[error("truncated record: needed {needed} more bytes, {remaining} remaining")]
  Truncated { needed: usize, remaining: usize },

  #[error("record of {len} bytes exceeds max peer length {max}")]
  RecordTooLong { len: usize, max: usize },

  #[error("unknown endpoint type tag {0}")]
  UnknownEndpointType(u8),

  #[error("unknown peer state tag {0}")]
  UnknownPeerState(u8),

  #[error("unknown raft state tag {0}")]
  UnknownRaftState(u8),

  #[error("endpoint {0:?} appears more than once in a peer record")]
  DuplicateEndpoint(EndpointType),

  #[error("endpoint {0:?} missing from peer record")]
  MissingEndpoint(EndpointType),

  /// Two entries of a peer list share a management endpoint.
  #[error("peer {0} appears more than once in the list")]
  DuplicatePeer(Endpoint),

  #[error("port {0} out of range")]
  InvalidPort(i32),

  #[error("{0} is not valid utf-8")]
  InvalidUtf8(&'static str),

  /// A setter was invoked on a raft membership that reads through to a live partition.
  #[error("cannot set {field} on a raft membership backed by a live partition")]
  ReferenceMutation { field: &'static str },

  /// Binary search or merge was attempted on a list that is not sorted.
  #[error("{0} requires a sorted peer list")]
  Unsorted(&'static str),

  /// The local heartbeat reached the last generation and version.
  #[error("heartbeat cannot advance past the last generation")]
  HeartbeatExhausted,

  #[error("membership service has shut down")]
  ServiceClosed,
}
