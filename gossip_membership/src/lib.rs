//! Gossip-based cluster membership: every node keeps an eventually consistent view of every
//! other node's liveness and raft partition memberships, exchanged as bounded binary records.
//! See [`membership`] for the protocol.

pub mod error;
pub mod membership;
pub mod testkit;

#[rustfmt::skip]
pub use {
  error::MembershipError,
  error::Result,
};
