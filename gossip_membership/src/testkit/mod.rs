//! Helpers shared by unit tests, integration tests and the simulation binary.

mod fixtures;
mod logging;

#[rustfmt::skip]
pub use {
  fixtures::peer,
  fixtures::peer_at,
  fixtures::TestPartition,
  logging::init_logging,
  logging::LOG_LEVEL,
};
