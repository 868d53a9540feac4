use crate::error::{MembershipError, Result};
use crate::membership::utils::now_millis;
use crate::membership::{Peer, PeerList, PeerState};
use itertools::Itertools;
use std::cmp::Ordering;
use tracing::{debug, trace};

use Ordering::*;
use PeerState::*;

/// What reconciling one local peer with a remote record did.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub struct PeerMerge {
  /// The local heartbeat was strictly newer, so the sender needs our version.
  pub ahead: bool,
  /// The local record changed and has to be written back.
  pub changed: bool,
}

/// Counts of what a [`PeerList::merge`] did.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub struct MergeStats {
  pub joined: usize,
  pub changed: usize,
  pub ignored: usize,
  pub diffed: usize,
}

/// Reconciles `local` with a remote record for the same peer.
///
/// A strictly newer remote heartbeat always brings its endpoints and raft memberships along.
/// The lifecycle state is then decided by the remote state:
///
/// | remote    | local becomes                                                   |
/// |-----------|-----------------------------------------------------------------|
/// | `Alive`   | `Alive` if the remote heartbeat is strictly newer                |
/// | `Suspect` | `Suspect` if the remote heartbeat is strictly newer, or if it is equal |
/// |           | and local is `Alive`                                            |
/// | `Dead`    | `Dead` if the remote heartbeat is not older                      |
/// | `Null`    | unchanged                                                       |
///
/// Suspicion wins heartbeat ties against `Alive`, which keeps failure detection responsive.
pub fn merge_peer(local: &mut Peer, update: &Peer, now: i64) -> PeerMerge {
  let order = local.heartbeat().cmp(update.heartbeat());
  let newer = order == Less;
  let not_older = order != Greater;

  let mut changed = false;
  if newer {
    local.heartbeat_mut().wrap(update.heartbeat());
    local.adopt_details(update);
    changed = true;
  }
  match update.state() {
    Alive if newer => changed |= local.transition_at(Alive, now),
    // A newer suspicion also replaces a stale `Dead` or `Null`. Otherwise `Dead (5, 0)` and
    // `Suspect (6, 0)` on two nodes never reconcile.
    Suspect if newer || (not_older && local.state() == Alive) => {
      changed |= local.transition_at(Suspect, now)
    }
    Dead if not_older => changed |= local.transition_at(Dead, now),
    _ => {}
  }
  PeerMerge {
    ahead: order == Greater,
    changed: changed,
  }
}

impl PeerList {
  /// Merges a sorted sequence of remote peer records into this list.
  ///
  /// Both sides are walked once in management endpoint order. Unknown peers are added only if
  /// reported `Alive`; known peers go through [`merge_peer`]. If `diff` is given, it receives
  /// every local peer the remote side did not know about or knew an older version of, in
  /// order.
  pub fn merge(&mut self, updates: &[Peer], diff: Option<&mut PeerList>) -> Result<MergeStats> {
    self.merge_at(updates, diff, now_millis())
  }

  pub fn merge_at(
    &mut self,
    updates: &[Peer],
    mut diff: Option<&mut PeerList>,
    now: i64,
  ) -> Result<MergeStats> {
    if !self.is_sorted() {
      return Err(MembershipError::Unsorted("merge"));
    }
    if !updates
      .iter()
      .tuple_windows()
      .all(|(a, b)| a.compare(b) == Less)
    {
      return Err(MembershipError::Unsorted("merge updates"));
    }

    let mut stats = MergeStats::default();
    let mut idx = 0;
    let mut updates = updates.iter().peekable();
    while idx < self.len() {
      let update = match updates.peek() {
        Some(u) => *u,
        None => break,
      };
      let (host, port) = self.key(idx)?;
      let target = update.management_endpoint();
      match (host, port).cmp(&(target.host().as_bytes(), target.port())) {
        Less => {
          if let Some(d) = diff.as_deref_mut() {
            d.append(&self.get(idx)?)?;
            stats.diffed += 1;
          }
          idx += 1;
        }
        Greater => {
          if self.join(idx, update, &mut stats)? {
            idx += 1;
          }
          updates.next();
        }
        Equal => {
          let mut local = self.get(idx)?;
          let before = local.state();
          let res = merge_peer(&mut local, update, now);
          if res.changed {
            if before != local.state() {
              debug!(
                peer = %local.management_endpoint(),
                from = ?before,
                to = ?local.state(),
                "peer state changed"
              );
            }
            self.set(idx, &local)?;
            stats.changed += 1;
          }
          if res.ahead {
            if let Some(d) = diff.as_deref_mut() {
              d.append(&local)?;
              stats.diffed += 1;
            }
          }
          idx += 1;
          updates.next();
        }
      }
    }
    if let Some(d) = diff.as_deref_mut() {
      while idx < self.len() {
        d.append(&self.get(idx)?)?;
        stats.diffed += 1;
        idx += 1;
      }
    }
    for update in updates {
      let end = self.len();
      self.join(end, update, &mut stats)?;
    }
    Ok(stats)
  }

  /// Adds a peer we have no record of, but only if it is reported alive.
  fn join(&mut self, idx: usize, update: &Peer, stats: &mut MergeStats) -> Result<bool> {
    if update.state() == Alive {
      self.add(idx, update)?;
      stats.joined += 1;
      Ok(true)
    } else {
      trace!(
        peer = %update.management_endpoint(),
        state = ?update.state(),
        "ignoring unknown peer that is not alive"
      );
      stats.ignored += 1;
      Ok(false)
    }
  }
}

#[cfg(test)]
use crate::membership::Heartbeat;
#[cfg(test)]
use crate::testkit::{peer, peer_at};

#[test]
fn test_suspicion_wins_ties() {
  let mut local = peer_at(1, Alive, Heartbeat::new(5, 0));
  let update = peer_at(1, Suspect, Heartbeat::new(5, 0));
  let res = merge_peer(&mut local, &update, 100);
  assert_eq!(
    res,
    PeerMerge {
      ahead: false,
      changed: true
    }
  );
  assert_eq!(local.state(), Suspect);
  assert_eq!(local.change_state_time(), 100);
}

#[test]
fn test_alive_needs_newer_heartbeat() {
  let mut local = peer_at(1, Suspect, Heartbeat::new(5, 0));
  let res = merge_peer(&mut local, &peer_at(1, Alive, Heartbeat::new(5, 0)), 100);
  assert_eq!(res, PeerMerge::default());
  assert_eq!(local.state(), Suspect);

  let res = merge_peer(&mut local, &peer_at(1, Alive, Heartbeat::new(5, 1)), 100);
  assert!(res.changed);
  assert_eq!(local.state(), Alive);
  assert_eq!(*local.heartbeat(), Heartbeat::new(5, 1));
}

#[test]
fn test_dead_stays_dead_on_stale_alive() {
  let mut local = peer_at(1, Dead, Heartbeat::new(10, 0));
  let res = merge_peer(&mut local, &peer_at(1, Alive, Heartbeat::new(9, 0)), 100);
  assert_eq!(
    res,
    PeerMerge {
      ahead: true,
      changed: false
    }
  );
  assert_eq!(local.state(), Dead);

  let res = merge_peer(&mut local, &peer_at(1, Alive, Heartbeat::new(11, 0)), 100);
  assert!(res.changed);
  assert_eq!(local.state(), Alive);
}

#[test]
fn test_suspect_rules() {
  // refresh an existing suspicion
  let mut local = peer_at(1, Suspect, Heartbeat::new(5, 0));
  let res = merge_peer(&mut local, &peer_at(1, Suspect, Heartbeat::new(5, 3)), 100);
  assert!(res.changed);
  assert_eq!(*local.heartbeat(), Heartbeat::new(5, 3));
  assert_eq!(local.change_state_time(), 0);

  // stale suspicion does not demote
  let mut local = peer_at(1, Alive, Heartbeat::new(5, 1));
  let res = merge_peer(&mut local, &peer_at(1, Suspect, Heartbeat::new(5, 0)), 100);
  assert!(res.ahead);
  assert_eq!(local.state(), Alive);

  // a newer suspicion replaces a stale death, an equal one does not
  let mut local = peer_at(1, Dead, Heartbeat::new(5, 1));
  let res = merge_peer(&mut local, &peer_at(1, Suspect, Heartbeat::new(5, 1)), 100);
  assert_eq!(res, PeerMerge::default());
  let res = merge_peer(&mut local, &peer_at(1, Suspect, Heartbeat::new(6, 0)), 100);
  assert!(res.changed);
  assert_eq!(local.state(), Suspect);
  assert_eq!(*local.heartbeat(), Heartbeat::new(6, 0));
}

#[test]
fn test_dead_on_equal_heartbeat() {
  let mut local = peer_at(1, Suspect, Heartbeat::new(5, 0));
  merge_peer(&mut local, &peer_at(1, Dead, Heartbeat::new(5, 0)), 100);
  assert_eq!(local.state(), Dead);

  let mut local = peer_at(1, Alive, Heartbeat::new(5, 1));
  merge_peer(&mut local, &peer_at(1, Dead, Heartbeat::new(5, 0)), 100);
  assert_eq!(local.state(), Alive);
}

#[test]
fn test_newer_heartbeat_brings_details() {
  let mut local = peer_at(1, Alive, Heartbeat::new(5, 0));
  let mut update = peer_at(1, Alive, Heartbeat::new(5, 1));
  update
    .raft_memberships_mut()
    .add_detached(2, 4, crate::membership::RaftMembershipState::Leader, "orders")
    .unwrap();
  merge_peer(&mut local, &update, 100);
  assert_eq!(local.raft_memberships(), update.raft_memberships());
  assert_eq!(local.state(), Alive);
  assert_eq!(local.change_state_time(), 0);
}

#[test]
fn test_merge_rejects_unsorted_updates() {
  let mut list = PeerList::new(4);
  let updates = vec![peer(2, Alive), peer(1, Alive)];
  assert_eq!(
    list.merge(&updates, None),
    Err(MembershipError::Unsorted("merge updates"))
  );
  let dupes = vec![peer(1, Alive), peer(1, Alive)];
  assert!(list.merge(&dupes, None).is_err());
  assert!(list.is_empty());
}
