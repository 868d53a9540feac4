use crossbeam::channel::unbounded;
use gossip_membership::membership::{Heartbeat, Peer, PeerList, PeerState};
use gossip_membership::testkit::{init_logging, peer, peer_at, LOG_LEVEL};
use gossip_membership::MembershipError;
use maplit::btreemap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use PeerState::*;

fn list_of(peers: &[Peer]) -> PeerList {
  let mut list = PeerList::new(64);
  for p in peers {
    list.insert(p).unwrap();
  }
  list
}

fn states(list: &PeerList) -> BTreeMap<u16, (Heartbeat, PeerState)> {
  list
    .iter()
    .map(|p| p.unwrap())
    .map(|p| (p.management_endpoint().port(), (*p.heartbeat(), p.state())))
    .collect()
}

#[test]
fn merge_is_idempotent() {
  init_logging(LOG_LEVEL);
  let peers = vec![
    peer_at(1, Alive, Heartbeat::new(1, 4)),
    peer_at(2, Suspect, Heartbeat::new(2, 0)),
    peer_at(3, Dead, Heartbeat::new(1, 9)),
  ];
  let mut list = list_of(&peers);
  let before = states(&list);

  let mut diff = PeerList::new(64);
  let stats = list.merge(&peers, Some(&mut diff)).unwrap();
  assert_eq!(stats.changed, 0);
  assert_eq!(stats.joined, 0);
  assert!(diff.is_empty());
  assert_eq!(states(&list), before);
}

#[test]
fn merge_suspicion_propagates() {
  init_logging(LOG_LEVEL);
  let mut list = list_of(&[peer_at(7, Alive, Heartbeat::new(5, 0))]);
  let mut diff = PeerList::new(64);
  list
    .merge(&[peer_at(7, Suspect, Heartbeat::new(5, 0))], Some(&mut diff))
    .unwrap();
  assert_eq!(
    states(&list),
    btreemap! { 7 => (Heartbeat::new(5, 0), Suspect) }
  );
  assert!(diff.is_empty());
}

#[test]
fn merge_dead_is_not_resurrected_by_stale_alive() {
  init_logging(LOG_LEVEL);
  let mut list = list_of(&[peer_at(7, Dead, Heartbeat::new(10, 0))]);
  let mut diff = PeerList::new(64);
  list
    .merge(&[peer_at(7, Alive, Heartbeat::new(9, 0))], Some(&mut diff))
    .unwrap();
  assert_eq!(
    states(&list),
    btreemap! { 7 => (Heartbeat::new(10, 0), Dead) }
  );
  // the sender is behind, so it gets our version back
  assert_eq!(states(&diff), states(&list));
}

#[test]
fn merge_diff_holds_what_the_sender_lacks() {
  init_logging(LOG_LEVEL);
  let mut list = list_of(&[
    peer_at(1, Alive, Heartbeat::new(1, 0)),
    peer_at(3, Alive, Heartbeat::new(1, 5)),
    peer_at(5, Alive, Heartbeat::new(1, 0)),
    peer_at(9, Suspect, Heartbeat::new(1, 0)),
  ]);
  let updates = vec![
    peer_at(3, Alive, Heartbeat::new(1, 2)),
    peer_at(4, Alive, Heartbeat::new(1, 0)),
    peer_at(5, Alive, Heartbeat::new(1, 1)),
    peer_at(6, Dead, Heartbeat::new(1, 0)),
  ];
  let mut diff = PeerList::new(64);
  let stats = list.merge(&updates, Some(&mut diff)).unwrap();

  assert_eq!(stats.joined, 1);
  assert_eq!(stats.ignored, 1);
  assert_eq!(stats.changed, 1);
  assert_eq!(stats.diffed, 3);
  assert_eq!(
    states(&list),
    btreemap! {
      1 => (Heartbeat::new(1, 0), Alive),
      3 => (Heartbeat::new(1, 5), Alive),
      4 => (Heartbeat::new(1, 0), Alive),
      5 => (Heartbeat::new(1, 1), Alive),
      9 => (Heartbeat::new(1, 0), Suspect),
    }
  );
  assert_eq!(
    states(&diff),
    btreemap! {
      1 => (Heartbeat::new(1, 0), Alive),
      3 => (Heartbeat::new(1, 5), Alive),
      9 => (Heartbeat::new(1, 0), Suspect),
    }
  );
  assert!(diff.is_sorted());
  assert!(list.is_sorted());
}

#[test]
fn merge_ignores_unknown_peers_that_are_not_alive() {
  init_logging(LOG_LEVEL);
  let mut list = PeerList::new(8);
  let stats = list
    .merge(&[peer(1, Suspect), peer(2, Dead), peer(3, Alive)], None)
    .unwrap();
  assert_eq!(stats.ignored, 2);
  assert_eq!(stats.joined, 1);
  assert_eq!(states(&list).keys().copied().collect::<Vec<_>>(), vec![3]);
}

#[test]
fn merge_notifies_listeners_of_joins_only() {
  init_logging(LOG_LEVEL);
  let (tx, rx) = unbounded();
  let mut list = list_of(&[peer(2, Alive)]);
  list.add_listener(move |p: &Peer| tx.send(p.management_endpoint().port()).unwrap());

  list
    .merge(
      &[
        peer(1, Alive),
        peer_at(2, Alive, Heartbeat::new(3, 0)),
        peer(4, Dead),
        peer(5, Alive),
      ],
      None,
    )
    .unwrap();
  assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 5]);
}

#[test]
fn merge_fails_loudly_when_full() {
  init_logging(LOG_LEVEL);
  let mut list = PeerList::new(2);
  list.insert(&peer(1, Alive)).unwrap();
  let res = list.merge(&[peer(2, Alive), peer(3, Alive)], None);
  assert_eq!(
    res,
    Err(MembershipError::CapacityExceeded {
      what: "peer list",
      capacity: 2
    })
  );
}

fn random_view(rng: &mut SmallRng) -> Vec<Peer> {
  let states = [Alive, Suspect, Dead];
  let mut view = Vec::new();
  for port in 1..=16u16 {
    if rng.gen_bool(0.7) {
      let hb = Heartbeat::new(rng.gen_range(1..3), rng.gen_range(0..4));
      view.push(peer_at(port, states[rng.gen_range(0..states.len())], hb));
    }
  }
  view
}

#[test]
fn merge_pairwise_exchange_converges() {
  init_logging(LOG_LEVEL);
  let mut rng = SmallRng::seed_from_u64(0x5eed);
  for _ in 0..200 {
    let a_view = random_view(&mut rng);
    let b_view = random_view(&mut rng);
    let before_a = states(&list_of(&a_view));
    let before_b = states(&list_of(&b_view));

    let mut a = list_of(&a_view);
    let mut b = list_of(&b_view);
    b.merge(&a.to_vec().unwrap(), None).unwrap();
    a.merge(&b.to_vec().unwrap(), None).unwrap();
    let after_a = states(&a);
    let after_b = states(&b);

    for (port, (hb_a, _)) in before_a.iter() {
      if let Some((hb_b, _)) = before_b.get(port) {
        if hb_a != hb_b {
          assert_eq!(after_a[port], after_b[port], "port {}", port);
        }
      }
    }
    for (port, (hb, _)) in before_a.iter() {
      assert!(after_a[port].0 >= *hb);
    }
  }
}
