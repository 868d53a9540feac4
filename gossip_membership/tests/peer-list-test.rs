use gossip_membership::membership::payload::decode_peers;
use gossip_membership::membership::{
  Endpoint, Heartbeat, PeerList, PeerState, RaftMembershipState,
};
use gossip_membership::testkit::{peer, peer_at};
use gossip_membership::MembershipError;
use itertools::Itertools;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const PEERS: u16 = 300;

fn ports(list: &PeerList) -> Vec<u16> {
  list
    .iter()
    .map(|p| p.unwrap().management_endpoint().port())
    .collect()
}

#[test]
fn peer_list_random_inserts_stay_sorted() {
  let mut rng = SmallRng::seed_from_u64(7);
  let mut order = (0..PEERS).collect::<Vec<_>>();
  order.shuffle(&mut rng);

  let mut list = PeerList::new(PEERS as usize);
  for port in order.iter() {
    assert!(list.insert(&peer(*port, PeerState::Alive)).unwrap());
    assert!(list.is_sorted());
  }
  assert!(!list.insert(&peer(order[0], PeerState::Dead)).unwrap());
  assert_eq!(list.len(), PEERS as usize);
  assert!(ports(&list).iter().tuple_windows().all(|(a, b)| a < b));

  for port in order.iter() {
    let idx = list.find(&peer(*port, PeerState::Null)).unwrap().unwrap();
    assert_eq!(list.get(idx).unwrap().management_endpoint().port(), *port);
  }
  assert_eq!(
    list
      .find_endpoint(&Endpoint::new("10.0.0.1", PEERS).unwrap())
      .unwrap(),
    Err(PEERS as usize)
  );
  // hosts compare before ports
  assert_eq!(
    list
      .find_endpoint(&Endpoint::new("10.0.0.0", 65535).unwrap())
      .unwrap(),
    Err(0)
  );
}

#[test]
fn peer_list_shuffle_then_sort_restores_order() {
  let mut list = PeerList::new(64);
  for port in 0..64 {
    list.append(&peer(port, PeerState::Alive)).unwrap();
  }
  let sorted = ports(&list);

  list.shuffle_with(&mut SmallRng::seed_from_u64(42));
  assert!(!list.is_sorted());
  assert_ne!(ports(&list), sorted);
  assert_eq!(
    ports(&list).into_iter().sorted().collect::<Vec<_>>(),
    sorted
  );
  assert_eq!(
    list.find(&peer(3, PeerState::Alive)),
    Err(MembershipError::Unsorted("find"))
  );
  assert!(list.merge(&[], None).is_err());

  list.sort().unwrap();
  assert!(list.is_sorted());
  assert_eq!(ports(&list), sorted);
}

#[test]
fn peer_list_update_keeps_position() {
  let mut list = PeerList::new(8);
  for port in &[10, 20, 30] {
    list.insert(&peer(*port, PeerState::Alive)).unwrap();
  }
  let mut p = peer_at(20, PeerState::Suspect, Heartbeat::new(4, 2));
  p.raft_memberships_mut()
    .add_detached(1, 3, RaftMembershipState::Leader, "orders")
    .unwrap();
  assert!(list.update(&p).unwrap());
  assert!(!list.update(&peer(25, PeerState::Alive)).unwrap());

  assert_eq!(ports(&list), vec![10, 20, 30]);
  assert_eq!(list.get(1).unwrap(), p);
  assert_eq!(
    list.get(3),
    Err(MembershipError::IndexOutOfBounds { index: 3, len: 3 })
  );
}

#[test]
fn peer_list_payload_round_trips_full_records() {
  let mut list = PeerList::new(4);
  let mut big = peer_at(2, PeerState::Alive, Heartbeat::new(9, 9));
  for id in 0..20 {
    big
      .raft_memberships_mut()
      .add_detached(id, id * 2, RaftMembershipState::Follower, &"x".repeat(128))
      .unwrap();
  }
  list.insert(&big).unwrap();
  list.insert(&peer(1, PeerState::Dead)).unwrap();

  let decoded = decode_peers(&list.payload()).unwrap();
  assert_eq!(decoded, list.to_vec().unwrap());
  assert_eq!(decoded[1], big);
}

#[test]
fn peer_list_clear_keeps_capacity() {
  let mut list = PeerList::new(2);
  list.insert(&peer(1, PeerState::Alive)).unwrap();
  list.insert(&peer(2, PeerState::Alive)).unwrap();
  assert!(list.insert(&peer(3, PeerState::Alive)).is_err());

  list.clear();
  assert!(list.is_empty());
  assert_eq!(list.capacity(), 2);
  assert!(list.insert(&peer(3, PeerState::Alive)).unwrap());
  assert_eq!(
    list.iter().collect::<Vec<_>>(),
    vec![Ok(peer(3, PeerState::Alive))]
  );
}
