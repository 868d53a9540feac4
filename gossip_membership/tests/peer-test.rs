use gossip_membership::membership::{
  Endpoint, EndpointType, Heartbeat, Peer, PeerState, RaftMembershipState, MAX_HOST_LENGTH,
  MAX_PEER_LENGTH, MAX_RAFT_MEMBERSHIPS, MAX_TOPIC_NAME_LENGTH,
};
use rand::distributions::Alphanumeric;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::convert::TryFrom;

const ROUNDS: usize = 500;

fn random_name(rng: &mut SmallRng, max: usize) -> String {
  let len = rng.gen_range(0..=max);
  (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

fn random_endpoint(rng: &mut SmallRng) -> Endpoint {
  let host = random_name(rng, MAX_HOST_LENGTH);
  Endpoint::new(host, rng.gen()).unwrap()
}

fn random_peer(rng: &mut SmallRng) -> Peer {
  let mut peer = Peer::new(
    random_endpoint(rng),
    random_endpoint(rng),
    random_endpoint(rng),
  );
  *peer.heartbeat_mut() = Heartbeat::new(rng.gen(), rng.gen());
  let state = PeerState::try_from(rng.gen_range(0..4u8)).unwrap();
  peer.transition_at(state, rng.gen());
  for _ in 0..rng.gen_range(0..=MAX_RAFT_MEMBERSHIPS) {
    let raft_state = RaftMembershipState::try_from(rng.gen_range(0..3u8)).unwrap();
    let topic = random_name(rng, MAX_TOPIC_NAME_LENGTH);
    peer
      .raft_memberships_mut()
      .add_detached(rng.gen(), rng.gen(), raft_state, &topic)
      .unwrap();
  }
  peer
}

#[test]
fn peer_random_round_trip() {
  let mut rng = SmallRng::seed_from_u64(0xfeed);
  for _ in 0..ROUNDS {
    let peer = random_peer(&mut rng);
    let bytes = peer.encode();
    assert_eq!(bytes.len(), peer.encoded_len());
    assert!(bytes.len() <= MAX_PEER_LENGTH);
    let decoded = Peer::decode(&bytes).unwrap();
    assert_eq!(decoded, peer);
    for tpe in [
      EndpointType::Client,
      EndpointType::Management,
      EndpointType::Replication,
    ]
    .iter()
    {
      assert_eq!(decoded.endpoint(*tpe), peer.endpoint(*tpe));
    }
  }
}

#[test]
fn peer_largest_record_fits() {
  let host = "h".repeat(MAX_HOST_LENGTH);
  let mut peer = Peer::new(
    Endpoint::new(host.clone(), u16::MAX).unwrap(),
    Endpoint::new(host.clone(), u16::MAX).unwrap(),
    Endpoint::new(host, u16::MAX).unwrap(),
  );
  let topic = "t".repeat(MAX_TOPIC_NAME_LENGTH);
  for id in 0..MAX_RAFT_MEMBERSHIPS as i32 {
    peer
      .raft_memberships_mut()
      .add_detached(id, i32::MAX, RaftMembershipState::Leader, &topic)
      .unwrap();
  }
  assert_eq!(peer.encoded_len(), MAX_PEER_LENGTH);
  assert_eq!(Peer::decode(&peer.encode()), Ok(peer));
}
