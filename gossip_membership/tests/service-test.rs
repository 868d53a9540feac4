use bytes::Bytes;
use gossip_membership::membership::{
  Endpoint, MembershipCmd, MembershipConfig, MembershipHandle, MembershipService, Peer,
  PeerState, RaftMembershipState,
};
use gossip_membership::testkit::{init_logging, TestPartition, LOG_LEVEL};
use gossip_membership::MembershipError;
use std::sync::Arc;
use tokio::sync::oneshot;

const HOST: &str = "127.0.0.1";

fn local(base: u16) -> Peer {
  Peer::new(
    Endpoint::new(HOST, base).unwrap(),
    Endpoint::new(HOST, base + 1).unwrap(),
    Endpoint::new(HOST, base + 2).unwrap(),
  )
}

fn management(base: u16) -> Endpoint {
  Endpoint::new(HOST, base + 1).unwrap()
}

fn spawn(base: u16) -> MembershipHandle {
  MembershipService::new(MembershipConfig::default(), local(base))
    .unwrap()
    .spawn()
}

async fn exchange(from: &MembershipHandle, to: &MembershipHandle) {
  let diff = to.gossip(from.payload().await.unwrap()).await.unwrap();
  from.gossip(diff).await.unwrap();
}

async fn state_of(handle: &MembershipHandle, endpoint: &Endpoint) -> Option<PeerState> {
  handle
    .snapshot()
    .await
    .unwrap()
    .into_iter()
    .find(|p| p.management_endpoint() == endpoint)
    .map(|p| p.state())
}

#[tokio::test]
async fn service_exchange_converges() {
  init_logging(LOG_LEVEL);
  let a = spawn(30000);
  let b = spawn(30010);
  let mut joins = a.subscribe().unwrap();

  exchange(&b, &a).await;
  let joined = joins.recv().await.unwrap();
  assert_eq!(*joined.management_endpoint(), management(30010));

  let view_a = a.snapshot().await.unwrap();
  let view_b = b.snapshot().await.unwrap();
  assert_eq!(view_a.len(), 2);
  assert_eq!(view_a, view_b);
  assert!(view_a.iter().all(|p| p.state() == PeerState::Alive));

  a.shutdown();
  b.shutdown();
}

#[tokio::test]
async fn service_refutes_suspicion() {
  init_logging(LOG_LEVEL);
  let a = spawn(30100);
  let b = spawn(30110);
  exchange(&b, &a).await;

  assert!(a.suspect(management(30110)).await.unwrap());
  assert_eq!(
    state_of(&a, &management(30110)).await,
    Some(PeerState::Suspect)
  );

  // b learns it is suspected and answers with a newer alive heartbeat
  exchange(&a, &b).await;
  assert_eq!(
    state_of(&a, &management(30110)).await,
    Some(PeerState::Alive)
  );
  assert_eq!(
    state_of(&b, &management(30110)).await,
    Some(PeerState::Alive)
  );

  a.shutdown();
  b.shutdown();
}

#[tokio::test]
async fn service_marks_only_remote_known_peers() {
  init_logging(LOG_LEVEL);
  let a = spawn(30200);
  let b = spawn(30210);
  exchange(&b, &a).await;

  assert!(!a.dead(management(30200)).await.unwrap());
  assert!(!a.dead(management(30990)).await.unwrap());
  assert_eq!(state_of(&a, &management(30990)).await, None);

  assert!(a.dead(management(30210)).await.unwrap());
  assert!(!a.dead(management(30210)).await.unwrap());
  assert_eq!(
    state_of(&a, &management(30210)).await,
    Some(PeerState::Dead)
  );

  a.shutdown();
  b.shutdown();
}

#[tokio::test]
async fn service_publishes_live_raft_memberships() {
  init_logging(LOG_LEVEL);
  let a = spawn(30300);
  let partition = Arc::new(TestPartition::new("orders", 3));
  a.add_raft(partition.clone()).await.unwrap();

  partition.set_term(7);
  partition.set_state(RaftMembershipState::Leader);
  a.heartbeat().await.unwrap();

  let me = a.snapshot().await.unwrap().remove(0);
  let raft = me.raft_memberships().get(0).unwrap();
  assert!(!raft.is_reference());
  assert_eq!(raft.partition_id(), 3);
  assert_eq!(raft.term(), 7);
  assert_eq!(raft.state(), RaftMembershipState::Leader);
  assert_eq!(raft.topic_name(), "orders");

  a.remove_raft(partition).await.unwrap();
  let me = a.snapshot().await.unwrap().remove(0);
  assert!(me.raft_memberships().is_empty());

  a.shutdown();
}

#[tokio::test]
async fn service_rejects_malformed_gossip() {
  init_logging(LOG_LEVEL);
  let a = spawn(30400);
  let before = a.snapshot().await.unwrap();

  let res = a.gossip(Bytes::from_static(&[0, 0, 0, 1, 0])).await;
  assert!(matches!(res, Err(MembershipError::Truncated { .. })));
  assert_eq!(a.snapshot().await.unwrap(), before);

  a.shutdown();
}

#[tokio::test]
async fn service_closed_after_shutdown() {
  init_logging(LOG_LEVEL);
  let a = spawn(30500);
  a.shutdown();
  assert_eq!(a.snapshot().await, Err(MembershipError::ServiceClosed));
  assert_eq!(a.payload().await, Err(MembershipError::ServiceClosed));
}

#[test]
fn service_heartbeat_is_monotonic() {
  init_logging(LOG_LEVEL);
  let mut svc = MembershipService::new(MembershipConfig::default(), local(30600)).unwrap();
  let first = *svc.local().heartbeat();
  let second = svc.heartbeat().unwrap();
  assert!(second > first);
  assert_eq!(second.generation(), first.generation());

  let (tx, rx) = oneshot::channel();
  assert!(svc.recv(MembershipCmd::AdvanceHeartbeat(tx)));
  let third = tokio_test::block_on(rx).unwrap().unwrap();
  assert!(third > second);
  assert_eq!(svc.peers().get(0).unwrap().heartbeat(), &third);

  assert!(!svc.recv(MembershipCmd::Shutdown));
}
