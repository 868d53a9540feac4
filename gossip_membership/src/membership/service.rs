use crate::error::{MembershipError, Result};
use crate::membership::payload::decode_peers;
use crate::membership::utils::now_millis;
use crate::membership::{
  Endpoint, EndpointType, Heartbeat, MembershipConfig, Peer, PeerList, PeerState, RaftPartition,
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use MembershipCmd::*;

/// Everything the service can be asked to do. Replies travel back on the enclosed channels.
pub enum MembershipCmd {
  Gossip(Bytes, oneshot::Sender<Result<Bytes>>),
  Payload(oneshot::Sender<Bytes>),
  AdvanceHeartbeat(oneshot::Sender<Result<Heartbeat>>),
  Mark(Endpoint, PeerState, oneshot::Sender<Result<bool>>),
  AddRaft(Arc<dyn RaftPartition>, oneshot::Sender<Result<()>>),
  RemoveRaft(Arc<dyn RaftPartition>, oneshot::Sender<Result<()>>),
  Subscribe(mpsc::UnboundedSender<Peer>),
  Snapshot(oneshot::Sender<Result<Vec<Peer>>>),
  Shutdown,
}

/// Owns the resident [`PeerList`] and the local [`Peer`]. Every read and write goes through
/// one task, so neither needs a lock.
///
/// The local peer is kept outside the list as well, because its raft memberships read through
/// to live partitions. Each heartbeat snapshots it into the list.
pub struct MembershipService {
  local: Peer,
  peers: PeerList,
  config: MembershipConfig,
}
impl MembershipService {
  pub fn new(config: MembershipConfig, mut local: Peer) -> Result<MembershipService> {
    *local.heartbeat_mut() = Heartbeat::new_generation(now_millis() as u64);
    local.alive();
    let mut peers = PeerList::new(config.peer_capacity);
    peers.insert(&local)?;
    Ok(MembershipService {
      local: local,
      peers: peers,
      config: config,
    })
  }

  pub fn local(&self) -> &Peer {
    &self.local
  }

  pub fn peers(&self) -> &PeerList {
    &self.peers
  }

  /// Moves the service onto its own task. Must be called within a tokio runtime.
  pub fn spawn(self) -> MembershipHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(self.run(rx));
    MembershipHandle { tx: tx }
  }

  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<MembershipCmd>) {
    info!(local = %self.local.management_endpoint(), "membership service started");
    while let Some(cmd) = rx.recv().await {
      if !self.recv(cmd) {
        break;
      }
    }
    info!(local = %self.local.management_endpoint(), "membership service stopped");
  }

  /// Handles one command. Returns false once the service should stop.
  pub fn recv(&mut self, cmd: MembershipCmd) -> bool {
    match cmd {
      Gossip(body, reply) => {
        let _ = reply.send(self.gossip(&body));
      }
      Payload(reply) => {
        let _ = reply.send(self.peers.payload());
      }
      AdvanceHeartbeat(reply) => {
        let _ = reply.send(self.heartbeat());
      }
      Mark(endpoint, state, reply) => {
        let _ = reply.send(self.mark(&endpoint, state));
      }
      AddRaft(partition, reply) => {
        let res = self
          .local
          .raft_memberships_mut()
          .add_reference(partition)
          .and_then(|_| self.refresh_local());
        let _ = reply.send(res);
      }
      RemoveRaft(partition, reply) => {
        self.local.raft_memberships_mut().remove(&*partition);
        let _ = reply.send(self.refresh_local());
      }
      Subscribe(tx) => {
        self.peers.add_listener(move |p: &Peer| {
          let _ = tx.send(p.clone());
        });
      }
      Snapshot(reply) => {
        let _ = reply.send(self.peers.to_vec());
      }
      Shutdown => return false,
    }
    true
  }

  /// Merges a received gossip body and returns the body to send back: the peers the sender
  /// is missing or behind on. A malformed body is rejected whole and changes nothing.
  pub fn gossip(&mut self, body: &[u8]) -> Result<Bytes> {
    let updates = decode_peers(body).map_err(|e| {
      warn!(error = %e, "rejecting malformed gossip");
      e
    })?;
    let mut diff = PeerList::new(self.config.peer_capacity);
    let stats = self.peers.merge(&updates, Some(&mut diff))?;
    debug!(
      received = updates.len(),
      joined = stats.joined,
      changed = stats.changed,
      diffed = stats.diffed,
      "merged gossip"
    );
    if self.refute()? && !diff.update(&self.local)? {
      diff.insert(&self.local)?;
    }
    Ok(diff.payload())
  }

  /// Advances the local heartbeat and publishes the local peer, raft memberships included.
  pub fn heartbeat(&mut self) -> Result<Heartbeat> {
    self.local.heartbeat_mut().increment()?;
    self.local.alive();
    self.refresh_local()?;
    Ok(*self.local.heartbeat())
  }

  /// Applies a local failure detector verdict to a remote peer. The local peer cannot be
  /// marked, and unknown peers are left unknown. Returns whether the state changed.
  pub fn mark(&mut self, endpoint: &Endpoint, state: PeerState) -> Result<bool> {
    if endpoint == self.local.management_endpoint() {
      return Ok(false);
    }
    let idx = match self.peers.find_endpoint(endpoint)? {
      Ok(idx) => idx,
      Err(_) => return Ok(false),
    };
    let mut peer = self.peers.get(idx)?;
    if !peer.transition_at(state, now_millis()) {
      return Ok(false);
    }
    debug!(peer = %endpoint, state = ?state, "marked peer");
    self.peers.set(idx, &peer)?;
    Ok(true)
  }

  /// If gossip claims the local peer is anything but alive, outbid it with a newer heartbeat.
  fn refute(&mut self) -> Result<bool> {
    let idx = self.local_index()?;
    let recorded = self.peers.get(idx)?;
    if recorded.state() == PeerState::Alive {
      return Ok(false);
    }
    warn!(state = ?recorded.state(), "refuting gossip about the local peer");
    if *recorded.heartbeat() > *self.local.heartbeat() {
      self.local.heartbeat_mut().wrap(recorded.heartbeat());
    }
    self.heartbeat()?;
    Ok(true)
  }

  fn refresh_local(&mut self) -> Result<()> {
    let idx = self.local_index()?;
    self.peers.set(idx, &self.local)
  }

  fn local_index(&self) -> Result<usize> {
    self
      .peers
      .find(&self.local)?
      .map_err(|_| MembershipError::MissingEndpoint(EndpointType::Management))
  }
}

/// Cheap, cloneable access to a running [`MembershipService`].
#[derive(Clone)]
pub struct MembershipHandle {
  tx: mpsc::UnboundedSender<MembershipCmd>,
}
impl MembershipHandle {
  async fn request<T, F>(&self, cmd: F) -> Result<T>
  where
    F: FnOnce(oneshot::Sender<T>) -> MembershipCmd,
  {
    let (tx, rx) = oneshot::channel();
    self
      .tx
      .send(cmd(tx))
      .map_err(|_| MembershipError::ServiceClosed)?;
    rx.await.map_err(|_| MembershipError::ServiceClosed)
  }

  pub async fn gossip(&self, body: Bytes) -> Result<Bytes> {
    self.request(|tx| Gossip(body, tx)).await?
  }

  pub async fn payload(&self) -> Result<Bytes> {
    self.request(Payload).await
  }

  pub async fn heartbeat(&self) -> Result<Heartbeat> {
    self.request(AdvanceHeartbeat).await?
  }

  pub async fn suspect(&self, endpoint: Endpoint) -> Result<bool> {
    self.request(|tx| Mark(endpoint, PeerState::Suspect, tx)).await?
  }

  pub async fn dead(&self, endpoint: Endpoint) -> Result<bool> {
    self.request(|tx| Mark(endpoint, PeerState::Dead, tx)).await?
  }

  pub async fn add_raft(&self, partition: Arc<dyn RaftPartition>) -> Result<()> {
    self.request(|tx| AddRaft(partition, tx)).await?
  }

  pub async fn remove_raft(&self, partition: Arc<dyn RaftPartition>) -> Result<()> {
    self.request(|tx| RemoveRaft(partition, tx)).await?
  }

  /// Receives every peer that joins the list from now on.
  pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Peer>> {
    let (tx, rx) = mpsc::unbounded_channel();
    self
      .tx
      .send(Subscribe(tx))
      .map_err(|_| MembershipError::ServiceClosed)?;
    Ok(rx)
  }

  pub async fn snapshot(&self) -> Result<Vec<Peer>> {
    self.request(Snapshot).await?
  }

  pub fn shutdown(&self) {
    let _ = self.tx.send(Shutdown);
  }
}
