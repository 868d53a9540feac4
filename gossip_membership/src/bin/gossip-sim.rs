use gossip_membership::membership::payload::decode_peers;
use gossip_membership::membership::{
  Endpoint, Heartbeat, MembershipConfig, MembershipHandle, MembershipService, Peer, PeerList,
  PeerState,
};
use gossip_membership::testkit::{init_logging, TestPartition};
use gossip_membership::{MembershipError, Result};
use std::env::args;
use std::sync::Arc;
use tracing::{info, warn, Level};

const HOST: &str = "127.0.0.1";

struct SimNode {
  management: Endpoint,
  handle: MembershipHandle,
  up: bool,
}

/// Runs `nodes` membership services in one process and gossips between them for `rounds`
/// rounds, then takes the last node down and watches its death spread.
///
/// usage: gossip-sim [nodes] [rounds]
#[tokio::main]
async fn main() -> Result<()> {
  init_logging(Level::INFO);
  let mut args = args().skip(1);
  let nodes = args.next().and_then(|a| a.parse::<u16>().ok()).unwrap_or(5);
  let rounds = args.next().and_then(|a| a.parse::<u32>().ok()).unwrap_or(10);
  let config = MembershipConfig::default();

  let mut sim = Vec::new();
  for n in 0..nodes {
    let base = 26500 + n * 10;
    let local = Peer::new(
      Endpoint::new(HOST, base)?,
      Endpoint::new(HOST, base + 1)?,
      Endpoint::new(HOST, base + 2)?,
    );
    let handle = MembershipService::new(config.clone(), local)?.spawn();
    handle
      .add_raft(Arc::new(TestPartition::new("default-topic", n as i32)))
      .await?;
    sim.push(SimNode {
      management: Endpoint::new(HOST, base + 1)?,
      handle: handle,
      up: true,
    });
  }

  // Everyone joins through the first node.
  for n in 1..sim.len() {
    exchange(&sim, n, 0).await?;
  }

  for round in 0..rounds {
    gossip_round(&sim, &config).await?;
    info!(round = round, converged = converged(&sim).await?, "round finished");
    tokio::time::sleep(config.heartbeat_interval / 10).await;
  }

  if sim.len() > 1 {
    let last = sim.len() - 1;
    sim[last].handle.shutdown();
    sim[last].up = false;
    let victim = sim[last].management.clone();
    // Let the victim's final heartbeat settle first, or a fresher alive record outruns the
    // death notice.
    for _ in 0..rounds {
      gossip_round(&sim, &config).await?;
      if converged_on(&sim, &victim).await? {
        break;
      }
    }
    sim[0].handle.dead(victim.clone()).await?;
    for round in 0..rounds {
      gossip_round(&sim, &config).await?;
      let mut aware = 0;
      for node in sim.iter().filter(|n| n.up) {
        let peers = node.handle.snapshot().await?;
        if peers
          .iter()
          .any(|p| *p.management_endpoint() == victim && p.state() == PeerState::Dead)
        {
          aware += 1;
        }
      }
      info!(round = round, aware = aware, of = last, "spreading death of {}", victim);
      if aware == last {
        break;
      }
    }
  }

  for node in sim.iter().filter(|n| n.up) {
    node.handle.shutdown();
  }
  Ok(())
}

/// Every live node advances its heartbeat and gossips to `gossip_fanout` random alive peers.
async fn gossip_round(sim: &[SimNode], config: &MembershipConfig) -> Result<()> {
  for (n, node) in sim.iter().enumerate().filter(|(_, n)| n.up) {
    node.handle.heartbeat().await?;
    let mut candidates = PeerList::new(config.peer_capacity);
    for p in decode_peers(&node.handle.payload().await?)? {
      if p.state() == PeerState::Alive && *p.management_endpoint() != node.management {
        candidates.append(&p)?;
      }
    }
    candidates.shuffle();
    for p in candidates.iter().take(config.gossip_fanout) {
      let target = p?;
      let to = match sim
        .iter()
        .position(|s| s.management == *target.management_endpoint())
      {
        Some(to) => to,
        None => continue,
      };
      match exchange(sim, n, to).await {
        Err(MembershipError::ServiceClosed) => {
          warn!(target = %target.management_endpoint(), "gossip target unreachable")
        }
        res => res?,
      }
    }
  }
  Ok(())
}

/// `from` sends its whole list to `to` and merges the diff it gets back.
async fn exchange(sim: &[SimNode], from: usize, to: usize) -> Result<()> {
  let body = sim[from].handle.payload().await?;
  let diff = sim[to].handle.gossip(body).await?;
  sim[from].handle.gossip(diff).await?;
  Ok(())
}

async fn converged(sim: &[SimNode]) -> Result<bool> {
  let mut views: Vec<Vec<(Endpoint, Heartbeat, PeerState)>> = Vec::new();
  for node in sim.iter().filter(|n| n.up) {
    let view = node
      .handle
      .snapshot()
      .await?
      .into_iter()
      .map(|p| (p.management_endpoint().clone(), *p.heartbeat(), p.state()))
      .collect();
    views.push(view);
  }
  Ok(views.windows(2).all(|w| w[0] == w[1]))
}

/// Whether every live node holds the same heartbeat for `endpoint`.
async fn converged_on(sim: &[SimNode], endpoint: &Endpoint) -> Result<bool> {
  let mut beats = Vec::new();
  for node in sim.iter().filter(|n| n.up) {
    let beat = node
      .handle
      .snapshot()
      .await?
      .into_iter()
      .find(|p| p.management_endpoint() == endpoint)
      .map(|p| *p.heartbeat());
    beats.push(beat);
  }
  Ok(beats.windows(2).all(|w| w[0] == w[1]))
}
