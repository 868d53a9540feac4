//! Gossip message bodies: a big endian `u32` record count followed by that many
//! `u16`-length-prefixed peer records.
//!
//! A body is accepted or rejected as a whole. One bad record means the sender and receiver
//! disagree on framing, and nothing after it can be trusted either.

use crate::error::{MembershipError, Result};
use crate::membership::utils::{ensure, MAX_PEER_LENGTH};
use crate::membership::{Peer, PeerList};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const COUNT_SIZE: usize = 4;
const LEN_SIZE: usize = 2;

pub fn encode_peers<'a, I>(peers: I) -> Bytes
where
  I: IntoIterator<Item = &'a Peer>,
{
  let peers = peers.into_iter().collect::<Vec<_>>();
  let total = COUNT_SIZE + peers.iter().map(|p| LEN_SIZE + p.encoded_len()).sum::<usize>();
  let mut buf = BytesMut::with_capacity(total);
  buf.put_u32(peers.len() as u32);
  for p in peers {
    buf.put_u16(p.encoded_len() as u16);
    p.write(&mut buf);
  }
  buf.freeze()
}

/// Decodes a gossip body into peers in the order they were sent.
pub fn decode_peers(mut body: &[u8]) -> Result<Vec<Peer>> {
  let total = body.len();
  ensure(body, COUNT_SIZE)?;
  let count = body.get_u32() as usize;
  let mut peers = Vec::with_capacity(count.min(body.len() / (LEN_SIZE + Peer::HEADER_SIZE)));
  for _ in 0..count {
    ensure(body, LEN_SIZE)?;
    let len = body.get_u16() as usize;
    if len > MAX_PEER_LENGTH {
      return Err(MembershipError::RecordTooLong {
        len: len,
        max: MAX_PEER_LENGTH,
      });
    }
    ensure(body, len)?;
    peers.push(Peer::decode(&body[..len])?);
    body.advance(len);
  }
  if !body.is_empty() {
    return Err(MembershipError::Framing {
      declared: total - body.len(),
      consumed: total,
    });
  }
  Ok(peers)
}

impl PeerList {
  /// Writes the list as a gossip body, copying the packed records as they are.
  pub fn write_payload(&self, buf: &mut BytesMut) {
    buf.reserve(COUNT_SIZE + self.len() * LEN_SIZE);
    buf.put_u32(self.len() as u32);
    for idx in 0..self.len() {
      let record = self.record(idx);
      buf.put_u16(record.len() as u16);
      buf.put_slice(record);
    }
  }

  pub fn payload(&self) -> Bytes {
    let mut buf = BytesMut::new();
    self.write_payload(&mut buf);
    buf.freeze()
  }
}

#[cfg(test)]
use crate::membership::PeerState;
#[cfg(test)]
use crate::testkit::peer;

#[test]
fn test_list_payload_matches_encoded_peers() {
  let mut list = PeerList::new(8);
  let peers = (1..=5u16)
    .map(|p| peer(p, PeerState::Alive))
    .collect::<Vec<_>>();
  for p in peers.iter() {
    list.append(p).unwrap();
  }
  let body = list.payload();
  assert_eq!(body, encode_peers(&peers));
  assert_eq!(decode_peers(&body), Ok(peers));
}

#[test]
fn test_decode_rejects_whole_batch() {
  let peers = vec![peer(1, PeerState::Alive), peer(2, PeerState::Dead)];
  let body = encode_peers(&peers);

  let mut trailing = body.to_vec();
  trailing.push(0);
  assert!(matches!(
    decode_peers(&trailing),
    Err(MembershipError::Framing { .. })
  ));

  let mut short_count = body.to_vec();
  short_count[3] = 3;
  assert!(matches!(
    decode_peers(&short_count),
    Err(MembershipError::Truncated { .. })
  ));

  let mut bad_tag = body.to_vec();
  let second = COUNT_SIZE + LEN_SIZE + peers[0].encoded_len() + LEN_SIZE;
  bad_tag[second] = 200;
  assert_eq!(
    decode_peers(&bad_tag),
    Err(MembershipError::UnknownPeerState(200))
  );

  assert_eq!(decode_peers(&encode_peers(&Vec::<Peer>::new())), Ok(vec![]));
}
