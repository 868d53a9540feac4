use crate::error::{MembershipError, Result};
use crate::membership::peer::management_key;
use crate::membership::utils::MAX_PEER_LENGTH;
use crate::membership::{Endpoint, Peer};
use itertools::Itertools;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

/// Each slot is a big endian `u16` record length followed by room for the largest record.
const SLOT_SIZE: usize = 2 + MAX_PEER_LENGTH;

/// Notified once for every peer that joins a [`PeerList`] through `add`, `append` or `insert`,
/// merges included. Overwriting a slot never notifies.
pub trait PeerListListener: Send {
  fn on_peer_join(&mut self, peer: &Peer);
}
impl<F: FnMut(&Peer) + Send> PeerListListener for F {
  fn on_peer_join(&mut self, peer: &Peer) {
    self(peer)
  }
}

/// A bounded list of peers, kept as encoded records in fixed-size slots and sorted by
/// management endpoint so lookups are binary searches over the packed records.
///
/// Slot memory is reserved as slots are first used, never past `capacity`. [`shuffle`] leaves
/// the list unsorted; until [`sort`] is called, [`find`], [`insert`], [`update`] and
/// [`merge`](PeerList::merge) return [`MembershipError::Unsorted`].
///
/// [`shuffle`]: PeerList::shuffle
/// [`sort`]: PeerList::sort
/// [`find`]: PeerList::find
/// [`insert`]: PeerList::insert
/// [`update`]: PeerList::update
pub struct PeerList {
  capacity: usize,
  size: usize,
  sorted: bool,
  slots: Vec<u8>,
  listeners: Vec<Box<dyn PeerListListener>>,
}
impl PeerList {
  pub fn new(capacity: usize) -> PeerList {
    PeerList {
      capacity: capacity,
      size: 0,
      sorted: true,
      slots: Vec::new(),
      listeners: Vec::new(),
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn len(&self) -> usize {
    self.size
  }

  pub fn is_empty(&self) -> bool {
    self.size == 0
  }

  pub fn is_sorted(&self) -> bool {
    self.sorted
  }

  pub fn add_listener<L: PeerListListener + 'static>(&mut self, listener: L) {
    self.listeners.push(Box::new(listener));
  }

  pub fn clear(&mut self) {
    self.size = 0;
    self.sorted = true;
  }

  pub fn get(&self, idx: usize) -> Result<Peer> {
    self.check_index(idx)?;
    Peer::decode(self.record(idx))
  }

  /// Overwrites the peer at `idx`. A peer that no longer fits between its neighbours leaves
  /// the list unsorted.
  pub fn set(&mut self, idx: usize, peer: &Peer) -> Result<()> {
    self.check_index(idx)?;
    self.write_slot(idx, peer)?;
    if self.sorted && !self.in_order_at(idx)? {
      self.sorted = false;
    }
    Ok(())
  }

  /// Inserts `peer` at `idx`, shifting later entries back by one slot.
  pub fn add(&mut self, idx: usize, peer: &Peer) -> Result<()> {
    if idx > self.size {
      return Err(MembershipError::IndexOutOfBounds {
        index: idx,
        len: self.size,
      });
    }
    self.check_capacity()?;
    check_record_len(peer)?;
    self.reserve_slot();
    let start = idx * SLOT_SIZE;
    let end = self.size * SLOT_SIZE;
    self.slots.copy_within(start..end, start + SLOT_SIZE);
    self.size += 1;
    self.write_slot(idx, peer)?;
    if self.sorted && !self.in_order_at(idx)? {
      self.sorted = false;
    }
    self.notify_join(peer);
    Ok(())
  }

  pub fn append(&mut self, peer: &Peer) -> Result<()> {
    self.add(self.size, peer)
  }

  /// Index of `peer` if present, otherwise where it would be inserted, mirroring
  /// `slice::binary_search`.
  pub fn find(&self, peer: &Peer) -> Result<std::result::Result<usize, usize>> {
    self.find_endpoint(peer.management_endpoint())
  }

  pub fn find_endpoint(&self, endpoint: &Endpoint) -> Result<std::result::Result<usize, usize>> {
    if !self.sorted {
      return Err(MembershipError::Unsorted("find"));
    }
    let target = (endpoint.host().as_bytes(), endpoint.port());
    let mut low = 0;
    let mut high = self.size;
    while low < high {
      let mid = low + (high - low) / 2;
      match self.key(mid)?.cmp(&target) {
        Ordering::Less => low = mid + 1,
        Ordering::Greater => high = mid,
        Ordering::Equal => return Ok(Ok(mid)),
      }
    }
    Ok(Err(low))
  }

  /// Adds `peer` at its sorted position unless a peer with the same management endpoint is
  /// already present. Returns whether it was added.
  pub fn insert(&mut self, peer: &Peer) -> Result<bool> {
    if !self.sorted {
      return Err(MembershipError::Unsorted("insert"));
    }
    match self.find(peer)? {
      Ok(_) => Ok(false),
      Err(idx) => self.add(idx, peer).map(|_| true),
    }
  }

  /// Replaces the peer with the same management endpoint. Returns whether one was present.
  pub fn update(&mut self, peer: &Peer) -> Result<bool> {
    if !self.sorted {
      return Err(MembershipError::Unsorted("update"));
    }
    match self.find(peer)? {
      Ok(idx) => self.set(idx, peer).map(|_| true),
      Err(_) => Ok(false),
    }
  }

  pub fn shuffle(&mut self) {
    self.shuffle_with(&mut SmallRng::from_entropy());
  }

  /// Fisher-Yates over the slots. The list stays unsorted until [`sort`](PeerList::sort).
  pub fn shuffle_with<R: Rng>(&mut self, rng: &mut R) {
    for i in (1..self.size).rev() {
      let j = rng.gen_range(0..=i);
      self.swap_slots(i, j);
    }
    self.sorted = self.size <= 1;
  }

  /// Restores management endpoint order. Fails with [`MembershipError::DuplicatePeer`] if two
  /// entries share a management endpoint, leaving the list unsorted and untouched.
  pub fn sort(&mut self) -> Result<()> {
    if self.sorted {
      return Ok(());
    }
    let mut order = (0..self.size).collect::<Vec<_>>();
    let keys = order
      .iter()
      .map(|idx| self.key(*idx))
      .collect::<Result<Vec<_>>>()?;
    order.sort_by(|a, b| keys[*a].cmp(&keys[*b]));
    if let Some((dup, _)) = order
      .iter()
      .tuple_windows()
      .find(|(a, b)| keys[**a] == keys[**b])
    {
      let peer = self.get(*dup)?;
      return Err(MembershipError::DuplicatePeer(
        peer.management_endpoint().clone(),
      ));
    }
    let mut sorted = vec![0u8; self.size * SLOT_SIZE];
    for (to, from) in order.iter().enumerate() {
      sorted[to * SLOT_SIZE..(to + 1) * SLOT_SIZE]
        .copy_from_slice(&self.slots[from * SLOT_SIZE..(from + 1) * SLOT_SIZE]);
    }
    self.slots[..self.size * SLOT_SIZE].copy_from_slice(&sorted);
    self.sorted = true;
    Ok(())
  }

  pub fn iter(&self) -> PeerListIter<'_> {
    PeerListIter {
      list: self,
      idx: 0,
    }
  }

  pub fn to_vec(&self) -> Result<Vec<Peer>> {
    self.iter().collect()
  }

  /// Encoded record at `idx`. Only valid for `idx < len()`.
  pub(crate) fn record(&self, idx: usize) -> &[u8] {
    let slot = &self.slots[idx * SLOT_SIZE..(idx + 1) * SLOT_SIZE];
    let len = u16::from_be_bytes([slot[0], slot[1]]) as usize;
    &slot[2..2 + len]
  }

  pub(crate) fn key(&self, idx: usize) -> Result<(&[u8], u16)> {
    management_key(self.record(idx))
  }

  pub(crate) fn notify_join(&mut self, peer: &Peer) {
    debug!(peer = %peer.management_endpoint(), state = ?peer.state(), "peer joined");
    for l in self.listeners.iter_mut() {
      l.on_peer_join(peer);
    }
  }

  fn write_slot(&mut self, idx: usize, peer: &Peer) -> Result<()> {
    let len = check_record_len(peer)?;
    let slot = &mut self.slots[idx * SLOT_SIZE..(idx + 1) * SLOT_SIZE];
    slot[..2].copy_from_slice(&(len as u16).to_be_bytes());
    let mut dst = &mut slot[2..2 + len];
    peer.write(&mut dst);
    Ok(())
  }

  fn reserve_slot(&mut self) {
    let needed = (self.size + 1) * SLOT_SIZE;
    if self.slots.len() < needed {
      self.slots.resize(needed, 0);
    }
  }

  fn swap_slots(&mut self, i: usize, j: usize) {
    if i == j {
      return;
    }
    let (lo, hi) = if i < j { (i, j) } else { (j, i) };
    let (head, tail) = self.slots.split_at_mut(hi * SLOT_SIZE);
    head[lo * SLOT_SIZE..(lo + 1) * SLOT_SIZE].swap_with_slice(&mut tail[..SLOT_SIZE]);
  }

  fn in_order_at(&self, idx: usize) -> Result<bool> {
    let key = self.key(idx)?;
    let after_prev = idx == 0 || self.key(idx - 1)? < key;
    let before_next = idx + 1 >= self.size || key < self.key(idx + 1)?;
    Ok(after_prev && before_next)
  }

  fn check_index(&self, idx: usize) -> Result<()> {
    if idx >= self.size {
      Err(MembershipError::IndexOutOfBounds {
        index: idx,
        len: self.size,
      })
    } else {
      Ok(())
    }
  }

  fn check_capacity(&self) -> Result<()> {
    if self.size >= self.capacity {
      Err(MembershipError::CapacityExceeded {
        what: "peer list",
        capacity: self.capacity,
      })
    } else {
      Ok(())
    }
  }
}
impl fmt::Debug for PeerList {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PeerList")
      .field("capacity", &self.capacity)
      .field("size", &self.size)
      .field("sorted", &self.sorted)
      .field("listeners", &self.listeners.len())
      .finish()
  }
}

fn check_record_len(peer: &Peer) -> Result<usize> {
  let len = peer.encoded_len();
  if len > MAX_PEER_LENGTH {
    Err(MembershipError::RecordTooLong {
      len: len,
      max: MAX_PEER_LENGTH,
    })
  } else {
    Ok(len)
  }
}

/// Decodes the peers of a [`PeerList`] in list order.
pub struct PeerListIter<'a> {
  list: &'a PeerList,
  idx: usize,
}
impl<'a> Iterator for PeerListIter<'a> {
  type Item = Result<Peer>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.idx >= self.list.size {
      return None;
    }
    let peer = self.list.get(self.idx);
    self.idx += 1;
    Some(peer)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let left = self.list.size - self.idx;
    (left, Some(left))
  }
}

#[cfg(test)]
use crate::membership::PeerState;
#[cfg(test)]
use crate::testkit::peer;
#[cfg(test)]
use std::sync::{Arc, Mutex};

#[cfg(test)]
fn ports(list: &PeerList) -> Vec<u16> {
  list
    .iter()
    .map(|p| p.unwrap().management_endpoint().port())
    .collect()
}

#[test]
fn test_add_shifts_and_notifies() {
  let joined = Arc::new(Mutex::new(Vec::new()));
  let mut list = PeerList::new(4);
  let j = joined.clone();
  list.add_listener(move |p: &Peer| j.lock().unwrap().push(p.management_endpoint().port()));

  list.append(&peer(3, PeerState::Alive)).unwrap();
  list.add(0, &peer(1, PeerState::Alive)).unwrap();
  list.add(1, &peer(2, PeerState::Alive)).unwrap();
  assert_eq!(ports(&list), vec![1, 2, 3]);
  assert!(list.is_sorted());

  let mut replaced = peer(2, PeerState::Suspect);
  replaced.heartbeat_mut().increment().unwrap();
  list.set(1, &replaced).unwrap();
  assert_eq!(list.get(1).unwrap(), replaced);
  assert_eq!(*joined.lock().unwrap(), vec![3, 1, 2]);

  assert_eq!(
    list.add(5, &peer(9, PeerState::Alive)),
    Err(MembershipError::IndexOutOfBounds { index: 5, len: 3 })
  );
  assert_eq!(
    list.set(3, &peer(9, PeerState::Alive)),
    Err(MembershipError::IndexOutOfBounds { index: 3, len: 3 })
  );
}

#[test]
fn test_capacity_is_loud() {
  let mut list = PeerList::new(2);
  list.append(&peer(1, PeerState::Alive)).unwrap();
  list.append(&peer(2, PeerState::Alive)).unwrap();
  assert_eq!(
    list.append(&peer(3, PeerState::Alive)),
    Err(MembershipError::CapacityExceeded {
      what: "peer list",
      capacity: 2
    })
  );
  assert!(list.insert(&peer(0, PeerState::Alive)).is_err());
  assert_eq!(ports(&list), vec![1, 2]);
}

#[test]
fn test_find_insert_update() {
  let mut list = PeerList::new(8);
  for p in [5u16, 1, 4, 2].iter() {
    assert_eq!(list.insert(&peer(*p, PeerState::Alive)), Ok(true));
  }
  assert_eq!(list.insert(&peer(4, PeerState::Dead)), Ok(false));
  assert_eq!(ports(&list), vec![1, 2, 4, 5]);
  assert_eq!(list.find(&peer(4, PeerState::Null)), Ok(Ok(2)));
  assert_eq!(list.find(&peer(3, PeerState::Null)), Ok(Err(2)));
  assert_eq!(list.find(&peer(9, PeerState::Null)), Ok(Err(4)));

  assert_eq!(list.update(&peer(4, PeerState::Dead)), Ok(true));
  assert_eq!(list.get(2).unwrap().state(), PeerState::Dead);
  assert_eq!(list.update(&peer(3, PeerState::Dead)), Ok(false));
  assert_eq!(list.len(), 4);
}

#[test]
fn test_set_out_of_order_unsorts() {
  let mut list = PeerList::new(4);
  for port in &[1, 2, 3] {
    list.insert(&peer(*port, PeerState::Alive)).unwrap();
  }
  // same endpoint, new details: still sorted
  list.set(1, &peer(2, PeerState::Dead)).unwrap();
  assert!(list.is_sorted());

  list.set(0, &peer(9, PeerState::Alive)).unwrap();
  assert_eq!(ports(&list), vec![9, 2, 3]);
  assert!(!list.is_sorted());
  assert_eq!(
    list.find(&peer(9, PeerState::Alive)),
    Err(MembershipError::Unsorted("find"))
  );
  assert_eq!(
    list.insert(&peer(9, PeerState::Alive)),
    Err(MembershipError::Unsorted("insert"))
  );
  assert_eq!(list.len(), 3);

  list.sort().unwrap();
  assert_eq!(ports(&list), vec![2, 3, 9]);
  assert_eq!(list.find(&peer(9, PeerState::Alive)), Ok(Ok(2)));
}

#[test]
fn test_sort_rejects_duplicates() {
  let mut list = PeerList::new(4);
  for port in &[2, 1, 1] {
    list.append(&peer(*port, PeerState::Alive)).unwrap();
  }
  assert!(!list.is_sorted());
  assert_eq!(
    list.sort(),
    Err(MembershipError::DuplicatePeer(
      Endpoint::new("10.0.0.1", 1).unwrap()
    ))
  );
  assert!(!list.is_sorted());
  assert_eq!(ports(&list), vec![2, 1, 1]);
  assert!(list.merge(&[], None).is_err());
}

#[test]
fn test_append_out_of_order_unsorts() {
  let mut list = PeerList::new(4);
  list.append(&peer(2, PeerState::Alive)).unwrap();
  list.append(&peer(1, PeerState::Alive)).unwrap();
  assert!(!list.is_sorted());
  assert_eq!(
    list.find(&peer(1, PeerState::Alive)),
    Err(MembershipError::Unsorted("find"))
  );
  list.sort().unwrap();
  assert_eq!(ports(&list), vec![1, 2]);
  assert_eq!(list.find(&peer(1, PeerState::Alive)), Ok(Ok(0)));
}

#[test]
fn test_shuffle_then_sort() {
  let mut list = PeerList::new(32);
  for p in 0..32u16 {
    list.append(&peer(p, PeerState::Alive)).unwrap();
  }
  let before = list.to_vec().unwrap();
  list.shuffle_with(&mut SmallRng::seed_from_u64(7));
  assert!(!list.is_sorted());
  assert_eq!(
    list.insert(&peer(40, PeerState::Alive)),
    Err(MembershipError::Unsorted("insert"))
  );
  let mut shuffled = ports(&list);
  assert_ne!(shuffled, (0..32).collect::<Vec<_>>());
  shuffled.sort_unstable();
  assert_eq!(shuffled, (0..32).collect::<Vec<_>>());

  list.sort().unwrap();
  assert_eq!(list.to_vec().unwrap(), before);
}
