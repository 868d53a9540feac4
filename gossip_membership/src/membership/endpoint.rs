use crate::error::{MembershipError, Result};
use crate::membership::utils::{ensure, get_str, MAX_HOST_LENGTH};
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// Which of a peer's three sockets an [`Endpoint`] describes. The tag goes on the wire, so the
/// endpoints of a record may arrive in any order.
#[derive(
  Serialize,
  Deserialize,
  Hash,
  PartialEq,
  Eq,
  Ord,
  PartialOrd,
  Clone,
  Copy,
  Debug,
  IntoPrimitive,
  TryFromPrimitive,
)]
#[repr(u8)]
pub enum EndpointType {
  Client = 0,
  Management = 1,
  Replication = 2,
}

/// A host and port. Peers are identified and ordered by their management endpoint, so the
/// derived order (host bytes, then port) is the order of every [`PeerList`].
///
/// [`PeerList`]: crate::membership::PeerList
#[derive(Serialize, Deserialize, Hash, PartialEq, Eq, Ord, PartialOrd, Clone, Debug, Default)]
pub struct Endpoint {
  host: String,
  port: u16,
}
impl Endpoint {
  /// type:u8 port:i32 hostLen:u16
  pub const HEADER_SIZE: usize = 7;
  pub const MAX_LENGTH: usize = Self::HEADER_SIZE + MAX_HOST_LENGTH;

  pub fn new<S: Into<String>>(host: S, port: u16) -> Result<Endpoint> {
    let host = host.into();
    if host.len() > MAX_HOST_LENGTH {
      return Err(MembershipError::HostTooLong {
        len: host.len(),
        max: MAX_HOST_LENGTH,
      });
    }
    Ok(Endpoint {
      host: host,
      port: port,
    })
  }

  pub fn host(&self) -> &str {
    &self.host
  }

  pub fn port(&self) -> u16 {
    self.port
  }

  pub fn wrap(&mut self, other: &Endpoint) {
    self.host.clear();
    self.host.push_str(&other.host);
    self.port = other.port;
  }

  pub fn encoded_len(&self) -> usize {
    Self::HEADER_SIZE + self.host.len()
  }

  pub(crate) fn write<B: BufMut>(&self, tpe: EndpointType, buf: &mut B) {
    buf.put_u8(tpe.into());
    buf.put_i32(self.port as i32);
    buf.put_u16(self.host.len() as u16);
    buf.put_slice(self.host.as_bytes());
  }

  pub(crate) fn read(buf: &mut &[u8]) -> Result<(EndpointType, Endpoint)> {
    let (tpe, port, host_len) = Self::read_header(buf)?;
    let host = get_str(buf, host_len, "endpoint host")?;
    Ok((
      tpe,
      Endpoint {
        host: host,
        port: port,
      },
    ))
  }

  /// Reads an endpoint without copying the host out of the buffer.
  pub(crate) fn read_borrowed<'a>(buf: &mut &'a [u8]) -> Result<(EndpointType, &'a [u8], u16)> {
    let (tpe, port, host_len) = Self::read_header(buf)?;
    ensure(buf, host_len)?;
    let host = &buf[..host_len];
    buf.advance(host_len);
    Ok((tpe, host, port))
  }

  fn read_header(buf: &mut &[u8]) -> Result<(EndpointType, u16, usize)> {
    ensure(buf, Self::HEADER_SIZE)?;
    let tag = buf.get_u8();
    let tpe = EndpointType::try_from(tag).map_err(|_| MembershipError::UnknownEndpointType(tag))?;
    let raw_port = buf.get_i32();
    let port = u16::try_from(raw_port).map_err(|_| MembershipError::InvalidPort(raw_port))?;
    let host_len = buf.get_u16() as usize;
    if host_len > MAX_HOST_LENGTH {
      return Err(MembershipError::HostTooLong {
        len: host_len,
        max: MAX_HOST_LENGTH,
      });
    }
    Ok((tpe, port, host_len))
  }
}
impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.host, self.port)
  }
}

#[test]
fn test_endpoint_host_bound() {
  let long = "h".repeat(MAX_HOST_LENGTH + 1);
  assert_eq!(
    Endpoint::new(long, 1),
    Err(MembershipError::HostTooLong {
      len: MAX_HOST_LENGTH + 1,
      max: MAX_HOST_LENGTH
    })
  );
  assert!(Endpoint::new("h".repeat(MAX_HOST_LENGTH), 1).is_ok());
}

#[test]
fn test_endpoint_order() {
  let a = Endpoint::new("10.0.0.1", 51016).unwrap();
  let b = Endpoint::new("10.0.0.1", 51017).unwrap();
  let c = Endpoint::new("10.0.0.2", 80).unwrap();
  assert!(a < b);
  assert!(b < c);
}

#[test]
fn test_endpoint_rejects_bad_tags() {
  let ep = Endpoint::new("localhost", 26502).unwrap();
  let mut buf = Vec::new();
  ep.write(EndpointType::Replication, &mut buf);
  assert_eq!(buf.len(), ep.encoded_len());
  let mut slice = &buf[..];
  assert_eq!(
    Endpoint::read(&mut slice),
    Ok((EndpointType::Replication, ep.clone()))
  );
  assert!(slice.is_empty());

  buf[0] = 9;
  assert_eq!(
    Endpoint::read(&mut &buf[..]),
    Err(MembershipError::UnknownEndpointType(9))
  );

  buf[0] = EndpointType::Client.into();
  buf[1..5].copy_from_slice(&(-1i32).to_be_bytes());
  assert_eq!(
    Endpoint::read(&mut &buf[..]),
    Err(MembershipError::InvalidPort(-1))
  );
}
