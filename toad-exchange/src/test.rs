#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use embedded_time::rate::Fraction;
use embedded_time::Instant;
use no_std_net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

use crate::msg::{Message, MessageExt, TryFromBytes};
use crate::net::{Addrd, Socket};

/// `127.0.0.1:n`
pub fn addr(n: u16) -> SocketAddr {
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, n))
}

pub fn encode(msg: &Message) -> Vec<u8> {
  msg.to_bytes().unwrap()
}

pub fn decode(bytes: &[u8]) -> Message {
  Message::try_from_bytes(bytes).unwrap()
}

/// Millisecond clock whose time only changes when told to.
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ClockMock(Arc<AtomicU64>);

impl ClockMock {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, ms: u64) {
    self.0.store(ms, Ordering::SeqCst);
  }

  pub fn advance(&self, ms: u64) {
    self.0.fetch_add(ms, Ordering::SeqCst);
  }

  pub fn get(&self) -> u64 {
    self.0.load(Ordering::SeqCst)
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.get()))
  }
}

/// A datagram that went through the [`Ether`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
  pub from: SocketAddr,
  pub to: SocketAddr,
  pub bytes: Vec<u8>,
  pub dropped: bool,
}

impl Sent {
  pub fn msg(&self) -> Message {
    decode(&self.bytes)
  }
}

type DropFn = Box<dyn FnMut(&Sent) -> bool + Send>;

#[derive(Default)]
struct EtherState {
  inboxes: HashMap<SocketAddr, VecDeque<Addrd<Vec<u8>>>>,
  sent: Vec<Sent>,
  drop: Option<DropFn>,
}

/// An in-memory network connecting [`SockMock`]s
#[derive(Clone, Default)]
pub struct Ether(Arc<Mutex<EtherState>>);

impl core::fmt::Debug for Ether {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    let state = self.0.lock().unwrap();
    f.debug_struct("Ether")
     .field("inboxes", &state.inboxes)
     .field("sent", &state.sent.len())
     .finish()
  }
}

impl Ether {
  pub fn new() -> Self {
    Self::default()
  }

  /// A socket bound to `addr` on this network
  pub fn sock(&self, addr: SocketAddr) -> SockMock {
    SockMock { addr,
               ether: self.clone() }
  }

  /// Drop every datagram for which `f` returns true
  pub fn drop_when(&self, f: impl FnMut(&Sent) -> bool + Send + 'static) {
    self.0.lock().unwrap().drop = Some(Box::new(f));
  }

  /// Stop dropping datagrams
  pub fn heal(&self) {
    self.0.lock().unwrap().drop = None;
  }

  /// Deliver raw bytes to `to` as if `from` sent them
  pub fn inject_bytes(&self, from: SocketAddr, to: SocketAddr, bytes: Vec<u8>) {
    self.0
        .lock()
        .unwrap()
        .inboxes
        .entry(to)
        .or_default()
        .push_back(Addrd(bytes, from));
  }

  /// Deliver a message to `to` as if `from` sent it
  pub fn inject(&self, from: SocketAddr, to: SocketAddr, msg: &Message) {
    self.inject_bytes(from, to, encode(msg));
  }

  /// Every datagram sent so far, including dropped ones
  pub fn sent(&self) -> Vec<Sent> {
    self.0.lock().unwrap().sent.clone()
  }

  /// Messages sent from `from`, including dropped ones
  pub fn sent_from(&self, from: SocketAddr) -> Vec<Message> {
    self.sent()
        .into_iter()
        .filter(|s| s.from == from)
        .map(|s| s.msg())
        .collect()
  }

  /// Forget the sent log
  pub fn clear_sent(&self) {
    self.0.lock().unwrap().sent.clear();
  }

  /// Number of datagrams waiting to be received by `addr`
  pub fn waiting(&self, addr: SocketAddr) -> usize {
    self.0
        .lock()
        .unwrap()
        .inboxes
        .get(&addr)
        .map(VecDeque::len)
        .unwrap_or(0)
  }
}

/// A mocked socket
#[derive(Debug, Clone)]
pub struct SockMock {
  pub addr: SocketAddr,
  pub ether: Ether,
}

impl Socket for SockMock {
  type Error = ();

  fn local_addr(&self) -> SocketAddr {
    self.addr
  }

  fn bind_raw<A: ToSocketAddrs>(addr: A) -> Result<Self, Self::Error> {
    let addr = addr.to_socket_addrs().map_err(|_| ())?.next().ok_or(())?;
    Ok(Ether::new().sock(addr))
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    let mut state = self.ether.0.lock().unwrap();
    let mut sent = Sent { from: self.addr,
                          to: msg.addr(),
                          bytes: msg.data().to_vec(),
                          dropped: false };

    sent.dropped = state.drop.as_mut().map(|f| f(&sent)).unwrap_or(false);

    if !sent.dropped {
      state.inboxes
           .entry(sent.to)
           .or_default()
           .push_back(Addrd(sent.bytes.clone(), sent.from));
    }

    state.sent.push(sent);
    Ok(())
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    let mut state = self.ether.0.lock().unwrap();
    let dgram = state.inboxes
                     .get_mut(&self.addr)
                     .and_then(VecDeque::pop_front)
                     .ok_or(nb::Error::WouldBlock)?;

    let n = dgram.data().len().min(buffer.len());
    buffer[..n].copy_from_slice(&dgram.data()[..n]);
    Ok(Addrd(n, dgram.addr()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ether_routes_by_addr() {
    let ether = Ether::new();
    let (a, b) = (ether.sock(addr(1)), ether.sock(addr(2)));

    a.send(Addrd(&[1, 2, 3], addr(2))).unwrap();
    assert_eq!(b.poll(16).unwrap(), Some(Addrd(vec![1, 2, 3], addr(1))));
    assert_eq!(a.poll(16).unwrap(), None);

    ether.drop_when(|_| true);
    a.send(Addrd(&[4], addr(2))).unwrap();
    assert_eq!(b.poll(16).unwrap(), None);
    assert!(ether.sent()[1].dropped);
  }
}
