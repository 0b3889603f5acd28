use std::io;
use std::net::UdpSocket;

use no_std_net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};

use crate::net::{Addrd, Socket};

fn io_to_nb(err: io::Error) -> nb::Error<io::Error> {
  match err.kind() {
    | io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
    | _ => nb::Error::Other(err),
  }
}

/// Convert a [`std::net::SocketAddr`] to a [`no_std_net::SocketAddr`]
pub fn from_std(addr: std::net::SocketAddr) -> SocketAddr {
  match addr {
    | std::net::SocketAddr::V4(v4) => {
      let [a, b, c, d] = v4.ip().octets();
      SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), v4.port()))
    },
    | std::net::SocketAddr::V6(v6) => {
      let [a, b, c, d, e, f, g, h] = v6.ip().segments();
      SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::new(a, b, c, d, e, f, g, h),
                                       v6.port(),
                                       v6.flowinfo(),
                                       v6.scope_id()))
    },
  }
}

/// Convert a [`no_std_net::SocketAddr`] to a [`std::net::SocketAddr`]
pub fn to_std(addr: SocketAddr) -> std::net::SocketAddr {
  match addr {
    | SocketAddr::V4(v4) => {
      let [a, b, c, d] = v4.ip().octets();
      std::net::SocketAddr::V4(std::net::SocketAddrV4::new(std::net::Ipv4Addr::new(a, b, c, d),
                                                           v4.port()))
    },
    | SocketAddr::V6(v6) => {
      let [a, b, c, d, e, f, g, h] = v6.ip().segments();
      std::net::SocketAddr::V6(std::net::SocketAddrV6::new(std::net::Ipv6Addr::new(a, b, c, d, e, f, g, h),
                                                           v6.port(),
                                                           v6.flowinfo(),
                                                           v6.scope_id()))
    },
  }
}

/// Bind a non-blocking [`UdpSocket`] to an address written like `"127.0.0.1:5683"`
///
/// ```
/// use toad_exchange::net::Socket;
///
/// let sock = toad_exchange::std::net::bind("127.0.0.1:0").unwrap();
/// assert_ne!(Socket::local_addr(&sock).port(), 0);
/// ```
pub fn bind(addr: &str) -> io::Result<UdpSocket> {
  let addr = addr.parse::<std::net::SocketAddr>()
                 .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
  <UdpSocket as Socket>::bind_raw(from_std(addr))
}

impl Socket for UdpSocket {
  type Error = io::Error;

  fn local_addr(&self) -> SocketAddr {
    UdpSocket::local_addr(self).map(from_std)
                               .unwrap_or_else(|_| {
                                 SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
                               })
  }

  fn bind_raw<A: ToSocketAddrs>(addr: A) -> Result<Self, Self::Error> {
    let addrs = addr.to_socket_addrs()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{:?}", e)))?
                    .map(to_std)
                    .collect::<Vec<_>>();

    let sock = UdpSocket::bind(addrs.as_slice())?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.send_to(msg.data(), to_std(msg.addr()))
        .map(|_| ())
        .map_err(io_to_nb)
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.recv_from(buffer)
        .map(|(n, addr)| Addrd(n, from_std(addr)))
        .map_err(io_to_nb)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn addr_conversion() {
    let v4: std::net::SocketAddr = "127.0.0.1:5683".parse().unwrap();
    let v6: std::net::SocketAddr = "[::1]:5684".parse().unwrap();

    assert_eq!(to_std(from_std(v4)), v4);
    assert_eq!(to_std(from_std(v6)), v6);
    assert_eq!(from_std(v4).port(), 5683);
  }

  #[test]
  fn bound_socket_does_not_block() {
    let sock = bind("127.0.0.1:0").unwrap();
    let mut buf = [0u8; 8];

    assert!(matches!(Socket::recv(&sock, &mut buf), Err(nb::Error::WouldBlock)));
    assert_ne!(Socket::local_addr(&sock).port(), 0);
  }

  #[test]
  fn bind_rejects_unparseable_address() {
    let err = bind("localhost").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
  }
}
