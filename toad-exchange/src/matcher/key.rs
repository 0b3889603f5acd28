use no_std_net::SocketAddr;

use crate::msg::{Id, Token};

/// Index key for messages expecting an ACK or RST, and for duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyMid {
  /// Message id
  pub id: Id,
  /// Peer the message was sent to or received from
  pub peer: SocketAddr,
}

/// Index key for matching responses to our requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyToken {
  /// Request token
  pub token: Token,
  /// Peer the request was sent to
  pub peer: SocketAddr,
}

/// Index key for block-wise transfers in progress with a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyUri {
  /// Path & query of the request, see [`MessageExt::uri_key`](crate::msg::MessageExt::uri_key)
  pub uri: String,
  /// Peer the request was received from
  pub peer: SocketAddr,
}

impl KeyMid {
  /// Create a key
  pub fn new(id: Id, peer: SocketAddr) -> Self {
    Self { id, peer }
  }
}

impl KeyToken {
  /// Create a key
  pub fn new(token: Token, peer: SocketAddr) -> Self {
    Self { token, peer }
  }
}

impl KeyUri {
  /// Create a key
  pub fn new(uri: String, peer: SocketAddr) -> Self {
    Self { uri, peer }
  }
}
