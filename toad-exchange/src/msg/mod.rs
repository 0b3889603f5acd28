use toad_msg::opt::known::no_repeat::OBSERVE;
use toad_msg::opt::known::repeat::{PATH, QUERY};

pub use toad_msg::opt::known::observe::Action as ObserveAction;
pub use toad_msg::to_bytes::MessageToBytesError;
pub use toad_msg::{Block, Code, CodeKind, ContentFormat, Id, MessageOptions, MessageParseError,
                   OptNumber, OptValue, Payload, Token, TryFromBytes, TryIntoBytes, Type, Version};

/// Known option numbers
pub mod known {
  pub use toad_msg::opt::known::no_repeat::*;
  pub use toad_msg::opt::known::repeat::*;
}

/// A CoAP message backed by heap collections.
///
/// Messages are provisioned as they descend through the layers of an
/// endpoint, and two sentinels stand in for "not decided yet":
///  - `Id(0)` on a CON or NON message means the matcher should assign a fresh message id
///  - an empty [`Token`] on a request means the Token layer should assign one
///
/// ```
/// use toad_exchange::msg::*;
///
/// let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token::from_slice(&[1, 2]));
/// msg.set_path("hello/world").ok();
///
/// let bytes = msg.to_bytes().unwrap();
/// assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
/// assert_eq!(msg.uri_path(), "hello/world");
/// ```
pub type Message = toad_msg::alloc::Message;

/// Token constructors
pub trait TokenExt: Sized {
  /// The zero-length token
  fn empty() -> Self;

  /// Create a token from a byte slice, truncating to 8 bytes
  fn from_slice(bytes: &[u8]) -> Self;
}

impl TokenExt for Token {
  fn empty() -> Self {
    Token(Default::default())
  }

  fn from_slice(bytes: &[u8]) -> Self {
    Token(bytes.iter().take(8).copied().collect())
  }
}

/// Block-wise helpers that work in terms of the size exponent (SZX)
///
/// ```
/// use toad_exchange::msg::{Block, BlockExt};
///
/// let block = Block::new(512, 3, true);
/// assert_eq!(block.szx(), 5);
/// assert_eq!(block.offset(), 1536);
/// assert_eq!(Block::from_szx(5, 3, true), block);
/// ```
pub trait BlockExt: Sized {
  /// Create a block from a size exponent
  fn from_szx(szx: u8, num: u32, more: bool) -> Self;

  /// Size exponent; the block size is `2^(szx + 4)`
  fn szx(&self) -> u8;

  /// Byte offset of the first byte in this block
  fn offset(&self) -> usize;
}

impl BlockExt for Block {
  fn from_szx(szx: u8, num: u32, more: bool) -> Self {
    Block::from((num << 4) | ((more as u32) << 3) | szx.min(6) as u32)
  }

  fn szx(&self) -> u8 {
    (u32::from(*self) & 0b111).min(6) as u8
  }

  fn offset(&self) -> usize {
    self.num() as usize * self.size() as usize
  }
}

/// Block size in bytes for a size exponent (SZX 7 is treated as 6)
pub fn size_of_szx(szx: u8) -> usize {
  1usize << (szx.min(6) as usize + 4)
}

/// Largest size exponent whose block size does not exceed `size`
pub fn szx_for_size(size: usize) -> u8 {
  let mut szx = 0u8;
  while szx < 6 && size_of_szx(szx + 1) <= size {
    szx += 1;
  }
  szx
}

/// Helpers on [`Message`] used by the exchange layers
pub trait MessageExt {
  /// Create an empty message (code 0.00) of some type, referring to message `id`
  fn empty(ty: Type, id: Id) -> Self;

  /// Is this an ACK or RST with code 0.00?
  fn is_empty(&self) -> bool;

  /// Is this a request?
  fn is_request(&self) -> bool;

  /// Is this a response?
  fn is_response(&self) -> bool;

  /// Is this message of type `ty`?
  fn is(&self, ty: Type) -> bool;

  /// Uri-Path segments joined by `/`
  fn uri_path(&self) -> String;

  /// Path & queries, used to recognize the continuation
  /// of a block-wise transfer with a peer.
  fn uri_key(&self) -> String;

  /// The Observe option as a sequence number (0-3 byte unsigned int)
  fn observe_seq(&self) -> Option<u32>;

  /// Set the Observe option to a sequence number, keeping the low 24 bits
  fn set_observe_seq(&mut self, seq: u32);

  /// Set a Block1 or Block2 option from a [`Block`]
  fn set_block(&mut self, num: OptNumber, block: Block);

  /// Serialize a copy of this message
  fn to_bytes(&self) -> Result<Vec<u8>, MessageToBytesError>;

  /// Approximate serialized size of this message
  fn size(&self) -> usize;
}

impl MessageExt for Message {
  fn empty(ty: Type, id: Id) -> Self {
    Message::new(ty, Code::EMPTY, id, Token::empty())
  }

  fn is_empty(&self) -> bool {
    self.code.kind() == CodeKind::Empty
  }

  fn is_request(&self) -> bool {
    self.code.kind() == CodeKind::Request
  }

  fn is_response(&self) -> bool {
    self.code.kind() == CodeKind::Response
  }

  fn is(&self, ty: Type) -> bool {
    self.ty == ty
  }

  fn uri_path(&self) -> String {
    self.opts
        .get(&PATH)
        .map(|segs| {
          segs.iter()
              .map(|s| String::from_utf8_lossy(&s.0).into_owned())
              .filter(|s| !s.is_empty())
              .collect::<Vec<_>>()
              .join("/")
        })
        .unwrap_or_default()
  }

  fn uri_key(&self) -> String {
    let queries = self.opts
                      .get(&QUERY)
                      .map(|qs| {
                        qs.iter()
                          .map(|q| String::from_utf8_lossy(&q.0).into_owned())
                          .collect::<Vec<_>>()
                          .join("&")
                      })
                      .unwrap_or_default();

    if queries.is_empty() {
      self.uri_path()
    } else {
      format!("{}?{}", self.uri_path(), queries)
    }
  }

  fn observe_seq(&self) -> Option<u32> {
    self.opts
        .get(&OBSERVE)
        .and_then(|vs| vs.first())
        .filter(|v| v.0.len() <= 4)
        .map(|v| v.0.iter().fold(0u32, |n, b| (n << 8) | *b as u32))
  }

  fn set_observe_seq(&mut self, seq: u32) {
    let bytes = (seq & 0xFF_FFFF).to_be_bytes()
                                 .into_iter()
                                 .skip_while(|b| *b == 0)
                                 .collect::<Vec<_>>();
    self.opts.insert(OBSERVE, vec![OptValue(bytes)]);
  }

  fn set_block(&mut self, num: OptNumber, block: Block) {
    self.opts
        .insert(num, vec![OptValue(u32::from(block).to_be_bytes().to_vec())]);
  }

  fn to_bytes(&self) -> Result<Vec<u8>, MessageToBytesError> {
    self.clone().try_into_bytes::<Vec<u8>>()
  }

  fn size(&self) -> usize {
    let opts: usize = self.opts
                          .values()
                          .flat_map(|vs| vs.iter())
                          .map(|v| v.0.len() + 3)
                          .sum();
    let payload = if self.payload.0.is_empty() {
      0
    } else {
      self.payload.0.len() + 1
    };
    4 + self.token.0.len() + opts + payload
  }
}

/// Read the message id of a datagram that may not be a valid message.
///
/// Yields `None` when there are too few bytes for a header, or when the
/// datagram claims to be a Reset (which must never be answered).
pub fn peek_id(bytes: &[u8]) -> Option<Id> {
  match bytes {
    | [b1, _, hi, lo, ..] if (b1 >> 4) & 0b11 != 3 => Some(Id(u16::from_be_bytes([*hi, *lo]))),
    | _ => None,
  }
}
