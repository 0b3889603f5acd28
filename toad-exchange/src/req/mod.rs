use crate::msg::{known, Block, Id, Message, MessageExt, MessageOptions, ObserveAction, Payload,
                 Token, TokenExt, Type};

mod method;

#[doc(inline)]
pub use method::Method;

/// A CoAP request
///
/// Requests are confirmable by default; use [`Req::non`] to
/// send one without expecting an acknowledgement.
///
/// The message id & token are left unset (`Id(0)` & the empty token)
/// for the endpoint to provision when the request is sent.
///
/// ```
/// use toad_exchange::msg::{Id, Type};
/// use toad_exchange::req::Req;
///
/// let mut req = Req::post("hello");
/// req.set_payload("john".bytes());
///
/// assert_eq!(req.msg().ty, Type::Con);
/// assert_eq!(req.msg().id, Id(0));
/// assert_eq!(req.path(), "hello");
/// assert_eq!(req.payload_str(), Some("john"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Req {
  msg: Message,
  /// Whether the message layer recognized this as a retransmission
  /// of a request it has already seen
  pub duplicate: bool,
}

impl Req {
  /// Create a request with some method & path
  pub fn new(method: Method, path: &str) -> Self {
    let mut msg = Message::new(Type::Con, method.code(), Id(0), Token::empty());
    let path = path.trim_matches('/');
    if !path.is_empty() {
      msg.set_path(path).ok();
    }

    Self { msg,
           duplicate: false }
  }

  /// Create a GET request
  pub fn get(path: &str) -> Self {
    Self::new(Method::GET, path)
  }

  /// Create a POST request
  pub fn post(path: &str) -> Self {
    Self::new(Method::POST, path)
  }

  /// Create a PUT request
  pub fn put(path: &str) -> Self {
    Self::new(Method::PUT, path)
  }

  /// Create a DELETE request
  pub fn delete(path: &str) -> Self {
    Self::new(Method::DELETE, path)
  }

  /// Make this request non-confirmable
  pub fn non(mut self) -> Self {
    self.msg.ty = Type::Non;
    self
  }

  /// Register interest in the resource (Observe: 0)
  pub fn observe(mut self) -> Self {
    self.msg.set_observe(ObserveAction::Register).ok();
    self
  }

  /// Deregister interest in the resource (Observe: 1)
  ///
  /// The request must carry the token of the relation being canceled.
  pub fn unobserve(mut self, token: Token) -> Self {
    self.msg.set_observe(ObserveAction::Deregister).ok();
    self.msg.token = token;
    self
  }

  /// Set the request payload
  pub fn set_payload<I: IntoIterator<Item = u8>>(&mut self, bytes: I) {
    self.msg.payload = Payload(bytes.into_iter().collect());
  }

  /// Add a Uri-Query option
  pub fn add_query(&mut self, query: &str) {
    self.msg.add_query(query).ok();
  }

  /// Ask for a specific block of the response (Block2)
  pub fn set_block2(&mut self, size: u16, num: u32) {
    self.msg.set_block(known::BLOCK2, Block::new(size, num, false));
  }

  /// Request method
  pub fn method(&self) -> Method {
    Method(self.msg.code)
  }

  /// Uri-Path of the request
  pub fn path(&self) -> String {
    self.msg.uri_path()
  }

  /// Request payload
  pub fn payload(&self) -> &[u8] {
    &self.msg.payload.0
  }

  /// Request payload, interpreted as utf8
  pub fn payload_str(&self) -> Option<&str> {
    core::str::from_utf8(self.payload()).ok()
  }

  /// Is this request registering interest in a resource?
  pub fn is_observe_register(&self) -> bool {
    self.method() == Method::GET && self.msg.observe_seq() == Some(0)
  }

  /// Is this request canceling interest in a resource?
  pub fn is_observe_deregister(&self) -> bool {
    self.method() == Method::GET && self.msg.observe_seq() == Some(1)
  }

  /// Borrow the underlying message
  pub fn msg(&self) -> &Message {
    &self.msg
  }

  /// Mutably borrow the underlying message
  pub fn msg_mut(&mut self) -> &mut Message {
    &mut self.msg
  }

  /// Discard the request wrapper, yielding the message
  pub fn into_msg(self) -> Message {
    self.msg
  }
}

impl From<Message> for Req {
  fn from(msg: Message) -> Self {
    Self { msg,
           duplicate: false }
  }
}

impl AsRef<Message> for Req {
  fn as_ref(&self) -> &Message {
    &self.msg
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::msg::Code;

  #[test]
  fn observe_flags() {
    let req = Req::get("temp").observe();
    assert!(req.is_observe_register());
    assert!(!req.is_observe_deregister());

    let req = Req::get("temp").unobserve(Token::from_slice(&[1]));
    assert!(req.is_observe_deregister());
    assert_eq!(req.msg().token, Token::from_slice(&[1]));
  }

  #[test]
  fn non() {
    assert_eq!(Req::delete("a").non().msg().ty, Type::Non);
  }

  #[test]
  fn methods_use_rfc_codes() {
    assert_eq!(Req::post("a").msg().code, Code::new(0, 2));
    assert_eq!(Req::put("a").msg().code, Code::new(0, 3));
    assert_eq!(Req::put("a").method(), Method::PUT);
  }

  #[test]
  fn path_ignores_surrounding_slashes() {
    assert_eq!(Req::get("/sensors/temp/").path(), "sensors/temp");
    assert!(Req::get("").msg().get(known::PATH).is_none());
  }
}
