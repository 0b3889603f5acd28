use crate::msg::{Code, Id, Message, Payload, Token, TokenExt, Type};
use crate::req::Req;

/// Response codes
pub mod code;

/// A CoAP response
///
/// ```
/// use toad_exchange::req::Req;
/// use toad_exchange::resp::{code, Resp};
///
/// let req = Req::get("hello");
/// let mut resp = Resp::for_request(&req, code::CONTENT);
/// resp.set_payload("hi!".bytes());
///
/// // the message layers decide the type & message id
/// assert_eq!(resp.ty(), None);
/// assert_eq!(resp.payload_str(), Some("hi!"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resp {
  msg: Message,
  ty: Option<Type>,
  /// Whether the message layer recognized this as a retransmission
  /// of a response it has already seen
  pub duplicate: bool,
  /// Whether this is the last response of its exchange.
  ///
  /// Notifications & intermediate blocks are not last.
  pub last: bool,
}

impl Resp {
  /// Create a response to a request, copying its token
  pub fn for_request(req: &Req, code: Code) -> Self {
    let mut resp = Self::new(code);
    resp.msg.token = req.msg().token;
    resp
  }

  /// Create a response with just a code
  pub fn new(code: Code) -> Self {
    Self { msg: Message::new(Type::Con, code, Id(0), Token::empty()),
           ty: None,
           duplicate: false,
           last: true }
  }

  /// Response code
  pub fn code(&self) -> Code {
    self.msg.code
  }

  /// Change the response code
  pub fn set_code(&mut self, code: Code) {
    self.msg.code = code;
  }

  /// Is this a 2.xx response?
  pub fn is_success(&self) -> bool {
    self.msg.code.class == 2
  }

  /// The message type, if one was chosen.
  ///
  /// `None` leaves the choice to the Reliability layer, which
  /// piggybacks the response on an ACK when it can.
  pub fn ty(&self) -> Option<Type> {
    self.ty
  }

  /// Choose the message type
  pub fn set_ty(&mut self, ty: Type) {
    self.ty = Some(ty);
    self.msg.ty = ty;
  }

  /// Forget the chosen type & message id, so that the
  /// response is provisioned afresh when sent again
  pub fn unprovision(&mut self) {
    self.ty = None;
    self.msg.id = Id(0);
  }

  /// Set the response payload
  pub fn set_payload<I: IntoIterator<Item = u8>>(&mut self, bytes: I) {
    self.msg.payload = Payload(bytes.into_iter().collect());
  }

  /// Response payload
  pub fn payload(&self) -> &[u8] {
    &self.msg.payload.0
  }

  /// Response payload, interpreted as utf8
  pub fn payload_str(&self) -> Option<&str> {
    core::str::from_utf8(self.payload()).ok()
  }

  /// Response token
  pub fn token(&self) -> Token {
    self.msg.token
  }

  /// Borrow the underlying message
  pub fn msg(&self) -> &Message {
    &self.msg
  }

  /// Mutably borrow the underlying message
  pub fn msg_mut(&mut self) -> &mut Message {
    &mut self.msg
  }

  /// Discard the response wrapper, yielding the message
  pub fn into_msg(self) -> Message {
    self.msg
  }
}

impl From<Message> for Resp {
  fn from(msg: Message) -> Self {
    Self { ty: Some(msg.ty),
           msg,
           duplicate: false,
           last: true }
  }
}

impl AsRef<Message> for Resp {
  fn as_ref(&self) -> &Message {
    &self.msg
  }
}
