use crate::msg::Code;

/// Request method
///
/// Carries the RFC 7252 method codes; `toad_msg::Code` has
/// the codes of POST & PUT the wrong way around.
///
/// ```
/// use toad_exchange::msg::Code;
/// use toad_exchange::req::Method;
///
/// assert_eq!(Method::POST.code(), Code::new(0, 2));
/// assert_eq!(Method::PUT.to_string(), "PUT");
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Hash)]
pub struct Method(pub(crate) Code);

macro_rules! method {
  ($(#[$meta:meta])* $name:ident = $class:literal * $detail:literal) => {
    $(#[$meta])*
    pub const $name: Method = Method(Code::new($class, $detail));
  };
}

impl Method {
  method!(
    /// [GET](https://datatracker.ietf.org/doc/html/rfc7252#section-5.8.1)
    GET = 0 * 01
  );
  method!(
    /// [POST](https://datatracker.ietf.org/doc/html/rfc7252#section-5.8.2)
    POST = 0 * 02
  );
  method!(
    /// [PUT](https://datatracker.ietf.org/doc/html/rfc7252#section-5.8.3)
    PUT = 0 * 03
  );
  method!(
    /// [DELETE](https://datatracker.ietf.org/doc/html/rfc7252#section-5.8.4)
    DELETE = 0 * 04
  );

  /// The message code of this method
  pub fn code(&self) -> Code {
    self.0
  }
}

impl From<Code> for Method {
  fn from(code: Code) -> Self {
    Self(code)
  }
}

impl core::fmt::Display for Method {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match *self {
      | Method::GET => write!(f, "GET"),
      | Method::POST => write!(f, "POST"),
      | Method::PUT => write!(f, "PUT"),
      | Method::DELETE => write!(f, "DELETE"),
      | Method(c) => write!(f, "{}", c.to_string()),
    }
  }
}
