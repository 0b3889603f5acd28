pub use crate::msg::Code;

macro_rules! code {
  ($(#[$meta:meta])* $name:ident = $class:literal * $detail:literal) => {
    $(#[$meta])*
    pub const $name: Code = Code::new($class, $detail);
  };
}

// 2.xx
code!(
  /// [2.01 Created](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.1.1)
  CREATED = 2 * 01
);
code!(
  /// [2.02 Deleted](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.1.2)
  DELETED = 2 * 02
);
code!(
  /// [2.03 Valid](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.1.3)
  VALID = 2 * 03
);
code!(
  /// [2.04 Changed](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.1.4)
  CHANGED = 2 * 04
);
code!(
  /// [2.05 Content](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.1.5)
  CONTENT = 2 * 05
);
code!(
  /// ## [2.31 Continue](https://www.rfc-editor.org/rfc/rfc7959#section-2.9.1)
  /// This success status code indicates that the transfer of this
  /// block of the request body was successful and that the server
  /// encourages sending further blocks, but that a final outcome of the
  /// whole block-wise request cannot yet be determined.  No payload is
  /// returned with this response code.
  CONTINUE = 2 * 31
);

// 4.xx
code!(
  /// [4.00 Bad Request](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.2.1)
  BAD_REQUEST = 4 * 00
);
code!(
  /// [4.01 Unauthorized](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.2.2)
  UNAUTHORIZED = 4 * 01
);
code!(
  /// [4.02 Bad Option](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.2.3)
  BAD_OPTION = 4 * 02
);
code!(
  /// [4.03 Forbidden](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.2.4)
  FORBIDDEN = 4 * 03
);
code!(
  /// [4.04 Not Found](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.2.5)
  NOT_FOUND = 4 * 04
);
code!(
  /// [4.05 Method Not Allowed](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.2.6)
  METHOD_NOT_ALLOWED = 4 * 05
);
code!(
  /// [4.06 Not Acceptable](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.2.7)
  NOT_ACCEPTABLE = 4 * 06
);
code!(
  /// ## [4.08 Request Entity Incomplete](https://www.rfc-editor.org/rfc/rfc7959#section-2.9.2)
  /// This client error status code indicates that the server has not
  /// received the blocks of the request body that it needs to proceed.
  /// The client has not sent all blocks, not sent them in the order
  /// required by the server, or has sent them long enough ago that the
  /// server has already discarded them.
  REQUEST_ENTITY_INCOMPLETE = 4 * 08
);
code!(
  /// [4.12 Precondition Failed](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.2.8)
  PRECONDITION_FAILED = 4 * 12
);
code!(
  /// ## [4.13 Request Entity Too Large](https://www.rfc-editor.org/rfc/rfc7959#section-2.9.3)
  /// The server is unable or unwilling to accept a body of this size.
  /// A Size1 option may indicate the maximum size the server accepts.
  REQUEST_ENTITY_TOO_LARGE = 4 * 13
);
code!(
  /// [4.15 Unsupported Content-Format](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.2.10)
  UNSUPPORTED_CONTENT_FORMAT = 4 * 15
);

// 5.xx
code!(
  /// [5.00 Internal Server Error](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.3.1)
  INTERNAL_SERVER_ERROR = 5 * 00
);
code!(
  /// [5.01 Not Implemented](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.3.2)
  NOT_IMPLEMENTED = 5 * 01
);
code!(
  /// [5.02 Bad Gateway](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.3.3)
  BAD_GATEWAY = 5 * 02
);
code!(
  /// [5.03 Service Unavailable](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.3.4)
  SERVICE_UNAVAILABLE = 5 * 03
);
code!(
  /// [5.04 Gateway Timeout](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.3.5)
  GATEWAY_TIMEOUT = 5 * 04
);
code!(
  /// [5.05 Proxying Not Supported](https://datatracker.ietf.org/doc/html/rfc7252#section-5.9.3.6)
  PROXYING_NOT_SUPPORTED = 5 * 05
);
