use crate::exchange::ExchangeId;
use crate::msg::MessageToBytesError;

/// Errors that may be encountered while driving an [`Endpoint`](crate::endpoint::Endpoint)
///
/// `E` is the error type of the endpoint's [`Socket`](crate::net::Socket).
#[derive(Debug)]
pub enum Error<E> {
  /// The socket failed to send or receive
  Socket(E),
  /// A message could not be serialized
  ToBytes(MessageToBytesError),
  /// The clock could not be read
  Clock(embedded_time::clock::Error),
  /// No exchange with this id is owned by the endpoint
  UnknownExchange(ExchangeId),
  /// The endpoint has been stopped
  NotRunning,
}

impl<E> From<MessageToBytesError> for Error<E> {
  fn from(e: MessageToBytesError) -> Self {
    Self::ToBytes(e)
  }
}

impl<E> From<embedded_time::clock::Error> for Error<E> {
  fn from(e: embedded_time::clock::Error) -> Self {
    Self::Clock(e)
  }
}

impl<E> Error<E> {
  /// Wrap a socket error
  pub fn socket(e: E) -> Self {
    Self::Socket(e)
  }

  /// Is this [`Error::UnknownExchange`]?
  pub fn is_unknown_exchange(&self) -> bool {
    matches!(self, Self::UnknownExchange(_))
  }
}
