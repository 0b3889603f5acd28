use crate::logging::msg_summary;
use crate::msg::Message;
use crate::net::Addrd;

/// Observes every message an endpoint puts on or takes off the wire.
///
/// `sent` is invoked after a message was serialized & handed to the
/// socket; `received` right after a datagram was parsed, before matching.
/// Interceptors may not alter or drop messages.
pub trait MessageInterceptor: core::fmt::Debug {
  /// A message was sent
  fn sent(&mut self, _: &Addrd<Message>) {}

  /// A message was received
  fn received(&mut self, _: &Addrd<Message>) {}
}

/// Logs every message at `debug`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogInterceptor;

impl MessageInterceptor for LogInterceptor {
  fn sent(&mut self, msg: &Addrd<Message>) {
    log::debug!("-> {:?} {}", msg.addr(), msg_summary(msg.data()));
  }

  fn received(&mut self, msg: &Addrd<Message>) {
    log::debug!("<- {:?} {}", msg.addr(), msg_summary(msg.data()));
  }
}
