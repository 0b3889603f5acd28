use std::collections::HashMap;

use no_std_net::SocketAddr;

use crate::msg::{Block, Code, Id, Token, TokenExt};
use crate::req::Req;
use crate::resp::Resp;
use crate::retry::RetryTimer;
use crate::sched::{Scheduler, TimerHandle};
use crate::time::Millis;

/// Block-wise transfer bookkeeping
pub mod block;

/// Observe relation bookkeeping
pub mod observe;

pub use block::BlockwiseStatus;
pub use observe::{ClientObserve, ObserveRelation};

/// Identifies an [`Exchange`] owned by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(pub u64);

/// Which side of the conversation started an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
  /// We sent the request
  Local,
  /// A peer sent the request
  Remote,
}

/// Why an exchange ended without a (final) response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Failure {
  /// A CON message was retransmitted `MAX_RETRANSMIT` times without
  /// being acknowledged, or a request was acknowledged (or sent NON)
  /// and never answered
  TimedOut,
  /// The peer answered with a Reset
  Rejected,
  /// The exchange was canceled locally, or its observe relation was
  /// canceled along with a sibling relation
  Canceled,
  /// A block-wise transfer could not be completed
  BlockwiseFailed(Code),
}

/// What has happened to the message currently in flight in one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageStatus {
  /// An ACK (or piggybacked response) was sent or received
  pub acknowledged: bool,
  /// A RST was sent or received
  pub rejected: bool,
  /// Retransmissions were exhausted
  pub timed_out: bool,
  /// The message was canceled locally
  pub canceled: bool,
}

/// Timers an exchange may have pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timers {
  /// Retransmission of the current CON message
  pub retransmit: Option<TimerHandle>,
  /// NON or separate-response lifetime (local requests), or expiry
  /// (completed remote exchanges)
  pub lifetime: Option<TimerHandle>,
  /// Abandoned block-wise transfer cleanup
  pub block_cleanup: Option<TimerHandle>,
}

impl Timers {
  /// Cancel every pending timer
  pub fn cancel_all(&mut self, sched: &mut Scheduler) {
    [self.retransmit.take(),
     self.lifetime.take(),
     self.block_cleanup.take()].into_iter()
                               .flatten()
                               .for_each(|h| {
                                 sched.cancel(h);
                               });
  }
}

/// The state of one request and its response(s).
///
/// An exchange is a plain state holder; the layers of an
/// endpoint's stack mutate it as its messages pass through them.
/// All mutation happens on the endpoint that owns the exchange,
/// one message or timer at a time.
#[derive(Debug, Clone)]
pub struct Exchange {
  id: ExchangeId,
  origin: Origin,
  peer: SocketAddr,
  created_at: u64,
  complete: bool,
  completed_at: Option<u64>,

  /// The whole request.
  ///
  /// For remote exchanges receiving a block-wise request body,
  /// this is replaced by the reassembled request once complete.
  pub request: Option<Req>,
  /// The request (or request block) currently in flight
  pub current_request: Option<Req>,
  /// The whole response
  pub response: Option<Resp>,
  /// The response (or response block, or notification) currently in flight
  pub current_response: Option<Resp>,

  /// see [`MessageStatus`]
  pub request_status: MessageStatus,
  /// see [`MessageStatus`]
  pub response_status: MessageStatus,

  /// Block-wise state of the request body
  pub request_block: Option<BlockwiseStatus>,
  /// Block-wise state of the response body
  pub response_block: Option<BlockwiseStatus>,
  /// Block1 option of a completed block-wise request body,
  /// echoed in the final response
  pub block1_to_ack: Option<Block>,

  /// Back-off state of the current CON message
  pub retry: Option<RetryTimer>,
  /// see [`Timers`]
  pub timers: Timers,

  /// Why the exchange failed, if it did
  pub failure: Option<Failure>,

  /// Relation with a remote observer (remote exchanges)
  pub relation: Option<ObserveRelation>,
  /// Notifications seen so far (local exchanges observing a resource)
  pub observing: Option<ClientObserve>,
}

impl Exchange {
  /// Create a new exchange
  pub fn new(id: ExchangeId, origin: Origin, peer: SocketAddr, now: u64) -> Self {
    Self { id,
           origin,
           peer,
           created_at: now,
           complete: false,
           completed_at: None,
           request: None,
           current_request: None,
           response: None,
           current_response: None,
           request_status: Default::default(),
           response_status: Default::default(),
           request_block: None,
           response_block: None,
           block1_to_ack: None,
           retry: None,
           timers: Default::default(),
           failure: None,
           relation: None,
           observing: None }
  }

  /// Create an exchange for a request received from a peer
  pub fn remote(id: ExchangeId, peer: SocketAddr, req: Req, now: u64) -> Self {
    let mut ex = Self::new(id, Origin::Remote, peer, now);
    ex.request = Some(req.clone());
    ex.current_request = Some(req);
    ex
  }

  /// Create an exchange for a request we are sending
  pub fn local(id: ExchangeId, peer: SocketAddr, req: Req, now: u64) -> Self {
    let mut ex = Self::new(id, Origin::Local, peer, now);
    ex.request = Some(req);
    ex
  }

  /// see [`ExchangeId`]
  pub fn id(&self) -> ExchangeId {
    self.id
  }

  /// see [`Origin`]
  pub fn origin(&self) -> Origin {
    self.origin
  }

  /// Is this a [`Origin::Local`] exchange?
  pub fn is_local(&self) -> bool {
    self.origin == Origin::Local
  }

  /// The peer this exchange is with
  pub fn peer(&self) -> SocketAddr {
    self.peer
  }

  /// When the exchange was created (milliseconds since the clock's epoch)
  pub fn created_at(&self) -> u64 {
    self.created_at
  }

  /// Has the exchange completed?
  pub fn is_complete(&self) -> bool {
    self.complete
  }

  /// When the exchange completed
  pub fn completed_at(&self) -> Option<u64> {
    self.completed_at
  }

  /// Number of retransmissions of the current CON message
  pub fn failed_transmission_count(&self) -> u16 {
    self.retry.map(|r| r.attempts().0).unwrap_or(0)
  }

  /// Timeout currently awaited before the next retransmission
  pub fn current_timeout(&self) -> Option<Millis> {
    self.retry.map(|r| r.timeout())
  }

  /// Token of the request in flight, empty until one is assigned
  pub fn token(&self) -> Token {
    self.current_request
        .as_ref()
        .or(self.request.as_ref())
        .map(|r| r.msg().token)
        .unwrap_or_else(Token::empty)
  }

  /// Message id of the request in flight
  pub fn request_id(&self) -> Option<Id> {
    self.current_request.as_ref().map(|r| r.msg().id)
  }

  /// Message id of the response in flight
  pub fn response_id(&self) -> Option<Id> {
    self.current_response.as_ref().map(|r| r.msg().id)
  }

  /// Replace the request in flight, forgetting what happened to the previous one
  pub fn set_current_request(&mut self, req: Req) {
    self.current_request = Some(req);
    self.request_status = Default::default();
  }

  /// Replace the response in flight, forgetting what happened to the previous one
  pub fn set_current_response(&mut self, resp: Resp) {
    self.current_response = Some(resp);
    self.response_status = Default::default();
  }

  /// Stop waiting for the current CON message to be acknowledged
  pub fn stop_retransmission(&mut self, sched: &mut Scheduler) {
    if let Some(h) = self.timers.retransmit.take() {
      sched.cancel(h);
    }
    self.retry = None;
  }

  /// Is a CON message of ours waiting to be acknowledged?
  pub fn is_retransmitting(&self) -> bool {
    self.timers.retransmit.is_some()
  }

  /// Mark the exchange complete, canceling all of its timers.
  ///
  /// This is the single point at which an exchange completes;
  /// returns false if it was already complete.
  pub fn set_complete(&mut self, sched: &mut Scheduler, now: u64) -> bool {
    if self.complete {
      return false;
    }

    self.complete = true;
    self.completed_at = Some(now);
    self.timers.cancel_all(sched);
    self.retry = None;
    true
  }
}

/// The exchanges owned by an endpoint
#[derive(Debug, Default)]
pub struct Exchanges(HashMap<ExchangeId, Exchange>);

impl Exchanges {
  /// Look up an exchange
  pub fn get(&self, id: ExchangeId) -> Option<&Exchange> {
    self.0.get(&id)
  }

  /// Look up an exchange for mutation
  pub fn get_mut(&mut self, id: ExchangeId) -> Option<&mut Exchange> {
    self.0.get_mut(&id)
  }

  /// Take ownership of an exchange
  pub fn insert(&mut self, ex: Exchange) {
    self.0.insert(ex.id(), ex);
  }

  /// Forget an exchange
  pub fn remove(&mut self, id: ExchangeId) -> Option<Exchange> {
    self.0.remove(&id)
  }

  /// Number of exchanges
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Are there no exchanges?
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Iterate over all exchanges
  pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
    self.0.values()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::sched::{Task, TimerKind};
  use crate::test::addr;

  #[test]
  fn completion_cancels_timers_once() {
    let mut sched = Scheduler::default();
    let mut ex = Exchange::local(ExchangeId(1), addr(1), Req::get("a"), 0);
    ex.timers.retransmit = Some(sched.schedule(10, Task::for_exchange(ex.id(), TimerKind::Retransmit)));
    ex.timers.lifetime = Some(sched.schedule(20, Task::for_exchange(ex.id(), TimerKind::NonLifetime)));

    assert!(ex.set_complete(&mut sched, 5));
    assert!(sched.is_empty());
    assert_eq!(ex.timers, Timers::default());
    assert_eq!(ex.completed_at(), Some(5));
    assert!(!ex.set_complete(&mut sched, 6));
    assert_eq!(ex.completed_at(), Some(5));
  }

  #[test]
  fn new_current_request_resets_status() {
    let mut ex = Exchange::remote(ExchangeId(1), addr(1), Req::get("a"), 0);
    ex.request_status.acknowledged = true;
    ex.set_current_request(Req::get("a"));
    assert_eq!(ex.request_status, MessageStatus::default());
    assert_eq!(ex.origin(), Origin::Remote);
  }
}
