use std::collections::VecDeque;

use rand_chacha::ChaCha8Rng;

use crate::config::Config;
use crate::exchange::{Exchange, ExchangeId, Failure};
use crate::matcher::Matcher;
use crate::msg::{Message, MessageExt};
use crate::net::Addrd;
use crate::req::Req;
use crate::resp::Resp;
use crate::sched::{Scheduler, Task, TimerHandle, TimerKind};

/// Assigning tokens to requests & copying them onto responses
pub mod token;

/// Observe relations, both as observer & as the observed
pub mod observe;

/// Block-wise transfer of large bodies
pub mod block;

/// Acknowledgements, retransmission & duplicate replies
pub mod reliability;

pub use block::Blockwise;
pub use observe::Observe;
pub use reliability::Reliability;
pub use token::Tokens;

/// A message passing through the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
  /// A request
  Req(Req),
  /// A response
  Resp(Resp),
  /// An ACK or RST (or a CON ping)
  Empty(Message),
}

/// Whether a message should continue through the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow<T> {
  /// Pass the (possibly transformed) message to the next layer
  Next(T),
  /// The layer consumed the message
  Stop,
}

impl<T> Flow<T> {
  /// Transform the message carried by [`Flow::Next`]
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Flow<R> {
    match self {
      | Flow::Next(t) => Flow::Next(f(t)),
      | Flow::Stop => Flow::Stop,
    }
  }
}

/// IO & bookkeeping that should happen once the stack has
/// finished processing a message or timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
  /// Serialize & send a message
  Send(ExchangeId, Addrd<Message>),
  /// Hand a message to the application
  Deliver(ExchangeId, Addrd<Msg>),
  /// Tell the application an exchange failed
  Failed(ExchangeId, Failure),
  /// An exchange has just completed
  Complete(ExchangeId),
}

/// Work queued for the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Work {
  /// Send a message down through the layers starting at index `from`
  Down {
    /// Index of the first layer to run
    from: usize,
    /// The exchange the message belongs to
    ex: ExchangeId,
    /// The message
    msg: Msg,
  },
  /// Pass a received message up through the layers below index `below`
  Up {
    /// Layers with a lower index than this will be run
    below: usize,
    /// The exchange the message belongs to
    ex: ExchangeId,
    /// The message
    msg: Msg,
  },
  /// A timer for an exchange fired
  Timer {
    /// The exchange
    ex: ExchangeId,
    /// The timer
    kind: TimerKind,
  },
  /// An exchange failed & should be completed
  Failed {
    /// The exchange
    ex: ExchangeId,
    /// Why
    failure: Failure,
  },
}

/// Everything a layer may use or affect while it handles a message.
///
/// Layers never perform IO; they queue [`Work`] for other
/// layers and [`Effect`]s for the endpoint.
#[derive(Debug)]
pub struct Cx<'a> {
  /// Milliseconds since the clock's epoch
  pub now: u64,
  /// Runtime config
  pub config: &'a Config,
  /// Seeded randomness
  pub rng: &'a mut ChaCha8Rng,
  /// Timers
  pub sched: &'a mut Scheduler,
  pub(crate) matcher: &'a Matcher,
  pub(crate) ix: usize,
  pub(crate) work: &'a mut VecDeque<Work>,
  pub(crate) effects: &'a mut Vec<Effect>,
}

impl<'a> Cx<'a> {
  /// Send a request through the layers below the current one
  pub fn send_request_down(&mut self, ex: ExchangeId, req: Req) {
    self.work.push_back(Work::Down { from: self.ix + 1,
                                     ex,
                                     msg: Msg::Req(req) });
  }

  /// Send a response through the layers below the current one
  pub fn send_response_down(&mut self, ex: ExchangeId, resp: Resp) {
    self.work.push_back(Work::Down { from: self.ix + 1,
                                     ex,
                                     msg: Msg::Resp(resp) });
  }

  /// Send an empty message through the layers below the current one
  pub fn send_empty_down(&mut self, ex: ExchangeId, msg: Message) {
    self.work.push_back(Work::Down { from: self.ix + 1,
                                     ex,
                                     msg: Msg::Empty(msg) });
  }

  /// Pass a message up through the layers above the current one
  pub fn deliver_up(&mut self, ex: ExchangeId, msg: Msg) {
    self.work.push_back(Work::Up { below: self.ix,
                                   ex,
                                   msg });
  }

  /// Fail an exchange
  pub fn fail(&mut self, ex: ExchangeId, failure: Failure) {
    self.work.push_back(Work::Failed { ex, failure });
  }

  /// Complete an exchange, if it is not already complete
  pub fn complete(&mut self, ex: &mut Exchange) {
    if ex.set_complete(self.sched, self.now) {
      log::trace!("{:?} complete", ex.id());
      self.effects.push(Effect::Complete(ex.id()));
    }
  }

  /// Schedule a timer for an exchange `after` milliseconds from now,
  /// replacing (and canceling) the timer in `slot`
  pub fn schedule(&mut self,
                  slot: &mut Option<TimerHandle>,
                  ex: ExchangeId,
                  kind: TimerKind,
                  after: u64) {
    self.cancel(slot);
    *slot = Some(self.sched
                     .schedule(self.now.saturating_add(after), Task::for_exchange(ex, kind)));
  }

  /// Cancel the timer in `slot`
  pub fn cancel(&mut self, slot: &mut Option<TimerHandle>) {
    if let Some(h) = slot.take() {
      self.sched.cancel(h);
    }
  }

  /// Put a message on the wire.
  ///
  /// Message ids are provisioned and the message is indexed by the
  /// matcher; the provisioned message is remembered as the exchange's
  /// current request or response so that retransmissions & duplicate
  /// replies send identical bytes.
  pub fn transmit(&mut self, ex: &mut Exchange, msg: Msg) {
    let msg = match msg {
      | Msg::Req(mut req) => {
        self.matcher.send_request(ex, &mut req);
        ex.current_request = Some(req.clone());
        req.into_msg()
      },
      | Msg::Resp(mut resp) => {
        self.matcher.send_response(ex, &mut resp);
        ex.current_response = Some(resp.clone());

        let done = !ex.is_local() && resp.last && !resp.msg().is(crate::msg::Type::Con);
        let msg = resp.into_msg();
        if done {
          self.complete(ex);
        }
        msg
      },
      | Msg::Empty(mut msg) => {
        self.matcher.send_empty(ex, &mut msg);
        msg
      },
    };

    self.effects.push(Effect::Send(ex.id(), Addrd(msg, ex.peer())));
  }
}

/// One layer of the protocol stack.
///
/// Outgoing messages pass through the layers top to bottom,
/// incoming messages bottom to top. Every operation defaults to
/// passing the message along unchanged.
pub trait Layer: core::fmt::Debug {
  /// An outgoing request
  fn send_request(&mut self, _: &mut Cx, _: &mut Exchange, req: Req) -> Flow<Req> {
    Flow::Next(req)
  }

  /// An outgoing response
  fn send_response(&mut self, _: &mut Cx, _: &mut Exchange, resp: Resp) -> Flow<Resp> {
    Flow::Next(resp)
  }

  /// An outgoing empty message
  fn send_empty(&mut self, _: &mut Cx, _: &mut Exchange, msg: Message) -> Flow<Message> {
    Flow::Next(msg)
  }

  /// An incoming request
  fn receive_request(&mut self, _: &mut Cx, _: &mut Exchange, req: Req) -> Flow<Req> {
    Flow::Next(req)
  }

  /// An incoming response
  fn receive_response(&mut self, _: &mut Cx, _: &mut Exchange, resp: Resp) -> Flow<Resp> {
    Flow::Next(resp)
  }

  /// An incoming empty message
  fn receive_empty(&mut self, _: &mut Cx, _: &mut Exchange, msg: Message) -> Flow<Message> {
    Flow::Next(msg)
  }

  /// A timer for an exchange fired
  fn on_timer(&mut self, _: &mut Cx, _: &mut Exchange, _: TimerKind) {}

  /// An exchange is about to complete because it failed
  fn on_failure(&mut self, _: &mut Cx, _: &mut Exchange, _: Failure) {}

  /// An exchange has completed
  fn completed(&mut self, _: &Exchange) {}
}
