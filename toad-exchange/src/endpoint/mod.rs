use std::collections::VecDeque;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::Config;
use crate::error::Error;
use crate::exchange::{Exchange, ExchangeId, Exchanges, Failure};
use crate::interceptor::MessageInterceptor;
use crate::layer::{Effect, Msg, Work};
use crate::logging::msg_summary;
use crate::matcher::{dedup, Matcher, RequestMatch, ResponseMatch};
use crate::msg::{self, Code, CodeKind, Message, MessageExt, TryFromBytes, Type};
use crate::net::{Addrd, Socket};
use crate::req::Req;
use crate::resp::Resp;
use crate::sched::{Scheduler, Task, TimerHandle, TimerKind};
use crate::stack::{Env, Stack};
use crate::time::{self, Clock};

#[cfg(test)]
mod test;

/// Receives what an endpoint's exchanges produce for the application
pub trait Deliverer: core::fmt::Debug {
  /// A request was received (for block-wise uploads, once the whole body has arrived)
  fn deliver_request(&mut self, ex: ExchangeId, req: &Addrd<Req>);

  /// A response (or notification) to one of our requests was received
  fn deliver_response(&mut self, ex: ExchangeId, resp: &Addrd<Resp>);

  /// An exchange failed
  fn exchange_failed(&mut self, ex: ExchangeId, failure: Failure);
}

/// Something that happened on an endpoint, see [`Inbox`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// see [`Deliverer::deliver_request`]
  Request(ExchangeId, Addrd<Req>),
  /// see [`Deliverer::deliver_response`]
  Response(ExchangeId, Addrd<Resp>),
  /// see [`Deliverer::exchange_failed`]
  Failed(ExchangeId, Failure),
}

/// [`Deliverer`] that queues [`Event`]s for the application to pull
/// with [`Endpoint::next_event`]
#[derive(Debug, Default)]
pub struct Inbox {
  events: VecDeque<Event>,
}

impl Inbox {
  /// Pop the oldest event
  pub fn pop(&mut self) -> Option<Event> {
    self.events.pop_front()
  }

  /// Number of events waiting
  pub fn len(&self) -> usize {
    self.events.len()
  }

  /// Are no events waiting?
  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }
}

impl Deliverer for Inbox {
  fn deliver_request(&mut self, ex: ExchangeId, req: &Addrd<Req>) {
    self.events.push_back(Event::Request(ex, req.clone()));
  }

  fn deliver_response(&mut self, ex: ExchangeId, resp: &Addrd<Resp>) {
    self.events.push_back(Event::Response(ex, resp.clone()));
  }

  fn exchange_failed(&mut self, ex: ExchangeId, failure: Failure) {
    self.events.push_back(Event::Failed(ex, failure));
  }
}

/// A CoAP endpoint: one socket, the exchanges happening over it,
/// and the [`Stack`] of layers every message passes through.
///
/// The endpoint never blocks & never spawns. [`Endpoint::poll`] must be invoked
/// regularly (at least by [`Endpoint::next_deadline`]) to receive datagrams
/// and fire timers.
///
/// ```
/// use toad_exchange::config::Config;
/// use toad_exchange::endpoint::{Endpoint, Event};
/// use toad_exchange::net::{Addrd, Socket};
/// use toad_exchange::req::Req;
/// use toad_exchange::resp::code;
/// use toad_exchange::std::Clock;
///
/// let bind = |addr: &str| toad_exchange::std::net::bind(addr).unwrap();
/// let mut server = Endpoint::new(bind("127.0.0.1:0"), Clock::new(), Config::default());
/// let mut client = Endpoint::new(bind("127.0.0.1:0"), Clock::new(), Config::default());
/// server.start().unwrap();
/// client.start().unwrap();
///
/// let server_addr = Socket::local_addr(server.socket());
/// let sent = client.send_request(Addrd(Req::get("hello"), server_addr)).unwrap();
///
/// let answered = loop {
///   server.poll().unwrap();
///   if let Some(Event::Request(ex, _)) = server.next_event() {
///     server.respond(ex, code::CONTENT, "hi!".bytes()).unwrap();
///   }
///
///   client.poll().unwrap();
///   if let Some(Event::Response(ex, resp)) = client.next_event() {
///     break (ex, resp.unwrap());
///   }
/// };
///
/// assert_eq!(answered.0, sent);
/// assert_eq!(answered.1.payload_str(), Some("hi!"));
/// ```
#[derive(Debug)]
pub struct Endpoint<S: Socket, C: Clock, D: Deliverer = Inbox> {
  sock: S,
  clock: C,
  config: Config,
  rng: ChaCha8Rng,
  sched: Scheduler,
  matcher: Matcher,
  exchanges: Exchanges,
  stack: Stack,
  deliverer: D,
  interceptors: Vec<Box<dyn MessageInterceptor>>,
  sweep: Option<TimerHandle>,
  running: bool,
}

impl<S: Socket, C: Clock> Endpoint<S, C, Inbox> {
  /// Create an endpoint that queues what it receives in an [`Inbox`]
  pub fn new(sock: S, clock: C, config: Config) -> Self {
    Self::with_deliverer(sock, clock, config, Inbox::default())
  }

  /// Pop the oldest [`Event`]
  pub fn next_event(&mut self) -> Option<Event> {
    self.deliverer.pop()
  }
}

impl<S: Socket, C: Clock, D: Deliverer> Endpoint<S, C, D> {
  /// Create an endpoint with the default [`Stack`] and a custom [`Deliverer`]
  pub fn with_deliverer(sock: S, clock: C, config: Config, deliverer: D) -> Self {
    Self::with_stack(sock, clock, config, deliverer, Stack::default())
  }

  /// Create an endpoint with a custom [`Stack`] and [`Deliverer`]
  pub fn with_stack(sock: S, clock: C, config: Config, deliverer: D, stack: Stack) -> Self {
    let now = time::now(&clock).unwrap_or(0);
    let mut rng = ChaCha8Rng::seed_from_u64(((config.msg.token_seed as u64) << 48) ^ now);
    let matcher = Matcher::new(&config, &mut rng);

    Self { sock,
           clock,
           config,
           rng,
           sched: Scheduler::default(),
           matcher,
           exchanges: Exchanges::default(),
           stack,
           deliverer,
           interceptors: vec![],
           sweep: None,
           running: false }
  }

  /// Start receiving messages & schedule deduplicator maintenance
  pub fn start(&mut self) -> Result<(), Error<S::Error>> {
    if self.running {
      return Ok(());
    }

    let now = time::now(&self.clock)?;
    self.running = true;
    self.schedule_sweep(now);
    log::info!("endpoint at {:?} started", self.sock.local_addr());
    Ok(())
  }

  /// Stop receiving messages.
  ///
  /// Exchanges & timers are left untouched; outstanding CON messages
  /// continue to be retransmitted whenever the endpoint is polled.
  pub fn stop(&mut self) {
    self.running = false;
    log::info!("endpoint at {:?} stopped", self.sock.local_addr());
  }

  /// Drop every exchange & give back the socket
  pub fn destroy(self) -> S {
    self.matcher.clear();
    log::info!("endpoint at {:?} destroyed with {} exchanges",
               self.sock.local_addr(),
               self.exchanges.len());
    self.sock
  }

  /// Is the endpoint receiving messages?
  pub fn is_running(&self) -> bool {
    self.running
  }

  /// see [`Config`]
  pub fn config(&self) -> &Config {
    &self.config
  }

  /// The endpoint's socket
  pub fn socket(&self) -> &S {
    &self.sock
  }

  /// The endpoint's clock
  pub fn clock(&self) -> &C {
    &self.clock
  }

  /// see [`Deliverer`]
  pub fn deliverer(&self) -> &D {
    &self.deliverer
  }

  /// see [`Deliverer`]
  pub fn deliverer_mut(&mut self) -> &mut D {
    &mut self.deliverer
  }

  /// see [`Matcher`]
  pub fn matcher(&self) -> &Matcher {
    &self.matcher
  }

  /// Look up an exchange owned by this endpoint
  pub fn exchange(&self, id: ExchangeId) -> Option<&Exchange> {
    self.exchanges.get(id)
  }

  /// Every exchange owned by this endpoint
  pub fn exchanges(&self) -> &Exchanges {
    &self.exchanges
  }

  /// Observe every message sent & received
  pub fn add_interceptor(&mut self, interceptor: Box<dyn MessageInterceptor>) {
    self.interceptors.push(interceptor);
  }

  /// When the next timer is due (milliseconds since the clock's epoch)
  pub fn next_deadline(&self) -> Option<u64> {
    self.sched.next_deadline()
  }

  /// Send a request, creating a new exchange
  pub fn send_request(&mut self, req: Addrd<Req>) -> Result<ExchangeId, Error<S::Error>> {
    if !self.running {
      return Err(Error::NotRunning);
    }

    let now = time::now(&self.clock)?;
    let id = self.matcher.next_exchange_id();
    let Addrd(req, peer) = req;

    log::trace!("{:?} sending {} {} to {:?}",
                id,
                req.method(),
                req.path(),
                peer);
    self.exchanges.insert(Exchange::local(id, peer, req.clone(), now));
    self.run(now,
             vec![Work::Down { from: 0,
                               ex: id,
                               msg: Msg::Req(req) }])?;
    Ok(id)
  }

  /// Send a response (or notification) on a remote exchange,
  /// to the peer that sent its request
  pub fn send_response(&mut self, id: ExchangeId, resp: Resp) -> Result<(), Error<S::Error>> {
    self.known(id)?;
    let now = time::now(&self.clock)?;
    self.run(now,
             vec![Work::Down { from: 0,
                               ex: id,
                               msg: Msg::Resp(resp) }])
  }

  /// Respond to the request of a remote exchange with a code & payload
  pub fn respond<P>(&mut self, id: ExchangeId, code: Code, payload: P) -> Result<(), Error<S::Error>>
    where P: IntoIterator<Item = u8>
  {
    let req = self.known(id)?
                  .request
                  .clone()
                  .ok_or(Error::UnknownExchange(id))?;

    let mut resp = Resp::for_request(&req, code);
    resp.set_payload(payload);
    self.send_response(id, resp)
  }

  /// Send an empty message (ACK or RST) on an exchange
  pub fn send_empty_message(&mut self, id: ExchangeId, msg: Message) -> Result<(), Error<S::Error>> {
    self.known(id)?;
    let now = time::now(&self.clock)?;
    self.run(now,
             vec![Work::Down { from: 0,
                               ex: id,
                               msg: Msg::Empty(msg) }])
  }

  /// Acknowledge the CON request of a remote exchange now, so that its
  /// response will be sent separately.
  ///
  /// Does nothing when the request was already acknowledged or is not CON.
  pub fn accept(&mut self, id: ExchangeId) -> Result<(), Error<S::Error>> {
    let ex = self.known(id)?;
    let con = ex.current_request
                .as_ref()
                .map(|r| r.msg().is(Type::Con))
                .unwrap_or(false);
    let pending = con && !ex.is_local() && !ex.request_status.acknowledged;

    match ex.request_id() {
      | Some(mid) if pending => self.send_empty_message(id, Message::empty(Type::Ack, mid)),
      | _ => Ok(()),
    }
  }

  /// Reject the request of a remote exchange with a Reset
  pub fn reject(&mut self, id: ExchangeId) -> Result<(), Error<S::Error>> {
    let ex = self.known(id)?;
    let remote = !ex.is_local();

    match ex.request_id() {
      | Some(mid) if remote => self.send_empty_message(id, Message::empty(Type::Reset, mid)),
      | _ => Ok(()),
    }
  }

  /// Cancel an exchange: its timers stop, it is removed from the matcher
  /// and [`Failure::Canceled`] is reported to the [`Deliverer`].
  ///
  /// Canceling an exchange that is observing a resource ends the observation;
  /// further notifications will be answered with a Reset.
  pub fn cancel(&mut self, id: ExchangeId) -> Result<(), Error<S::Error>> {
    self.known(id)?;
    let now = time::now(&self.clock)?;
    self.run(now,
             vec![Work::Failed { ex: id,
                                 failure: Failure::Canceled }])
  }

  /// Receive at most one datagram (without blocking) & fire every due timer
  pub fn poll(&mut self) -> Result<(), Error<S::Error>> {
    let now = time::now(&self.clock)?;

    if self.running {
      let dgram = self.sock
                      .poll(self.config.msg.max_message_size + 128)
                      .map_err(Error::Socket)?;

      if let Some(dgram) = dgram {
        self.received(now, dgram)?;
      }
    }

    self.fire_timers(now)
  }

  fn known(&self, id: ExchangeId) -> Result<&Exchange, Error<S::Error>> {
    self.exchanges.get(id).ok_or(Error::UnknownExchange(id))
  }

  fn schedule_sweep(&mut self, now: u64) {
    if let Some(every) = dedup::sweep_interval(&self.config.dedup) {
      self.sweep = Some(self.sched
                            .schedule(now + every.0, Task::endpoint(TimerKind::Sweep)));
    }
  }

  fn fire_timers(&mut self, now: u64) -> Result<(), Error<S::Error>> {
    while let Some(task) = self.sched.pop_due(now) {
      match (task.kind, task.exchange) {
        | (TimerKind::Sweep, _) => {
          self.matcher.sweep(now);
          log::trace!("swept deduplicator, {} message ids remain",
                      self.matcher.dedup_len());
          self.schedule_sweep(now);
        },
        | (TimerKind::Expire, Some(id)) => {
          self.matcher.exchange_completed(id);
          if self.exchanges.remove(id).is_some() {
            log::trace!("{:?} expired", id);
          }
        },
        | (kind, Some(id)) => self.run(now, vec![Work::Timer { ex: id, kind }])?,
        | (kind, None) => log::warn!("{:?} timer fired for no exchange", kind),
      }
    }

    Ok(())
  }

  fn received(&mut self, now: u64, dgram: Addrd<Vec<u8>>) -> Result<(), Error<S::Error>> {
    let Addrd(bytes, peer) = dgram;

    let msg = match Message::try_from_bytes(bytes.as_slice()) {
      | Ok(msg) => Addrd(msg, peer),
      | Err(e) => {
        log::warn!("malformed message from {:?}: {:?}", peer, e);
        return match msg::peek_id(&bytes) {
          | Some(mid) => self.send_msg(Addrd(Message::empty(Type::Reset, mid), peer)),
          | None => Ok(()),
        };
      },
    };

    self.interceptors.iter_mut().for_each(|i| i.received(&msg));

    let work = match msg.data().code.kind() {
      | CodeKind::Empty => self.empty_received(msg)?,
      | CodeKind::Request => self.request_received(now, msg.map(Req::from))?,
      | CodeKind::Response => self.response_received(now, msg.map(Resp::from))?,
    };

    match work {
      | Some(work) => self.run(now, vec![work]),
      | None => Ok(()),
    }
  }

  fn up(&self, ex: ExchangeId, msg: Msg) -> Option<Work> {
    Some(Work::Up { below: self.stack.len(),
                    ex,
                    msg })
  }

  fn empty_received(&mut self, msg: Addrd<Message>) -> Result<Option<Work>, Error<S::Error>> {
    match msg.data().ty {
      | Type::Con => {
        log::debug!("answering ping {:?} from {:?}", msg.data().id, msg.addr());
        let rst = Message::empty(Type::Reset, msg.data().id);
        self.send_msg(Addrd(rst, msg.addr()))?;
        Ok(None)
      },
      | Type::Non => {
        log::warn!("ignoring empty NON message from {:?}", msg.addr());
        Ok(None)
      },
      | Type::Ack | Type::Reset => {
        Ok(self.matcher
               .receive_empty(&msg)
               .and_then(|ex| self.up(ex, Msg::Empty(msg.unwrap()))))
      },
    }
  }

  fn request_received(&mut self, now: u64, req: Addrd<Req>) -> Result<Option<Work>, Error<S::Error>> {
    let peer = req.addr();

    match self.matcher.receive_request(&req, now) {
      | RequestMatch::New(id) => {
        log::trace!("{:?} new exchange for {} from {:?}",
                    id,
                    req.data().path(),
                    peer);
        self.exchanges
            .insert(Exchange::remote(id, peer, req.data().clone(), now));
        Ok(self.up(id, Msg::Req(req.unwrap())))
      },
      | RequestMatch::Continue(id) if self.exchanges.get(id).is_some() => {
        Ok(self.up(id, Msg::Req(req.unwrap())))
      },
      | RequestMatch::Continue(id) => {
        log::warn!("{:?} block-wise exchange is gone, dropping {}",
                   id,
                   msg_summary(req.data().msg()));
        Ok(None)
      },
      | RequestMatch::Duplicate(id) if self.exchanges.get(id).is_some() => {
        let mut req = req.unwrap();
        req.duplicate = true;
        Ok(self.up(id, Msg::Req(req)))
      },
      | RequestMatch::Duplicate(id) => {
        log::debug!("{:?} duplicate of a forgotten request", id);
        self.ack_orphan(req.map(Req::into_msg))?;
        Ok(None)
      },
    }
  }

  fn response_received(&mut self, now: u64, resp: Addrd<Resp>) -> Result<Option<Work>, Error<S::Error>> {
    match self.matcher.receive_response(&resp, &self.exchanges, now) {
      | ResponseMatch::Matched(id) => Ok(self.up(id, Msg::Resp(resp.unwrap()))),
      | ResponseMatch::Duplicate(id) if self.exchanges.get(id).is_some() => {
        let mut resp = resp.unwrap();
        resp.duplicate = true;
        Ok(self.up(id, Msg::Resp(resp)))
      },
      | ResponseMatch::Duplicate(_) => {
        self.ack_orphan(resp.map(Resp::into_msg))?;
        Ok(None)
      },
      | ResponseMatch::Reject => {
        let rst = Message::empty(Type::Reset, resp.data().msg().id);
        self.send_msg(Addrd(rst, resp.addr()))?;
        Ok(None)
      },
      | ResponseMatch::Ignore => Ok(None),
    }
  }

  /// A CON duplicate whose exchange was already forgotten still needs an ACK
  fn ack_orphan(&mut self, msg: Addrd<Message>) -> Result<(), Error<S::Error>> {
    if msg.data().is(Type::Con) {
      let ack = Message::empty(Type::Ack, msg.data().id);
      self.send_msg(Addrd(ack, msg.addr()))
    } else {
      Ok(())
    }
  }

  fn run(&mut self, now: u64, work: Vec<Work>) -> Result<(), Error<S::Error>> {
    let effects = {
      let mut env = Env { now,
                          config: &self.config,
                          rng: &mut self.rng,
                          sched: &mut self.sched,
                          matcher: &self.matcher };
      self.stack.run(&mut self.exchanges, &mut env, work)
    };

    self.settle(now, effects)
  }

  /// Perform the effects of running the stack, in order.
  ///
  /// Every effect is performed even if one fails; the first error is returned.
  fn settle(&mut self, now: u64, effects: Vec<Effect>) -> Result<(), Error<S::Error>> {
    let mut result = Ok(());

    for effect in effects {
      let outcome = match effect {
        | Effect::Send(_, msg) => self.send_msg(msg),
        | Effect::Deliver(id, Addrd(msg, peer)) => {
          match msg {
            | Msg::Req(req) => self.deliverer.deliver_request(id, &Addrd(req, peer)),
            | Msg::Resp(resp) => self.deliverer.deliver_response(id, &Addrd(resp, peer)),
            | Msg::Empty(_) => (),
          }
          Ok(())
        },
        | Effect::Failed(id, failure) => {
          self.deliverer.exchange_failed(id, failure);
          Ok(())
        },
        | Effect::Complete(id) => {
          self.completed(now, id);
          Ok(())
        },
      };

      if result.is_ok() {
        result = outcome;
      }
    }

    result
  }

  fn completed(&mut self, now: u64, id: ExchangeId) {
    self.matcher.exchange_completed(id);

    let local = match self.exchanges.get(id) {
      | Some(ex) => {
        self.stack.completed(ex);
        ex.is_local()
      },
      | None => return,
    };

    if local {
      self.exchanges.remove(id);
    } else if let Some(ex) = self.exchanges.get_mut(id) {
      // keep answering duplicates from cache until the peer stops retransmitting
      let expire = self.sched.schedule(now + self.config.msg.exchange_lifetime.0,
                                       Task::for_exchange(id, TimerKind::Expire));
      ex.timers.lifetime = Some(expire);
    }
  }

  fn send_msg(&mut self, msg: Addrd<Message>) -> Result<(), Error<S::Error>> {
    let bytes = msg.data().to_bytes()?;

    match nb::block!(self.sock.send(Addrd(bytes.as_slice(), msg.addr()))) {
      | Ok(()) => {
        self.interceptors.iter_mut().for_each(|i| i.sent(&msg));
        Ok(())
      },
      | Err(e) => {
        log::error!("failed to send {} to {:?}: {:?}",
                    msg_summary(msg.data()),
                    msg.addr(),
                    e);
        Err(Error::Socket(e))
      },
    }
  }
}
