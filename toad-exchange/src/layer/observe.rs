use std::collections::HashMap;

use no_std_net::SocketAddr;

use super::{Cx, Flow, Layer};
use crate::exchange::{ClientObserve, Exchange, ExchangeId, Failure, ObserveRelation};
use crate::msg::{known, Message, MessageExt, MessageOptions, Token, Type};
use crate::req::Req;
use crate::resp::Resp;
use crate::sched::TimerKind;

/// Layer responsible for observe relations (RFC 7641).
///
/// # As the observed
/// Requests registering interest (`Observe: 0`) establish a relation on their
/// exchange, and successful responses sent on that exchange become
/// notifications: they carry an increasing sequence number and are never the
/// last response of the exchange.
///
/// The first notification answering an unacknowledged CON request is
/// piggybacked. After that notifications are NON, except that every so often
/// (see [`config::Observe`](crate::config::Observe)) one is sent CON to make sure
/// the observer is still interested.
///
/// While a CON notification is in transit newer ones are postponed. The newest
/// is sent once the one in transit is acknowledged; if instead the one in
/// transit is due for retransmission, it is abandoned and the newest is sent
/// as a fresh CON notification through the layers below.
///
/// Relations end when the observer sends a Reset or deregisters, when an error
/// response is sent, or when a CON notification times out. A timed out
/// notification also cancels every other relation with the same observer.
///
/// # As the observer
/// Notifications that are older than the last one delivered are acknowledged
/// but not delivered. A response without the Observe option ends the relation.
#[derive(Debug, Default)]
pub struct Observe {
  relations: HashMap<SocketAddr, HashMap<Token, ExchangeId>>,
}

impl Observe {
  /// Create a new observe layer
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of established (or establishing) relations with remote observers
  pub fn relation_count(&self) -> usize {
    self.relations.values().map(HashMap::len).sum()
  }

  fn register(&mut self, peer: SocketAddr, token: Token, ex: ExchangeId) -> Option<ExchangeId> {
    self.relations
        .entry(peer)
        .or_default()
        .insert(token, ex)
        .filter(|prev| *prev != ex)
  }

  fn deregister(&mut self, peer: SocketAddr, token: Token, ex: Option<ExchangeId>) -> Option<ExchangeId> {
    let by_token = self.relations.get_mut(&peer)?;
    let removed = match by_token.get(&token) {
      | Some(found) if ex.map(|ex| ex == *found).unwrap_or(true) => by_token.remove(&token),
      | _ => None,
    };

    if by_token.is_empty() {
      self.relations.remove(&peer);
    }

    removed
  }

  fn cancel_relation(&mut self, ex: &mut Exchange) {
    if let Some(rel) = ex.relation.as_mut() {
      rel.canceled = true;
      rel.pending = None;
    }

    self.deregister(ex.peer(), ex.token(), Some(ex.id()));
  }

  fn notify(&mut self, cx: &mut Cx, ex: &mut Exchange, mut resp: Resp) -> Flow<Resp> {
    let acknowledged = ex.request_status.acknowledged || ex.request_status.rejected;
    let in_transit = ex.is_retransmitting();

    let rel = match ex.relation.as_mut() {
      | Some(rel) if !rel.canceled => rel,
      | _ => return Flow::Next(resp),
    };

    if !resp.is_success() {
      log::debug!("{:?} error response ends observe relation", ex.id());
      resp.msg_mut().remove(known::OBSERVE);
      resp.last = true;
      if acknowledged {
        resp.set_ty(Type::Con);
      }
      self.cancel_relation(ex);
      return Flow::Next(resp);
    }

    resp.msg_mut().set_observe_seq(rel.next_seq());
    resp.last = false;
    rel.established = true;

    if acknowledged {
      let ty = if rel.check(cx.now, &cx.config.observe) {
        Type::Con
      } else {
        Type::Non
      };
      resp.set_ty(ty);
    }

    if in_transit {
      log::trace!("{:?} notification in transit, postponing newer one", ex.id());
      if let Some(rel) = ex.relation.as_mut() {
        rel.pending = Some(resp);
      }
      return Flow::Stop;
    }

    Flow::Next(resp)
  }
}

impl Layer for Observe {
  fn send_request(&mut self, _: &mut Cx, ex: &mut Exchange, req: Req) -> Flow<Req> {
    if req.is_observe_register() && ex.observing.is_none() {
      ex.observing = Some(ClientObserve::default());
    }

    Flow::Next(req)
  }

  fn send_response(&mut self, cx: &mut Cx, ex: &mut Exchange, resp: Resp) -> Flow<Resp> {
    if ex.is_local() {
      return Flow::Next(resp);
    }

    self.notify(cx, ex, resp)
  }

  fn receive_request(&mut self, cx: &mut Cx, ex: &mut Exchange, req: Req) -> Flow<Req> {
    let token = req.msg().token;

    if req.is_observe_register() && ex.relation.is_none() {
      log::debug!("{:?} {:?} registered interest in {}",
                  ex.id(),
                  ex.peer(),
                  req.path());
      ex.relation = Some(ObserveRelation::new(cx.now));

      if let Some(prev) = self.register(ex.peer(), token, ex.id()) {
        log::debug!("{:?} replaces relation {:?}", ex.id(), prev);
        cx.fail(prev, Failure::Canceled);
      }
    } else if req.is_observe_deregister() {
      if let Some(prev) = self.deregister(ex.peer(), token, None) {
        log::debug!("{:?} {:?} deregistered", prev, ex.peer());
        if prev != ex.id() {
          cx.fail(prev, Failure::Canceled);
        }
      }
    }

    Flow::Next(req)
  }

  fn receive_response(&mut self, cx: &mut Cx, ex: &mut Exchange, mut resp: Resp) -> Flow<Resp> {
    let id = ex.id();
    let observing = match ex.observing.as_mut() {
      | Some(observing) => observing,
      | None => return Flow::Next(resp),
    };

    match resp.msg().observe_seq() {
      | Some(seq) if resp.is_success() => {
        if !observing.is_fresh(seq, cx.now, &cx.config.observe) {
          log::debug!("{:?} dropping stale notification {} (last was {:?})",
                      id,
                      seq,
                      observing.last_seq());
          return Flow::Stop;
        }

        observing.accept(seq, cx.now);
        resp.last = false;
      },
      | _ => {
        log::debug!("{:?} observe relation ended by server", id);
        ex.observing = None;
      },
    }

    Flow::Next(resp)
  }

  fn receive_empty(&mut self, cx: &mut Cx, ex: &mut Exchange, msg: Message) -> Flow<Message> {
    if ex.is_local() || ex.relation.is_none() {
      return Flow::Next(msg);
    }

    match msg.ty {
      | Type::Reset => {
        log::debug!("{:?} observer rejected notification, canceling relation", ex.id());
        self.cancel_relation(ex);
      },
      | Type::Ack => {
        let pending = ex.relation.as_mut().and_then(|rel| rel.pending.take());
        if let Some(pending) = pending {
          log::trace!("{:?} sending postponed notification", ex.id());
          cx.send_response_down(ex.id(), pending);
        }
      },
      | _ => (),
    }

    Flow::Next(msg)
  }

  fn on_timer(&mut self, cx: &mut Cx, ex: &mut Exchange, kind: TimerKind) {
    if kind != TimerKind::Retransmit {
      return;
    }

    let pending = ex.relation.as_mut().and_then(|rel| rel.pending.take());
    if let Some(mut pending) = pending {
      log::trace!("{:?} postponed notification replaces the one in transit", ex.id());
      ex.stop_retransmission(cx.sched);
      pending.unprovision();
      pending.set_ty(Type::Con);
      cx.send_response_down(ex.id(), pending);
    }
  }

  fn on_failure(&mut self, cx: &mut Cx, ex: &mut Exchange, failure: Failure) {
    if ex.relation.is_none() {
      return;
    }

    self.cancel_relation(ex);

    if failure == Failure::TimedOut {
      let siblings = self.relations.remove(&ex.peer()).unwrap_or_default();
      siblings.into_values()
              .filter(|id| *id != ex.id())
              .for_each(|id| {
                log::debug!("{:?} canceled along with timed out relation {:?}", id, ex.id());
                cx.fail(id, Failure::Canceled);
              });
    }
  }

  fn completed(&mut self, ex: &Exchange) {
    if ex.relation.is_some() {
      self.deregister(ex.peer(), ex.token(), Some(ex.id()));
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::msg::TokenExt;
  use crate::test::addr;

  #[test]
  fn registry_is_per_peer_and_token() {
    let mut layer = Observe::new();
    let t = Token::from_slice(&[1]);

    assert_eq!(layer.register(addr(1), t, ExchangeId(1)), None);
    assert_eq!(layer.register(addr(2), t, ExchangeId(2)), None);
    assert_eq!(layer.register(addr(1), t, ExchangeId(3)), Some(ExchangeId(1)));
    assert_eq!(layer.relation_count(), 2);

    assert_eq!(layer.deregister(addr(1), t, Some(ExchangeId(1))), None);
    assert_eq!(layer.deregister(addr(1), t, Some(ExchangeId(3))), Some(ExchangeId(3)));
    assert_eq!(layer.deregister(addr(2), t, None), Some(ExchangeId(2)));
    assert_eq!(layer.relation_count(), 0);
  }
}
