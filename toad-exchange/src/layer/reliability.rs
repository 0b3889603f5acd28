use super::{Cx, Flow, Layer, Msg};
use crate::exchange::{Exchange, Failure, MessageStatus};
use crate::msg::{Message, MessageExt, Type};
use crate::req::Req;
use crate::resp::Resp;
use crate::retry::{RetryTimer, YouShould};
use crate::sched::TimerKind;

/// Layer responsible for CON retransmission with exponential back-off,
/// acknowledging received CON messages & answering duplicates.
///
/// # Piggybacking
/// A response with no explicit type answering a CON request that has not
/// been acknowledged yet is sent as an ACK sharing the request's
/// message id. Once the request has been acknowledged the response
/// is sent separately, as CON (or NON when the request was NON).
///
/// # Awaiting a separate response
/// Once a CON request of ours has been acknowledged with an empty ACK,
/// retransmission stops and the response is awaited for at most
/// [`exchange_lifetime`](crate::config::Msg::exchange_lifetime) before the
/// exchange fails with [`Failure::TimedOut`].
///
/// # Duplicates
/// A retransmitted request is never handed to the application;
/// the last response, ACK or RST sent for the exchange is sent again.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reliability;

impl Reliability {
  /// Create a new reliability layer
  pub fn new() -> Self {
    Self
  }

  fn start_retransmission(cx: &mut Cx, ex: &mut Exchange) {
    let retry = RetryTimer::new(cx.config.msg.retry_strategy(),
                                cx.config.msg.max_retransmit,
                                &mut *cx.rng);
    let mut slot = ex.timers.retransmit.take();
    cx.schedule(&mut slot, ex.id(), TimerKind::Retransmit, retry.timeout().0);
    ex.timers.retransmit = slot;
    ex.retry = Some(retry);
  }

  fn status_mut(ex: &mut Exchange) -> &mut MessageStatus {
    if ex.is_local() {
      &mut ex.request_status
    } else {
      &mut ex.response_status
    }
  }

  fn reply_empty(cx: &mut Cx, ex: &mut Exchange, ty: Type, msg: &Message) {
    let reply = Message::empty(ty, msg.id);
    cx.transmit(ex, Msg::Empty(reply));
  }

  fn retransmit(cx: &mut Cx, ex: &mut Exchange) {
    let msg = if ex.is_local() {
      ex.current_request.clone().map(Msg::Req)
    } else {
      ex.current_response.clone().map(Msg::Resp)
    };

    let (advice, attempts, timeout) = match ex.retry.as_mut() {
      | Some(retry) => {
        let advice = retry.what_should_i_do();
        (advice, retry.attempts().0, retry.timeout().0)
      },
      | None => return,
    };

    match (advice, msg) {
      | (YouShould::Retry, Some(msg)) => {
        log::debug!("{:?} retransmission {} (next in {}ms)",
                    ex.id(),
                    attempts,
                    timeout);

        let mut slot = None;
        cx.schedule(&mut slot, ex.id(), TimerKind::Retransmit, timeout);
        ex.timers.retransmit = slot;
        cx.transmit(ex, msg);
      },
      | (YouShould::Retry, None) => ex.retry = None,
      | (YouShould::Cry, _) => {
        log::warn!("{:?} timed out after {} retransmissions", ex.id(), attempts);
        ex.retry = None;
        Self::status_mut(ex).timed_out = true;
        cx.fail(ex.id(), Failure::TimedOut);
      },
    }
  }
}

impl Layer for Reliability {
  fn send_request(&mut self, cx: &mut Cx, ex: &mut Exchange, req: Req) -> Flow<Req> {
    let ty = req.msg().ty;
    ex.set_current_request(req.clone());

    match ty {
      | Type::Con => Self::start_retransmission(cx, ex),
      | Type::Non if ex.timers.lifetime.is_none() => {
        let mut slot = None;
        cx.schedule(&mut slot,
                    ex.id(),
                    TimerKind::NonLifetime,
                    cx.config.msg.non_lifetime.0);
        ex.timers.lifetime = slot;
      },
      | _ => (),
    }

    Flow::Next(req)
  }

  fn send_response(&mut self, cx: &mut Cx, ex: &mut Exchange, mut resp: Resp) -> Flow<Resp> {
    let req = ex.current_request.as_ref().map(|r| (r.msg().ty, r.msg().id));

    let ty = match (resp.ty(), req) {
      | (Some(Type::Ack), _) | (None, Some((Type::Con, _)))
        if !ex.request_status.acknowledged && !ex.request_status.rejected =>
      {
        Type::Ack
      },
      | (Some(Type::Ack), _) => Type::Con,
      | (Some(ty), _) => ty,
      | (None, Some((Type::Non, _))) => Type::Non,
      | (None, _) => Type::Con,
    };

    resp.set_ty(ty);

    if ty == Type::Ack {
      if let Some((_, id)) = req {
        resp.msg_mut().id = id;
      }
      ex.request_status.acknowledged = true;
    }

    ex.set_current_response(resp.clone());

    if ty == Type::Con {
      Self::start_retransmission(cx, ex);
    }

    Flow::Next(resp)
  }

  fn send_empty(&mut self, _: &mut Cx, ex: &mut Exchange, msg: Message) -> Flow<Message> {
    if !ex.is_local() && ex.request_id() == Some(msg.id) {
      match msg.ty {
        | Type::Ack => ex.request_status.acknowledged = true,
        | Type::Reset => ex.request_status.rejected = true,
        | _ => (),
      }
    }

    Flow::Next(msg)
  }

  fn receive_request(&mut self, cx: &mut Cx, ex: &mut Exchange, req: Req) -> Flow<Req> {
    if !req.duplicate {
      ex.set_current_request(req.clone());
      return Flow::Next(req);
    }

    let cached = ex.current_response.clone();
    let status = ex.request_status;

    match cached {
      | Some(resp) => {
        log::debug!("{:?} duplicate request, resending response", ex.id());
        cx.transmit(ex, Msg::Resp(resp));
      },
      | None if status.acknowledged => {
        log::debug!("{:?} duplicate request, resending ACK", ex.id());
        Self::reply_empty(cx, ex, Type::Ack, req.msg());
      },
      | None if status.rejected => {
        log::debug!("{:?} duplicate request, resending RST", ex.id());
        Self::reply_empty(cx, ex, Type::Reset, req.msg());
      },
      | None => log::debug!("{:?} duplicate request still being handled, dropping", ex.id()),
    }

    Flow::Stop
  }

  fn receive_response(&mut self, cx: &mut Cx, ex: &mut Exchange, resp: Resp) -> Flow<Resp> {
    ex.stop_retransmission(cx.sched);
    ex.request_status.acknowledged = true;

    let mut lifetime = ex.timers.lifetime.take();
    cx.cancel(&mut lifetime);

    if resp.msg().is(Type::Con) {
      let ty = if ex.request_status.canceled || ex.is_complete() {
        Type::Reset
      } else {
        Type::Ack
      };
      Self::reply_empty(cx, ex, ty, resp.msg());
    }

    if resp.duplicate {
      log::debug!("{:?} duplicate response {:?}", ex.id(), resp.msg().id);
      Flow::Stop
    } else {
      Flow::Next(resp)
    }
  }

  fn receive_empty(&mut self, cx: &mut Cx, ex: &mut Exchange, msg: Message) -> Flow<Message> {
    let awaiting_ack = ex.is_retransmitting();
    ex.stop_retransmission(cx.sched);

    let status = Self::status_mut(ex);
    match msg.ty {
      | Type::Ack => status.acknowledged = true,
      | Type::Reset => status.rejected = true,
      | _ => return Flow::Stop,
    }

    let last = ex.current_response.as_ref().map(|r| r.last).unwrap_or(false);

    match (ex.is_local(), msg.ty) {
      | (false, Type::Ack) if last => cx.complete(ex),
      | (false, Type::Reset) => {
        log::debug!("{:?} response rejected by peer", ex.id());
        cx.complete(ex);
      },
      | (true, Type::Ack) if awaiting_ack => {
        log::trace!("{:?} request acknowledged, awaiting separate response", ex.id());
        let mut slot = ex.timers.lifetime.take();
        cx.schedule(&mut slot,
                    ex.id(),
                    TimerKind::ResponseLifetime,
                    cx.config.msg.exchange_lifetime.0);
        ex.timers.lifetime = slot;
      },
      | (true, Type::Reset) => {
        log::warn!("{:?} request rejected by peer", ex.id());
        cx.fail(ex.id(), Failure::Rejected);
      },
      | _ => (),
    }

    Flow::Next(msg)
  }

  fn on_timer(&mut self, cx: &mut Cx, ex: &mut Exchange, kind: TimerKind) {
    match kind {
      | TimerKind::Retransmit => {
        ex.timers.retransmit = None;
        Self::retransmit(cx, ex);
      },
      | TimerKind::NonLifetime => {
        ex.timers.lifetime = None;
        if ex.response.is_none() {
          log::warn!("{:?} NON request was never answered", ex.id());
          ex.request_status.timed_out = true;
          cx.fail(ex.id(), Failure::TimedOut);
        }
      },
      | TimerKind::ResponseLifetime => {
        ex.timers.lifetime = None;
        log::warn!("{:?} acknowledged request was never answered", ex.id());
        ex.request_status.timed_out = true;
        cx.fail(ex.id(), Failure::TimedOut);
      },
      | _ => (),
    }
  }

  fn on_failure(&mut self, cx: &mut Cx, ex: &mut Exchange, failure: Failure) {
    if failure == Failure::Canceled {
      ex.request_status.canceled = true;
    }

    ex.stop_retransmission(cx.sched);
  }
}
