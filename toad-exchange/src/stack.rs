use std::collections::VecDeque;

use rand_chacha::ChaCha8Rng;

use crate::config::Config;
use crate::exchange::{Exchange, Exchanges};
use crate::layer::{Blockwise, Cx, Effect, Flow, Layer, Msg, Observe, Reliability, Tokens, Work};
use crate::matcher::Matcher;
use crate::net::Addrd;
use crate::sched::Scheduler;

/// Shared state the stack's layers run against
#[derive(Debug)]
pub struct Env<'a> {
  /// Milliseconds since the clock's epoch
  pub now: u64,
  /// Runtime config
  pub config: &'a Config,
  /// Seeded randomness
  pub rng: &'a mut ChaCha8Rng,
  /// Timers
  pub sched: &'a mut Scheduler,
  /// Matcher used to provision & index outgoing messages
  pub matcher: &'a Matcher,
}

/// The ordered protocol layers of an endpoint.
///
/// ```text
///        application
///  send   |       ^  receive
///         v       |
///        [ Observe     ]
///        [ Blockwise   ]
///        [ Tokens      ]
///        [ Reliability ]
///         |       ^
///         v       |
///          matcher
/// ```
///
/// The stack is driven by [`Work`]: a message entering from the
/// application or the matcher, or a timer firing. Layers may queue
/// more work (e.g. requesting the next block of a response), which is run
/// to completion before [`Stack::run`] returns the accumulated [`Effect`]s.
#[derive(Debug)]
pub struct Stack {
  layers: Vec<Box<dyn Layer>>,
}

impl Default for Stack {
  fn default() -> Self {
    Self::new(vec![Box::new(Observe::new()),
                   Box::new(Blockwise::new()),
                   Box::new(Tokens::new()),
                   Box::new(Reliability::new())])
  }
}

impl Stack {
  /// Create a stack from layers, ordered top (nearest the application)
  /// to bottom (nearest the wire)
  pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
    Self { layers }
  }

  /// Number of layers
  pub fn len(&self) -> usize {
    self.layers.len()
  }

  /// Is the stack empty?
  pub fn is_empty(&self) -> bool {
    self.layers.is_empty()
  }

  /// Run queued work, and any work it queues, to completion
  pub fn run(&mut self,
             exchanges: &mut Exchanges,
             env: &mut Env<'_>,
             work: impl IntoIterator<Item = Work>)
             -> Vec<Effect> {
    let mut queue = work.into_iter().collect::<VecDeque<_>>();
    let mut effects = vec![];

    while let Some(item) = queue.pop_front() {
      let id = match &item {
        | Work::Down { ex, .. } | Work::Up { ex, .. } => *ex,
        | Work::Timer { ex, .. } | Work::Failed { ex, .. } => *ex,
      };

      let ex = match exchanges.get_mut(id) {
        | Some(ex) => ex,
        | None => {
          log::trace!("{:?} no longer exists, dropping {:?}", id, item);
          continue;
        },
      };

      let mut cx = Cx { now: env.now,
                        config: env.config,
                        rng: &mut *env.rng,
                        sched: &mut *env.sched,
                        matcher: env.matcher,
                        ix: 0,
                        work: &mut queue,
                        effects: &mut effects };

      match item {
        | Work::Down { from, msg, .. } => self.down(&mut cx, ex, from, msg),
        | Work::Up { below, msg, .. } => self.up(&mut cx, ex, below, msg),
        | Work::Timer { kind, .. } => {
          if ex.is_complete() {
            continue;
          }

          for (ix, layer) in self.layers.iter_mut().enumerate() {
            cx.ix = ix;
            layer.on_timer(&mut cx, ex, kind);
          }
        },
        | Work::Failed { failure, .. } => {
          if ex.is_complete() {
            continue;
          }

          log::debug!("{:?} failed: {:?}", id, failure);
          ex.failure = Some(failure);

          for (ix, layer) in self.layers.iter_mut().enumerate() {
            cx.ix = ix;
            layer.on_failure(&mut cx, ex, failure);
          }

          cx.effects.push(Effect::Failed(id, failure));
          cx.complete(ex);
        },
      }
    }

    effects
  }

  /// Tell every layer an exchange has completed
  pub fn completed(&mut self, ex: &Exchange) {
    self.layers.iter_mut().for_each(|l| l.completed(ex));
  }

  fn down(&mut self, cx: &mut Cx, ex: &mut Exchange, from: usize, mut msg: Msg) {
    if ex.is_complete() {
      log::trace!("{:?} complete, not sending {:?}", ex.id(), msg);
      return;
    }

    for (ix, layer) in self.layers.iter_mut().enumerate().skip(from) {
      cx.ix = ix;

      let flow = match msg {
        | Msg::Req(req) => layer.send_request(cx, ex, req).map(Msg::Req),
        | Msg::Resp(resp) => layer.send_response(cx, ex, resp).map(Msg::Resp),
        | Msg::Empty(m) => layer.send_empty(cx, ex, m).map(Msg::Empty),
      };

      msg = match flow {
        | Flow::Next(msg) => msg,
        | Flow::Stop => return,
      };
    }

    cx.transmit(ex, msg);
  }

  fn up(&mut self, cx: &mut Cx, ex: &mut Exchange, below: usize, mut msg: Msg) {
    for ix in (0..below.min(self.layers.len())).rev() {
      cx.ix = ix;
      let layer = &mut self.layers[ix];

      let flow = match msg {
        | Msg::Req(req) => layer.receive_request(cx, ex, req).map(Msg::Req),
        | Msg::Resp(resp) => layer.receive_response(cx, ex, resp).map(Msg::Resp),
        | Msg::Empty(m) => layer.receive_empty(cx, ex, m).map(Msg::Empty),
      };

      msg = match flow {
        | Flow::Next(msg) => msg,
        | Flow::Stop => return,
      };
    }

    match msg {
      | Msg::Empty(_) => (),
      | Msg::Req(_) if ex.is_complete() => (),
      | Msg::Resp(resp) if ex.is_local() => {
        ex.response = Some(resp.clone());
        cx.effects
          .push(Effect::Deliver(ex.id(), Addrd(Msg::Resp(resp), ex.peer())));
        if ex.observing.is_none() {
          cx.complete(ex);
        }
      },
      | Msg::Resp(_) => log::warn!("{:?} dropping response to a request we did not send", ex.id()),
      | msg => cx.effects.push(Effect::Deliver(ex.id(), Addrd(msg, ex.peer()))),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn default_order() {
    let stack = Stack::default();
    let names = stack.layers
                     .iter()
                     .map(|l| format!("{:?}", l))
                     .collect::<Vec<_>>();

    assert_eq!(stack.len(), 4);
    assert!(names[0].starts_with("Observe"));
    assert!(names[1].starts_with("Blockwise"));
    assert!(names[2].starts_with("Tokens"));
    assert!(names[3].starts_with("Reliability"));
  }
}
