use super::{Cx, Flow, Layer};
use crate::exchange::Exchange;
use crate::msg::{Message, Token, TokenExt};
use crate::req::Req;
use crate::resp::Resp;

/// Layer responsible for setting the token of outbound requests that
/// lack one (carry the empty token), with a token unique to this endpoint.
///
/// Tokens are the 2 bytes of [`Msg.token_seed`](crate::config::Msg::token_seed)
/// followed by a 4-byte counter, so two endpoints configured with different
/// seeds never generate the same token.
///
/// Responses always carry the token of the request they answer;
/// responding on an exchange that has no request is a programming error
/// and panics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tokens {
  counter: u32,
}

impl Tokens {
  /// Create a new token layer
  pub fn new() -> Self {
    Self::default()
  }

  /// Generate a token
  pub fn next_token(&mut self, seed: u16) -> Token {
    self.counter = self.counter.wrapping_add(1);

    let mut bytes = [0u8; 6];
    bytes[..2].copy_from_slice(&seed.to_be_bytes());
    bytes[2..].copy_from_slice(&self.counter.to_be_bytes());
    Token::from_slice(&bytes)
  }
}

impl Layer for Tokens {
  fn send_request(&mut self, cx: &mut Cx, _: &mut Exchange, mut req: Req) -> Flow<Req> {
    if req.msg().token.0.is_empty() {
      let token = self.next_token(cx.config.msg.token_seed);
      log::trace!("assigned token {:?}", token);
      req.msg_mut().token = token;
    }

    Flow::Next(req)
  }

  fn send_response(&mut self, _: &mut Cx, ex: &mut Exchange, mut resp: Resp) -> Flow<Resp> {
    if ex.current_request.is_none() && ex.request.is_none() {
      panic!("{:?} has no request, there is no token to respond with", ex.id());
    }

    resp.msg_mut().token = ex.token();
    Flow::Next(resp)
  }

  fn send_empty(&mut self, _: &mut Cx, _: &mut Exchange, mut msg: Message) -> Flow<Message> {
    msg.token = Token::empty();
    Flow::Next(msg)
  }
}

#[cfg(test)]
mod test {
  use std::collections::VecDeque;

  use rand::SeedableRng;
  use rand_chacha::ChaCha8Rng;

  use super::*;
  use crate::config::Config;
  use crate::exchange::{ExchangeId, Origin};
  use crate::matcher::Matcher;
  use crate::resp::code;
  use crate::sched::Scheduler;
  use crate::test::addr;

  #[test]
  fn tokens_are_seeded_and_unique() {
    let mut tokens = Tokens::new();
    let a = tokens.next_token(0xBEEF);
    let b = tokens.next_token(0xBEEF);

    assert_ne!(a, b);
    assert_eq!(&a.as_bytes()[..2], &[0xBE, 0xEF]);
    assert_eq!(a.as_bytes().len(), 6);
  }

  fn respond(ex: &mut Exchange) -> Flow<Resp> {
    let config = Config::default();
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let matcher = Matcher::new(&config, &mut rng);
    let mut sched = Scheduler::default();
    let (mut work, mut effects) = (VecDeque::new(), vec![]);
    let mut cx = Cx { now: 0,
                      config: &config,
                      rng: &mut rng,
                      sched: &mut sched,
                      matcher: &matcher,
                      ix: 2,
                      work: &mut work,
                      effects: &mut effects };

    Tokens::new().send_response(&mut cx, ex, Resp::new(code::CONTENT))
  }

  #[test]
  fn responses_take_the_request_token() {
    let mut req = Req::get("a");
    req.msg_mut().token = Token::from_slice(&[9, 9]);
    let mut ex = Exchange::remote(ExchangeId(1), addr(1), req, 0);

    match respond(&mut ex) {
      | Flow::Next(resp) => assert_eq!(resp.token(), Token::from_slice(&[9, 9])),
      | Flow::Stop => panic!("token layer stopped a response"),
    }
  }

  #[test]
  #[should_panic]
  fn responding_without_a_request_panics() {
    let mut ex = Exchange::new(ExchangeId(1), Origin::Remote, addr(1), 0);
    respond(&mut ex);
  }
}
