use super::{Cx, Flow, Layer};
use crate::exchange::block::num_at_offset;
use crate::exchange::{BlockwiseStatus, Exchange, Failure};
use crate::msg::{known, szx_for_size, Block, BlockExt, Code, Id, Message, MessageExt, MessageOptions, Type};
use crate::req::Req;
use crate::resp::{code, Resp};
use crate::sched::TimerKind;

/// Layer responsible for block-wise transfer (RFC 7959).
///
/// # As a client
/// - Request bodies larger than [`Msg.max_message_size`](crate::config::Msg::max_message_size)
///   are sent one Block1 at a time, each waiting for a 2.31 Continue.
/// - Responses carrying Block2 are reassembled by requesting the following
///   blocks, and delivered once as a whole.
///
/// # As a server
/// - Block1 request bodies are reassembled and delivered once as a whole.
/// - Response bodies larger than the max message size (or answering a request
///   carrying Block2) are cached, and requests for the following blocks are
///   answered from the cache without involving the application.
///
/// Blocks must arrive in order; continuity is checked by byte offset
/// so that the block size may shrink mid-transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blockwise;

impl Blockwise {
  /// Create a new block-wise layer
  pub fn new() -> Self {
    Self
  }

  fn preferred_szx(cx: &Cx) -> u8 {
    szx_for_size(cx.config.block.preferred_size)
  }

  fn touch(cx: &mut Cx, ex: &mut Exchange) {
    let mut slot = ex.timers.block_cleanup.take();
    cx.schedule(&mut slot,
                ex.id(),
                TimerKind::BlockCleanup,
                cx.config.block.status_lifetime.0);
    ex.timers.block_cleanup = slot;
  }

  fn settle(cx: &mut Cx, ex: &mut Exchange) {
    let mut slot = ex.timers.block_cleanup.take();
    cx.cancel(&mut slot);
  }

  fn respond_error(cx: &mut Cx, ex: &mut Exchange, req: &Req, code: Code) {
    log::warn!("{:?} block-wise transfer failed: {}", ex.id(), code.to_string());

    let mut resp = Resp::for_request(req, code);
    if code == code::REQUEST_ENTITY_TOO_LARGE {
      resp.msg_mut().set_size1(cx.config.block.max_body_size as u64).ok();
    }

    ex.request_block = None;
    Self::settle(cx, ex);
    cx.send_response_down(ex.id(), resp);
  }

  /// The request that produced the next block of a request body we are uploading
  fn next_block1(ex: &Exchange, status: &BlockwiseStatus, num: u32, szx: u8) -> Option<Req> {
    let (bytes, more) = status.block(num, szx)?;
    let mut req = ex.request.clone()?;
    let msg = req.msg_mut();
    msg.id = Id(0);
    msg.token = ex.token();
    msg.remove(known::SIZE1);
    msg.set_block(known::BLOCK1, Block::from_szx(szx, num, more));
    req.set_payload(bytes);
    Some(req)
  }

  /// The request asking for the next block of a response body we are downloading
  fn next_block2(ex: &Exchange, num: u32, szx: u8) -> Option<Req> {
    let mut req = ex.request.clone()?;
    let msg = req.msg_mut();
    msg.id = Id(0);
    msg.token = ex.token();
    msg.remove(known::BLOCK1);
    msg.remove(known::SIZE1);
    msg.remove(known::OBSERVE);
    msg.set_block(known::BLOCK2, Block::from_szx(szx, num, false));
    req.set_payload(vec![]);
    Some(req)
  }

  fn upload_continue(cx: &mut Cx, ex: &mut Exchange, acked: Block) -> Flow<Resp> {
    let status = match ex.request_block.as_mut() {
      | Some(status) => status,
      | None => return Flow::Stop,
    };

    let offset = status.next_offset();
    let szx = status.szx.min(acked.szx());
    let num = num_at_offset(offset, szx);
    status.num = num;
    status.szx = szx;

    let status = status.clone();
    match Self::next_block1(ex, &status, num, szx) {
      | Some(req) => {
        log::trace!("{:?} sending block1 {} (szx {})", ex.id(), num, szx);
        Self::touch(cx, ex);
        cx.send_request_down(ex.id(), req);
      },
      | None => cx.fail(ex.id(), Failure::BlockwiseFailed(code::REQUEST_ENTITY_INCOMPLETE)),
    }

    Flow::Stop
  }

  fn download(cx: &mut Cx, ex: &mut Exchange, resp: Resp, block: Block) -> Flow<Resp> {
    let id = ex.id();
    let random_access = ex.request
                          .as_ref()
                          .and_then(|r| r.msg().block2())
                          .map(|b| b.num() > 0)
                          .unwrap_or(false);

    if random_access {
      return Flow::Next(resp);
    }

    let status = ex.response_block.get_or_insert_with(|| {
                                    let mut status = BlockwiseStatus::receiving(block.szx());
                                    status.content_format = Self::content_format(resp.msg());
                                    status.observe = resp.msg().observe_seq();
                                    status
                                  });

    if block.offset() != status.received() {
      log::warn!("{:?} expected block at offset {}, got {}",
                 id,
                 status.received(),
                 block.offset());
      ex.response_block = None;
      cx.fail(id, Failure::BlockwiseFailed(code::REQUEST_ENTITY_INCOMPLETE));
      return Flow::Stop;
    }

    if status.received() + resp.payload().len() > cx.config.block.max_body_size {
      log::warn!("{:?} response body exceeds {} bytes",
                 id,
                 cx.config.block.max_body_size);
      ex.response_block = None;
      cx.fail(id, Failure::BlockwiseFailed(code::REQUEST_ENTITY_TOO_LARGE));
      return Flow::Stop;
    }

    status.append(block.num(), block.szx(), resp.payload());

    if block.more() {
      let push = status.push || ex.request_block.is_some();
      status.push = push;

      if !push {
        match Self::next_block2(ex, block.num() + 1, block.szx()) {
          | Some(req) => {
            log::trace!("{:?} requesting block2 {}", ex.id(), block.num() + 1);
            cx.send_request_down(ex.id(), req);
          },
          | None => cx.fail(ex.id(), Failure::BlockwiseFailed(code::REQUEST_ENTITY_INCOMPLETE)),
        }
      }

      Self::touch(cx, ex);
      return Flow::Stop;
    }

    let status = match ex.response_block.take() {
      | Some(status) => status,
      | None => return Flow::Stop,
    };

    Self::settle(cx, ex);

    let mut whole = resp;
    let msg = whole.msg_mut();
    msg.remove(known::BLOCK2);
    msg.remove(known::SIZE2);
    if let Some(seq) = status.observe {
      msg.set_observe_seq(seq);
    }
    whole.set_payload(status.assemble());

    log::debug!("{:?} reassembled {} byte response", ex.id(), whole.payload().len());
    Flow::Next(whole)
  }

  fn upload_received(cx: &mut Cx, ex: &mut Exchange, req: Req, block: Block) -> Flow<Req> {
    if block.num() == 0 {
      let mut status = BlockwiseStatus::receiving(block.szx());
      status.content_format = Self::content_format(req.msg());
      ex.request_block = Some(status);
    }

    let received = match ex.request_block.as_ref() {
      | Some(status) if block.offset() == status.received() => status.received(),
      | _ => {
        Self::respond_error(cx, ex, &req, code::REQUEST_ENTITY_INCOMPLETE);
        return Flow::Stop;
      },
    };

    if received + req.payload().len() > cx.config.block.max_body_size {
      Self::respond_error(cx, ex, &req, code::REQUEST_ENTITY_TOO_LARGE);
      return Flow::Stop;
    }

    if let Some(status) = ex.request_block.as_mut() {
      status.append(block.num(), block.szx(), req.payload());
    }

    if block.more() {
      let szx = block.szx().min(Self::preferred_szx(cx));
      let mut resp = Resp::for_request(&req, code::CONTINUE);
      resp.msg_mut()
          .set_block(known::BLOCK1, Block::from_szx(szx, block.num(), true));
      resp.last = false;

      log::trace!("{:?} received block1 {}, continuing", ex.id(), block.num());
      Self::touch(cx, ex);
      cx.send_response_down(ex.id(), resp);
      return Flow::Stop;
    }

    let body = match ex.request_block.as_mut() {
      | Some(status) => {
        status.complete = true;
        status.assemble()
      },
      | None => return Flow::Stop,
    };

    Self::settle(cx, ex);

    let mut whole = req;
    whole.msg_mut().remove(known::BLOCK1);
    whole.msg_mut().remove(known::SIZE1);
    whole.set_payload(body);

    log::debug!("{:?} reassembled {} byte request", ex.id(), whole.payload().len());
    ex.block1_to_ack = Some(Block::from_szx(block.szx(), block.num(), false));
    ex.request = Some(whole.clone());
    Flow::Next(whole)
  }

  fn serve_cached(cx: &mut Cx, ex: &mut Exchange, req: &Req, block: Block) {
    let (served, whole) = match (ex.response_block.as_mut(), ex.response.as_ref()) {
      | (Some(status), Some(whole)) => {
        let szx = block.szx().min(status.szx);
        let num = num_at_offset(block.offset(), szx);
        status.num = num;
        status.szx = szx;
        (status.block(num, szx).map(|b| (b, num, szx)), whole.clone())
      },
      | _ => return,
    };

    let resp = match served {
      | Some(((bytes, more), num, szx)) => {
        let mut resp = whole;
        resp.unprovision();
        let msg = resp.msg_mut();
        msg.token = req.msg().token;
        msg.remove(known::SIZE2);
        msg.set_block(known::BLOCK2, Block::from_szx(szx, num, more));
        resp.set_payload(bytes);
        resp.last = !more;

        log::trace!("{:?} serving cached block2 {}", ex.id(), num);
        if more {
          Self::touch(cx, ex);
        } else {
          Self::settle(cx, ex);
        }
        resp
      },
      | None => Resp::for_request(req, code::BAD_OPTION),
    };

    cx.send_response_down(ex.id(), resp);
  }

  fn split_response(cx: &mut Cx, ex: &mut Exchange, mut resp: Resp) -> Resp {
    let requested = ex.current_request
                      .as_ref()
                      .and_then(|r| r.msg().block2());

    if requested.is_none() && resp.payload().len() <= cx.config.msg.max_message_size {
      return resp;
    }

    let szx = requested.map(|b| b.szx())
                       .unwrap_or(u8::MAX)
                       .min(Self::preferred_szx(cx));
    let num = requested.map(|b| num_at_offset(b.offset(), szx))
                       .unwrap_or(0);

    let body = resp.payload().to_vec();
    let mut status = BlockwiseStatus::sending(body, szx);
    status.num = num;
    status.content_format = Self::content_format(resp.msg());
    status.observe = resp.msg().observe_seq();
    status.push = ex.request_block.is_some();

    let (bytes, more) = match status.block(num, szx) {
      | Some(block) => block,
      | None => {
        log::warn!("{:?} requested block2 {} is past the end of the body", ex.id(), num);
        let mut err = Resp::new(code::BAD_OPTION);
        err.msg_mut().token = resp.msg().token;
        return err;
      },
    };

    ex.response = Some(resp.clone());

    let total = status.body().len();
    let msg = resp.msg_mut();
    msg.set_block(known::BLOCK2, Block::from_szx(szx, num, more));
    if num == 0 {
      msg.set_size2(total as u64).ok();
    }
    resp.set_payload(bytes);
    resp.last = resp.last && !more;

    if more {
      log::debug!("{:?} sending {} byte response block-wise", ex.id(), total);
      let push = status.push;
      ex.response_block = Some(status);
      Self::touch(cx, ex);

      if push {
        Self::push_next(cx, ex);
      }
    } else {
      ex.response_block = None;
    }

    resp
  }

  fn push_next(cx: &mut Cx, ex: &mut Exchange) {
    let next = match (ex.response_block.as_mut(), ex.response.as_ref()) {
      | (Some(status), Some(whole)) if status.push => {
        let num = status.num + 1;
        status.num = num;
        status.block(num, status.szx)
              .map(|block| (block, num, status.szx, whole.clone()))
      },
      | _ => return,
    };

    if let Some(((bytes, more), num, szx, mut resp)) = next {
      resp.unprovision();
      resp.set_ty(Type::Con);
      let msg = resp.msg_mut();
      msg.remove(known::BLOCK1);
      msg.remove(known::SIZE2);
      msg.set_block(known::BLOCK2, Block::from_szx(szx, num, more));
      resp.set_payload(bytes);
      resp.last = !more;

      log::trace!("{:?} pushing block2 {}", ex.id(), num);
      if more {
        Self::touch(cx, ex);
      } else {
        ex.response_block = None;
        Self::settle(cx, ex);
      }
      cx.send_response_down(ex.id(), resp);
    }
  }

  fn content_format(msg: &Message) -> Option<u16> {
    msg.content_format().map(|f| u16::from(&f))
  }

  fn is_block_request(msg: &Message) -> bool {
    msg.block1().is_some() || msg.block2().is_some()
  }
}

impl Layer for Blockwise {
  fn send_request(&mut self, cx: &mut Cx, ex: &mut Exchange, mut req: Req) -> Flow<Req> {
    let oversized = req.payload().len() > cx.config.msg.max_message_size;

    if Self::is_block_request(req.msg()) || !oversized {
      return Flow::Next(req);
    }

    let szx = Self::preferred_szx(cx);
    let status = BlockwiseStatus::sending(req.payload().to_vec(), szx);
    let (bytes, more) = status.block(0, szx).unwrap_or_default();

    log::debug!("{:?} sending {} byte request block-wise", ex.id(), req.payload().len());

    req.msg_mut().set_size1(status.body().len() as u64).ok();
    req.msg_mut().set_block(known::BLOCK1, Block::from_szx(szx, 0, more));
    req.set_payload(bytes);

    ex.request_block = Some(status);
    Self::touch(cx, ex);
    Flow::Next(req)
  }

  fn send_response(&mut self, cx: &mut Cx, ex: &mut Exchange, mut resp: Resp) -> Flow<Resp> {
    if let Some(block1) = ex.block1_to_ack.take() {
      resp.msg_mut().set_block(known::BLOCK1, block1);
    }

    if resp.msg().block2().is_some() || !resp.is_success() {
      return Flow::Next(resp);
    }

    Flow::Next(Self::split_response(cx, ex, resp))
  }

  fn receive_request(&mut self, cx: &mut Cx, ex: &mut Exchange, req: Req) -> Flow<Req> {
    if let Some(block) = req.msg().block1() {
      return Self::upload_received(cx, ex, req, block);
    }

    match req.msg().block2() {
      | Some(block) if block.num() > 0 && ex.response_block.is_some() => {
        Self::serve_cached(cx, ex, &req, block);
        Flow::Stop
      },
      | _ => Flow::Next(req),
    }
  }

  fn receive_response(&mut self, cx: &mut Cx, ex: &mut Exchange, resp: Resp) -> Flow<Resp> {
    let uploading = ex.request_block
                      .as_ref()
                      .map(|s| !s.complete)
                      .unwrap_or(false);

    match resp.msg().block1() {
      | Some(block) if uploading && resp.code() == code::CONTINUE => {
        return Self::upload_continue(cx, ex, block);
      },
      | _ if uploading => {
        if let Some(status) = ex.request_block.as_mut() {
          status.complete = true;
        }
        Self::settle(cx, ex);
      },
      | _ => (),
    }

    match resp.msg().block2() {
      | Some(block) => Self::download(cx, ex, resp, block),
      | None => Flow::Next(resp),
    }
  }

  fn receive_empty(&mut self, cx: &mut Cx, ex: &mut Exchange, msg: Message) -> Flow<Message> {
    if !ex.is_local() && msg.is(Type::Ack) {
      Self::push_next(cx, ex);
    }

    Flow::Next(msg)
  }

  fn on_timer(&mut self, cx: &mut Cx, ex: &mut Exchange, kind: TimerKind) {
    if kind != TimerKind::BlockCleanup {
      return;
    }

    ex.timers.block_cleanup = None;
    ex.request_block = None;
    ex.response_block = None;

    if ex.is_local() {
      log::warn!("{:?} block-wise transfer abandoned", ex.id());
      cx.fail(ex.id(), Failure::BlockwiseFailed(code::REQUEST_ENTITY_INCOMPLETE));
    } else {
      log::debug!("{:?} discarding stale block-wise status", ex.id());
      cx.complete(ex);
    }
  }
}
