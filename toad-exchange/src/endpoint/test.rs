use super::*;
use crate::msg::{Block, Id, MessageExt, MessageOptions, ObserveAction, Payload, Token, TokenExt};
use crate::req::Method;
use crate::resp::code;
use crate::test::{addr, ClockMock, Ether, SockMock};

type Ep = Endpoint<SockMock, ClockMock>;

const CLIENT: u16 = 1;
const SERVER: u16 = 2;

fn endpoint(ether: &Ether, clock: &ClockMock, n: u16, config: Config) -> Ep {
  let _ = simple_logger::init_with_level(log::Level::Trace);

  let mut ep = Endpoint::new(ether.sock(addr(n)), clock.clone(), config);
  ep.start().unwrap();
  ep
}

fn body(len: usize) -> Vec<u8> {
  (0..len).map(|n| (n % 251) as u8).collect()
}

/// A raw message as a peer without an endpoint would send it
fn raw(ty: Type, code: Code, id: u16, token: &[u8]) -> Message {
  Message::new(ty, code, Id(id), Token::from_slice(token))
}

/// Register interest in `temp` as the client would, answering with a first
/// (piggybacked) notification
fn observed(ether: &Ether, server: &mut Ep, id: u16, token: u8) -> ExchangeId {
  let mut get = raw(Type::Con, Code::GET, id, &[token]);
  get.set_path("temp").ok();
  get.set_observe(ObserveAction::Register).ok();

  ether.inject(addr(CLIENT), addr(SERVER), &get);
  server.poll().unwrap();

  match server.next_event() {
    | Some(Event::Request(ex, req)) => {
      assert!(req.data().is_observe_register());
      server.respond(ex, code::CONTENT, "20".bytes()).unwrap();
      ex
    },
    | other => panic!("{:?}", other),
  }
}

/// Poll both endpoints until the network is quiet, answering every request
/// the server receives with `respond`
fn converse(ether: &Ether,
            client: &mut Ep,
            server: &mut Ep,
            mut respond: impl FnMut(&Addrd<Req>) -> Resp) {
  for _ in 0..1_000 {
    client.poll().unwrap();
    server.poll().unwrap();

    while let Some(event) = server.next_event() {
      if let Event::Request(ex, req) = event {
        let mut resp = respond(&req);
        resp.msg_mut().token = req.data().msg().token;
        server.send_response(ex, resp).unwrap();
      }
    }

    if ether.waiting(addr(CLIENT)) == 0 && ether.waiting(addr(SERVER)) == 0 {
      return;
    }
  }

  panic!("endpoints never stopped talking");
}

/// Advance the clock to each deadline in turn until an event is produced
fn run_until_event(clock: &ClockMock, ep: &mut Ep) -> Event {
  for _ in 0..1_000 {
    if let Some(event) = ep.next_event() {
      return event;
    }

    let at = ep.next_deadline().expect("nothing scheduled");
    clock.set(at);
    ep.poll().unwrap();
  }

  panic!("no event");
}

#[test]
fn tokens_are_unique_per_endpoint() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut config = Config::default();
  config.msg.token_seed = 0xABCD;
  let mut client = endpoint(&ether, &clock, CLIENT, config);

  (0..3).for_each(|_| {
          client.send_request(Addrd(Req::get("a"), addr(9))).unwrap();
        });

  let tokens = ether.sent_from(addr(CLIENT))
                    .into_iter()
                    .map(|m| m.token)
                    .collect::<Vec<_>>();

  assert_eq!(tokens.len(), 3);
  assert!(tokens.iter().all(|t| t.as_bytes()[..2] == [0xAB, 0xCD]));
  assert_ne!(tokens[0], tokens[1]);
  assert_ne!(tokens[1], tokens[2]);
  assert_ne!(tokens[0], tokens[2]);
}

#[test]
fn piggybacked_round_trip() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  let sent = client.send_request(Addrd(Req::get("hello"), addr(SERVER)))
                   .unwrap();

  converse(&ether, &mut client, &mut server, |req| {
    assert_eq!(req.data().path(), "hello");
    let mut resp = Resp::new(code::CONTENT);
    resp.set_payload("hi!".bytes());
    resp
  });

  match client.next_event() {
    | Some(Event::Response(ex, resp)) => {
      assert_eq!(ex, sent);
      assert_eq!(resp.data().payload_str(), Some("hi!"));
      assert!(resp.data().msg().is(Type::Ack));
    },
    | other => panic!("{:?}", other),
  }

  assert!(client.exchange(sent).is_none());
  assert!(client.matcher().index_sizes().is_empty());
  assert_eq!(ether.sent().len(), 2);
}

#[test]
fn con_request_times_out_after_max_retransmit() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());

  let sent = client.send_request(Addrd(Req::get("a"), addr(9))).unwrap();

  let mut sends = vec![0u64];
  let failed_at = loop {
    if let Some(event) = client.next_event() {
      assert_eq!(event, Event::Failed(sent, Failure::TimedOut));
      break clock.get();
    }

    let before = ether.sent().len();
    clock.set(client.next_deadline().unwrap());
    client.poll().unwrap();
    if ether.sent().len() > before {
      sends.push(clock.get());
    }
  };

  let msgs = ether.sent_from(addr(CLIENT));
  assert_eq!(msgs.len(), 5);
  assert!(msgs.iter().all(|m| m.id == msgs[0].id && m.is(Type::Con)));

  let gaps = sends.windows(2).map(|w| w[1] - w[0]).collect::<Vec<_>>();
  assert!((2_000..=3_000).contains(&gaps[0]), "{:?}", gaps);
  gaps.windows(2)
      .for_each(|w| assert_eq!(w[1], w[0] * 2, "{:?}", gaps));
  assert_eq!(failed_at - sends[4], gaps[3] * 2);

  assert!(client.exchange(sent).is_none());
  assert!(client.matcher().index_sizes().is_empty());
}

#[test]
fn non_request_is_never_retransmitted() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());

  let sent = client.send_request(Addrd(Req::get("a").non(), addr(9)))
                   .unwrap();

  assert_eq!(run_until_event(&clock, &mut client),
             Event::Failed(sent, Failure::TimedOut));
  assert_eq!(clock.get(), 145_000);

  let msgs = ether.sent_from(addr(CLIENT));
  assert_eq!(msgs.len(), 1);
  assert!(msgs[0].is(Type::Non));
}

#[test]
fn duplicate_request_is_answered_from_cache() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  let mut get = raw(Type::Con, Code::GET, 7, &[1]);
  get.set_path("a").ok();

  ether.inject(addr(CLIENT), addr(SERVER), &get);
  server.poll().unwrap();

  let ex = match server.next_event() {
    | Some(Event::Request(ex, req)) => {
      assert_eq!(req.addr(), addr(CLIENT));
      ex
    },
    | other => panic!("{:?}", other),
  };
  server.respond(ex, code::CONTENT, "cached".bytes()).unwrap();

  ether.inject(addr(CLIENT), addr(SERVER), &get);
  server.poll().unwrap();

  let sent = ether.sent();
  assert_eq!(sent.len(), 2);
  assert_eq!(sent[0].bytes, sent[1].bytes);

  let resp = sent[0].msg();
  assert!(resp.is(Type::Ack));
  assert_eq!(resp.id, Id(7));
  assert_eq!(resp.token, Token::from_slice(&[1]));
  assert_eq!(server.next_event(), None);
}

#[test]
fn unfinished_duplicate_is_not_delivered_twice() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  let get = raw(Type::Con, Code::GET, 8, &[2]);
  ether.inject(addr(CLIENT), addr(SERVER), &get);
  ether.inject(addr(CLIENT), addr(SERVER), &get);
  server.poll().unwrap();
  server.poll().unwrap();

  assert!(matches!(server.next_event(), Some(Event::Request(_, _))));
  assert_eq!(server.next_event(), None);
  assert!(ether.sent().is_empty());
}

#[test]
fn separate_response_after_accept() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  ether.inject(addr(CLIENT), addr(SERVER), &raw(Type::Con, Code::GET, 9, &[3]));
  server.poll().unwrap();

  let ex = match server.next_event() {
    | Some(Event::Request(ex, _)) => ex,
    | other => panic!("{:?}", other),
  };

  server.accept(ex).unwrap();
  server.accept(ex).unwrap();
  server.respond(ex, code::CONTENT, "later".bytes()).unwrap();

  let sent = ether.sent_from(addr(SERVER));
  assert_eq!(sent.len(), 2);
  assert!(sent[0].is(Type::Ack) && sent[0].is_empty());
  assert_eq!(sent[0].id, Id(9));
  assert!(sent[1].is(Type::Con));
  assert_eq!(sent[1].code, code::CONTENT);

  // the client acknowledges the separate response
  let ack = Message::empty(Type::Ack, sent[1].id);
  ether.inject(addr(CLIENT), addr(SERVER), &ack);
  server.poll().unwrap();
  assert!(server.exchange(ex).map(|ex| ex.is_complete()).unwrap_or(true));
}

#[test]
fn piggybacked_response_with_wrong_id_is_rejected() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());

  let sent = client.send_request(Addrd(Req::get("a"), addr(SERVER)))
                   .unwrap();
  let req = ether.sent_from(addr(CLIENT)).remove(0);
  let mid = req.id.0;
  let token = req.token;

  let wrong = raw(Type::Ack, code::CONTENT, mid.wrapping_add(1), token.as_bytes());
  ether.inject(addr(SERVER), addr(CLIENT), &wrong);
  client.poll().unwrap();

  let rst = ether.sent_from(addr(CLIENT)).pop().unwrap();
  assert!(rst.is(Type::Reset) && rst.is_empty());
  assert_eq!(rst.id, Id(mid.wrapping_add(1)));
  assert_eq!(client.next_event(), None);

  let right = raw(Type::Ack, code::CONTENT, mid, token.as_bytes());
  ether.inject(addr(SERVER), addr(CLIENT), &right);
  client.poll().unwrap();
  assert!(matches!(client.next_event(), Some(Event::Response(ex, _)) if ex == sent));
}

#[test]
fn unexpected_con_response_is_reset() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());

  ether.inject(addr(SERVER),
               addr(CLIENT),
               &raw(Type::Con, code::CONTENT, 40, &[9, 9]));
  client.poll().unwrap();

  let rst = ether.sent_from(addr(CLIENT)).pop().unwrap();
  assert!(rst.is(Type::Reset));
  assert_eq!(rst.id, Id(40));
}

#[test]
fn ping_is_answered_with_reset() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  ether.inject(addr(CLIENT), addr(SERVER), &raw(Type::Con, Code::EMPTY, 55, &[]));
  server.poll().unwrap();

  let sent = ether.sent_from(addr(SERVER));
  assert_eq!(sent.len(), 1);
  assert!(sent[0].is(Type::Reset) && sent[0].is_empty());
  assert_eq!(sent[0].id, Id(55));
  assert_eq!(server.next_event(), None);
}

#[test]
fn malformed_message_is_answered_with_reset() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  // CON GET, MID 42, payload marker with no payload
  ether.inject_bytes(addr(CLIENT), addr(SERVER), vec![0x40, 0x01, 0x00, 0x2A, 0xFF]);
  server.poll().unwrap();

  // a malformed Reset is never answered
  ether.inject_bytes(addr(CLIENT), addr(SERVER), vec![0x70, 0x00, 0x00, 0x2B, 0xFF]);
  server.poll().unwrap();

  let sent = ether.sent_from(addr(SERVER));
  assert_eq!(sent.len(), 1);
  assert!(sent[0].is(Type::Reset));
  assert_eq!(sent[0].id, Id(42));
}

#[test]
fn block2_download_is_reassembled() {
  let ether = Ether::new();
  let clock = ClockMock::new();

  let mut config = Config::default();
  config.block.preferred_size = 64;
  config.msg.max_message_size = 64;

  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());
  let mut server = endpoint(&ether, &clock, SERVER, config);

  let sent = client.send_request(Addrd(Req::get("big"), addr(SERVER)))
                   .unwrap();

  let mut delivered = 0;
  converse(&ether, &mut client, &mut server, |_| {
    delivered += 1;
    let mut resp = Resp::new(code::CONTENT);
    resp.set_payload(body(300));
    resp
  });

  assert_eq!(delivered, 1);

  let blocks = ether.sent_from(addr(SERVER))
                    .into_iter()
                    .map(|m| m.block2().unwrap())
                    .collect::<Vec<_>>();
  assert_eq!(blocks.iter().map(Block::num).collect::<Vec<_>>(),
             vec![0, 1, 2, 3, 4]);
  assert!(blocks.iter().all(|b| b.size() == 64));
  assert!(!blocks[4].more());

  let first = ether.sent_from(addr(SERVER)).remove(0);
  assert_eq!(first.size2(), Some(300));

  match client.next_event() {
    | Some(Event::Response(ex, resp)) => {
      assert_eq!(ex, sent);
      assert_eq!(resp.data().payload(), body(300).as_slice());
      assert_eq!(resp.data().msg().block2(), None);
    },
    | other => panic!("{:?}", other),
  }
  assert_eq!(client.next_event(), None);
  assert!(client.matcher().index_sizes().is_empty());
}

#[test]
fn block1_upload_follows_smaller_block_size() {
  let ether = Ether::new();
  let clock = ClockMock::new();

  let mut client_config = Config::default();
  client_config.block.preferred_size = 64;
  client_config.msg.max_message_size = 64;

  let mut server_config = Config::default();
  server_config.block.preferred_size = 32;

  let mut client = endpoint(&ether, &clock, CLIENT, client_config);
  let mut server = endpoint(&ether, &clock, SERVER, server_config);

  let mut req = Req::post("upload");
  req.set_payload(body(300));
  let sent = client.send_request(Addrd(req, addr(SERVER))).unwrap();

  converse(&ether, &mut client, &mut server, |req| {
    assert_eq!(req.data().payload(), body(300).as_slice());
    Resp::new(code::CHANGED)
  });

  let blocks = ether.sent_from(addr(CLIENT))
                    .into_iter()
                    .map(|m| m.block1().unwrap())
                    .collect::<Vec<_>>();

  assert_eq!(blocks[0].size(), 64);
  assert!(blocks[1..].iter().all(|b| b.size() == 32));
  assert_eq!(blocks.iter().map(Block::num).collect::<Vec<_>>(),
             vec![0, 2, 3, 4, 5, 6, 7, 8, 9]);

  match client.next_event() {
    | Some(Event::Response(ex, resp)) => {
      assert_eq!(ex, sent);
      assert_eq!(resp.data().code(), code::CHANGED);
      assert_eq!(resp.data().msg().block1().map(|b| b.more()), Some(false));
    },
    | other => panic!("{:?}", other),
  }
}

#[test]
fn block2_random_access() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  let mut get = raw(Type::Con, Code::GET, 10, &[4]);
  get.set_block2(64, 2, false).ok();
  ether.inject(addr(CLIENT), addr(SERVER), &get);
  server.poll().unwrap();

  let ex = match server.next_event() {
    | Some(Event::Request(ex, _)) => ex,
    | other => panic!("{:?}", other),
  };
  server.respond(ex, code::CONTENT, body(300)).unwrap();

  let resp = ether.sent_from(addr(SERVER)).remove(0);
  assert_eq!(resp.block2(), Some(Block::new(64, 2, true)));
  assert_eq!(resp.payload.0, body(300)[128..192].to_vec());
  assert_eq!(resp.size2(), None);
}

#[test]
fn stale_notifications_are_acked_but_not_delivered() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());

  let sent = client.send_request(Addrd(Req::get("temp").observe(), addr(SERVER)))
                   .unwrap();
  let req = ether.sent_from(addr(CLIENT)).remove(0);
  let token = req.token;
  assert_eq!(req.observe_seq(), Some(0));

  let notification = |ty: Type, id: u16, seq: u32| {
    let mut msg = raw(ty, code::CONTENT, id, token.as_bytes());
    msg.set_observe_seq(seq);
    msg
  };

  ether.inject(addr(SERVER), addr(CLIENT), &notification(Type::Ack, req.id.0, 5));
  ether.inject(addr(SERVER), addr(CLIENT), &notification(Type::Con, 500, 3));
  ether.inject(addr(SERVER), addr(CLIENT), &notification(Type::Non, 501, 6));
  (0..3).for_each(|_| client.poll().unwrap());

  let seqs = core::iter::from_fn(|| client.next_event()).map(|e| match e {
                                                           | Event::Response(ex, resp) => {
                                                             assert_eq!(ex, sent);
                                                             resp.data().msg().observe_seq()
                                                           },
                                                           | other => panic!("{:?}", other),
                                                         })
                                                         .collect::<Vec<_>>();
  assert_eq!(seqs, vec![Some(5), Some(6)]);

  let ack = ether.sent_from(addr(CLIENT)).pop().unwrap();
  assert!(ack.is(Type::Ack));
  assert_eq!(ack.id, Id(500));

  // a response without Observe ends the observation
  ether.inject(addr(SERVER), addr(CLIENT), &raw(Type::Non, code::CONTENT, 502, token.as_bytes()));
  client.poll().unwrap();
  assert!(matches!(client.next_event(), Some(Event::Response(_, _))));
  assert!(client.exchange(sent).is_none());
}

#[test]
fn notification_timeout_cancels_relations_with_observer() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut config = Config::default();
  config.observe.check_interval_count = 1;
  let mut server = endpoint(&ether, &clock, SERVER, config);

  let register = |id: u16, token: u8| {
    let mut get = raw(Type::Con, Code::GET, id, &[token]);
    get.set_path("temp").ok();
    get.set_observe(ObserveAction::Register).ok();
    get
  };

  let relation = |server: &mut Ep, id: u16, token: u8| {
    ether.inject(addr(CLIENT), addr(SERVER), &register(id, token));
    server.poll().unwrap();
    match server.next_event() {
      | Some(Event::Request(ex, _)) => {
        server.respond(ex, code::CONTENT, "20".bytes()).unwrap();
        ex
      },
      | other => panic!("{:?}", other),
    }
  };

  let first = relation(&mut server, 1, 7);
  let second = relation(&mut server, 2, 8);

  let piggybacked = ether.sent_from(addr(SERVER));
  assert!(piggybacked.iter().all(|m| m.is(Type::Ack) && m.observe_seq().is_some()));

  server.respond(first, code::CONTENT, "21".bytes()).unwrap();

  let mut failures = vec![];
  while failures.len() < 2 {
    match run_until_event(&clock, &mut server) {
      | Event::Failed(ex, failure) => failures.push((ex, failure)),
      | other => panic!("{:?}", other),
    }
  }

  assert_eq!(failures,
             vec![(first, Failure::TimedOut), (second, Failure::Canceled)]);

  let notifications = ether.sent_from(addr(SERVER))
                           .into_iter()
                           .filter(|m| m.is(Type::Con))
                           .collect::<Vec<_>>();
  assert_eq!(notifications.len(), 5);
  assert!(notifications.iter()
                       .all(|m| m.token == Token::from_slice(&[7]) && m.id == notifications[0].id));

  // canceled relations send nothing more
  let before = ether.sent().len();
  server.respond(second, code::CONTENT, "22".bytes()).unwrap();
  assert_eq!(ether.sent().len(), before);
}

#[test]
fn cancel_ends_local_exchange() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());

  let sent = client.send_request(Addrd(Req::get("a"), addr(9))).unwrap();
  client.cancel(sent).unwrap();

  assert_eq!(client.next_event(), Some(Event::Failed(sent, Failure::Canceled)));
  assert!(client.exchange(sent).is_none());
  assert!(client.matcher().index_sizes().is_empty());
  assert!(client.cancel(sent).unwrap_err().is_unknown_exchange());
}

#[test]
fn remote_exchange_expires() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  ether.inject(addr(CLIENT), addr(SERVER), &raw(Type::Non, Code::GET, 11, &[5]));
  server.poll().unwrap();
  let ex = match server.next_event() {
    | Some(Event::Request(ex, _)) => ex,
    | other => panic!("{:?}", other),
  };
  server.respond(ex, code::CONTENT, "ok".bytes()).unwrap();

  let resp = ether.sent_from(addr(SERVER)).remove(0);
  assert!(resp.is(Type::Non));
  assert!(server.exchange(ex).unwrap().is_complete());

  clock.set(server.config().msg.exchange_lifetime.0);
  server.poll().unwrap();
  assert!(server.exchange(ex).is_none());
}

#[test]
fn stopped_endpoint_refuses_requests() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());
  client.stop();

  assert!(matches!(client.send_request(Addrd(Req::get("a"), addr(9))),
                   Err(Error::NotRunning)));

  let sock = client.destroy();
  assert_eq!(sock.addr, addr(CLIENT));
}

#[test]
fn acknowledged_request_without_response_times_out() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());

  let sent = client.send_request(Addrd(Req::get("slow"), addr(SERVER)))
                   .unwrap();
  let req = ether.sent_from(addr(CLIENT)).remove(0);

  ether.inject(addr(SERVER), addr(CLIENT), &Message::empty(Type::Ack, req.id));
  client.poll().unwrap();
  assert_eq!(client.next_event(), None);
  assert!(!client.exchange(sent).unwrap().is_retransmitting());

  assert_eq!(run_until_event(&clock, &mut client),
             Event::Failed(sent, Failure::TimedOut));
  assert_eq!(clock.get(), client.config().msg.exchange_lifetime.0);

  assert_eq!(ether.sent_from(addr(CLIENT)).len(), 1);
  assert!(client.exchange(sent).is_none());
  assert!(client.matcher().index_sizes().is_empty());
}

#[test]
fn separate_response_after_empty_ack() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut client = endpoint(&ether, &clock, CLIENT, Config::default());

  let sent = client.send_request(Addrd(Req::get("slow"), addr(SERVER)))
                   .unwrap();
  let req = ether.sent_from(addr(CLIENT)).remove(0);

  ether.inject(addr(SERVER), addr(CLIENT), &Message::empty(Type::Ack, req.id));
  client.poll().unwrap();

  let mut separate = raw(Type::Con, code::CONTENT, 600, req.token.as_bytes());
  separate.payload = Payload(b"done".to_vec());
  ether.inject(addr(SERVER), addr(CLIENT), &separate);
  client.poll().unwrap();

  match client.next_event() {
    | Some(Event::Response(ex, resp)) => {
      assert_eq!(ex, sent);
      assert_eq!(resp.data().payload_str(), Some("done"));
    },
    | other => panic!("{:?}", other),
  }

  let ack = ether.sent_from(addr(CLIENT)).pop().unwrap();
  assert!(ack.is(Type::Ack) && ack.is_empty());
  assert_eq!(ack.id, Id(600));
  assert!(client.exchange(sent).is_none());

  clock.set(client.config().msg.exchange_lifetime.0 + 1);
  client.poll().unwrap();
  assert_eq!(client.next_event(), None);
}

#[test]
fn block1_upload_answered_with_pushed_blocks() {
  let ether = Ether::new();
  let clock = ClockMock::new();

  let config = || {
    let mut config = Config::default();
    config.block.preferred_size = 64;
    config.msg.max_message_size = 64;
    config
  };

  let mut client = endpoint(&ether, &clock, CLIENT, config());
  let mut server = endpoint(&ether, &clock, SERVER, config());

  let answer = body(300).into_iter().rev().collect::<Vec<_>>();

  let mut req = Req::post("upload");
  req.set_payload(body(300));
  let sent = client.send_request(Addrd(req, addr(SERVER))).unwrap();

  converse(&ether, &mut client, &mut server, |req| {
    assert_eq!(req.data().payload(), body(300).as_slice());
    let mut resp = Resp::new(code::CONTENT);
    resp.set_payload(answer.clone());
    resp
  });

  let pushed = ether.sent_from(addr(SERVER))
                    .into_iter()
                    .filter(|m| m.block2().is_some())
                    .collect::<Vec<_>>();

  assert_eq!(pushed.iter()
                   .map(|m| m.block2().map(|b| b.num()))
                   .collect::<Vec<_>>(),
             vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);

  // the first block answers the last request block & echoes its Block1
  assert!(pushed[0].is(Type::Ack));
  assert_eq!(pushed[0].block1(), Some(Block::new(64, 4, false)));
  assert!(pushed[1..].iter()
                     .all(|m| m.is(Type::Con) && m.block1().is_none()));

  match client.next_event() {
    | Some(Event::Response(ex, resp)) => {
      assert_eq!(ex, sent);
      assert_eq!(resp.data().code(), code::CONTENT);
      assert_eq!(resp.data().payload(), answer.as_slice());
    },
    | other => panic!("{:?}", other),
  }
  assert_eq!(client.next_event(), None);
  assert!(client.exchange(sent).is_none());
}

#[test]
fn out_of_order_block1_is_rejected() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  let block = |id: u16, num: u32| {
    let mut post = raw(Type::Con, Method::POST.code(), id, &[6]);
    post.set_path("upload").ok();
    post.set_block1(64, num, true).ok();
    post.payload = Payload(body(64));
    post
  };

  ether.inject(addr(CLIENT), addr(SERVER), &block(20, 0));
  server.poll().unwrap();
  ether.inject(addr(CLIENT), addr(SERVER), &block(21, 2));
  server.poll().unwrap();

  let sent = ether.sent_from(addr(SERVER));
  assert_eq!(sent.len(), 2);

  assert_eq!(sent[0].code, code::CONTINUE);
  assert_eq!(sent[0].block1(), Some(Block::new(64, 0, true)));

  assert!(sent[1].is(Type::Ack));
  assert_eq!(sent[1].id, Id(21));
  assert_eq!(sent[1].token, Token::from_slice(&[6]));
  assert_eq!(sent[1].code, code::REQUEST_ENTITY_INCOMPLETE);

  assert_eq!(server.next_event(), None);
}

#[test]
fn reset_notification_cancels_relation() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  let ex = observed(&ether, &mut server, 1, 7);
  server.respond(ex, code::CONTENT, "21".bytes()).unwrap();

  let notification = ether.sent_from(addr(SERVER)).pop().unwrap();
  assert!(notification.is(Type::Non));
  assert!(notification.observe_seq().is_some());

  ether.inject(addr(CLIENT),
               addr(SERVER),
               &Message::empty(Type::Reset, notification.id));
  server.poll().unwrap();

  assert!(server.exchange(ex).unwrap().is_complete());
  assert_eq!(server.next_event(), None);

  let before = ether.sent().len();
  server.respond(ex, code::CONTENT, "22".bytes()).unwrap();
  assert_eq!(ether.sent().len(), before);
}

#[test]
fn observe_deregistration_ends_relation() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut server = endpoint(&ether, &clock, SERVER, Config::default());

  let first = observed(&ether, &mut server, 1, 7);

  let mut get = raw(Type::Con, Code::GET, 2, &[7]);
  get.set_path("temp").ok();
  get.set_observe(ObserveAction::Deregister).ok();
  ether.inject(addr(CLIENT), addr(SERVER), &get);
  server.poll().unwrap();

  let events = core::iter::from_fn(|| server.next_event()).collect::<Vec<_>>();
  assert_eq!(events.len(), 2);
  assert!(events.contains(&Event::Failed(first, Failure::Canceled)));

  let second = events.iter()
                     .find_map(|e| match e {
                       | Event::Request(ex, req) => {
                         assert!(req.data().is_observe_deregister());
                         Some(*ex)
                       },
                       | _ => None,
                     })
                     .unwrap();

  server.respond(second, code::CONTENT, "20".bytes()).unwrap();
  let resp = ether.sent_from(addr(SERVER)).pop().unwrap();
  assert!(resp.is(Type::Ack));
  assert_eq!(resp.id, Id(2));
  assert_eq!(resp.observe_seq(), None);

  let before = ether.sent().len();
  server.respond(first, code::CONTENT, "21".bytes()).unwrap();
  assert_eq!(ether.sent().len(), before);
}

#[test]
fn notification_postponed_while_con_in_transit() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut config = Config::default();
  config.observe.check_interval_count = 1;
  let mut server = endpoint(&ether, &clock, SERVER, config);

  let ex = observed(&ether, &mut server, 1, 7);
  server.respond(ex, code::CONTENT, "21".bytes()).unwrap();

  let in_transit = ether.sent_from(addr(SERVER)).pop().unwrap();
  assert!(in_transit.is(Type::Con));

  server.respond(ex, code::CONTENT, "22".bytes()).unwrap();
  server.respond(ex, code::CONTENT, "23".bytes()).unwrap();
  assert_eq!(ether.sent_from(addr(SERVER)).len(), 2);

  ether.inject(addr(CLIENT),
               addr(SERVER),
               &Message::empty(Type::Ack, in_transit.id));
  server.poll().unwrap();

  let sent = ether.sent_from(addr(SERVER));
  assert_eq!(sent.len(), 3);

  let newest = &sent[2];
  assert!(newest.is(Type::Con));
  assert_ne!(newest.id, in_transit.id);
  assert_eq!(newest.token, Token::from_slice(&[7]));
  assert_eq!(newest.payload.0, b"23".to_vec());
  assert!(newest.observe_seq() > in_transit.observe_seq());
  assert_eq!(server.next_event(), None);
}

#[test]
fn postponed_notification_replaces_one_due_for_retransmission() {
  let ether = Ether::new();
  let clock = ClockMock::new();
  let mut config = Config::default();
  config.observe.check_interval_count = 1;
  config.block.preferred_size = 64;
  config.msg.max_message_size = 64;
  let mut server = endpoint(&ether, &clock, SERVER, config);

  let ex = observed(&ether, &mut server, 1, 7);
  server.respond(ex, code::CONTENT, "21".bytes()).unwrap();

  let in_transit = ether.sent_from(addr(SERVER)).pop().unwrap();
  assert!(in_transit.is(Type::Con));

  let mut big = Resp::new(code::CONTENT);
  big.set_payload(body(300));
  server.send_response(ex, big).unwrap();
  assert_eq!(ether.sent_from(addr(SERVER)).len(), 2);

  let advance_until_sent = |server: &mut Ep| {
    let before = ether.sent().len();
    for _ in 0..10 {
      clock.set(server.next_deadline().expect("nothing scheduled"));
      server.poll().unwrap();
      if ether.sent().len() > before {
        return;
      }
    }
    panic!("nothing was sent");
  };

  advance_until_sent(&mut server);

  let sent = ether.sent_from(addr(SERVER));
  assert_eq!(sent.len(), 3);

  let replacement = sent[2].clone();
  assert!(replacement.is(Type::Con));
  assert_ne!(replacement.id, in_transit.id);
  assert_eq!(replacement.token, Token::from_slice(&[7]));
  assert_eq!(replacement.block2(), Some(Block::new(64, 0, true)));
  assert_eq!(replacement.size2(), Some(300));
  assert_eq!(replacement.payload.0, body(300)[..64].to_vec());
  assert!(replacement.observe_seq() > in_transit.observe_seq());

  // only the replacement is retransmitted from now on
  advance_until_sent(&mut server);

  let sent = ether.sent_from(addr(SERVER));
  assert_eq!(sent.len(), 4);
  assert_eq!(sent[3].id, replacement.id);
  assert_eq!(sent.iter().filter(|m| m.id == in_transit.id).count(), 1);
}
