use std::net::UdpSocket;
use std::time::{Duration, Instant};

use toad_exchange::config::Config;
use toad_exchange::endpoint::{Endpoint, Event};
use toad_exchange::exchange::Failure;
use toad_exchange::net::{Addrd, Socket};
use toad_exchange::req::Req;
use toad_exchange::resp::code;
use toad_exchange::std::Clock;

type Ep = Endpoint<UdpSocket, Clock>;

fn endpoint(config: Config) -> Ep {
  let sock = toad_exchange::std::net::bind("127.0.0.1:0").unwrap();
  let mut ep = Endpoint::new(sock, Clock::new(), config);
  ep.start().unwrap();
  ep
}

/// Drive both endpoints, serving every request with `body`,
/// until the client produces an event
fn exchange(client: &mut Ep, server: &mut Ep, body: &[u8]) -> Event {
  let deadline = Instant::now() + Duration::from_secs(5);

  while Instant::now() < deadline {
    server.poll().unwrap();
    while let Some(event) = server.next_event() {
      if let Event::Request(ex, _) = event {
        server.respond(ex, code::CONTENT, body.iter().copied())
              .unwrap();
      }
    }

    client.poll().unwrap();
    if let Some(event) = client.next_event() {
      return event;
    }

    std::thread::sleep(Duration::from_millis(1));
  }

  panic!("timed out waiting for a response");
}

#[test]
fn get_over_udp() {
  let mut server = endpoint(Config::default());
  let mut client = endpoint(Config::default());
  let addr = Socket::local_addr(server.socket());

  let sent = client.send_request(Addrd(Req::get("hello"), addr)).unwrap();

  match exchange(&mut client, &mut server, b"hello, world") {
    | Event::Response(ex, resp) => {
      assert_eq!(ex, sent);
      assert_eq!(resp.data().payload_str(), Some("hello, world"));
    },
    | other => panic!("{:?}", other),
  }
}

#[test]
fn large_body_over_udp() {
  let mut config = Config::default();
  config.block.preferred_size = 128;
  config.msg.max_message_size = 128;

  let mut server = endpoint(config);
  let mut client = endpoint(Config::default());
  let addr = Socket::local_addr(server.socket());
  let body = (0..2_000).map(|n| (n % 256) as u8).collect::<Vec<_>>();

  let sent = client.send_request(Addrd(Req::get("big"), addr)).unwrap();

  match exchange(&mut client, &mut server, &body) {
    | Event::Response(ex, resp) => {
      assert_eq!(ex, sent);
      assert_eq!(resp.data().payload(), body.as_slice());
    },
    | other => panic!("{:?}", other),
  }
}

#[test]
fn canceled_request_reports_failure() {
  let mut client = endpoint(Config::default());
  let nobody = toad_exchange::std::net::bind("127.0.0.1:0").unwrap();

  let sent = client.send_request(Addrd(Req::get("a"), Socket::local_addr(&nobody)))
                   .unwrap();
  client.cancel(sent).unwrap();

  match client.next_event() {
    | Some(Event::Failed(ex, Failure::Canceled)) => assert_eq!(ex, sent),
    | other => panic!("{:?}", other),
  }
}
