use std::time::Duration;

use toad_exchange::config::Config;
use toad_exchange::endpoint::{Endpoint, Event};
use toad_exchange::interceptor::LogInterceptor;
use toad_exchange::msg::Code;
use toad_exchange::net::Socket;
use toad_exchange::req::{Method, Req};
use toad_exchange::resp::code;
use toad_exchange::std::{net, Clock};

/// Pick the response for a request
fn route(req: &Req) -> (Code, Vec<u8>) {
  match (req.method(), req.path().as_str()) {
    | (Method::GET, "hello") => (code::CONTENT, b"hello, world".to_vec()),
    | (Method::GET, "big") => (code::CONTENT, (0..4096).map(|n| (n % 256) as u8).collect()),
    | (Method::POST, "echo") => (code::CHANGED, req.payload().to_vec()),
    | (_, "hello") | (_, "big") | (_, "echo") => (code::METHOD_NOT_ALLOWED, vec![]),
    | _ => (code::NOT_FOUND, vec![]),
  }
}

fn main() {
  simple_logger::init_with_level(log::Level::Debug).unwrap();

  let sock = net::bind("0.0.0.0:5683").unwrap();
  let mut ep = Endpoint::new(sock, Clock::new(), Config::default());
  ep.add_interceptor(Box::new(LogInterceptor));
  ep.start().unwrap();

  log::info!("listening on {:?}", Socket::local_addr(ep.socket()));

  loop {
    if let Err(e) = ep.poll() {
      log::error!("{:?}", e);
    }

    while let Some(event) = ep.next_event() {
      match event {
        | Event::Request(ex, req) => {
          let (code, body) = route(req.data());
          if let Err(e) = ep.respond(ex, code, body) {
            log::error!("{:?} failed to respond: {:?}", ex, e);
          }
        },
        | Event::Failed(ex, failure) => log::warn!("{:?} failed: {:?}", ex, failure),
        | Event::Response(..) => (),
      }
    }

    std::thread::sleep(Duration::from_millis(1));
  }
}
