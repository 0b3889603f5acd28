use core::hash::Hash;
use core::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::collections::HashMap;

use rand::Rng;
use toad_stem::Stem;

use crate::config::Config;
use crate::exchange::{Exchange, ExchangeId, Exchanges};
use crate::msg::{Id, Message, MessageExt, MessageOptions, Type};
use crate::net::Addrd;
use crate::req::Req;
use crate::resp::Resp;

/// Message deduplication
pub mod dedup;

/// Index keys
pub mod key;

pub use dedup::Deduplicator;
pub use key::{KeyMid, KeyToken, KeyUri};

/// Outcome of matching an incoming request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMatch {
  /// A request we have never seen; an exchange with this id should be created
  New(ExchangeId),
  /// The next block of a block-wise transfer in progress
  Continue(ExchangeId),
  /// A retransmission of a request we have already seen
  Duplicate(ExchangeId),
}

/// Outcome of matching an incoming response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMatch {
  /// A response to one of our requests
  Matched(ExchangeId),
  /// A retransmission of a response we have already seen.
  ///
  /// The exchange may have already completed & been forgotten.
  Duplicate(ExchangeId),
  /// Unexpected; the peer should be sent a Reset
  Reject,
  /// Unexpected, but Acknowledgements are never answered with a Reset
  Ignore,
}

#[derive(Debug, Clone, Default)]
struct Owned {
  request_mid: Option<KeyMid>,
  response_mid: Option<KeyMid>,
  token: Option<KeyToken>,
  uri: Option<KeyUri>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
  Request,
  Response,
}

/// Sizes of the matcher's indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexSizes {
  /// Entries keyed by message id
  pub mid: usize,
  /// Entries keyed by token
  pub token: usize,
  /// Entries keyed by uri
  pub uri: usize,
  /// Exchanges owning at least one entry
  pub owners: usize,
}

impl IndexSizes {
  /// Are all indexes empty?
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

/// Maps wire messages to exchanges.
///
/// The matcher assigns message ids to outgoing messages, indexes
/// outgoing messages so that ACKs, RSTs and responses can find their
/// exchange, and detects duplicates of incoming messages.
///
/// Every index is safe to use through a shared reference; inserts &
/// removals are symmetric, and completing an exchange removes every
/// entry it owns.
#[derive(Debug)]
pub struct Matcher {
  by_mid: Stem<HashMap<KeyMid, ExchangeId>>,
  by_token: Stem<HashMap<KeyToken, ExchangeId>>,
  by_uri: Stem<HashMap<KeyUri, ExchangeId>>,
  owned: Stem<HashMap<ExchangeId, Owned>>,
  dedup: Box<dyn Deduplicator>,
  mid: AtomicU16,
  exchange_ids: AtomicU64,
}

fn remove_if_owned<K: Eq + Hash>(map: &Stem<HashMap<K, ExchangeId>>, key: &K, ex: ExchangeId) {
  map.map_mut(|m| {
       if m.get(key) == Some(&ex) {
         m.remove(key);
       }
     });
}

impl Matcher {
  /// Create a matcher, picking the first message id at random
  /// if the config asks for it.
  pub fn new(config: &Config, rng: &mut impl Rng) -> Self {
    let mid = if config.msg.use_random_mid_start {
      rng.gen()
    } else {
      0
    };

    Self::with_deduplicator(dedup::from_config(&config.dedup, config.msg.exchange_lifetime), mid)
  }

  /// Create a matcher with a specific deduplicator & first message id
  pub fn with_deduplicator(dedup: Box<dyn Deduplicator>, first_mid: u16) -> Self {
    Self { by_mid: Stem::new(HashMap::new()),
           by_token: Stem::new(HashMap::new()),
           by_uri: Stem::new(HashMap::new()),
           owned: Stem::new(HashMap::new()),
           dedup,
           mid: AtomicU16::new(first_mid),
           exchange_ids: AtomicU64::new(1) }
  }

  /// Generate a message id.
  ///
  /// `Id(0)` marks an unprovisioned message and is never generated.
  pub fn next_mid(&self) -> Id {
    loop {
      match self.mid.fetch_add(1, Ordering::Relaxed) {
        | 0 => continue,
        | n => break Id(n),
      }
    }
  }

  fn provision_mid(&self, msg: &mut Message) -> Id {
    if msg.id == Id(0) {
      msg.id = self.next_mid();
    }
    msg.id
  }

  /// Generate an exchange id
  pub fn next_exchange_id(&self) -> ExchangeId {
    ExchangeId(self.exchange_ids.fetch_add(1, Ordering::Relaxed))
  }

  fn index_mid(&self, ex: ExchangeId, key: KeyMid, role: Role) {
    let prev = self.owned.map_mut(|owned| {
                           let entry = owned.entry(ex).or_default();
                           let slot = match role {
                             | Role::Request => &mut entry.request_mid,
                             | Role::Response => &mut entry.response_mid,
                           };
                           slot.replace(key).filter(|prev| *prev != key)
                         });

    if let Some(prev) = prev {
      remove_if_owned(&self.by_mid, &prev, ex);
    }

    self.by_mid.map_mut(|m| m.insert(key, ex));
  }

  fn index_token(&self, ex: ExchangeId, key: KeyToken) {
    self.owned.map_mut(|owned| owned.entry(ex).or_default().token = Some(key));
    self.by_token.map_mut(|m| m.insert(key, ex));
  }

  fn index_uri(&self, ex: ExchangeId, key: KeyUri) {
    let prev = self.owned.map_mut(|owned| {
                           owned.entry(ex)
                                .or_default()
                                .uri
                                .replace(key.clone())
                                .filter(|prev| *prev != key)
                         });

    if let Some(prev) = prev {
      remove_if_owned(&self.by_uri, &prev, ex);
    }

    self.by_uri.map_mut(|m| m.insert(key.clone(), ex));
  }

  /// Provision & index a request before it is sent
  pub fn send_request(&self, ex: &Exchange, req: &mut Req) {
    let id = self.provision_mid(req.msg_mut());
    self.index_mid(ex.id(), KeyMid::new(id, ex.peer()), Role::Request);
    self.index_token(ex.id(), KeyToken::new(req.msg().token, ex.peer()));

    log::trace!("{:?} request indexed with {:?}", ex.id(), id);
  }

  /// Provision & index a response before it is sent.
  ///
  /// Separate responses & notifications are indexed by their message id
  /// to match the peer's ACK or RST, and responses carrying a block of a
  /// larger body are indexed by uri so that requests for further blocks
  /// find this exchange.
  ///
  /// Piggybacked responses already carry the id of the request they answer.
  pub fn send_response(&self, ex: &Exchange, resp: &mut Resp) {
    if !resp.msg().is(Type::Ack) {
      let id = self.provision_mid(resp.msg_mut());
      self.index_mid(ex.id(), KeyMid::new(id, ex.peer()), Role::Response);
    }

    let more_blocks = resp.msg().block2().map(|b| b.more()).unwrap_or(false);
    let uri = ex.request
                .as_ref()
                .or(ex.current_request.as_ref())
                .map(|r| r.msg().uri_key());

    match uri {
      | Some(uri) if more_blocks => self.index_uri(ex.id(), KeyUri::new(uri, ex.peer())),
      | _ => (),
    }
  }

  /// Provision an empty message before it is sent.
  ///
  /// ACKs & RSTs carry the id of the message they answer and are left alone.
  pub fn send_empty(&self, _: &Exchange, msg: &mut Message) {
    if matches!(msg.ty, Type::Con | Type::Non) {
      self.provision_mid(msg);
    }
  }

  /// Match an incoming request to an exchange
  pub fn receive_request(&self, req: &Addrd<Req>, now: u64) -> RequestMatch {
    let msg = req.data().msg();
    let peer = req.addr();
    let mid_key = KeyMid::new(msg.id, peer);

    let block = msg.block1().or_else(|| msg.block2());
    let uri_key = block.map(|_| KeyUri::new(msg.uri_key(), peer));

    let continuing = match (block, &uri_key) {
      | (Some(block), Some(key)) if block.num() > 0 => {
        self.by_uri.map_ref(|m| m.get(key).copied())
      },
      | _ => None,
    };

    match continuing {
      | Some(ex) => match self.dedup.find_previous(mid_key, ex, now) {
        | Some(prev) => RequestMatch::Duplicate(prev),
        | None => {
          log::debug!("{:?} block-wise continuation from {:?}", ex, peer);
          RequestMatch::Continue(ex)
        },
      },
      | None => {
        let ex = self.next_exchange_id();
        match self.dedup.find_previous(mid_key, ex, now) {
          | Some(prev) => {
            log::debug!("{:?} duplicate request {:?} from {:?}", prev, mid_key.id, peer);
            RequestMatch::Duplicate(prev)
          },
          | None => {
            if let Some(key) = uri_key {
              self.index_uri(ex, key);
            }
            RequestMatch::New(ex)
          },
        }
      },
    }
  }

  /// Match an incoming response to one of our exchanges
  pub fn receive_response(&self,
                          resp: &Addrd<Resp>,
                          exchanges: &Exchanges,
                          now: u64)
                          -> ResponseMatch {
    let msg = resp.data().msg();
    let peer = resp.addr();
    let mid_key = KeyMid::new(msg.id, peer);
    let token_key = KeyToken::new(msg.token, peer);

    let ex = self.by_token
                 .map_ref(|m| m.get(&token_key).copied())
                 .and_then(|id| exchanges.get(id));

    match ex {
      | Some(ex) if msg.is(Type::Ack) => {
        if ex.request_id() == Some(msg.id) {
          ResponseMatch::Matched(ex.id())
        } else {
          log::warn!("{:?} piggybacked response {:?} does not match request {:?}, rejecting",
                     ex.id(),
                     msg.id,
                     ex.request_id());
          ResponseMatch::Reject
        }
      },
      | Some(ex) => match self.dedup.find_previous(mid_key, ex.id(), now) {
        | Some(prev) => ResponseMatch::Duplicate(prev),
        | None => ResponseMatch::Matched(ex.id()),
      },
      | None => match self.dedup.find(&mid_key) {
        | Some(prev) => {
          log::debug!("{:?} late duplicate response {:?}", prev, mid_key.id);
          ResponseMatch::Duplicate(prev)
        },
        | None if msg.is(Type::Ack) => {
          log::warn!("ignoring unexpected ACK response {:?} from {:?}", msg.id, peer);
          ResponseMatch::Ignore
        },
        | None => {
          log::warn!("rejecting unexpected response {:?} from {:?}", msg.id, peer);
          ResponseMatch::Reject
        },
      },
    }
  }

  /// Match an incoming ACK or RST to the exchange whose message it refers to
  pub fn receive_empty(&self, msg: &Addrd<Message>) -> Option<ExchangeId> {
    let key = KeyMid::new(msg.data().id, msg.addr());
    let ex = self.by_mid.map_ref(|m| m.get(&key).copied());

    if ex.is_none() {
      log::debug!("ignoring unmatched empty message {:?} from {:?}",
                  key.id,
                  key.peer);
    }

    ex
  }

  /// Remove every index entry owned by a completed exchange
  pub fn exchange_completed(&self, ex: ExchangeId) {
    let owned = match self.owned.map_mut(|owned| owned.remove(&ex)) {
      | Some(owned) => owned,
      | None => return,
    };

    [owned.request_mid, owned.response_mid].iter()
                                           .flatten()
                                           .for_each(|key| remove_if_owned(&self.by_mid, key, ex));

    if let Some(key) = owned.token {
      remove_if_owned(&self.by_token, &key, ex);
    }

    if let Some(key) = owned.uri {
      remove_if_owned(&self.by_uri, &key, ex);
    }

    log::trace!("{:?} removed from matcher", ex);
  }

  /// Let the deduplicator forget old message ids
  pub fn sweep(&self, now: u64) {
    self.dedup.sweep(now);
  }

  /// Number of message ids the deduplicator remembers
  pub fn dedup_len(&self) -> usize {
    self.dedup.len()
  }

  /// Sizes of every index
  pub fn index_sizes(&self) -> IndexSizes {
    IndexSizes { mid: self.by_mid.map_ref(|m| m.len()),
                 token: self.by_token.map_ref(|m| m.len()),
                 uri: self.by_uri.map_ref(|m| m.len()),
                 owners: self.owned.map_ref(|m| m.len()) }
  }

  /// Forget everything
  pub fn clear(&self) {
    self.by_mid.map_mut(|m| m.clear());
    self.by_token.map_mut(|m| m.clear());
    self.by_uri.map_mut(|m| m.clear());
    self.owned.map_mut(|m| m.clear());
    self.dedup.clear();
  }
}
