use std::collections::HashMap;

use toad_stem::Stem;

use super::key::KeyMid;
use crate::config::{Dedup, DedupStrategy};
use crate::exchange::ExchangeId;
use crate::time::{Millis, Stamped};

/// Remembers recently received message ids so that
/// retransmissions can be recognized as duplicates.
///
/// Implementors must be safe to use through a shared reference.
pub trait Deduplicator: core::fmt::Debug {
  /// Record that `key` belongs to exchange `ex`.
  ///
  /// If `key` was already recorded, nothing is changed & the
  /// exchange it was recorded with is returned.
  fn find_previous(&self, key: KeyMid, ex: ExchangeId, now: u64) -> Option<ExchangeId>;

  /// Look up the exchange `key` was recorded with
  fn find(&self, key: &KeyMid) -> Option<ExchangeId>;

  /// Forget message ids that are too old to be retransmitted
  fn sweep(&self, now: u64);

  /// Forget everything
  fn clear(&self);

  /// Number of message ids remembered
  fn len(&self) -> usize;

  /// Are no message ids remembered?
  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Create the deduplicator selected by the config
pub fn from_config(cfg: &Dedup, exchange_lifetime: Millis) -> Box<dyn Deduplicator> {
  match cfg.strategy {
    | DedupStrategy::MarkAndSweep => Box::new(SweepDeduplicator::new(exchange_lifetime.0)),
    | DedupStrategy::CropRotation => Box::new(CropRotation::new(cfg.crop_rotation_period.0, 0)),
    | DedupStrategy::None => Box::new(NoDeduplicator),
  }
}

/// How often the deduplicator selected by the config should be swept
pub fn sweep_interval(cfg: &Dedup) -> Option<Millis> {
  match cfg.strategy {
    | DedupStrategy::MarkAndSweep => Some(cfg.mark_and_sweep_interval),
    | DedupStrategy::CropRotation => Some(cfg.crop_rotation_period),
    | DedupStrategy::None => None,
  }
}

/// Timestamps every entry and drops entries older than the
/// exchange lifetime whenever swept.
#[derive(Debug)]
pub struct SweepDeduplicator {
  map: Stem<HashMap<KeyMid, Stamped<ExchangeId>>>,
  lifetime: u64,
}

impl SweepDeduplicator {
  /// Create a deduplicator remembering ids for `lifetime` milliseconds
  pub fn new(lifetime: u64) -> Self {
    Self { map: Stem::new(HashMap::new()),
           lifetime }
  }
}

impl Deduplicator for SweepDeduplicator {
  fn find_previous(&self, key: KeyMid, ex: ExchangeId, now: u64) -> Option<ExchangeId> {
    self.map.map_mut(|map| match map.get(&key) {
              | Some(prev) => Some(prev.0),
              | None => {
                map.insert(key, Stamped(ex, now));
                None
              },
            })
  }

  fn find(&self, key: &KeyMid) -> Option<ExchangeId> {
    self.map.map_ref(|map| map.get(key).map(|s| s.0))
  }

  fn sweep(&self, now: u64) {
    let lifetime = self.lifetime;
    let swept = self.map.map_mut(|map| {
                          let before = map.len();
                          map.retain(|_, s| !s.expired(now, lifetime));
                          before - map.len()
                        });

    if swept > 0 {
      log::debug!("deduplicator forgot {} message ids", swept);
    }
  }

  fn clear(&self) {
    self.map.map_mut(|map| map.clear());
  }

  fn len(&self) -> usize {
    self.map.map_ref(|map| map.len())
  }
}

#[derive(Debug, Default)]
struct Generations {
  maps: [HashMap<KeyMid, ExchangeId>; 3],
  newest: usize,
  rotated_at: u64,
}

/// Keeps three generations of message ids; every period the
/// oldest generation is dropped and becomes the newest.
///
/// An id is remembered for at least two periods.
#[derive(Debug)]
pub struct CropRotation {
  gens: Stem<Generations>,
  period: u64,
}

impl CropRotation {
  /// Create a deduplicator rotating every `period` milliseconds, starting at `now`
  pub fn new(period: u64, now: u64) -> Self {
    Self { gens: Stem::new(Generations { rotated_at: now,
                                         ..Default::default() }),
           period }
  }
}

impl Deduplicator for CropRotation {
  fn find_previous(&self, key: KeyMid, ex: ExchangeId, _: u64) -> Option<ExchangeId> {
    self.gens.map_mut(|gens| {
               match gens.maps.iter().find_map(|m| m.get(&key).copied()) {
                 | Some(prev) => Some(prev),
                 | None => {
                   let newest = gens.newest;
                   gens.maps[newest].insert(key, ex);
                   None
                 },
               }
             })
  }

  fn find(&self, key: &KeyMid) -> Option<ExchangeId> {
    self.gens
        .map_ref(|gens| gens.maps.iter().find_map(|m| m.get(key).copied()))
  }

  fn sweep(&self, now: u64) {
    let period = self.period.max(1);
    self.gens.map_mut(|gens| {
               let mut rotations = 0;
               while now.saturating_sub(gens.rotated_at) >= period && rotations < 3 {
                 gens.newest = (gens.newest + 1) % 3;
                 let newest = gens.newest;
                 gens.maps[newest].clear();
                 gens.rotated_at += period;
                 rotations += 1;
               }

               if now.saturating_sub(gens.rotated_at) >= period {
                 gens.rotated_at = now;
               }
             });
  }

  fn clear(&self) {
    self.gens.map_mut(|gens| gens.maps.iter_mut().for_each(HashMap::clear));
  }

  fn len(&self) -> usize {
    self.gens
        .map_ref(|gens| gens.maps.iter().map(HashMap::len).sum())
  }
}

/// Never recognizes duplicates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDeduplicator;

impl Deduplicator for NoDeduplicator {
  fn find_previous(&self, _: KeyMid, _: ExchangeId, _: u64) -> Option<ExchangeId> {
    None
  }

  fn find(&self, _: &KeyMid) -> Option<ExchangeId> {
    None
  }

  fn sweep(&self, _: u64) {}

  fn clear(&self) {}

  fn len(&self) -> usize {
    0
  }
}
