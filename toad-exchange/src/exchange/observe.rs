use crate::config;
use crate::resp::Resp;
use crate::time::Stamped;

const SEQ_MASK: u32 = 0xFF_FFFF;
const SEQ_HALF: u32 = 1 << 23;

/// A standing subscription of a remote observer to a local resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserveRelation {
  /// Whether a successful notification has been sent
  pub established: bool,
  /// Whether the relation has been canceled (by RST, deregistration,
  /// an error notification or a timed out notification)
  pub canceled: bool,
  /// Notification postponed while a CON notification is in transit
  pub pending: Option<Resp>,
  seq: u32,
  check_count: u32,
  last_check: u64,
}

impl ObserveRelation {
  /// Create a new (not yet established) relation
  pub fn new(now: u64) -> Self {
    Self { established: false,
           canceled: false,
           pending: None,
           seq: 1,
           check_count: 0,
           last_check: now }
  }

  /// Sequence number for the next notification
  pub fn next_seq(&mut self) -> u32 {
    self.seq = (self.seq + 1) & SEQ_MASK;
    self.seq
  }

  /// Should the next notification be confirmable, to make sure the observer is
  /// still alive?
  ///
  /// A CON is forced every `check_interval_count` notifications, or when
  /// `check_interval_time` has elapsed since the last forced CON.
  pub fn check(&mut self, now: u64, config: &config::Observe) -> bool {
    self.check_count += 1;

    let check = now.saturating_sub(self.last_check) >= config.check_interval_time.0
                || self.check_count >= config.check_interval_count;

    if check {
      self.last_check = now;
      self.check_count = 0;
    }

    check
  }
}

/// State kept by an observer about the notifications it has seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientObserve {
  last: Option<Stamped<u32>>,
}

impl ClientObserve {
  /// Is a notification with sequence number `seq`, received at `now`,
  /// newer than the last one delivered?
  pub fn is_fresh(&self, seq: u32, now: u64, config: &config::Observe) -> bool {
    match self.last {
      | None => true,
      | Some(Stamped(v1, t1)) => {
        let v2 = seq;
        (v1 < v2 && v2 - v1 < SEQ_HALF)
        || (v1 > v2 && v1 - v2 > SEQ_HALF)
        || now > t1 + config.notification_max_age.0
      },
    }
  }

  /// Record a notification as the most recent one
  pub fn accept(&mut self, seq: u32, now: u64) {
    self.last = Some(Stamped(seq, now));
  }

  /// Sequence number of the most recent notification
  pub fn last_seq(&self) -> Option<u32> {
    self.last.map(|s| s.0)
  }
}
