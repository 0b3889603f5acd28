use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Milliseconds elapsed between the clock's epoch and `instant`
///
/// Instants too far from the epoch to be represented saturate to `u64::MAX`.
pub fn millis_since_epoch<C: Clock>(instant: Instant<C>) -> u64 {
  Millis::try_from(instant.duration_since_epoch()).map(|Milliseconds(ms)| ms)
                                                  .unwrap_or(u64::MAX)
}

/// Read the current time from a clock, in milliseconds since its epoch
pub fn now<C: Clock>(clock: &C) -> Result<u64, embedded_time::clock::Error> {
  clock.try_now().map(millis_since_epoch)
}

/// Data associated with a timestamp (milliseconds since the clock's epoch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamped<T>(pub T, pub u64);

impl<T> Stamped<T> {
  /// Borrow the data
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Time the data was stamped at
  pub fn time(&self) -> u64 {
    self.1
  }

  /// Has more than `lifetime` elapsed since this was stamped?
  pub fn expired(&self, now: u64, lifetime: u64) -> bool {
    now.saturating_sub(self.1) > lifetime
  }

  /// Discard the timestamp
  pub fn discard_timestamp(self) -> T {
    self.0
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::test::ClockMock;

  #[test]
  fn millis() {
    let clock = ClockMock::new();
    clock.set(1234);
    assert_eq!(now(&clock).unwrap(), 1234);
  }

  #[test]
  fn expiry() {
    let s = Stamped((), 100);
    assert!(!s.expired(150, 50));
    assert!(s.expired(151, 50));
    assert!(!s.expired(0, 50));
  }
}
