use core::ops::RangeInclusive;

use embedded_time::duration::Milliseconds;
use rand::Rng;

use crate::time::Millis;

/// Back-off state for one message that is being retransmitted.
///
/// It does not _contain_ the work to be done, nor does it keep
/// time; the endpoint's scheduler fires once [`RetryTimer::timeout`]
/// has elapsed and the owner of the timer asks what it should do next.
///
/// ```
/// use embedded_time::duration::Milliseconds;
/// use rand::SeedableRng;
/// use toad_exchange::retry;
///
/// let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
/// let strategy = retry::Strategy::Exponential { init_min: Milliseconds(2_000),
///                                               init_max: Milliseconds(3_000),
///                                               scale: 2.0 };
/// let mut retry = retry::RetryTimer::new(strategy, retry::Attempts(2), &mut rng);
/// let first = retry.timeout();
/// assert!((2_000..=3_000).contains(&first.0));
///
/// assert_eq!(retry.what_should_i_do(), retry::YouShould::Retry);
/// assert_eq!(retry.timeout(), Milliseconds(first.0 * 2));
/// assert_eq!(retry.what_should_i_do(), retry::YouShould::Retry);
/// assert_eq!(retry.what_should_i_do(), retry::YouShould::Cry);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryTimer {
  strategy: Strategy,
  timeout: Millis,
  attempts: Attempts,
  max_attempts: Attempts,
}

/// A number of attempts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attempts(pub u16);

/// Result of [`RetryTimer::what_should_i_do`].
///
/// This tells you if a retry should be attempted or not.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted and the work that is
  /// being retried should be considered poisoned.
  Cry,
  /// A retry should be performed
  Retry,
}

impl RetryTimer {
  /// Create a new retrier, picking the first timeout
  pub fn new(strategy: Strategy, max_attempts: Attempts, rng: &mut impl Rng) -> Self {
    Self { strategy,
           timeout: strategy.initial(rng),
           attempts: Attempts(0),
           max_attempts }
  }

  /// How long to wait before the next attempt
  pub fn timeout(&self) -> Millis {
    self.timeout
  }

  /// Number of retries performed so far
  pub fn attempts(&self) -> Attempts {
    self.attempts
  }

  /// When the thing we keep trying times out, invoke this to
  /// tell the retrytimer "it failed again! what do I do??"
  ///
  /// On [`YouShould::Retry`] the timeout has been advanced
  /// according to the [`Strategy`].
  pub fn what_should_i_do(&mut self) -> YouShould {
    if self.attempts >= self.max_attempts {
      YouShould::Cry
    } else {
      self.attempts.0 += 1;
      self.timeout = self.strategy.next(self.timeout);
      YouShould::Retry
    }
  }
}

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
  /// Generate a random delay between `init_min` and `init_max`,
  /// and wait until this delay has passed before the first retry.
  ///
  /// After each failed attempt, multiply the previous delay by `scale`.
  Exponential {
    /// Minimum (inclusive) delay for second attempt
    init_min: Millis,
    /// Maximum (inclusive) delay for second attempt
    init_max: Millis,
    /// Growth factor applied to the previous delay
    scale: f32,
  },
  /// Generate a random delay between `min` and `max`,
  /// and wait this long between every attempt.
  Delay {
    /// Minimum (inclusive) delay for attempts
    min: Millis,
    /// Maximum (inclusive) delay for attempts
    max: Millis,
  },
}

impl Strategy {
  /// Are the min & max different?
  pub fn has_jitter(&self) -> bool {
    let range = self.range();
    range.start() != range.end()
  }

  /// Get the range of possible initial delays
  pub fn range(&self) -> RangeInclusive<u64> {
    let (Milliseconds(min), Milliseconds(max)) = match self {
      | Self::Delay { min, max } => (*min, *max),
      | Self::Exponential { init_min,
                            init_max,
                            .. } => (*init_min, *init_max),
    };

    min.min(max)..=max.max(min)
  }

  /// Pick an initial delay, uniformly distributed in [`Strategy::range`]
  pub fn initial(&self, rng: &mut impl Rng) -> Millis {
    if self.has_jitter() {
      Milliseconds(rng.gen_range(self.range()))
    } else {
      Milliseconds(*self.range().start())
    }
  }

  /// The delay following `prev`
  pub fn next(&self, Milliseconds(prev): Millis) -> Millis {
    match self {
      | Self::Delay { .. } => Milliseconds(prev),
      | Self::Exponential { scale, .. } => {
        Milliseconds((prev as f64 * f64::from(*scale)).round() as u64)
      },
    }
  }

  /// Total time spent waiting when every one of `attempts` retries times out,
  /// assuming the initial delay was `init`
  pub fn total_delay(&self, init: Millis, attempts: u16) -> u64 {
    (0..attempts).fold((0u64, init), |(total, cur), _| (total + cur.0, self.next(cur)))
                 .0
  }
}

#[cfg(test)]
mod test {
  use rand::SeedableRng;

  use super::*;

  fn rng() -> rand_chacha::ChaCha8Rng {
    rand_chacha::ChaCha8Rng::seed_from_u64(42)
  }

  #[test]
  fn exponential_compounds_previous_delay() {
    let strategy = Strategy::Exponential { init_min: Milliseconds(100),
                                           init_max: Milliseconds(100),
                                           scale: 2.0 };
    let mut timer = RetryTimer::new(strategy, Attempts(4), &mut rng());
    let mut seen = vec![timer.timeout().0];

    while timer.what_should_i_do() == YouShould::Retry {
      seen.push(timer.timeout().0);
    }

    assert_eq!(seen, vec![100, 200, 400, 800, 1600]);
    assert_eq!(timer.attempts(), Attempts(4));
  }

  #[test]
  fn delay_is_constant() {
    let strategy = Strategy::Delay { min: Milliseconds(50),
                                     max: Milliseconds(50) };
    assert!(!strategy.has_jitter());
    assert_eq!(strategy.next(Milliseconds(50)), Milliseconds(50u64));
    assert_eq!(strategy.total_delay(Milliseconds(50), 3), 150);
  }

  #[test]
  fn initial_in_range() {
    let strategy = Strategy::Exponential { init_min: Milliseconds(2000),
                                           init_max: Milliseconds(3000),
                                           scale: 2.0 };
    let mut rng = rng();
    (0..100).map(|_| strategy.initial(&mut rng).0)
            .for_each(|t| assert!((2000..=3000).contains(&t)));
  }

  #[test]
  fn zero_attempts_cries_immediately() {
    let strategy = Strategy::Delay { min: Milliseconds(1),
                                     max: Milliseconds(2) };
    let mut timer = RetryTimer::new(strategy, Attempts(0), &mut rng());
    assert_eq!(timer.what_should_i_do(), YouShould::Cry);
  }
}
