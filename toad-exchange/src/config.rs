use embedded_time::duration::Milliseconds;

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Configuration options related to sending & retransmitting messages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Msg {
  /// Minimum time to wait for an acknowledgement of a CON message
  /// before retransmitting it (`ACK_TIMEOUT`)
  ///
  /// Defaults to 2 seconds.
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use toad_exchange::config::Msg;
  ///
  /// assert_eq!(Msg::default().ack_timeout, Milliseconds(2_000u64));
  /// ```
  pub ack_timeout: Millis,

  /// The initial retransmission timeout is picked uniformly at random
  /// between `ack_timeout` and `ack_timeout * ack_random_factor`
  /// (`ACK_RANDOM_FACTOR`)
  ///
  /// Defaults to 1.5
  /// ```
  /// use toad_exchange::config::Msg;
  ///
  /// assert_eq!(Msg::default().ack_random_factor, 1.5);
  /// ```
  pub ack_random_factor: f32,

  /// Each retransmission timeout is the previous one multiplied by
  /// this factor (`ACK_TIMEOUT_SCALE`)
  ///
  /// Defaults to 2.0
  /// ```
  /// use toad_exchange::config::Msg;
  ///
  /// assert_eq!(Msg::default().ack_timeout_scale, 2.0);
  /// ```
  pub ack_timeout_scale: f32,

  /// Number of times we are allowed to resend a CON message
  /// before giving up (`MAX_RETRANSMIT`)
  ///
  /// Defaults to 4 attempts.
  /// ```
  /// use toad_exchange::config::Msg;
  /// use toad_exchange::retry::Attempts;
  ///
  /// assert_eq!(Msg::default().max_retransmit, Attempts(4));
  /// ```
  pub max_retransmit: Attempts,

  /// Bodies larger than this are transferred block-wise (`MAX_MESSAGE_SIZE`)
  ///
  /// Defaults to 1024 bytes.
  /// ```
  /// use toad_exchange::config::Msg;
  ///
  /// assert_eq!(Msg::default().max_message_size, 1024);
  /// ```
  pub max_message_size: usize,

  /// Seed used to generate message [`Token`](crate::msg::Token)s,
  /// customizable to allow for your application to generate tokens
  /// less guessably.
  ///
  /// The default value is 0, although it is
  /// best practice to set this to something else.
  /// (random integer, machine identifier)
  ///
  /// ```
  /// use toad_exchange::config::Msg;
  ///
  /// assert_eq!(Msg::default().token_seed, 0);
  /// ```
  // token_seed
  // ||
  // xx xxxxxxxx
  //    |      |
  //    counter
  pub token_seed: u16,

  /// Whether the first message id should be picked at random,
  /// making collisions with message ids used before a restart unlikely.
  ///
  /// ```
  /// use toad_exchange::config::Msg;
  ///
  /// assert!(Msg::default().use_random_mid_start);
  /// ```
  pub use_random_mid_start: bool,

  /// How long a message id stays reserved & an exchange stays
  /// around to answer duplicates (`EXCHANGE_LIFETIME`)
  ///
  /// Defaults to 247 seconds.
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use toad_exchange::config::Msg;
  ///
  /// assert_eq!(Msg::default().exchange_lifetime, Milliseconds(247_000u64));
  /// ```
  pub exchange_lifetime: Millis,

  /// How long to wait for a response to a NON request (`NON_LIFETIME`)
  ///
  /// Defaults to 145 seconds.
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use toad_exchange::config::Msg;
  ///
  /// assert_eq!(Msg::default().non_lifetime, Milliseconds(145_000u64));
  /// ```
  pub non_lifetime: Millis,
}

impl Msg {
  /// The retransmission strategy for CON messages
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use toad_exchange::config::Msg;
  /// use toad_exchange::retry::Strategy;
  ///
  /// assert_eq!(Msg::default().retry_strategy(),
  ///            Strategy::Exponential { init_min: Milliseconds(2_000),
  ///                                    init_max: Milliseconds(3_000),
  ///                                    scale: 2.0 });
  /// ```
  pub fn retry_strategy(&self) -> Strategy {
    let Milliseconds(min) = self.ack_timeout;
    let max = (min as f64 * f64::from(self.ack_random_factor.max(1.0))) as u64;

    Strategy::Exponential { init_min: Milliseconds(min),
                            init_max: Milliseconds(max),
                            scale: self.ack_timeout_scale }
  }
}

/// Configuration options related to block-wise transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
  /// Block size used when splitting bodies (`DEFAULT_BLOCK_SIZE`).
  ///
  /// Peers may negotiate a smaller size, never a larger one.
  ///
  /// Defaults to 512 bytes.
  /// ```
  /// use toad_exchange::config::Block;
  ///
  /// assert_eq!(Block::default().preferred_size, 512);
  /// ```
  pub preferred_size: usize,

  /// Largest body we are willing to reassemble from blocks.
  ///
  /// Defaults to 8192 bytes.
  /// ```
  /// use toad_exchange::config::Block;
  ///
  /// assert_eq!(Block::default().max_body_size, 8192);
  /// ```
  pub max_body_size: usize,

  /// Incomplete transfers are discarded after this long without progress
  ///
  /// Defaults to 30 seconds.
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use toad_exchange::config::Block;
  ///
  /// assert_eq!(Block::default().status_lifetime, Milliseconds(30_000u64));
  /// ```
  pub status_lifetime: Millis,
}

/// Configuration options related to observe relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Observe {
  /// Notifications older than this are always considered
  /// fresh compared to newer ones (`NOTIFICATION_MAX_AGE`)
  ///
  /// Defaults to 128 seconds.
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use toad_exchange::config::Observe;
  ///
  /// assert_eq!(Observe::default().notification_max_age, Milliseconds(128_000u64));
  /// ```
  pub notification_max_age: Millis,

  /// A notification is sent confirmable at least this often,
  /// to check that the observer is still alive.
  ///
  /// Defaults to 24 hours.
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use toad_exchange::config::Observe;
  ///
  /// assert_eq!(Observe::default().check_interval_time, Milliseconds(86_400_000u64));
  /// ```
  pub check_interval_time: Millis,

  /// At least one notification of every `check_interval_count` is sent confirmable.
  ///
  /// ```
  /// use toad_exchange::config::Observe;
  ///
  /// assert_eq!(Observe::default().check_interval_count, 100);
  /// ```
  pub check_interval_count: u32,
}

/// Message deduplication strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DedupStrategy {
  /// Remember every message id until it has been around for
  /// longer than the exchange lifetime, checking every
  /// `mark_and_sweep_interval`.
  MarkAndSweep,
  /// Keep three generations of message ids, discarding
  /// the oldest every `crop_rotation_period`.
  CropRotation,
  /// Do not detect duplicates
  None,
}

/// Configuration options related to duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dedup {
  /// see [`DedupStrategy`]
  ///
  /// ```
  /// use toad_exchange::config::{Dedup, DedupStrategy};
  ///
  /// assert_eq!(Dedup::default().strategy, DedupStrategy::MarkAndSweep);
  /// ```
  pub strategy: DedupStrategy,

  /// Time between sweeps of the deduplicator (`MARK_AND_SWEEP_INTERVAL`)
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use toad_exchange::config::Dedup;
  ///
  /// assert_eq!(Dedup::default().mark_and_sweep_interval, Milliseconds(10_000u64));
  /// ```
  pub mark_and_sweep_interval: Millis,

  /// Time between generations of the crop rotation deduplicator
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use toad_exchange::config::Dedup;
  ///
  /// assert_eq!(Dedup::default().crop_rotation_period, Milliseconds(2_000u64));
  /// ```
  pub crop_rotation_period: Millis,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { ack_timeout: Milliseconds(2_000),
          ack_random_factor: 1.5,
          ack_timeout_scale: 2.0,
          max_retransmit: Attempts(4),
          max_message_size: 1024,
          token_seed: 0,
          use_random_mid_start: true,
          exchange_lifetime: Milliseconds(247_000),
          non_lifetime: Milliseconds(145_000) }
  }
}

impl Default for Block {
  fn default() -> Self {
    Block { preferred_size: 512,
            max_body_size: 8192,
            status_lifetime: Milliseconds(30_000) }
  }
}

impl Default for Observe {
  fn default() -> Self {
    Observe { notification_max_age: Milliseconds(128_000),
              check_interval_time: Milliseconds(86_400_000),
              check_interval_count: 100 }
  }
}

impl Default for Dedup {
  fn default() -> Self {
    Dedup { strategy: DedupStrategy::MarkAndSweep,
            mark_and_sweep_interval: Milliseconds(10_000),
            crop_rotation_period: Milliseconds(2_000) }
  }
}

/// Runtime config
///
/// ```
/// use toad_exchange::config::Config;
///
/// let mut config = Config::default();
/// config.block.preferred_size = 64;
/// config.msg.max_message_size = 64;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Config {
  /// See [`Msg`]
  pub msg: Msg,
  /// See [`Block`]
  pub block: Block,
  /// See [`Observe`]
  pub observe: Observe,
  /// See [`Dedup`]
  pub dedup: Dedup,
}
