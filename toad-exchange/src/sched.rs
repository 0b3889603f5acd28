use std::collections::{BTreeMap, HashMap};

use crate::exchange::ExchangeId;

/// Kinds of work that can be scheduled for later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
  /// A CON message has not been acknowledged in time
  Retransmit,
  /// A NON request has not been answered within the NON lifetime
  NonLifetime,
  /// An acknowledged CON request has not been answered within the exchange lifetime
  ResponseLifetime,
  /// A block-wise transfer has made no progress in a while
  BlockCleanup,
  /// A completed exchange no longer needs to answer duplicates
  Expire,
  /// The deduplicator should forget old message ids
  Sweep,
}

/// A unit of scheduled work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
  /// The exchange the work is for, if any
  pub exchange: Option<ExchangeId>,
  /// What to do
  pub kind: TimerKind,
}

impl Task {
  /// Work for an exchange
  pub fn for_exchange(exchange: ExchangeId, kind: TimerKind) -> Self {
    Self { exchange: Some(exchange),
           kind }
  }

  /// Work for the endpoint as a whole
  pub fn endpoint(kind: TimerKind) -> Self {
    Self { exchange: None,
           kind }
  }
}

/// Handle to a scheduled task, used to cancel it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Deterministic timer queue.
///
/// The scheduler never sleeps or spawns; an endpoint pops due tasks
/// whenever it is polled, which serializes timer work with message
/// processing. Tasks due at the same instant pop in the order they
/// were scheduled.
///
/// ```
/// use toad_exchange::sched::{Scheduler, Task, TimerKind};
///
/// let mut sched = Scheduler::default();
/// let a = sched.schedule(100, Task::endpoint(TimerKind::Sweep));
/// let _ = sched.schedule(50, Task::endpoint(TimerKind::Expire));
///
/// assert_eq!(sched.next_deadline(), Some(50));
/// assert!(sched.cancel(a));
/// assert!(!sched.cancel(a));
///
/// assert_eq!(sched.pop_due(49), None);
/// assert_eq!(sched.pop_due(50).map(|t| t.kind), Some(TimerKind::Expire));
/// assert_eq!(sched.pop_due(1_000), None);
/// ```
#[derive(Debug, Default)]
pub struct Scheduler {
  seq: u64,
  tasks: BTreeMap<(u64, u64), Task>,
  deadlines: HashMap<u64, u64>,
}

impl Scheduler {
  /// Run `task` once `at` (milliseconds since the clock's epoch) has passed
  pub fn schedule(&mut self, at: u64, task: Task) -> TimerHandle {
    self.seq += 1;
    let seq = self.seq;
    self.tasks.insert((at, seq), task);
    self.deadlines.insert(seq, at);
    TimerHandle(seq)
  }

  /// Cancel a scheduled task.
  ///
  /// Returns false if the task already ran or was already canceled.
  pub fn cancel(&mut self, TimerHandle(seq): TimerHandle) -> bool {
    match self.deadlines.remove(&seq) {
      | Some(at) => self.tasks.remove(&(at, seq)).is_some(),
      | None => false,
    }
  }

  /// Is this task still waiting to run?
  pub fn is_scheduled(&self, TimerHandle(seq): TimerHandle) -> bool {
    self.deadlines.contains_key(&seq)
  }

  /// Pop the earliest task due at or before `now`
  pub fn pop_due(&mut self, now: u64) -> Option<Task> {
    let (&(at, seq), _) = self.tasks.iter().next()?;
    if at > now {
      return None;
    }

    self.deadlines.remove(&seq);
    self.tasks.remove(&(at, seq))
  }

  /// When the earliest task is due
  pub fn next_deadline(&self) -> Option<u64> {
    self.tasks.keys().next().map(|(at, _)| *at)
  }

  /// Number of tasks waiting to run
  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  /// Are there no tasks waiting to run?
  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn fifo_for_same_deadline() {
    let mut sched = Scheduler::default();
    let ex = |n| Task::for_exchange(ExchangeId(n), TimerKind::Retransmit);
    sched.schedule(10, ex(1));
    sched.schedule(10, ex(2));
    sched.schedule(5, ex(3));

    let order = core::iter::from_fn(|| sched.pop_due(10)).map(|t| t.exchange)
                                                          .collect::<Vec<_>>();
    assert_eq!(order,
               vec![Some(ExchangeId(3)), Some(ExchangeId(1)), Some(ExchangeId(2))]);
    assert!(sched.is_empty());
  }

  #[test]
  fn cancel_after_run_is_noop() {
    let mut sched = Scheduler::default();
    let h = sched.schedule(0, Task::endpoint(TimerKind::Sweep));
    assert!(sched.is_scheduled(h));
    assert!(sched.pop_due(0).is_some());
    assert!(!sched.is_scheduled(h));
    assert!(!sched.cancel(h));
  }
}
