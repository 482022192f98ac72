//! # Transaction timers
//!
//! Each state machine owns up to three [Timer]s: the inactivity timer, the positive ACK timer
//! and the NAK timer. A timer never touches machine state itself. Starting a timer registers a
//! deadline with the [TimerService] of the entity, which posts a [TimerExpiry] into the event
//! queue once the deadline passes. The event worker then hands the expiry back to the owning
//! [Timer], which only accepts it if it belongs to the most recent start of that timer.
//!
//! Suspension is handled by the machines: a suspended timer is cancelled and restarted on
//! resumption, so time which elapsed before the suspension is lost.
use core::cmp::Reverse;
use core::time::Duration;
use std::collections::BinaryHeap;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use hashbrown::HashMap;
use log::{debug, error};

use crate::TransactionId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    Inactivity,
    PositiveAck,
    Nak,
}

/// Expiration of one timer start, identified by its generation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerExpiry {
    pub transaction_id: TransactionId,
    pub kind: TimerKind,
    pub generation: u64,
}

#[derive(Debug)]
pub enum TimerCommand {
    Schedule { expiry: TimerExpiry, deadline: Instant },
    Cancel { transaction_id: TransactionId, kind: TimerKind },
    Shutdown,
}

/// Cheap handle used by the timers to register their deadlines.
#[derive(Debug, Clone)]
pub struct TimerScheduler {
    tx: mpsc::Sender<TimerCommand>,
}

impl TimerScheduler {
    pub fn new(tx: mpsc::Sender<TimerCommand>) -> Self {
        Self { tx }
    }

    fn send(&self, cmd: TimerCommand) {
        // The timer service is stopped on entity shutdown, after which timers are irrelevant.
        if self.tx.send(cmd).is_err() {
            debug!("timer service stopped, dropping timer command");
        }
    }
}

/// Single-shot timer with an expiration counter.
#[derive(Debug)]
pub struct Timer {
    transaction_id: TransactionId,
    kind: TimerKind,
    interval: Option<Duration>,
    expiration_limit: Option<u32>,
    expiration_counter: u32,
    generation: u64,
    running: bool,
    suspended: bool,
    scheduler: TimerScheduler,
}

impl Timer {
    pub fn new(
        transaction_id: TransactionId,
        kind: TimerKind,
        interval: Option<Duration>,
        expiration_limit: Option<u32>,
        scheduler: TimerScheduler,
    ) -> Self {
        Self {
            transaction_id,
            kind,
            interval,
            expiration_limit,
            expiration_counter: 0,
            generation: 0,
            running: false,
            suspended: false,
            scheduler,
        }
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Cancel a pending expiration and start the timer again. Timers without a non-zero
    /// interval are never started.
    pub fn restart(&mut self) {
        self.generation += 1;
        self.running = false;
        let interval = match self.interval {
            Some(interval) if !interval.is_zero() => interval,
            _ => return,
        };
        self.running = true;
        self.scheduler.send(TimerCommand::Schedule {
            expiry: TimerExpiry {
                transaction_id: self.transaction_id,
                kind: self.kind,
                generation: self.generation,
            },
            deadline: Instant::now() + interval,
        });
    }

    /// Restart with a cleared expiration counter.
    pub fn reset(&mut self) {
        self.expiration_counter = 0;
        self.restart();
    }

    pub fn cancel(&mut self) {
        self.generation += 1;
        if self.running {
            self.running = false;
            self.scheduler.send(TimerCommand::Cancel {
                transaction_id: self.transaction_id,
                kind: self.kind,
            });
        }
    }

    /// Only timers which are running are resumed later.
    pub fn suspend(&mut self) {
        if self.running {
            self.suspended = true;
            self.cancel();
        }
    }

    pub fn resume(&mut self) {
        if self.suspended {
            self.suspended = false;
            self.restart();
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn expiration_counter(&self) -> u32 {
        self.expiration_counter
    }

    /// Always false for timers without an expiration limit.
    pub fn is_limit_reached(&self) -> bool {
        match self.expiration_limit {
            Some(limit) => self.expiration_counter >= limit,
            None => false,
        }
    }

    /// Accept an expiry posted by the timer service. Expiries of cancelled or restarted timer
    /// starts are rejected.
    pub fn on_expiry(&mut self, generation: u64) -> bool {
        if !self.running || generation != self.generation {
            return false;
        }
        self.running = false;
        self.expiration_counter += 1;
        true
    }
}

/// Background thread which turns timer deadlines into [TimerExpiry] notifications.
#[derive(Debug)]
pub struct TimerService {
    scheduler: TimerScheduler,
    handle: Option<JoinHandle<()>>,
}

impl TimerService {
    /// The expiry sink returns false if the notification could not be delivered, which stops
    /// the service.
    pub fn start(
        name: &str,
        expiry_sink: impl FnMut(TimerExpiry) -> bool + Send + 'static,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || run_timer_service(rx, expiry_sink))?;
        Ok(Self {
            scheduler: TimerScheduler::new(tx),
            handle: Some(handle),
        })
    }

    pub fn scheduler(&self) -> TimerScheduler {
        self.scheduler.clone()
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.scheduler.send(TimerCommand::Shutdown);
            if handle.join().is_err() {
                error!("timer service thread panicked");
            }
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stale heap entries tolerated on top of two entries per live timer before the heap is pruned.
const STALE_ENTRY_SLACK: usize = 64;

/// Pending deadlines of the [TimerService].
///
/// Restarting or cancelling a timer does not remove its old heap entry. The entries are skipped
/// once they become due, and the heap is pruned as soon as the stale entries outnumber the live
/// timers, so frequently restarted timers with long intervals do not grow the heap.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    deadlines: BinaryHeap<Reverse<(Instant, TimerExpiry)>>,
    // Most recent generation per timer.
    latest: HashMap<(TransactionId, TimerKind), u64>,
}

impl TimerQueue {
    pub fn schedule(&mut self, expiry: TimerExpiry, deadline: Instant) {
        self.latest
            .insert((expiry.transaction_id, expiry.kind), expiry.generation);
        self.deadlines.push(Reverse((deadline, expiry)));
        self.prune();
    }

    pub fn cancel(&mut self, transaction_id: TransactionId, kind: TimerKind) {
        self.latest.remove(&(transaction_id, kind));
        self.prune();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pop the next live expiry which is due at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerExpiry> {
        while let Some(Reverse((deadline, expiry))) = self.deadlines.peek().copied() {
            if deadline > now {
                return None;
            }
            self.deadlines.pop();
            let key = (expiry.transaction_id, expiry.kind);
            if self.latest.get(&key) == Some(&expiry.generation) {
                self.latest.remove(&key);
                return Some(expiry);
            }
        }
        None
    }

    /// Number of heap entries, including stale ones.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    fn is_live(&self, expiry: &TimerExpiry) -> bool {
        self.latest.get(&(expiry.transaction_id, expiry.kind)) == Some(&expiry.generation)
    }

    fn prune(&mut self) {
        let before = self.len();
        if before <= 2 * self.latest.len() + STALE_ENTRY_SLACK {
            return;
        }
        let mut deadlines = core::mem::take(&mut self.deadlines);
        deadlines.retain(|Reverse((_, expiry))| self.is_live(expiry));
        self.deadlines = deadlines;
        debug!("pruned {} stale timer entries", before - self.len());
    }
}

fn run_timer_service(
    rx: mpsc::Receiver<TimerCommand>,
    mut expiry_sink: impl FnMut(TimerExpiry) -> bool,
) {
    let mut queue = TimerQueue::default();
    loop {
        let cmd = match queue.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(cmd) => Some(cmd),
                    Err(mpsc::RecvTimeoutError::Timeout) => None,
                    Err(mpsc::RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => return,
            },
        };
        match cmd {
            Some(TimerCommand::Schedule { expiry, deadline }) => queue.schedule(expiry, deadline),
            Some(TimerCommand::Cancel {
                transaction_id,
                kind,
            }) => queue.cancel(transaction_id, kind),
            Some(TimerCommand::Shutdown) => return,
            None => (),
        }
        let now = Instant::now();
        while let Some(expiry) = queue.pop_expired(now) {
            if !expiry_sink(expiry) {
                error!(
                    "{}: {:?} timer expired after the event queue was closed",
                    expiry.transaction_id, expiry.kind
                );
                return;
            }
        }
    }
}
