//! Deterministic simulated bus.
//!
//! Any number of participants attach to one [`SimBus`] and each gets a
//! [`SimLines`] handle, usually moved onto its own thread.  The bus models two
//! wired-AND lines with pull-ups: a line reads LOW as soon as one attached
//! participant drives it LOW as an output, and HIGH otherwise.
//!
//! # Virtual time
//!
//! Wall-clock timing on a desktop OS is far too coarse for microsecond bit
//! cells, so the bus keeps its own clock.  Each participant carries a wake-up
//! time; a line operation may only run when its participant holds the *turn*,
//! which always goes to the runnable participant with the earliest wake-up
//! time (ties broken by attach order).  Reads cost one poll step, delays
//! advance the caller's wake-up time, direction changes and writes are free.
//! Because time only moves once every runnable participant has asked for it,
//! the outcome of a run never depends on how the OS schedules the threads.
//!
//! A participant that is attached but idle holds time back.  Idle
//! participants must therefore either be dropped or [`SimLines::suspend`]ed.
//! Dropping detaches a participant at once, but its lines are released only
//! when virtual time reaches its own wake-up time, so peers that are still
//! behind keep seeing what it drove.
//!
//! # Supervision
//!
//! - A virtual deadline makes every operation past it fail with
//!   [`SimError::DeadlineExceeded`].
//! - [`SimBus::close`] makes every pending and future operation fail with
//!   [`SimError::Closed`]; a watchdog uses it to abort blocked transfers.
//!
//! # Skew
//!
//! [`SimLines::with_jitter`] delays every level write of one participant by a
//! seeded random amount, so the receiving side sees CLOCK and DATA change at
//! slightly different instants.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, trace};

use super::{Direction, Level, Line, LineInterface};

/// Failure of a simulated line operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("simulated bus was closed")]
    Closed,
    #[error("virtual deadline of {0} µs exceeded")]
    DeadlineExceeded(u64),
    #[error("simulated bus state poisoned by a panicking participant")]
    Poisoned,
}

/// Cost model and limits of a simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Virtual microseconds consumed by one `read_level`.
    pub poll_cost_us: u64,
    /// Virtual microseconds consumed by one `write_level`.
    pub write_cost_us: u64,
    /// Operations fail once virtual time passes this point.
    pub deadline_us: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            poll_cost_us: 1,
            write_cost_us: 0,
            deadline_us: None,
        }
    }
}

impl SimConfig {
    /// Sets the virtual deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline_us: u64) -> Self {
        self.deadline_us = Some(deadline_us);
        self
    }
}

// ── Bus state ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Port {
    direction: Direction,
    latch: Level,
}

impl Default for Port {
    fn default() -> Self {
        Self {
            direction: Direction::Input,
            latch: Level::High,
        }
    }
}

impl Port {
    fn drives_low(&self) -> bool {
        self.direction == Direction::Output && self.latch == Level::Low
    }
}

#[derive(Debug)]
struct Participant {
    clock: Port,
    data: Port,
    wake_at: u64,
    attached: bool,
    suspended: bool,
}

impl Participant {
    fn port(&self, line: Line) -> &Port {
        match line {
            Line::Clock => &self.clock,
            Line::Data => &self.data,
        }
    }

    fn port_mut(&mut self, line: Line) -> &mut Port {
        match line {
            Line::Clock => &mut self.clock,
            Line::Data => &mut self.data,
        }
    }

    fn runnable(&self) -> bool {
        self.attached && !self.suspended
    }
}

#[derive(Debug)]
struct PendingWrite {
    at: u64,
    slot: usize,
    line: Line,
    level: Level,
}

#[derive(Debug)]
struct BusState {
    now: u64,
    config: SimConfig,
    closed: bool,
    expired: bool,
    turn: Option<usize>,
    critical: Option<usize>,
    participants: Vec<Participant>,
    pending: Vec<PendingWrite>,
}

impl BusState {
    fn level(&self, line: Line) -> Level {
        let pulled_low = self
            .participants
            .iter()
            .any(|p| p.port(line).drives_low());
        if pulled_low {
            Level::Low
        } else {
            Level::High
        }
    }

    fn check(&self) -> Result<(), SimError> {
        if self.closed {
            return Err(SimError::Closed);
        }
        if self.expired {
            return Err(SimError::DeadlineExceeded(
                self.config.deadline_us.unwrap_or(self.now),
            ));
        }
        Ok(())
    }

    /// Hands the turn to the next runnable participant and moves virtual
    /// time forward to its wake-up time.
    fn schedule(&mut self) {
        if let Some(slot) = self.critical {
            if self.participants[slot].runnable() {
                let wake = self.participants[slot].wake_at;
                self.turn = Some(slot);
                self.advance_to(wake);
                return;
            }
            self.critical = None;
        }

        self.turn = self
            .participants
            .iter()
            .enumerate()
            .filter(|(_, p)| p.runnable())
            .min_by_key(|&(slot, p)| (p.wake_at, slot))
            .map(|(slot, _)| slot);

        match self.turn {
            Some(slot) => {
                let wake = self.participants[slot].wake_at;
                self.advance_to(wake);
            }
            None => {
                // Nobody left to run: let outstanding writes land.
                if let Some(last) = self.pending.iter().map(|w| w.at).max() {
                    self.advance_to(last);
                }
            }
        }
    }

    /// Takes `slot` out of scheduling for good.  Both of its lines are
    /// released at its own wake-up time.
    fn detach(&mut self, slot: usize) {
        let release_in = self.participants[slot].wake_at.saturating_sub(self.now);
        self.write(slot, Line::Clock, Level::High, release_in);
        self.write(slot, Line::Data, Level::High, release_in);
        self.participants[slot].attached = false;
        if self.critical == Some(slot) {
            self.critical = None;
        }
        if self.turn == Some(slot) || self.turn.is_none() {
            self.schedule();
        }
    }

    fn advance_to(&mut self, time: u64) {
        if time > self.now {
            self.now = time;
        }
        self.apply_pending();
        if let Some(deadline) = self.config.deadline_us {
            if self.now > deadline && !self.expired {
                debug!(now = self.now, deadline, "simulated bus deadline exceeded");
                self.expired = true;
            }
        }
    }

    fn apply_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let now = self.now;
        let (due, later): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|write| write.at <= now);
        self.pending = later;
        for write in due {
            self.participants[write.slot].port_mut(write.line).latch = write.level;
        }
    }

    fn write(&mut self, slot: usize, line: Line, level: Level, skew: u64) {
        let last_pending = self
            .pending
            .iter()
            .filter(|w| w.slot == slot && w.line == line)
            .map(|w| w.at)
            .max();

        if skew == 0 && last_pending.is_none() {
            self.participants[slot].port_mut(line).latch = level;
            return;
        }

        // Writes to one line keep their order even when skewed.
        let at = (self.now + skew).max(last_pending.unwrap_or(0));
        self.pending.push(PendingWrite {
            at,
            slot,
            line,
            level,
        });
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<BusState>,
    wakeup: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, BusState>, SimError> {
        self.state.lock().map_err(|_| SimError::Poisoned)
    }

    /// Blocks until `slot` holds the turn.  A suspended participant that
    /// issues an operation is resumed at the current virtual time.
    fn await_turn<'a>(
        &'a self,
        mut state: MutexGuard<'a, BusState>,
        slot: usize,
    ) -> Result<MutexGuard<'a, BusState>, SimError> {
        if state.participants[slot].suspended {
            let now = state.now;
            let participant = &mut state.participants[slot];
            participant.suspended = false;
            participant.wake_at = participant.wake_at.max(now);
            if state.turn.is_none() {
                state.schedule();
                self.wakeup.notify_all();
            }
        }

        loop {
            state.check()?;
            if state.turn == Some(slot) {
                return Ok(state);
            }
            state = self.wakeup.wait(state).map_err(|_| SimError::Poisoned)?;
        }
    }

    fn operate<R>(
        &self,
        slot: usize,
        cost: u64,
        op: impl FnOnce(&mut BusState) -> R,
    ) -> Result<R, SimError> {
        let mut state = self.await_turn(self.lock()?, slot)?;
        let result = op(&mut *state);
        let now = state.now;
        state.participants[slot].wake_at = now + cost;
        state.schedule();
        drop(state);
        self.wakeup.notify_all();
        Ok(result)
    }

    fn enter_critical(&self, slot: usize) -> Result<(), SimError> {
        let mut state = self.await_turn(self.lock()?, slot)?;
        state.critical = Some(slot);
        Ok(())
    }

    fn exit_critical(&self, slot: usize) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.critical == Some(slot) {
            state.critical = None;
            state.schedule();
        }
        drop(state);
        self.wakeup.notify_all();
    }
}

/// Releases the critical section on every exit path of the closure.
struct CriticalGuard<'a> {
    shared: &'a Shared,
    slot: usize,
    entered: bool,
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        if self.entered {
            self.shared.exit_critical(self.slot);
        }
    }
}

// ── Public handles ────────────────────────────────────────────────────────────

/// A simulated two-wire bus.  Cloning yields another handle to the same bus.
#[derive(Debug, Clone)]
pub struct SimBus {
    shared: Arc<Shared>,
}

impl SimBus {
    /// Creates an idle bus at virtual time zero.
    pub fn new(config: SimConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BusState {
                    now: 0,
                    config,
                    closed: false,
                    expired: false,
                    turn: None,
                    critical: None,
                    participants: Vec::new(),
                    pending: Vec::new(),
                }),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Attaches a new participant with both lines released.
    pub fn attach(&self) -> SimLines {
        // A poisoned bus still hands out lines; their operations will fail.
        let mut state = match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = state.participants.len();
        let wake_at = state.now;
        state.participants.push(Participant {
            clock: Port::default(),
            data: Port::default(),
            wake_at,
            attached: true,
            suspended: false,
        });
        if state.turn.is_none() {
            state.schedule();
        }
        let config = state.config;
        drop(state);
        self.shared.wakeup.notify_all();
        trace!(slot, "participant attached to simulated bus");

        SimLines {
            shared: Arc::clone(&self.shared),
            slot,
            poll_cost_us: config.poll_cost_us,
            write_cost_us: config.write_cost_us,
            jitter: None,
        }
    }

    /// Fails every pending and future operation with [`SimError::Closed`].
    pub fn close(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.closed = true;
        }
        self.shared.wakeup.notify_all();
        debug!("simulated bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().map(|state| state.closed).unwrap_or(true)
    }

    /// Current virtual time in microseconds.
    pub fn now(&self) -> u64 {
        self.shared.lock().map(|state| state.now).unwrap_or_default()
    }

    /// Level of `line` as every participant currently sees it.
    pub fn level(&self, line: Line) -> Level {
        self.shared
            .lock()
            .map(|state| state.level(line))
            .unwrap_or_default()
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

#[derive(Debug)]
struct Jitter {
    max_skew_us: u64,
    rng: StdRng,
}

/// One participant's view of a [`SimBus`].  Dropping it detaches the
/// participant and releases both of its lines.
#[derive(Debug)]
pub struct SimLines {
    shared: Arc<Shared>,
    slot: usize,
    poll_cost_us: u64,
    write_cost_us: u64,
    jitter: Option<Jitter>,
}

impl SimLines {
    /// Delays every level write by a seeded random `0..=max_skew_us`.
    #[must_use]
    pub fn with_jitter(mut self, max_skew_us: u64, seed: u64) -> Self {
        self.jitter = Some(Jitter {
            max_skew_us,
            rng: StdRng::seed_from_u64(seed),
        });
        self
    }

    /// Takes this participant out of scheduling until [`resume`] or its next
    /// line operation.  Its lines keep their current drive.
    ///
    /// Must not be called while this participant is blocked in an operation.
    ///
    /// [`resume`]: SimLines::resume
    pub fn suspend(&self) {
        let Ok(mut state) = self.shared.lock() else {
            return;
        };
        state.participants[self.slot].suspended = true;
        if state.turn == Some(self.slot) {
            state.schedule();
        }
        drop(state);
        self.shared.wakeup.notify_all();
    }

    /// Puts this participant back into scheduling at the current virtual time.
    pub fn resume(&self) {
        let Ok(mut state) = self.shared.lock() else {
            return;
        };
        let now = state.now;
        let participant = &mut state.participants[self.slot];
        participant.suspended = false;
        participant.wake_at = participant.wake_at.max(now);
        if state.turn.is_none() {
            state.schedule();
        }
        drop(state);
        self.shared.wakeup.notify_all();
    }

    /// Current virtual time in microseconds.
    pub fn now(&self) -> u64 {
        self.shared.lock().map(|state| state.now).unwrap_or_default()
    }

    fn next_skew(&mut self) -> u64 {
        match self.jitter.as_mut() {
            Some(jitter) if jitter.max_skew_us > 0 => jitter.rng.gen_range(0..=jitter.max_skew_us),
            _ => 0,
        }
    }
}

impl LineInterface for SimLines {
    type Error = SimError;

    fn set_direction(&mut self, line: Line, direction: Direction) -> Result<(), SimError> {
        let slot = self.slot;
        self.shared.operate(slot, 0, |state| {
            state.participants[slot].port_mut(line).direction = direction;
        })
    }

    fn write_level(&mut self, line: Line, level: Level) -> Result<(), SimError> {
        let slot = self.slot;
        let skew = self.next_skew();
        self.shared.operate(slot, self.write_cost_us, |state| {
            state.write(slot, line, level, skew);
        })
    }

    fn read_level(&mut self, line: Line) -> Result<Level, SimError> {
        self.shared
            .operate(self.slot, self.poll_cost_us, |state| state.level(line))
    }

    fn delay_us(&mut self, us: u32) -> Result<(), SimError> {
        self.shared.operate(self.slot, u64::from(us), |_| ())
    }

    fn critical_section<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let shared = Arc::clone(&self.shared);
        let entered = shared.enter_critical(self.slot).is_ok();
        let _guard = CriticalGuard {
            shared: &*shared,
            slot: self.slot,
            entered,
        };
        f(self)
    }
}

impl Drop for SimLines {
    fn drop(&mut self) {
        let Ok(mut state) = self.shared.state.lock() else {
            return;
        };
        state.detach(self.slot);
        drop(state);
        self.shared.wakeup.notify_all();
        trace!(slot = self.slot, "participant detached from simulated bus");
    }
}
