//! Musical time synchronized to received clock pulses.
//!
//! `MusicalTime` owns the authoritative current [`BarBeatTime`] and the
//! callback registries fired as it advances. A dedicated listener thread
//! consumes the clock endpoint one byte at a time, so pulse handling never
//! overlaps; every read or mutation of the shared state takes the same
//! lock as the advance path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::bar_beat::{BarBeatTime, Units};
use crate::clock::{CONTINUE, START, STOP, TICK};
use crate::error::{Error, Result};

/// Callback invoked with the instant that triggered it.
pub type TimeCallback = Arc<dyn Fn(BarBeatTime) + Send + Sync>;

/// Predicate evaluated against the current instant on every pulse.
pub type TimePredicate = Arc<dyn Fn(&BarBeatTime) -> bool + Send + Sync>;

/// Handle returned from registration, used to remove the registration
/// later. Tokens are unique per `MusicalTime` instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackToken(u64);

struct PredicatedCallback {
    predicate: TimePredicate,
    callback: TimeCallback,
}

struct TimeState {
    time: BarBeatTime,
    /// Pulses accumulated toward the next subbeat boundary.
    pulses: u64,
    time_callbacks: HashMap<BarBeatTime, Vec<(CallbackToken, TimeCallback)>>,
    predicated_callbacks: HashMap<String, PredicatedCallback>,
    suppress_callbacks: bool,
}

struct TimeInner {
    state: Mutex<TimeState>,
    /// Clock pulses per subbeat increment (resolution / subbeat divisor).
    pulses_per_subbeat: u64,
    /// Observation handle on the pulse channel, used to order resets
    /// behind pulses already queued.
    pending: Receiver<u8>,
    next_token: AtomicU64,
}

/// Keeps a [`BarBeatTime`] synchronized with clock messages received on a
/// channel endpoint. Handles are cheap clones sharing one state; equality
/// between handles is identity of that shared state.
#[derive(Clone)]
pub struct MusicalTime {
    name: String,
    inner: Arc<TimeInner>,
}

impl MusicalTime {
    /// Creates a time keeper reading `source` on its own listener thread.
    /// `resolution` is the clock's ticks per quarter note; pulses are
    /// folded down to subbeats when it exceeds the units' divisor.
    pub fn new(
        name: impl Into<String>,
        source: Receiver<u8>,
        units: Units,
        resolution: u64,
    ) -> Result<Self> {
        let name = name.into();
        let inner = Arc::new(TimeInner {
            state: Mutex::new(TimeState {
                time: BarBeatTime::start(units),
                pulses: 0,
                time_callbacks: HashMap::new(),
                predicated_callbacks: HashMap::new(),
                suppress_callbacks: false,
            }),
            pulses_per_subbeat: (resolution / units.subbeat_divisor.max(1) as u64).max(1),
            pending: source.clone(),
            next_token: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&inner);
        thread::Builder::new()
            .name(format!("{name} time"))
            .spawn(move || listen(weak, source))
            .map_err(|source| Error::ClockInit {
                context: "time listener",
                source,
            })?;

        Ok(Self { name, inner })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current instant.
    pub fn current(&self) -> BarBeatTime {
        self.inner.state.lock().time
    }

    /// Replaces the current instant. The value is validated against the
    /// active units and rejected with `Error::InvalidTime` when any
    /// component is out of range.
    pub fn set_current(&self, time: BarBeatTime) -> Result<()> {
        let mut state = self.inner.state.lock();
        let units = state.time.units();
        let validated = BarBeatTime::new(time.bar(), time.beat(), time.subbeat(), units)?;
        state.time = validated;
        state.pulses = 0;
        Ok(())
    }

    pub fn bar(&self) -> u32 {
        self.current().bar()
    }

    pub fn beat(&self) -> u32 {
        self.current().beat()
    }

    pub fn subbeat(&self) -> u32 {
        self.current().subbeat()
    }

    pub fn ticks(&self) -> u64 {
        self.current().ticks()
    }

    pub fn seconds(&self) -> f64 {
        self.current().seconds()
    }

    pub fn units(&self) -> Units {
        self.current().units()
    }

    /// Registers `callback` to fire whenever the current instant reaches
    /// any of `times`. Multiple callbacks may share an instant; firing
    /// order within an instant is registration order.
    pub fn register(
        &self,
        callback: impl Fn(BarBeatTime) + Send + Sync + 'static,
        times: impl IntoIterator<Item = BarBeatTime>,
    ) -> CallbackToken {
        let token = CallbackToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        let callback: TimeCallback = Arc::new(callback);
        let mut state = self.inner.state.lock();
        for time in times {
            state
                .time_callbacks
                .entry(time)
                .or_default()
                .push((token, Arc::clone(&callback)));
        }
        token
    }

    /// Registers a callback evaluated on every pulse; it fires whenever
    /// `predicate` holds for the current instant. Re-registering a key
    /// replaces the previous entry.
    pub fn register_predicated(
        &self,
        key: impl Into<String>,
        predicate: impl Fn(&BarBeatTime) -> bool + Send + Sync + 'static,
        callback: impl Fn(BarBeatTime) + Send + Sync + 'static,
    ) {
        let mut state = self.inner.state.lock();
        state.predicated_callbacks.insert(
            key.into(),
            PredicatedCallback {
                predicate: Arc::new(predicate),
                callback: Arc::new(callback),
            },
        );
    }

    /// Whether a predicated callback is registered under `key`.
    pub fn callback_registered(&self, key: &str) -> bool {
        self.inner.state.lock().predicated_callbacks.contains_key(key)
    }

    /// Removes every registration made under `token`, leaving other
    /// registrations at the same instants in place. A callback already
    /// executing is not interrupted; removal only prevents future firings.
    pub fn remove_callback(&self, token: CallbackToken) {
        let mut state = self.inner.state.lock();
        state
            .time_callbacks
            .retain(|_, bag| {
                bag.retain(|(t, _)| *t != token);
                !bag.is_empty()
            });
    }

    /// Drops every registration at `time`.
    pub fn remove_callbacks_at(&self, time: BarBeatTime) {
        self.inner.state.lock().time_callbacks.remove(&time);
    }

    /// Removes the predicated callback registered under `key`.
    pub fn remove_predicated(&self, key: &str) {
        self.inner.state.lock().predicated_callbacks.remove(key);
    }

    /// Drops every registration of either kind.
    pub fn clear_callbacks(&self) {
        let mut state = self.inner.state.lock();
        state.time_callbacks.clear();
        state.predicated_callbacks.clear();
    }

    /// While set, pulses still advance the instant but no callbacks fire.
    pub fn set_suppress_callbacks(&self, suppress: bool) {
        self.inner.state.lock().suppress_callbacks = suppress;
    }

    /// Rewinds to the canonical start instant, invoking `completion` with
    /// the post-reset instant once the mutation has committed. The caller
    /// must ensure the clock feeding this instance is stopped.
    pub fn reset(&self, completion: impl FnOnce(BarBeatTime)) {
        // Order the rewind behind pulses already queued, as if it had
        // been delivered on the listener after them.
        while !self.inner.pending.is_empty() {
            thread::yield_now();
        }
        let time = {
            let mut state = self.inner.state.lock();
            state.time = BarBeatTime::start(state.time.units());
            state.pulses = 0;
            state.time
        };
        debug!(time = %time, "time reset");
        completion(time);
    }

    /// Clears all callbacks, then resets.
    pub fn hard_reset(&self, completion: impl FnOnce(BarBeatTime)) {
        self.clear_callbacks();
        self.reset(completion);
    }
}

/// Listener loop. Holds only a weak reference so the thread winds down
/// once every `MusicalTime` handle is gone, or once the clock side of the
/// channel disconnects.
fn listen(weak: Weak<TimeInner>, source: Receiver<u8>) {
    while let Ok(byte) = source.recv() {
        let Some(inner) = weak.upgrade() else { break };
        match byte {
            TICK => advance(&inner),
            START => rewind(&inner),
            CONTINUE | STOP => trace!(byte, "clock state message"),
            _ => trace!(byte, "ignoring unknown clock byte"),
        }
    }
}

/// One clock pulse: bump the accumulator, cross the subbeat boundary when
/// due, then fire callbacks for the new instant. Callbacks are cloned out
/// and invoked after the lock is released so a handler may read the
/// current instant without deadlocking.
fn advance(inner: &TimeInner) {
    let mut due: Vec<TimeCallback> = Vec::new();
    let time = {
        let mut state = inner.state.lock();
        state.pulses += 1;
        let crossed = state.pulses >= inner.pulses_per_subbeat;
        if crossed {
            state.pulses = 0;
            state.time = state.time.advancing_subbeats(1);
        }
        if state.suppress_callbacks {
            return;
        }
        let time = state.time;
        if crossed {
            if let Some(bag) = state.time_callbacks.get(&time) {
                due.extend(bag.iter().map(|(_, callback)| Arc::clone(callback)));
            }
        }
        for entry in state.predicated_callbacks.values() {
            if (entry.predicate)(&time) {
                due.push(Arc::clone(&entry.callback));
            }
        }
        time
    };
    for callback in due {
        callback(time);
    }
}

/// A start message rewinds to the start instant and fires its callbacks,
/// mirroring a fresh clock start after the counter was zeroed.
fn rewind(inner: &TimeInner) {
    let mut due: Vec<TimeCallback> = Vec::new();
    let time = {
        let mut state = inner.state.lock();
        state.time = BarBeatTime::start(state.time.units());
        state.pulses = 0;
        if state.suppress_callbacks {
            return;
        }
        let time = state.time;
        if let Some(bag) = state.time_callbacks.get(&time) {
            due.extend(bag.iter().map(|(_, callback)| Arc::clone(callback)));
        }
        for entry in state.predicated_callbacks.values() {
            if (entry.predicate)(&time) {
                due.push(Arc::clone(&entry.callback));
            }
        }
        time
    };
    for callback in due {
        callback(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn make_time() -> (crossbeam_channel::Sender<u8>, MusicalTime) {
        let (tx, rx) = unbounded();
        let time = MusicalTime::new("test", rx, Units::default(), 480).unwrap();
        (tx, time)
    }

    fn wait_for_ticks(time: &MusicalTime, ticks: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while time.ticks() < ticks {
            assert!(Instant::now() < deadline, "listener did not catch up");
            thread::yield_now();
        }
    }

    #[test]
    fn test_pulses_advance_subbeats() {
        let (tx, time) = make_time();
        for _ in 0..480 {
            tx.send(clock::TICK).unwrap();
        }
        wait_for_ticks(&time, 480);
        let current = time.current();
        assert_eq!(
            (current.bar(), current.beat(), current.subbeat()),
            (1, 2, 1)
        );
    }

    #[test]
    fn test_full_bar_rollover() {
        let (tx, time) = make_time();
        for _ in 0..(480 * 4) {
            tx.send(clock::TICK).unwrap();
        }
        wait_for_ticks(&time, 480 * 4);
        let current = time.current();
        assert_eq!((current.bar(), current.beat(), current.subbeat()), (2, 1, 1));
    }

    #[test]
    fn test_start_message_rewinds() {
        let (tx, time) = make_time();
        for _ in 0..10 {
            tx.send(clock::TICK).unwrap();
        }
        wait_for_ticks(&time, 10);
        tx.send(clock::START).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while time.ticks() != 0 {
            assert!(Instant::now() < deadline, "listener did not rewind");
            thread::yield_now();
        }
    }

    #[test]
    fn test_time_callback_fires_at_instant() {
        let (tx, time) = make_time();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let target = BarBeatTime::from_ticks(3, Units::default());
        time.register(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }, [target]);

        for _ in 0..5 {
            tx.send(clock::TICK).unwrap();
        }
        wait_for_ticks(&time, 5);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_token_removal_leaves_others() {
        let (tx, time) = make_time();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let target = BarBeatTime::from_ticks(2, Units::default());

        let first_clone = Arc::clone(&first);
        let token = time.register(move |_| {
            first_clone.fetch_add(1, Ordering::SeqCst);
        }, [target]);
        let second_clone = Arc::clone(&second);
        time.register(move |_| {
            second_clone.fetch_add(1, Ordering::SeqCst);
        }, [target]);

        time.remove_callback(token);
        for _ in 0..3 {
            tx.send(clock::TICK).unwrap();
        }
        wait_for_ticks(&time, 3);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_predicated_callback_every_pulse() {
        let (tx, time) = make_time();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        time.register_predicated("observer", |_| true, move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(time.callback_registered("observer"));

        for _ in 0..7 {
            tx.send(clock::TICK).unwrap();
        }
        wait_for_ticks(&time, 7);
        assert_eq!(fired.load(Ordering::SeqCst), 7);

        time.remove_predicated("observer");
        assert!(!time.callback_registered("observer"));
    }

    #[test]
    fn test_suppressed_callbacks_do_not_fire() {
        let (tx, time) = make_time();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        time.register_predicated("observer", |_| true, move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        time.set_suppress_callbacks(true);

        for _ in 0..4 {
            tx.send(clock::TICK).unwrap();
        }
        wait_for_ticks(&time, 4);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_current_rejects_invalid() {
        let (_tx, time) = make_time();
        let bogus = BarBeatTime::from_ticks(0, Units::new(9, 120, 480));
        // Build a value whose beat exceeds the active 4-beat bar.
        let out_of_range = BarBeatTime::new(1, 7, 1, Units::new(9, 120, 480)).unwrap();
        assert!(time.set_current(out_of_range).is_err());
        assert!(time.set_current(bogus).is_ok());
        assert_eq!(time.ticks(), 0);
    }

    #[test]
    fn test_reset_invokes_completion_after_commit() {
        let (tx, time) = make_time();
        for _ in 0..6 {
            tx.send(clock::TICK).unwrap();
        }
        wait_for_ticks(&time, 6);
        let mut observed = None;
        time.reset(|t| observed = Some(t));
        assert_eq!(observed.unwrap().ticks(), 0);
        assert_eq!(time.ticks(), 0);
    }
}
