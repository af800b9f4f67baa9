//! Tempo-derived MIDI pulse clock.
//!
//! `MidiClock` runs a dedicated timer thread that emits single-byte
//! real-time messages on a channel endpoint: `0xF8` per tick plus
//! `0xFA`/`0xFB`/`0xFC` around start/continue/stop. Consumers (see
//! `MusicalTime`) react only to these bytes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::error::{Error, Result};

/// Real-time timing clock pulse.
pub const TICK: u8 = 0xF8;
/// Real-time start message.
pub const START: u8 = 0xFA;
/// Real-time continue message.
pub const CONTINUE: u8 = 0xFB;
/// Real-time stop message.
pub const STOP: u8 = 0xFC;

/// Default ticks per quarter note.
pub const DEFAULT_RESOLUTION: u64 = 480;

const MIN_BPM: u16 = 1;
const MAX_BPM: u16 = 960;

enum ClockCommand {
    Start,
    Resume,
    Stop,
    Shutdown,
}

struct ClockShared {
    beats_per_minute: AtomicU16,
    tick_interval_nanos: AtomicU64,
    ticks: AtomicU64,
    running: AtomicBool,
}

/// A clock that keeps time for MIDI events by emitting a steady pulse
/// train whose period derives from the tempo and resolution.
pub struct MidiClock {
    name: String,
    resolution: u64,
    shared: Arc<ClockShared>,
    command_tx: Sender<ClockCommand>,
    endpoint_rx: Receiver<u8>,
}

impl MidiClock {
    /// Creates a clock at 120 BPM with the default 480 PPQ resolution and
    /// spawns its timer thread.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_resolution(name, DEFAULT_RESOLUTION)
    }

    /// Creates a clock with an explicit ticks-per-quarter-note resolution.
    /// The resolution is fixed for the lifetime of the instance.
    pub fn with_resolution(name: impl Into<String>, resolution: u64) -> Result<Self> {
        let name = name.into();
        let resolution = resolution.max(1);
        let bpm = 120u16;

        let shared = Arc::new(ClockShared {
            beats_per_minute: AtomicU16::new(bpm),
            tick_interval_nanos: AtomicU64::new(interval_nanos(bpm, resolution)),
            ticks: AtomicU64::new(0),
            running: AtomicBool::new(false),
        });

        let (command_tx, command_rx) = unbounded();
        let (pulse_tx, endpoint_rx) = unbounded();

        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("{name} clock"))
            .spawn(move || run_timer(thread_shared, command_rx, pulse_tx))
            .map_err(|source| Error::ClockInit {
                context: "clock",
                source,
            })?;

        Ok(Self {
            name,
            resolution,
            shared,
            command_tx,
            endpoint_rx,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ticks per quarter note, fixed per instance.
    #[inline]
    pub fn resolution(&self) -> u64 {
        self.resolution
    }

    #[inline]
    pub fn beats_per_minute(&self) -> u16 {
        self.shared.beats_per_minute.load(Ordering::Acquire)
    }

    /// Sets the tempo, clamped to 1..=960 BPM. The recomputed pulse
    /// interval takes effect on the next scheduled pulse; already counted
    /// ticks are unaffected.
    pub fn set_beats_per_minute(&self, bpm: u16) {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        self.shared.beats_per_minute.store(bpm, Ordering::Release);
        self.shared
            .tick_interval_nanos
            .store(interval_nanos(bpm, self.resolution), Ordering::Release);
        debug!(clock = %self.name, bpm, "tempo changed");
    }

    #[inline]
    pub fn nanoseconds_per_beat(&self) -> u64 {
        60_000_000_000 / self.beats_per_minute() as u64
    }

    #[inline]
    pub fn microseconds_per_beat(&self) -> u64 {
        60_000_000 / self.beats_per_minute() as u64
    }

    #[inline]
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.beats_per_minute() as f64
    }

    #[inline]
    pub fn seconds_per_tick(&self) -> f64 {
        self.seconds_per_beat() / self.resolution as f64
    }

    /// Interval between consecutive pulses at the current tempo.
    #[inline]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(self.shared.tick_interval_nanos.load(Ordering::Acquire))
    }

    /// Pulses counted since the last start or reset.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stopped mid-sequence: not running but with elapsed ticks.
    #[inline]
    pub fn is_paused(&self) -> bool {
        !self.is_running() && self.ticks() > 0
    }

    /// The receive side of the pulse stream. A single consumer is
    /// expected; cloned receivers steal messages from one another.
    pub fn endpoint(&self) -> Receiver<u8> {
        self.endpoint_rx.clone()
    }

    /// Zeroes the tick counter, emits start, and begins pulsing. No-op if
    /// already running.
    pub fn start(&self) {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!(clock = %self.name, "setting ticks to 0 and starting timer");
        self.shared.ticks.store(0, Ordering::Release);
        let _ = self.command_tx.send(ClockCommand::Start);
    }

    /// Emits continue and resumes pulsing without resetting the tick
    /// counter. No-op if already running.
    pub fn resume(&self) {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!(clock = %self.name, "resuming timer");
        let _ = self.command_tx.send(ClockCommand::Resume);
    }

    /// Halts pulsing and emits stop. No-op if not running.
    pub fn stop(&self) {
        if self
            .shared
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!(clock = %self.name, "stopping timer");
        let _ = self.command_tx.send(ClockCommand::Stop);
    }

    /// Zeroes the tick counter. Only legal while stopped.
    pub fn reset(&self) -> Result<()> {
        if self.is_running() {
            return Err(Error::NotPermitted(
                "clock cannot be reset while running".into(),
            ));
        }
        debug!(clock = %self.name, "setting ticks to 0");
        self.shared.ticks.store(0, Ordering::Release);
        Ok(())
    }
}

impl Drop for MidiClock {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        let _ = self.command_tx.send(ClockCommand::Shutdown);
    }
}

impl fmt::Display for MidiClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MidiClock {{ name: {}, beatsPerMinute: {}, resolution: {}, ticks: {}, \
             tickInterval: {}ns, nanosecondsPerBeat: {} }}",
            self.name,
            self.beats_per_minute(),
            self.resolution,
            self.ticks(),
            self.tick_interval().as_nanos(),
            self.nanoseconds_per_beat(),
        )
    }
}

#[inline]
fn interval_nanos(bpm: u16, resolution: u64) -> u64 {
    (60_000_000_000 / bpm as u64) / resolution
}

/// Timer loop: while running, a pulse fires whenever the deadline lapses
/// with no pending command; while stopped, the loop parks on the command
/// channel. Pulses are emitted one at a time from this thread only.
fn run_timer(shared: Arc<ClockShared>, command_rx: Receiver<ClockCommand>, pulse_tx: Sender<u8>) {
    let mut deadline = Instant::now();

    loop {
        let command = if shared.running.load(Ordering::Acquire) {
            match command_rx.recv_deadline(deadline) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => {
                    // Re-check: a stop may have landed between the flag
                    // flip and its command.
                    if shared.running.load(Ordering::Acquire) {
                        shared.ticks.fetch_add(1, Ordering::AcqRel);
                        if pulse_tx.send(TICK).is_err() {
                            break;
                        }
                    }
                    deadline += Duration::from_nanos(
                        shared.tick_interval_nanos.load(Ordering::Acquire),
                    );
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            command_rx.recv().ok()
        };

        let Some(command) = command else { break };
        match command {
            ClockCommand::Start => {
                if pulse_tx.send(START).is_err() {
                    break;
                }
                deadline = Instant::now()
                    + Duration::from_nanos(shared.tick_interval_nanos.load(Ordering::Acquire));
            }
            ClockCommand::Resume => {
                if pulse_tx.send(CONTINUE).is_err() {
                    break;
                }
                deadline = Instant::now()
                    + Duration::from_nanos(shared.tick_interval_nanos.load(Ordering::Acquire));
            }
            ClockCommand::Stop => {
                if pulse_tx.send(STOP).is_err() {
                    break;
                }
            }
            ClockCommand::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_math() {
        let clock = MidiClock::new("test").unwrap();
        for bpm in 1..=300u16 {
            clock.set_beats_per_minute(bpm);
            assert_eq!(clock.nanoseconds_per_beat(), 60_000_000_000 / bpm as u64);
            assert_eq!(
                clock.tick_interval().as_nanos() as u64,
                clock.nanoseconds_per_beat() / clock.resolution()
            );
        }
    }

    #[test]
    fn test_interval_at_120_bpm() {
        let clock = MidiClock::new("test").unwrap();
        assert_eq!(clock.tick_interval().as_nanos(), 1_041_666);
        assert_eq!(clock.microseconds_per_beat(), 500_000);
    }

    #[test]
    fn test_tempo_clamped() {
        let clock = MidiClock::new("test").unwrap();
        clock.set_beats_per_minute(0);
        assert_eq!(clock.beats_per_minute(), 1);
    }

    #[test]
    fn test_start_emits_start_then_ticks() {
        let clock = MidiClock::new("test").unwrap();
        let endpoint = clock.endpoint();
        clock.set_beats_per_minute(600); // 208 us per tick, fast test

        clock.start();
        assert_eq!(
            endpoint.recv_timeout(Duration::from_secs(1)).unwrap(),
            START
        );
        assert_eq!(endpoint.recv_timeout(Duration::from_secs(1)).unwrap(), TICK);
        assert!(clock.is_running());

        clock.stop();
        // Drain ticks in flight until the stop byte arrives.
        loop {
            match endpoint.recv_timeout(Duration::from_secs(1)).unwrap() {
                TICK => continue,
                byte => {
                    assert_eq!(byte, STOP);
                    break;
                }
            }
        }
        assert!(!clock.is_running());
        assert!(clock.is_paused());
    }

    #[test]
    fn test_resume_keeps_ticks() {
        let clock = MidiClock::new("test").unwrap();
        let endpoint = clock.endpoint();
        clock.set_beats_per_minute(600);

        clock.start();
        std::thread::sleep(Duration::from_millis(20));
        clock.stop();
        std::thread::sleep(Duration::from_millis(5));
        let ticks = clock.ticks();
        assert!(ticks > 0);

        clock.resume();
        std::thread::sleep(Duration::from_millis(20));
        clock.stop();
        assert!(clock.ticks() >= ticks);

        // Continue byte was emitted somewhere in the stream.
        let mut saw_continue = false;
        while let Ok(byte) = endpoint.try_recv() {
            if byte == CONTINUE {
                saw_continue = true;
            }
        }
        assert!(saw_continue);
    }

    #[test]
    fn test_reset_requires_stopped() {
        let clock = MidiClock::new("test").unwrap();
        clock.start();
        assert!(clock.reset().is_err());
        clock.stop();
        std::thread::sleep(Duration::from_millis(5));
        clock.reset().unwrap();
        assert_eq!(clock.ticks(), 0);
        assert!(!clock.is_paused());
    }

    #[test]
    fn test_start_twice_is_noop() {
        let clock = MidiClock::new("test").unwrap();
        clock.start();
        clock.start();
        let endpoint = clock.endpoint();
        assert_eq!(
            endpoint.recv_timeout(Duration::from_secs(1)).unwrap(),
            START
        );
        clock.stop();
    }
}
