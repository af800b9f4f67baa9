//! Transport state machine composing a clock and a musical time keeper.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::warn;

use crate::bar_beat::BarBeatTime;
use crate::clock::MidiClock;
use crate::error::{Error, Result};
use crate::musical_time::MusicalTime;

/// Bit-flag set describing the transport's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportState(u8);

impl TransportState {
    pub const EMPTY: Self = Self(0);
    pub const PLAYING: Self = Self(1 << 0);
    pub const PAUSED: Self = Self(1 << 1);
    pub const RECORDING: Self = Self(1 << 2);
    pub const JOGGING: Self = Self(1 << 3);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for TransportState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TransportState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::PLAYING) {
            names.push("playing");
        }
        if self.contains(Self::PAUSED) {
            names.push("paused");
        }
        if self.contains(Self::RECORDING) {
            names.push("recording");
        }
        if self.contains(Self::JOGGING) {
            names.push("jogging");
        }
        if names.is_empty() {
            names.push("stopped");
        }
        write!(f, "{}", names.join("|"))
    }
}

/// Lifecycle signals posted as the transport changes state.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    DidStart { time: BarBeatTime },
    DidPause { time: BarBeatTime, ticks: u64 },
    DidStop { time: BarBeatTime },
    DidReset { time: BarBeatTime },
    DidToggleRecording { recording: bool },
    DidBeginJogging { time: BarBeatTime },
    DidJog { time: BarBeatTime, jog_time: BarBeatTime },
    DidEndJogging { time: BarBeatTime },
}

struct TransportInner {
    state: TransportState,
    /// Staged target while jogging; committed only by `end_jog`.
    jog_target: Option<BarBeatTime>,
    /// Upper tick bound captured at `begin_jog`.
    max_ticks: u64,
    sequence_end: Option<BarBeatTime>,
}

/// Manages playback state for a sequencer: play, pause, stop, record, and
/// the two-phase jog protocol. Composes one [`MidiClock`] and one
/// [`MusicalTime`] wired endpoint-to-listener at construction.
pub struct Transport {
    name: String,
    clock: MidiClock,
    time: MusicalTime,
    inner: Mutex<TransportInner>,
    subscribers: Mutex<Vec<Sender<TransportSignal>>>,
}

impl Transport {
    /// Creates a transport with a fresh clock and time keeper under
    /// default units.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_units(name, crate::bar_beat::Units::default())
    }

    pub fn with_units(name: impl Into<String>, units: crate::bar_beat::Units) -> Result<Self> {
        let name = name.into();
        let clock = MidiClock::new(name.clone())?;
        let time = MusicalTime::new(name.clone(), clock.endpoint(), units, clock.resolution())?;
        Ok(Self {
            name,
            clock,
            time,
            inner: Mutex::new(TransportInner {
                state: TransportState::EMPTY,
                jog_target: None,
                max_ticks: 0,
                sequence_end: None,
            }),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn clock(&self) -> &MidiClock {
        &self.clock
    }

    #[inline]
    pub fn time(&self) -> &MusicalTime {
        &self.time
    }

    /// Beats per minute, a wrapper around the clock's tempo.
    pub fn tempo(&self) -> u16 {
        self.clock.beats_per_minute()
    }

    pub fn set_tempo(&self, bpm: u16) {
        self.clock.set_beats_per_minute(bpm);
    }

    pub fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    pub fn is_playing(&self) -> bool {
        self.state().contains(TransportState::PLAYING)
    }

    pub fn is_paused(&self) -> bool {
        self.state().contains(TransportState::PAUSED)
    }

    pub fn is_recording(&self) -> bool {
        self.state().contains(TransportState::RECORDING)
    }

    pub fn is_jogging(&self) -> bool {
        self.state().contains(TransportState::JOGGING)
    }

    /// The end of the owning sequence, used as the jog upper bound.
    pub fn set_sequence_end(&self, end: Option<BarBeatTime>) {
        self.inner.lock().sequence_end = end;
    }

    /// Subscribes to lifecycle signals. Receivers whose channel has been
    /// dropped are pruned on the next post.
    pub fn subscribe(&self) -> Receiver<TransportSignal> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn post(&self, signal: TransportSignal) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(signal.clone()).is_ok());
    }

    /// Starts playback, resuming if paused. A no-op with a warning while
    /// already playing.
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.state.contains(TransportState::PLAYING) {
            warn!(transport = %self.name, "play requested while already playing");
            return;
        }
        self.post(TransportSignal::DidStart {
            time: self.time.current(),
        });
        if inner.state.contains(TransportState::PAUSED) {
            inner.state.remove(TransportState::PAUSED);
            inner.state.insert(TransportState::PLAYING);
            self.clock.resume();
        } else {
            inner.state.insert(TransportState::PLAYING);
            self.clock.start();
        }
    }

    /// Pauses playback. A no-op with a warning unless playing.
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.state.contains(TransportState::PLAYING) {
            warn!(transport = %self.name, "pause requested while not playing");
            return;
        }
        self.clock.stop();
        inner.state.remove(TransportState::PLAYING);
        inner.state.insert(TransportState::PAUSED);
        self.post(TransportSignal::DidPause {
            time: self.time.current(),
            ticks: self.clock.ticks(),
        });
    }

    /// Stops playback. A no-op with a warning unless playing or paused.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !self.stop_locked(&mut inner) {
            warn!(transport = %self.name, "stop requested while already stopped");
        }
    }

    fn stop_locked(&self, inner: &mut TransportInner) -> bool {
        let stoppable = inner.state.contains(TransportState::PLAYING)
            || inner.state.contains(TransportState::PAUSED);
        if !stoppable {
            return false;
        }
        self.clock.stop();
        inner.state.remove(TransportState::PLAYING);
        inner.state.remove(TransportState::PAUSED);
        self.post(TransportSignal::DidStop {
            time: self.time.current(),
        });
        true
    }

    /// Stops if necessary, zeroes the clock, and rewinds the time keeper
    /// to the start instant, signalling `DidReset` with the post-reset
    /// instant.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.stop_locked(&mut inner);
        if let Err(error) = self.clock.reset() {
            warn!(transport = %self.name, %error, "clock reset rejected");
            return;
        }
        self.time.reset(|time| {
            self.post(TransportSignal::DidReset { time });
        });
    }

    /// Flips the recording flag. Does not start or stop the clock; the
    /// flag is a hint for collaborators deciding whether to persist what
    /// they generate.
    pub fn toggle_recording(&self) {
        let recording = {
            let mut inner = self.inner.lock();
            if inner.state.contains(TransportState::RECORDING) {
                inner.state.remove(TransportState::RECORDING);
                false
            } else {
                inner.state.insert(TransportState::RECORDING);
                true
            }
        };
        self.post(TransportSignal::DidToggleRecording { recording });
    }

    /// Enters jog mode: stops the clock (without resetting its counter),
    /// stages the current instant, and captures the tick upper bound.
    pub fn begin_jog(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state.contains(TransportState::JOGGING) {
            return Err(Error::NotPermitted("the transport is already jogging".into()));
        }
        if self.clock.is_running() {
            self.clock.stop();
        }
        let time = self.time.current();
        inner.jog_target = Some(time);
        inner.max_ticks = self
            .clock
            .ticks()
            .max(inner.sequence_end.map_or(0, |end| end.ticks()));
        inner.state.insert(TransportState::JOGGING);
        self.post(TransportSignal::DidBeginJogging { time });
        Ok(())
    }

    /// Moves the staged jog target by wheel `revolutions`; one revolution
    /// spans a full bar of subbeats. Negative values move backward. The
    /// target is clamped to `[0, max_ticks]`.
    pub fn jog(&self, revolutions: f64) -> Result<()> {
        let (target, max_ticks) = {
            let inner = self.inner.lock();
            if !inner.state.contains(TransportState::JOGGING) {
                return Err(Error::NotPermitted("the transport is not jogging".into()));
            }
            let target = inner.jog_target.unwrap_or_else(|| self.time.current());
            (target, inner.max_ticks)
        };

        let units = target.units();
        let ticks_per_revolution = (units.beats_per_bar as u64 * units.subbeat_divisor as u64) as f64;
        let delta = (revolutions * ticks_per_revolution).round() as i64;
        let staged = target.offset_by_ticks(delta);
        let clamped = if staged.ticks() > max_ticks {
            BarBeatTime::from_ticks(max_ticks, units)
        } else {
            staged
        };
        if clamped == target {
            return Ok(());
        }
        self.jog_to_time(clamped)
    }

    /// Updates the staged jog target directly. The target must be valid
    /// under the time keeper's active units; the committed instant is
    /// untouched until [`end_jog`](Self::end_jog).
    pub fn jog_to_time(&self, time: BarBeatTime) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.contains(TransportState::JOGGING) {
            return Err(Error::NotPermitted("the transport is not jogging".into()));
        }
        let units = self.time.units();
        let staged = BarBeatTime::new(time.bar(), time.beat(), time.subbeat(), units)?;
        inner.jog_target = Some(staged);
        self.post(TransportSignal::DidJog {
            time: self.time.current(),
            jog_time: staged,
        });
        Ok(())
    }

    /// Commits the staged jog target into the time keeper and leaves jog
    /// mode, resuming the clock unless the transport is paused.
    pub fn end_jog(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.contains(TransportState::JOGGING) {
            return Err(Error::NotPermitted("the transport is not jogging".into()));
        }
        if self.clock.is_running() {
            return Err(Error::NotPermitted(
                "cannot leave jog mode while the clock is running".into(),
            ));
        }
        if let Some(target) = inner.jog_target.take() {
            self.time.set_current(target)?;
        }
        inner.state.remove(TransportState::JOGGING);
        let time = self.time.current();
        self.post(TransportSignal::DidEndJogging { time });
        if !inner.state.contains(TransportState::PAUSED) && self.clock.is_paused() {
            self.clock.resume();
        }
        Ok(())
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.name, self.state(), self.time.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar_beat::Units;
    use std::time::Duration;

    fn drain(rx: &Receiver<TransportSignal>) -> Vec<TransportSignal> {
        let mut signals = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            signals.push(signal);
        }
        signals
    }

    #[test]
    fn test_state_flags() {
        let mut state = TransportState::EMPTY;
        assert!(state.is_empty());
        state.insert(TransportState::PLAYING);
        state.insert(TransportState::RECORDING);
        assert!(state.contains(TransportState::PLAYING));
        assert!(!state.contains(TransportState::PAUSED));
        state.remove(TransportState::PLAYING);
        assert!(!state.contains(TransportState::PLAYING));
        assert!(state.contains(TransportState::RECORDING));
        assert_eq!(
            (TransportState::PLAYING | TransportState::JOGGING).to_string(),
            "playing|jogging"
        );
    }

    #[test]
    fn test_play_pause_stop_cycle() {
        let transport = Transport::new("test").unwrap();
        let signals = transport.subscribe();

        transport.play();
        assert!(transport.is_playing());
        transport.pause();
        assert!(transport.is_paused());
        assert!(!transport.is_playing());
        transport.play();
        assert!(transport.is_playing());
        transport.stop();
        assert!(transport.state().is_empty());

        let posted = drain(&signals);
        assert!(matches!(posted[0], TransportSignal::DidStart { .. }));
        assert!(matches!(posted[1], TransportSignal::DidPause { .. }));
        assert!(matches!(posted[2], TransportSignal::DidStart { .. }));
        assert!(matches!(posted[3], TransportSignal::DidStop { .. }));
    }

    #[test]
    fn test_play_while_playing_is_noop() {
        let transport = Transport::new("test").unwrap();
        let signals = transport.subscribe();
        transport.play();
        transport.play();
        assert_eq!(drain(&signals).len(), 1);
        transport.stop();
    }

    #[test]
    fn test_pause_while_stopped_is_noop() {
        let transport = Transport::new("test").unwrap();
        let signals = transport.subscribe();
        transport.pause();
        transport.stop();
        assert!(drain(&signals).is_empty());
    }

    #[test]
    fn test_toggle_recording() {
        let transport = Transport::new("test").unwrap();
        let signals = transport.subscribe();
        transport.toggle_recording();
        assert!(transport.is_recording());
        transport.toggle_recording();
        assert!(!transport.is_recording());
        let posted = drain(&signals);
        assert_eq!(
            posted,
            vec![
                TransportSignal::DidToggleRecording { recording: true },
                TransportSignal::DidToggleRecording { recording: false },
            ]
        );
    }

    #[test]
    fn test_jog_requires_begin() {
        let transport = Transport::new("test").unwrap();
        let before = transport.time().current();
        assert!(matches!(
            transport.jog(0.5),
            Err(Error::NotPermitted(_))
        ));
        assert_eq!(transport.time().current(), before);
    }

    #[test]
    fn test_jog_to_time_rejects_out_of_range() {
        let transport = Transport::new("test").unwrap();
        transport.begin_jog().unwrap();
        // Beat beyond the transport's 4-beat bar: legal under wider units
        // but rejected against the active ones.
        let wide = Units::new(8, 120, 480);
        let bogus = BarBeatTime::new(1, 5, 1, wide).unwrap();
        assert!(matches!(
            transport.jog_to_time(bogus),
            Err(Error::InvalidTime(_))
        ));
        transport.end_jog().unwrap();
        assert_eq!(transport.time().current().ticks(), 0);
    }

    #[test]
    fn test_jog_stage_and_commit() {
        let transport = Transport::new("test").unwrap();
        let signals = transport.subscribe();
        let end = BarBeatTime::from_ticks(480 * 16, Units::default());
        transport.set_sequence_end(Some(end));

        transport.begin_jog().unwrap();
        assert!(transport.is_jogging());

        // Half a revolution forward: half a bar of ticks.
        transport.jog(0.5).unwrap();
        // Committed time unchanged while staged.
        assert_eq!(transport.time().current().ticks(), 0);

        transport.end_jog().unwrap();
        assert!(!transport.is_jogging());
        assert_eq!(transport.time().current().ticks(), 480 * 2);

        let posted = drain(&signals);
        assert!(matches!(posted[0], TransportSignal::DidBeginJogging { .. }));
        match &posted[1] {
            TransportSignal::DidJog { time, jog_time } => {
                assert_eq!(time.ticks(), 0);
                assert_eq!(jog_time.ticks(), 480 * 2);
            }
            other => panic!("expected DidJog, got {other:?}"),
        }
        assert!(matches!(posted[2], TransportSignal::DidEndJogging { .. }));
    }

    #[test]
    fn test_jog_clamps_to_bounds() {
        let transport = Transport::new("test").unwrap();
        let end = BarBeatTime::from_ticks(480, Units::default());
        transport.set_sequence_end(Some(end));

        transport.begin_jog().unwrap();
        transport.jog(-3.0).unwrap_or(());
        transport.end_jog().unwrap();
        assert_eq!(transport.time().current().ticks(), 0);

        transport.begin_jog().unwrap();
        transport.jog(5.0).unwrap();
        transport.end_jog().unwrap();
        assert_eq!(transport.time().current().ticks(), 480);
    }

    #[test]
    fn test_end_jog_resumes_after_pause_mid_play() {
        let transport = Transport::new("test").unwrap();
        transport.play();
        std::thread::sleep(Duration::from_millis(20));
        transport.begin_jog().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        transport.jog(0.25).unwrap();
        transport.end_jog().unwrap();
        // Was playing before the jog, so the clock resumes.
        assert!(transport.is_playing());
        transport.stop();
    }

    #[test]
    fn test_reset_returns_to_start() {
        let transport = Transport::new("test").unwrap();
        let signals = transport.subscribe();
        transport.play();
        std::thread::sleep(Duration::from_millis(30));
        transport.reset();
        assert!(transport.state().is_empty());
        assert_eq!(transport.time().current().ticks(), 0);
        assert_eq!(transport.clock().ticks(), 0);
        let posted = drain(&signals);
        assert!(posted
            .iter()
            .any(|s| matches!(s, TransportSignal::DidReset { .. })));
    }
}
