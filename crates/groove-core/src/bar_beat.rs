//! Bar/beat/subbeat musical time.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The unit context a [`BarBeatTime`] is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Units {
    /// Beats per bar (time signature numerator).
    pub beats_per_bar: u32,
    /// Beats per minute, used for conversion to seconds.
    pub beats_per_minute: u16,
    /// Subbeats per beat (ticks-per-beat resolution).
    pub subbeat_divisor: u32,
}

impl Units {
    pub const fn new(beats_per_bar: u32, beats_per_minute: u16, subbeat_divisor: u32) -> Self {
        Self {
            beats_per_bar,
            beats_per_minute,
            subbeat_divisor,
        }
    }

    /// Duration of a single subbeat tick in seconds.
    #[inline]
    pub fn seconds_per_tick(&self) -> f64 {
        60.0 / (self.beats_per_minute as f64 * self.subbeat_divisor as f64)
    }
}

impl Default for Units {
    fn default() -> Self {
        Self::new(4, 120, 480)
    }
}

/// A position in musical time: bar, beat within the bar, subbeat within
/// the beat. All three components are 1-based; the earliest position is
/// `1:1.1` at tick zero.
///
/// Comparison, equality, and hashing are value-based over [`ticks`], the
/// absolute tick count since the start of the sequence.
///
/// [`ticks`]: BarBeatTime::ticks
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BarBeatTime {
    bar: u32,
    beat: u32,
    subbeat: u32,
    units: Units,
}

impl BarBeatTime {
    /// Builds a time from 1-based components, rejecting components outside
    /// the ranges the units allow.
    pub fn new(bar: u32, beat: u32, subbeat: u32, units: Units) -> Result<Self> {
        if bar < 1 {
            return Err(Error::InvalidTime("bar must be >= 1".into()));
        }
        if beat < 1 || beat > units.beats_per_bar {
            return Err(Error::InvalidTime(format!(
                "beat {beat} outside 1..={}",
                units.beats_per_bar
            )));
        }
        if subbeat < 1 || subbeat > units.subbeat_divisor {
            return Err(Error::InvalidTime(format!(
                "subbeat {subbeat} outside 1..={}",
                units.subbeat_divisor
            )));
        }
        Ok(Self {
            bar,
            beat,
            subbeat,
            units,
        })
    }

    /// The canonical start position `1:1.1` (tick zero).
    pub const fn start(units: Units) -> Self {
        Self {
            bar: 1,
            beat: 1,
            subbeat: 1,
            units,
        }
    }

    /// Builds the time corresponding to an absolute tick count.
    pub fn from_ticks(ticks: u64, units: Units) -> Self {
        let divisor = units.subbeat_divisor as u64;
        let beats_per_bar = units.beats_per_bar as u64;
        let total_beats = ticks / divisor;
        Self {
            bar: (total_beats / beats_per_bar) as u32 + 1,
            beat: (total_beats % beats_per_bar) as u32 + 1,
            subbeat: (ticks % divisor) as u32 + 1,
            units,
        }
    }

    #[inline]
    pub fn bar(&self) -> u32 {
        self.bar
    }

    #[inline]
    pub fn beat(&self) -> u32 {
        self.beat
    }

    #[inline]
    pub fn subbeat(&self) -> u32 {
        self.subbeat
    }

    #[inline]
    pub fn units(&self) -> Units {
        self.units
    }

    /// Absolute tick count since the start of the sequence.
    #[inline]
    pub fn ticks(&self) -> u64 {
        let divisor = self.units.subbeat_divisor as u64;
        let beats_per_bar = self.units.beats_per_bar as u64;
        ((self.bar as u64 - 1) * beats_per_bar + (self.beat as u64 - 1)) * divisor
            + (self.subbeat as u64 - 1)
    }

    /// Elapsed seconds at this position under the units' tempo.
    #[inline]
    pub fn seconds(&self) -> f64 {
        self.ticks() as f64 * self.units.seconds_per_tick()
    }

    /// Advances by `subbeats` ticks, carrying subbeat overflow into the
    /// beat and beat overflow into the bar.
    #[must_use]
    pub fn advancing_subbeats(&self, subbeats: u64) -> Self {
        Self::from_ticks(self.ticks() + subbeats, self.units)
    }

    /// Moves by a signed tick delta, saturating at tick zero.
    #[must_use]
    pub fn offset_by_ticks(&self, delta: i64) -> Self {
        let ticks = if delta < 0 {
            self.ticks().saturating_sub(delta.unsigned_abs())
        } else {
            self.ticks() + delta as u64
        };
        Self::from_ticks(ticks, self.units)
    }

    /// Whether the components are in range for the carried units.
    pub fn is_valid(&self) -> bool {
        self.bar >= 1
            && (1..=self.units.beats_per_bar).contains(&self.beat)
            && (1..=self.units.subbeat_divisor).contains(&self.subbeat)
    }
}

impl Default for BarBeatTime {
    fn default() -> Self {
        Self::start(Units::default())
    }
}

impl PartialEq for BarBeatTime {
    fn eq(&self, other: &Self) -> bool {
        self.ticks() == other.ticks()
    }
}

impl Eq for BarBeatTime {}

impl PartialOrd for BarBeatTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BarBeatTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ticks().cmp(&other.ticks())
    }
}

impl Hash for BarBeatTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ticks().hash(state);
    }
}

impl fmt::Display for BarBeatTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.bar, self.beat, self.subbeat)
    }
}

impl FromStr for BarBeatTime {
    type Err = Error;

    /// Parses the `bar:beat.subbeat` form produced by `Display`, under
    /// default units.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidTime(format!("expected bar:beat.subbeat, got '{s}'"));
        let (bar, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (beat, subbeat) = rest.split_once('.').ok_or_else(invalid)?;
        let bar = bar.parse::<u32>().map_err(|_| invalid())?;
        let beat = beat.parse::<u32>().map_err(|_| invalid())?;
        let subbeat = subbeat.parse::<u32>().map_err(|_| invalid())?;
        Self::new(bar, beat, subbeat, Units::default())
    }
}
