//! Meta events: `FF <type> <length:VLQ> <payload>`.

use core::fmt;

use groove_core::BarBeatTime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vlq::VariableLengthQuantity;

/// A time signature as carried by the 0x58 meta event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Beats per bar (numerator).
    pub beats_per_bar: u8,
    /// The note value that gets one beat (denominator, a power of two).
    pub beat_unit: u8,
}

impl TimeSignature {
    pub const fn new(beats_per_bar: u8, beat_unit: u8) -> Self {
        Self {
            beats_per_bar,
            beat_unit,
        }
    }

    fn bytes(&self) -> [u8; 2] {
        [self.beats_per_bar, self.beat_unit.max(1).ilog2() as u8]
    }

    fn parse(numerator: u8, beat_unit_log2: u8) -> Result<Self> {
        if beat_unit_log2 > 7 {
            return Err(Error::FileStructurallyUnsound(format!(
                "time signature denominator 2^{beat_unit_log2} does not fit a byte"
            )));
        }
        Ok(Self {
            beats_per_bar: numerator,
            beat_unit: 1 << beat_unit_log2,
        })
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.beats_per_bar, self.beat_unit)
    }
}

/// The payload of a meta event, one case per supported type code.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaEventData {
    Text(String),
    CopyrightNotice(String),
    SequenceTrackName(String),
    InstrumentName(String),
    Marker(String),
    ProgramName(String),
    DeviceName(String),
    EndOfTrack,
    /// Tempo in beats per minute; persisted as microseconds per quarter
    /// note (`60_000_000 / bpm`, 3 bytes big-endian).
    Tempo(f64),
    TimeSignature {
        signature: TimeSignature,
        /// MIDI clocks per metronome click.
        clocks_per_click: u8,
        /// Notated 32nd notes per 24 MIDI clocks.
        notes_per_quarter: u8,
    },
}

impl MetaEventData {
    /// The meta type code following the 0xFF marker.
    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Text(_) => 0x01,
            Self::CopyrightNotice(_) => 0x02,
            Self::SequenceTrackName(_) => 0x03,
            Self::InstrumentName(_) => 0x04,
            Self::Marker(_) => 0x06,
            Self::ProgramName(_) => 0x08,
            Self::DeviceName(_) => 0x09,
            Self::EndOfTrack => 0x2F,
            Self::Tempo(_) => 0x51,
            Self::TimeSignature { .. } => 0x58,
        }
    }

    /// The type-specific payload bytes (length prefix excluded).
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::Text(text)
            | Self::CopyrightNotice(text)
            | Self::SequenceTrackName(text)
            | Self::InstrumentName(text)
            | Self::Marker(text)
            | Self::ProgramName(text)
            | Self::DeviceName(text) => text.as_bytes().to_vec(),
            Self::EndOfTrack => Vec::new(),
            Self::Tempo(bpm) => {
                let microseconds = (60_000_000.0 / bpm).round() as u32;
                microseconds.to_be_bytes()[1..].to_vec()
            }
            Self::TimeSignature {
                signature,
                clocks_per_click,
                notes_per_quarter,
            } => {
                let mut bytes = signature.bytes().to_vec();
                bytes.push(*clocks_per_click);
                bytes.push(*notes_per_quarter);
                bytes
            }
        }
    }

    /// Rebuilds a payload parsed from `type_byte` + `payload` bytes.
    pub fn from_payload(type_byte: u8, payload: &[u8]) -> Result<Self> {
        let text = |payload: &[u8]| -> Result<String> {
            String::from_utf8(payload.to_vec()).map_err(|_| {
                Error::FileStructurallyUnsound(format!(
                    "meta event 0x{type_byte:02X} payload is not valid UTF-8"
                ))
            })
        };

        match type_byte {
            0x01 => Ok(Self::Text(text(payload)?)),
            0x02 => Ok(Self::CopyrightNotice(text(payload)?)),
            0x03 => Ok(Self::SequenceTrackName(text(payload)?)),
            0x04 => Ok(Self::InstrumentName(text(payload)?)),
            0x06 => Ok(Self::Marker(text(payload)?)),
            0x08 => Ok(Self::ProgramName(text(payload)?)),
            0x09 => Ok(Self::DeviceName(text(payload)?)),
            0x2F => {
                if !payload.is_empty() {
                    return Err(Error::InvalidLength(format!(
                        "end-of-track carries no payload, found {} bytes",
                        payload.len()
                    )));
                }
                Ok(Self::EndOfTrack)
            }
            0x51 => {
                let [a, b, c] = payload else {
                    return Err(Error::InvalidLength(format!(
                        "tempo payload must be 3 bytes, found {}",
                        payload.len()
                    )));
                };
                let microseconds = u32::from_be_bytes([0, *a, *b, *c]);
                if microseconds == 0 {
                    return Err(Error::FileStructurallyUnsound(
                        "tempo of zero microseconds per beat".into(),
                    ));
                }
                Ok(Self::Tempo(60_000_000.0 / microseconds as f64))
            }
            0x58 => {
                let [numerator, beat_unit_log2, clocks, notes] = payload else {
                    return Err(Error::InvalidLength(format!(
                        "time signature payload must be 4 bytes, found {}",
                        payload.len()
                    )));
                };
                Ok(Self::TimeSignature {
                    signature: TimeSignature::parse(*numerator, *beat_unit_log2)?,
                    clocks_per_click: *clocks,
                    notes_per_quarter: *notes,
                })
            }
            other => Err(Error::UnsupportedEvent(format!(
                "0x{other:02X} is not a supported meta event type"
            ))),
        }
    }
}

impl fmt::Display for MetaEventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "text '{text}'"),
            Self::CopyrightNotice(text) => write!(f, "copyright '{text}'"),
            Self::SequenceTrackName(text) => write!(f, "sequence/track name '{text}'"),
            Self::InstrumentName(text) => write!(f, "instrument name '{text}'"),
            Self::Marker(text) => write!(f, "marker '{text}'"),
            Self::ProgramName(text) => write!(f, "program name '{text}'"),
            Self::DeviceName(text) => write!(f, "device name '{text}'"),
            Self::EndOfTrack => write!(f, "end of track"),
            Self::Tempo(bpm) => write!(f, "tempo {bpm}"),
            Self::TimeSignature { signature, .. } => write!(f, "time signature {signature}"),
        }
    }
}

/// A meta event: payload data plus the instant it belongs to and, during
/// (de)serialization only, its delta from the previous event.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaEvent {
    pub time: BarBeatTime,
    pub delta: Option<u64>,
    pub data: MetaEventData,
}

impl MetaEvent {
    pub fn new(data: MetaEventData, time: BarBeatTime) -> Self {
        Self {
            time,
            delta: None,
            data,
        }
    }

    /// Encodes as `FF <type> <length:VLQ> <payload>`.
    pub fn bytes(&self) -> Vec<u8> {
        let payload = self.data.payload();
        let mut bytes = vec![0xFF, self.data.type_byte()];
        bytes.extend_from_slice(&VariableLengthQuantity::from(payload.len()).bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    /// Parses an event slice spanning exactly `FF <type> <len> <payload>`.
    pub(crate) fn parse(delta: u64, data: &[u8], time: BarBeatTime) -> Result<Self> {
        if data.len() < 3 {
            return Err(Error::InvalidLength(format!(
                "meta event needs at least 3 bytes, found {}",
                data.len()
            )));
        }
        if data[0] != 0xFF {
            return Err(Error::InvalidHeader(format!(
                "meta event must begin with 0xFF, found 0x{:02X}",
                data[0]
            )));
        }
        let type_byte = data[1];
        let (length, consumed) = VariableLengthQuantity::decode(&data[2..])?;
        let payload_start = 2 + consumed;
        let payload_end = payload_start + length.value() as usize;
        if payload_end != data.len() {
            return Err(Error::InvalidLength(format!(
                "meta event declares {} payload bytes but {} remain",
                length.value(),
                data.len() - payload_start
            )));
        }
        Ok(Self {
            time,
            delta: Some(delta),
            data: MetaEventData::from_payload(type_byte, &data[payload_start..payload_end])?,
        })
    }
}

impl fmt::Display for MetaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.time, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(data: MetaEventData) {
        let event = MetaEvent::new(data, BarBeatTime::default());
        let bytes = event.bytes();
        let parsed = MetaEvent::parse(0, &bytes, BarBeatTime::default()).unwrap();
        assert_eq!(parsed.data, event.data);
        assert_eq!(parsed.bytes(), bytes);
    }

    #[test]
    fn test_text_events_round_trip() {
        round_trip(MetaEventData::Text("hello".into()));
        round_trip(MetaEventData::CopyrightNotice("(c) 2016".into()));
        round_trip(MetaEventData::SequenceTrackName("Track 1".into()));
        round_trip(MetaEventData::InstrumentName("Piano".into()));
        round_trip(MetaEventData::Marker("loop start".into()));
        round_trip(MetaEventData::ProgramName("Lead".into()));
        round_trip(MetaEventData::DeviceName("Bus 1".into()));
    }

    #[test]
    fn test_end_of_track_bytes() {
        let event = MetaEvent::new(MetaEventData::EndOfTrack, BarBeatTime::default());
        assert_eq!(event.bytes(), vec![0xFF, 0x2F, 0x00]);
        round_trip(MetaEventData::EndOfTrack);
    }

    #[test]
    fn test_tempo_payload_for_120_bpm() {
        // 120 BPM = 500_000 microseconds per quarter note.
        let payload = MetaEventData::Tempo(120.0).payload();
        assert_eq!(payload, 500_000u32.to_be_bytes()[1..].to_vec());
        round_trip(MetaEventData::Tempo(120.0));
        round_trip(MetaEventData::Tempo(89.0));
    }

    #[test]
    fn test_time_signature_payload() {
        let data = MetaEventData::TimeSignature {
            signature: TimeSignature::new(6, 8),
            clocks_per_click: 24,
            notes_per_quarter: 8,
        };
        assert_eq!(data.payload(), vec![6, 3, 24, 8]);
        round_trip(data);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let bytes = [0xFF, 0x7E, 0x00];
        assert!(matches!(
            MetaEvent::parse(0, &bytes, BarBeatTime::default()),
            Err(Error::UnsupportedEvent(_))
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        // Declares 5 payload bytes, provides 2.
        let bytes = [0xFF, 0x01, 0x05, b'h', b'i'];
        assert!(matches!(
            MetaEvent::parse(0, &bytes, BarBeatTime::default()),
            Err(Error::InvalidLength(_))
        ));
    }

    #[test]
    fn test_end_of_track_with_payload_rejected() {
        let bytes = [0xFF, 0x2F, 0x01, 0x00];
        assert!(matches!(
            MetaEvent::parse(0, &bytes, BarBeatTime::default()),
            Err(Error::InvalidLength(_))
        ));
    }
}
