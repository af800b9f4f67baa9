//! Standard MIDI File parsing and serialization.
//!
//! A file is `'MThd' <len=6:BE32> <format:BE16> <trackCount:BE16>
//! <division:BE16>` followed by `trackCount` chunks of
//! `'MTrk' <len:BE32> <event-stream>`, where the event stream is a
//! concatenation of `(VLQ delta, event bytes)` pairs.

use std::path::Path;

use groove_core::{BarBeatTime, Units};
use tracing::debug;

use crate::container::EventContainer;
use crate::error::{Error, Result};
use crate::event::{ChannelEvent, ChannelKind, MetaEvent, MidiEvent, NodeEvent};
use crate::vlq::VariableLengthQuantity;

const HEADER_TAG: &[u8; 4] = b"MThd";
const TRACK_TAG: &[u8; 4] = b"MTrk";
const HEADER_LEN: usize = 14;

/// The header chunk of a MIDI file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderChunk {
    pub format: u16,
    pub track_count: u16,
    /// Ticks per quarter note.
    pub division: u16,
}

impl HeaderChunk {
    /// A format-1 header for `track_count` tracks.
    pub fn new(track_count: u16, division: u16) -> Self {
        Self {
            format: 1,
            track_count,
            division,
        }
    }

    pub fn bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(HEADER_TAG);
        bytes[4..8].copy_from_slice(&6u32.to_be_bytes());
        bytes[8..10].copy_from_slice(&self.format.to_be_bytes());
        bytes[10..12].copy_from_slice(&self.track_count.to_be_bytes());
        bytes[12..14].copy_from_slice(&self.division.to_be_bytes());
        bytes
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::InvalidLength(format!(
                "header chunk must be {HEADER_LEN} bytes, found {}",
                data.len()
            )));
        }
        if &data[..4] != HEADER_TAG {
            return Err(Error::InvalidHeader(
                "expected chunk header with type 'MThd'".into(),
            ));
        }
        let declared = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if declared != 6 {
            return Err(Error::InvalidLength(format!(
                "header must declare a length of 6, found {declared}"
            )));
        }
        let format = u16::from_be_bytes([data[8], data[9]]);
        if format > 2 {
            return Err(Error::FileStructurallyUnsound(format!(
                "format must be 0, 1, or 2, found {format}"
            )));
        }
        let division = u16::from_be_bytes([data[12], data[13]]);
        if division == 0 {
            return Err(Error::FileStructurallyUnsound(
                "division of zero ticks per quarter note".into(),
            ));
        }
        Ok(Self {
            format,
            track_count: u16::from_be_bytes([data[10], data[11]]),
            division,
        })
    }
}

/// One track's worth of events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackChunk {
    pub events: Vec<MidiEvent>,
}

impl TrackChunk {
    pub fn new(events: Vec<MidiEvent>) -> Self {
        Self { events }
    }

    /// Snapshots a container's events in ascending-instant order.
    pub fn from_container(container: &EventContainer) -> Self {
        Self {
            events: container.iter().cloned().collect(),
        }
    }

    /// Decodes an event stream (the bytes after the chunk tag and length),
    /// accumulating each delta into an absolute tick count and stamping
    /// every event with the corresponding instant.
    fn parse_events(data: &[u8], units: Units, track: usize, base: usize) -> Result<Self> {
        let mut events = Vec::new();
        let mut cursor = 0usize;
        let mut ticks = 0u64;

        while cursor < data.len() {
            let (delta, consumed) = VariableLengthQuantity::decode(&data[cursor..])?;
            cursor += consumed;
            if cursor >= data.len() {
                return Err(Error::MissingEvent(format!(
                    "track {track} ends after a delta at offset {}",
                    base + cursor
                )));
            }

            ticks += delta.value();
            let time = BarBeatTime::from_ticks(ticks, units);
            let event_start = cursor;

            let event: MidiEvent = if data[cursor] == 0xFF {
                if cursor + 2 >= data.len() {
                    return Err(Error::InvalidLength(format!(
                        "track {track} meta event truncated at offset {}",
                        base + cursor
                    )));
                }
                let type_byte = data[cursor + 1];
                let (length, length_consumed) =
                    VariableLengthQuantity::decode(&data[cursor + 2..])?;
                let end = cursor + 2 + length_consumed + length.value() as usize;
                if end > data.len() {
                    return Err(Error::InvalidLength(format!(
                        "track {track} meta event at offset {} extends past the chunk",
                        base + cursor
                    )));
                }
                let slice = &data[event_start..end];
                cursor = end;
                if type_byte == 0x07 {
                    NodeEvent::parse(delta.value(), slice, time)?.into()
                } else {
                    MetaEvent::parse(delta.value(), slice, time)?.into()
                }
            } else {
                let kind = ChannelKind::from_nibble(data[cursor] >> 4).ok_or_else(|| {
                    Error::UnsupportedEvent(format!(
                        "0x{:X} at offset {} is not a supported channel event",
                        data[cursor] >> 4,
                        base + cursor
                    ))
                })?;
                let end = cursor + kind.byte_count();
                if end > data.len() {
                    return Err(Error::InvalidLength(format!(
                        "track {track} channel event at offset {} extends past the chunk",
                        base + cursor
                    )));
                }
                let slice = &data[event_start..end];
                cursor = end;
                ChannelEvent::parse(delta.value(), slice, time)?.into()
            };

            events.push(event);
        }

        Ok(Self { events })
    }

    /// Encodes the event stream, computing each event's delta from the
    /// previous event's tick (clamped to zero for out-of-order input).
    fn stream_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut previous_ticks = 0u64;
        for event in &self.events {
            let ticks = event.time().ticks();
            let delta = ticks.saturating_sub(previous_ticks);
            previous_ticks = ticks;
            bytes.extend_from_slice(&VariableLengthQuantity(delta).bytes());
            bytes.extend_from_slice(&event.bytes());
        }
        bytes
    }
}

/// A complete MIDI file: header plus track chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiFile {
    pub header: HeaderChunk,
    pub tracks: Vec<TrackChunk>,
}

impl MidiFile {
    /// Builds a file from per-track containers, one chunk per container.
    pub fn from_containers(containers: &[&EventContainer], division: u16) -> Self {
        let tracks: Vec<TrackChunk> = containers
            .iter()
            .map(|container| TrackChunk::from_container(container))
            .collect();
        Self {
            header: HeaderChunk::new(tracks.len() as u16, division),
            tracks,
        }
    }

    /// Parses a byte buffer. `beats_per_bar` and `beats_per_minute`
    /// supply the unit context for absolute instants; the subbeat divisor
    /// comes from the header's division field.
    pub fn parse(data: &[u8], beats_per_bar: u32, beats_per_minute: u16) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::FileStructurallyUnsound(format!(
                "not enough bytes in file ({} < {HEADER_LEN})",
                data.len()
            )));
        }
        let header = HeaderChunk::parse(&data[..HEADER_LEN])?;
        let units = Units::new(beats_per_bar, beats_per_minute, header.division as u32);
        debug!(
            tracks = header.track_count,
            division = header.division,
            "parsing MIDI file"
        );

        let mut tracks = Vec::with_capacity(header.track_count as usize);
        let mut cursor = HEADER_LEN;
        for track in 0..header.track_count as usize {
            if data.len() < cursor + 8 {
                return Err(Error::FileStructurallyUnsound(format!(
                    "not enough bytes for remaining track chunks ({} of {})",
                    header.track_count as usize - track,
                    header.track_count
                )));
            }
            if &data[cursor..cursor + 4] != TRACK_TAG {
                return Err(Error::InvalidHeader(format!(
                    "expected chunk header with type 'MTrk' at offset {cursor}"
                )));
            }
            let length = u32::from_be_bytes([
                data[cursor + 4],
                data[cursor + 5],
                data[cursor + 6],
                data[cursor + 7],
            ]) as usize;
            let stream_start = cursor + 8;
            let stream_end = stream_start + length;
            if stream_end > data.len() {
                return Err(Error::FileStructurallyUnsound(format!(
                    "track chunk {track} declares {length} bytes but only {} remain",
                    data.len() - stream_start
                )));
            }
            tracks.push(TrackChunk::parse_events(
                &data[stream_start..stream_end],
                units,
                track,
                stream_start,
            )?);
            cursor = stream_end;
        }

        debug!(
            events = tracks.iter().map(|t| t.events.len()).sum::<usize>(),
            "parsed MIDI file"
        );
        Ok(Self { header, tracks })
    }

    /// Encodes the file, wrapping each track's event stream with the
    /// 'MTrk' tag and a big-endian length prefix.
    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = self.header.bytes().to_vec();
        for track in &self.tracks {
            let stream = track.stream_bytes();
            bytes.extend_from_slice(TRACK_TAG);
            bytes.extend_from_slice(&(stream.len() as u32).to_be_bytes());
            bytes.extend_from_slice(&stream);
        }
        bytes
    }

    /// Reads and parses a file from disk.
    pub fn load(path: impl AsRef<Path>, beats_per_bar: u32, beats_per_minute: u16) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::parse(&data, beats_per_bar, beats_per_minute)
    }

    /// Serializes to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.bytes())?;
        Ok(())
    }
}
