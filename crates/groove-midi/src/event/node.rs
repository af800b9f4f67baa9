//! Node events: add/remove messages for a track's moving nodes, carried
//! in the meta Cue Point slot (`FF 07`).
//!
//! Payload layout: a `u32` big-endian length followed by the identifier
//! block; an Add variant appends a length-prefixed trajectory block and a
//! length-prefixed note generator block, a Remove variant stops after the
//! identifier. The identifier block is a `u32` big-endian loop-id length
//! (0 or 8), the loop id when present, a `:` separator, and the 8-byte
//! big-endian node id.

use core::fmt;

use groove_core::BarBeatTime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vlq::VariableLengthQuantity;

/// Identifies a node, optionally scoped to the loop that spawned it.
/// Identifiers are stable integers handed out by the owning track layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentifier {
    pub loop_id: Option<u64>,
    pub node_id: u64,
}

impl NodeIdentifier {
    pub fn new(node_id: u64) -> Self {
        Self {
            loop_id: None,
            node_id,
        }
    }

    pub fn with_loop(loop_id: u64, node_id: u64) -> Self {
        Self {
            loop_id: Some(loop_id),
            node_id,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        match self.loop_id {
            Some(loop_id) => {
                bytes.extend_from_slice(&8u32.to_be_bytes());
                bytes.extend_from_slice(&loop_id.to_be_bytes());
            }
            None => bytes.extend_from_slice(&0u32.to_be_bytes()),
        }
        bytes.push(b':');
        bytes.extend_from_slice(&self.node_id.to_be_bytes());
        bytes
    }

    pub fn encoded_len(&self) -> usize {
        4 + if self.loop_id.is_some() { 8 } else { 0 } + 1 + 8
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::InvalidLength(
                "not enough bytes for node event identifier".into(),
            ));
        }
        let loop_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if loop_len != 0 && loop_len != 8 {
            return Err(Error::FileStructurallyUnsound(format!(
                "node identifier loop block must be 0 or 8 bytes, found {loop_len}"
            )));
        }
        let mut cursor = 4;
        let loop_id = if loop_len == 8 {
            if data.len() < cursor + 8 {
                return Err(Error::InvalidLength(
                    "not enough bytes for node event loop identifier".into(),
                ));
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[cursor..cursor + 8]);
            cursor += 8;
            Some(u64::from_be_bytes(raw))
        } else {
            None
        };
        if data.get(cursor) != Some(&b':') {
            return Err(Error::FileStructurallyUnsound(
                "missing separator in node event identifier".into(),
            ));
        }
        cursor += 1;
        if data.len() != cursor + 8 {
            return Err(Error::InvalidLength(format!(
                "node identifier must end with an 8-byte id, {} bytes remain",
                data.len() - cursor
            )));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&data[cursor..cursor + 8]);
        Ok(Self {
            loop_id,
            node_id: u64::from_be_bytes(raw),
        })
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loop_id {
            Some(loop_id) => write!(f, "{loop_id}:{}", self.node_id),
            None => write!(f, "{}", self.node_id),
        }
    }
}

/// A node's initial position and velocity, in scene units per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
}

impl Trajectory {
    pub const ENCODED_LEN: usize = 32;

    pub fn new(x: f64, y: f64, dx: f64, dy: f64) -> Self {
        Self { x, y, dx, dy }
    }

    /// Slope of the line of travel.
    pub fn slope(&self) -> f64 {
        self.dy / self.dx
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::ENCODED_LEN);
        for component in [self.x, self.y, self.dx, self.dy] {
            bytes.extend_from_slice(&component.to_be_bytes());
        }
        bytes
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != Self::ENCODED_LEN {
            return Err(Error::InvalidLength(format!(
                "trajectory must be {} bytes, found {}",
                Self::ENCODED_LEN,
                data.len()
            )));
        }
        let component = |i: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[i * 8..i * 8 + 8]);
            f64::from_be_bytes(raw)
        };
        Ok(Self {
            x: component(0),
            y: component(1),
            dx: component(2),
            dy: component(3),
        })
    }
}

impl fmt::Display for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{({}, {}), ({}, {})}}", self.x, self.y, self.dx, self.dy)
    }
}

/// Note lengths a generator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteDuration {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    SixtyFourth,
}

impl NoteDuration {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whole => "whole",
            Self::Half => "half",
            Self::Quarter => "quarter",
            Self::Eighth => "eighth",
            Self::Sixteenth => "sixteenth",
            Self::ThirtySecond => "thirty-second",
            Self::SixtyFourth => "sixty-fourth",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "whole" => Some(Self::Whole),
            "half" => Some(Self::Half),
            "quarter" => Some(Self::Quarter),
            "eighth" => Some(Self::Eighth),
            "sixteenth" => Some(Self::Sixteenth),
            "thirty-second" => Some(Self::ThirtySecond),
            "sixty-fourth" => Some(Self::SixtyFourth),
            _ => None,
        }
    }

    /// Length in beats, with a quarter note as one beat.
    pub fn beats(self) -> f64 {
        match self {
            Self::Whole => 4.0,
            Self::Half => 2.0,
            Self::Quarter => 1.0,
            Self::Eighth => 0.5,
            Self::Sixteenth => 0.25,
            Self::ThirtySecond => 0.125,
            Self::SixtyFourth => 0.0625,
        }
    }
}

impl fmt::Display for NoteDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The note a node emits on collision: channel, pitch, velocity, length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteGenerator {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub duration: NoteDuration,
}

impl NoteGenerator {
    pub fn new(channel: u8, note: u8, velocity: u8, duration: NoteDuration) -> Self {
        Self {
            channel,
            note,
            velocity,
            duration,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.channel, self.note, self.velocity];
        bytes.extend_from_slice(self.duration.as_str().as_bytes());
        bytes
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::InvalidLength(format!(
                "note generator needs at least 4 bytes, found {}",
                data.len()
            )));
        }
        let name = core::str::from_utf8(&data[3..]).map_err(|_| {
            Error::FileStructurallyUnsound("note generator duration is not valid UTF-8".into())
        })?;
        let duration = NoteDuration::from_name(name).ok_or_else(|| {
            Error::FileStructurallyUnsound(format!("'{name}' is not a note duration"))
        })?;
        Ok(Self {
            channel: data[0],
            note: data[1],
            velocity: data[2],
            duration,
        })
    }
}

impl fmt::Display for NoteGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}, {}, {}, {}}}",
            self.channel, self.note, self.velocity, self.duration
        )
    }
}

/// The payload of a node event.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEventData {
    Add {
        identifier: NodeIdentifier,
        trajectory: Trajectory,
        generator: NoteGenerator,
    },
    Remove {
        identifier: NodeIdentifier,
    },
}

impl NodeEventData {
    pub fn identifier(&self) -> NodeIdentifier {
        match self {
            Self::Add { identifier, .. } | Self::Remove { identifier } => *identifier,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        let identifier_bytes = self.identifier().bytes();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(identifier_bytes.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&identifier_bytes);
        if let Self::Add {
            trajectory,
            generator,
            ..
        } = self
        {
            let trajectory_bytes = trajectory.bytes();
            bytes.push(trajectory_bytes.len() as u8);
            bytes.extend_from_slice(&trajectory_bytes);
            let generator_bytes = generator.bytes();
            bytes.push(generator_bytes.len() as u8);
            bytes.extend_from_slice(&generator_bytes);
        }
        bytes
    }

    pub fn from_payload(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::InvalidLength(
                "node event payload needs a 4-byte identifier length".into(),
            ));
        }
        let identifier_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let identifier_end = 4 + identifier_len;
        if data.len() < identifier_end {
            return Err(Error::InvalidLength(format!(
                "node event declares a {identifier_len}-byte identifier but {} bytes remain",
                data.len() - 4
            )));
        }
        let identifier = NodeIdentifier::parse(&data[4..identifier_end])?;
        let rest = &data[identifier_end..];
        if rest.is_empty() {
            return Ok(Self::Remove { identifier });
        }

        let trajectory_len = rest[0] as usize;
        if rest.len() < 1 + trajectory_len {
            return Err(Error::InvalidLength(
                "node event trajectory block is truncated".into(),
            ));
        }
        let trajectory = Trajectory::parse(&rest[1..1 + trajectory_len])?;

        let rest = &rest[1 + trajectory_len..];
        let Some((&generator_len, generator_bytes)) = rest.split_first() else {
            return Err(Error::InvalidLength(
                "node event is missing its generator block".into(),
            ));
        };
        if generator_bytes.len() != generator_len as usize {
            return Err(Error::InvalidLength(format!(
                "node event declares a {generator_len}-byte generator but {} bytes remain",
                generator_bytes.len()
            )));
        }
        let generator = NoteGenerator::parse(generator_bytes)?;

        Ok(Self::Add {
            identifier,
            trajectory,
            generator,
        })
    }
}

impl fmt::Display for NodeEventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add {
                identifier,
                trajectory,
                generator,
            } => write!(f, "add node '{identifier}' ({trajectory}, {generator})"),
            Self::Remove { identifier } => write!(f, "remove node '{identifier}'"),
        }
    }
}

/// A node add/remove event with its instant and serialization delta.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvent {
    pub time: BarBeatTime,
    pub delta: Option<u64>,
    pub data: NodeEventData,
}

impl NodeEvent {
    pub fn new(data: NodeEventData, time: BarBeatTime) -> Self {
        Self {
            time,
            delta: None,
            data,
        }
    }

    pub fn identifier(&self) -> NodeIdentifier {
        self.data.identifier()
    }

    /// Encodes as `FF 07 <length:VLQ> <payload>`.
    pub fn bytes(&self) -> Vec<u8> {
        let payload = self.data.payload();
        let mut bytes = vec![0xFF, 0x07];
        bytes.extend_from_slice(&VariableLengthQuantity::from(payload.len()).bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    /// Parses an event slice spanning exactly `FF 07 <len> <payload>`.
    pub(crate) fn parse(delta: u64, data: &[u8], time: BarBeatTime) -> Result<Self> {
        if data.len() < 3 || data[0] != 0xFF || data[1] != 0x07 {
            return Err(Error::InvalidHeader(
                "node event must begin with 0xFF 0x07".into(),
            ));
        }
        let (length, consumed) = VariableLengthQuantity::decode(&data[2..])?;
        let payload_start = 2 + consumed;
        let payload_end = payload_start + length.value() as usize;
        if payload_end != data.len() {
            return Err(Error::InvalidLength(format!(
                "node event declares {} payload bytes but {} remain",
                length.value(),
                data.len() - payload_start
            )));
        }
        Ok(Self {
            time,
            delta: Some(delta),
            data: NodeEventData::from_payload(&data[payload_start..payload_end])?,
        })
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.time, self.data)
    }
}
