//! The event categories persisted in a track chunk.

use core::fmt;

use groove_core::BarBeatTime;

mod channel;
mod meta;
mod node;

pub use channel::{ChannelEvent, ChannelKind, Status};
pub use meta::{MetaEvent, MetaEventData, TimeSignature};
pub use node::{
    NodeEvent, NodeEventData, NodeIdentifier, NoteDuration, NoteGenerator, Trajectory,
};

/// A type-erased MIDI event: meta, channel voice, or node add/remove.
#[derive(Debug, Clone, PartialEq)]
pub enum MidiEvent {
    Meta(MetaEvent),
    Channel(ChannelEvent),
    Node(NodeEvent),
}

impl MidiEvent {
    /// The instant the event belongs to.
    pub fn time(&self) -> BarBeatTime {
        match self {
            Self::Meta(event) => event.time,
            Self::Channel(event) => event.time,
            Self::Node(event) => event.time,
        }
    }

    pub fn set_time(&mut self, time: BarBeatTime) {
        match self {
            Self::Meta(event) => event.time = time,
            Self::Channel(event) => event.time = time,
            Self::Node(event) => event.time = time,
        }
    }

    /// The delta from the previous event, present only on events that
    /// passed through the file codec.
    pub fn delta(&self) -> Option<u64> {
        match self {
            Self::Meta(event) => event.delta,
            Self::Channel(event) => event.delta,
            Self::Node(event) => event.delta,
        }
    }

    pub fn set_delta(&mut self, delta: Option<u64>) {
        match self {
            Self::Meta(event) => event.delta = delta,
            Self::Channel(event) => event.delta = delta,
            Self::Node(event) => event.delta = delta,
        }
    }

    /// The event's wire encoding, excluding the delta prefix.
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Meta(event) => event.bytes(),
            Self::Channel(event) => event.bytes(),
            Self::Node(event) => event.bytes(),
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, Self::Meta(_))
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, Self::Channel(_))
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }

    /// Whether this is a tempo or time-signature meta event.
    pub fn is_time_event(&self) -> bool {
        matches!(
            self,
            Self::Meta(MetaEvent {
                data: MetaEventData::Tempo(_) | MetaEventData::TimeSignature { .. },
                ..
            })
        )
    }
}

impl From<MetaEvent> for MidiEvent {
    fn from(event: MetaEvent) -> Self {
        Self::Meta(event)
    }
}

impl From<ChannelEvent> for MidiEvent {
    fn from(event: ChannelEvent) -> Self {
        Self::Channel(event)
    }
}

impl From<NodeEvent> for MidiEvent {
    fn from(event: NodeEvent) -> Self {
        Self::Node(event)
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Meta(event) => event.fmt(f),
            Self::Channel(event) => event.fmt(f),
            Self::Node(event) => event.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groove_core::Units;

    #[test]
    fn test_time_accessors() {
        let time = BarBeatTime::from_ticks(960, Units::default());
        let mut event: MidiEvent = ChannelEvent::note_on(0, 60, 100, time).into();
        assert_eq!(event.time(), time);

        let later = BarBeatTime::from_ticks(1920, Units::default());
        event.set_time(later);
        assert_eq!(event.time(), later);
    }

    #[test]
    fn test_category_predicates() {
        let time = BarBeatTime::default();
        let meta: MidiEvent = MetaEvent::new(MetaEventData::EndOfTrack, time).into();
        let tempo: MidiEvent = MetaEvent::new(MetaEventData::Tempo(120.0), time).into();
        let channel: MidiEvent = ChannelEvent::note_on(0, 60, 100, time).into();
        let node: MidiEvent = NodeEvent::new(
            NodeEventData::Remove {
                identifier: NodeIdentifier::new(1),
            },
            time,
        )
        .into();

        assert!(meta.is_meta() && !meta.is_time_event());
        assert!(tempo.is_time_event());
        assert!(channel.is_channel());
        assert!(node.is_node());
    }
}
