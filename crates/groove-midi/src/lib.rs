//! MIDI event interchange for the groove sequencer core.
//!
//! # Primary API
//!
//! - [`MidiEvent`] and its cases: [`MetaEvent`], [`ChannelEvent`],
//!   [`NodeEvent`]
//! - [`EventContainer`]: per-track ordered event storage
//! - [`MidiFile`] / [`HeaderChunk`] / [`TrackChunk`]: the binary
//!   interchange codec
//! - [`VariableLengthQuantity`]: the 7-bit-per-byte integer encoding
//!
//! # Example
//!
//! ```
//! use groove_core::{BarBeatTime, Units};
//! use groove_midi::{ChannelEvent, EventContainer, MidiFile};
//!
//! let mut take = EventContainer::new();
//! let at = |ticks| BarBeatTime::from_ticks(ticks, Units::default());
//! take.push(ChannelEvent::note_on(0, 60, 100, at(0)));
//! take.push(ChannelEvent::note_off(0, 60, 0, at(480)));
//!
//! let file = MidiFile::from_containers(&[&take], 480);
//! let restored = MidiFile::parse(&file.bytes(), 4, 120)?;
//! assert_eq!(restored.tracks[0].events.len(), 2);
//! # Ok::<(), groove_midi::Error>(())
//! ```

pub mod error;
pub use error::{Error, Result};

mod vlq;
pub use vlq::VariableLengthQuantity;

mod event;
pub use event::{
    ChannelEvent, ChannelKind, MetaEvent, MetaEventData, MidiEvent, NodeEvent, NodeEventData,
    NodeIdentifier, NoteDuration, NoteGenerator, Status, TimeSignature, Trajectory,
};

mod container;
pub use container::EventContainer;

mod file;
pub use file::{HeaderChunk, MidiFile, TrackChunk};
