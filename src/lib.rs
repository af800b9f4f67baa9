//! # Groove - Sequencer Timing Core
//!
//! Converts a real-time pulse stream into hierarchical musical time,
//! schedules callbacks keyed to exact musical instants, accumulates
//! timestamped events during recording, and losslessly round-trips those
//! events through a chunked binary interchange format.
//!
//! ## Architecture
//!
//! Groove is an umbrella crate coordinating:
//! - **groove-core** - pulse clock, bar/beat/subbeat time, transport
//! - **groove-midi** - event types, per-track containers, file codec
//!
//! ## Quick Start
//!
//! ```no_run
//! use groove::{Transport, TransportSignal};
//!
//! let transport = Transport::new("sequencer")?;
//! let signals = transport.subscribe();
//!
//! transport.set_tempo(128);
//! transport.play();
//!
//! if let Ok(TransportSignal::DidStart { time }) = signals.recv() {
//!     println!("rolling from {time}");
//! }
//! # Ok::<(), groove::Error>(())
//! ```

/// Re-export of groove-core for direct access
pub use groove_core as core;

/// Re-export of groove-midi for direct access
pub use groove_midi as midi;

// Timing core
pub use groove_core::{
    BarBeatTime, CallbackToken, Error, MidiClock, MusicalTime, Result, Transport, TransportSignal,
    TransportState, Units,
};

// Event interchange
pub use groove_midi::{
    ChannelEvent, ChannelKind, EventContainer, HeaderChunk, MetaEvent, MetaEventData, MidiEvent,
    MidiFile, NodeEvent, NodeEventData, NodeIdentifier, NoteDuration, NoteGenerator, Status,
    TimeSignature, TrackChunk, Trajectory, VariableLengthQuantity,
};

/// Commonly used types for building on the timing core.
pub mod prelude {
    pub use groove_core::{BarBeatTime, MidiClock, MusicalTime, Transport, TransportSignal, Units};
    pub use groove_midi::{
        ChannelEvent, EventContainer, MetaEvent, MetaEventData, MidiEvent, MidiFile, NodeEvent,
    };
}
