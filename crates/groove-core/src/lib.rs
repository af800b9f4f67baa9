//! Sequencer timing core: pulse clock, bar/beat/subbeat time, transport.
//!
//! # Primary API
//!
//! - [`Transport`]: play/pause/stop/record/jog state machine
//! - [`MidiClock`]: tempo-derived pulse train on a dedicated thread
//! - [`MusicalTime`]: the current [`BarBeatTime`] plus callback registries
//! - [`BarBeatTime`] / [`Units`]: the musical time value type
//!
//! # Example
//!
//! ```no_run
//! use groove_core::Transport;
//!
//! let transport = Transport::new("sequencer")?;
//! let signals = transport.subscribe();
//! transport.play();
//! # Ok::<(), groove_core::Error>(())
//! ```

pub mod error;
pub use error::{Error, Result};

mod bar_beat;
pub use bar_beat::{BarBeatTime, Units};

pub mod clock;
pub use clock::MidiClock;

mod musical_time;
pub use musical_time::{CallbackToken, MusicalTime, TimeCallback, TimePredicate};

mod transport;
pub use transport::{Transport, TransportSignal, TransportState};
