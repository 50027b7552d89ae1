pub mod bus;
pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod midi;
pub mod prediction;
pub mod recording;
pub mod session;
pub mod timing;

pub use bus::{GlowSink, KeySink, SessionBus};
pub use clock::SessionClock;
pub use config::{ConfigError, SessionConfig, TransportMode};
pub use engine::{
    SessionCommand, SessionError, SessionHandle, SessionUpdate, spawn_session, spawn_session_with,
};
pub use events::{Instrument, KeyEvent, KeyPhase, NoteEvent, Source};
pub use midi::{MidiError, MidiKeyboard, MidiOutputSink};
pub use session::Session;
