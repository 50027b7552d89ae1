use serde::{Deserialize, Serialize};

/// Instrument codes shared with the predictor and the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instrument {
    Ai0,
    Ai1,
    Drums,
    Player,
}

impl Instrument {
    pub const PLAYER_CODE: u8 = 16;

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Instrument::Ai0),
            1 => Some(Instrument::Ai1),
            9 => Some(Instrument::Drums),
            Self::PLAYER_CODE => Some(Instrument::Player),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Instrument::Ai0 => 0,
            Instrument::Ai1 => 1,
            Instrument::Drums => 9,
            Instrument::Player => Self::PLAYER_CODE,
        }
    }

    /// Instruments the predictor is allowed to answer with.
    pub fn is_predictable(self) -> bool {
        !matches!(self, Instrument::Player)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPhase {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Player,
    Ai,
}

/// One sounded note. `end_time == None` means the key is still held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    pub instrument: Instrument,
    /// Seconds
    pub start_time: f64,
    /// Seconds
    pub end_time: Option<f64>,
}

impl NoteEvent {
    pub fn open(pitch: u8, velocity: u8, instrument: Instrument, start_time: f64) -> Self {
        Self {
            pitch,
            velocity: velocity.min(127),
            instrument,
            start_time,
            end_time: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Closes the note, never letting it end before it started.
    pub fn close(&mut self, time: f64) {
        self.end_time = Some(time.max(self.start_time));
    }

    pub fn duration(&self) -> Option<f64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// A key transition as seen by sound, visual and MIDI collaborators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyEvent {
    pub pitch: u8,
    /// Session clock seconds; may lie in the future for AI notes.
    pub time: f64,
    pub instrument: Instrument,
    pub velocity: u8,
    pub source: Source,
}

impl KeyEvent {
    pub fn is_ai(&self) -> bool {
        self.source == Source::Ai
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_codes_round_trip() {
        for code in [0u8, 1, 9, 16] {
            let instrument = Instrument::from_code(code).unwrap();
            assert_eq!(instrument.code(), code);
        }
        assert_eq!(Instrument::from_code(5), None);
        assert!(!Instrument::Player.is_predictable());
        assert!(Instrument::Drums.is_predictable());
    }

    #[test]
    fn close_never_ends_before_start() {
        let mut note = NoteEvent::open(60, 100, Instrument::Player, 2.0);
        assert!(note.is_open());
        note.close(1.5);
        assert_eq!(note.end_time, Some(2.0));
        assert_eq!(note.duration(), Some(0.0));
    }
}
