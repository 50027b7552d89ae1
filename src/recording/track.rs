use std::collections::HashMap;

use crate::events::{Instrument, NoteEvent};

/// Fixed recording lanes of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Player,
    Drums,
    Ai1,
    Ai0,
}

impl TrackKind {
    pub const ALL: [TrackKind; 4] = [
        TrackKind::Player,
        TrackKind::Drums,
        TrackKind::Ai1,
        TrackKind::Ai0,
    ];

    /// Routes an instrument code to its lane; unknown codes belong to the player.
    pub fn for_code(code: u8) -> Self {
        match code {
            9 => TrackKind::Drums,
            1 => TrackKind::Ai1,
            0 => TrackKind::Ai0,
            _ => TrackKind::Player,
        }
    }

    /// Channel number as the session knows it (player is 16).
    pub fn channel(self) -> u8 {
        match self {
            TrackKind::Player => Instrument::PLAYER_CODE,
            TrackKind::Drums => 9,
            TrackKind::Ai1 => 1,
            TrackKind::Ai0 => 0,
        }
    }

    /// 4-bit channel index written to the file.
    pub fn midi_channel(self) -> u8 {
        self.channel().min(15)
    }

    pub fn from_midi_channel(channel: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.midi_channel() == channel)
    }

    pub fn name(self) -> &'static str {
        match self {
            TrackKind::Player => "Player",
            TrackKind::Drums => "Drums",
            TrackKind::Ai1 => "AI 1",
            TrackKind::Ai0 => "AI 0",
        }
    }

    pub fn instrument(self) -> Instrument {
        match self {
            TrackKind::Player => Instrument::Player,
            TrackKind::Drums => Instrument::Drums,
            TrackKind::Ai1 => Instrument::Ai1,
            TrackKind::Ai0 => Instrument::Ai0,
        }
    }

    pub fn is_percussion(self) -> bool {
        self == TrackKind::Drums
    }
}

/// Append-only note lane for one source.
#[derive(Debug, Clone)]
pub struct Track {
    pub kind: TrackKind,
    notes: Vec<NoteEvent>,
    open_notes: HashMap<u8, usize>,
}

impl Track {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            notes: Vec::new(),
            open_notes: HashMap::new(),
        }
    }

    pub fn note_on(&mut self, pitch: u8, velocity: u8, instrument: Instrument, time: f64) {
        self.note_off(pitch, time);
        self.open_notes.insert(pitch, self.notes.len());
        self.notes
            .push(NoteEvent::open(pitch, velocity, instrument, time));
    }

    pub fn note_off(&mut self, pitch: u8, time: f64) {
        if let Some(index) = self.open_notes.remove(&pitch) {
            self.notes[index].close(time);
        }
    }

    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    pub fn closed_notes(&self) -> impl Iterator<Item = &NoteEvent> {
        self.notes.iter().filter(|n| !n.is_open())
    }

    pub fn held_count(&self) -> usize {
        self.open_notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_falls_back_to_player() {
        assert_eq!(TrackKind::for_code(9), TrackKind::Drums);
        assert_eq!(TrackKind::for_code(1), TrackKind::Ai1);
        assert_eq!(TrackKind::for_code(0), TrackKind::Ai0);
        assert_eq!(TrackKind::for_code(16), TrackKind::Player);
        assert_eq!(TrackKind::for_code(42), TrackKind::Player);
    }

    #[test]
    fn player_channel_fits_in_a_nibble() {
        assert_eq!(TrackKind::Player.channel(), 16);
        assert_eq!(TrackKind::Player.midi_channel(), 15);
        assert_eq!(TrackKind::from_midi_channel(15), Some(TrackKind::Player));
        assert_eq!(TrackKind::from_midi_channel(9), Some(TrackKind::Drums));
        assert_eq!(TrackKind::from_midi_channel(4), None);
    }

    #[test]
    fn note_off_closes_matching_pitch_only() {
        let mut track = Track::new(TrackKind::Player);
        track.note_on(60, 100, Instrument::Player, 0.0);
        track.note_on(64, 90, Instrument::Player, 0.1);
        track.note_off(60, 1.0);
        track.note_off(72, 1.0);

        assert_eq!(track.notes()[0].end_time, Some(1.0));
        assert!(track.notes()[1].is_open());
        assert_eq!(track.held_count(), 1);
        assert_eq!(track.closed_notes().count(), 1);
    }
}
