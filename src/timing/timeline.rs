use serde::Serialize;

use crate::events::{Instrument, NoteEvent};

/// Closed player notes re-based so the earliest one starts at zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Phrase {
    pub notes: Vec<NoteEvent>,
}

/// Wire shape of a phrase note in a prediction request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseNote {
    pub pitch: u8,
    pub start_time: f64,
    pub end_time: f64,
    pub velocity: u8,
    pub instrument: u8,
}

impl Phrase {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Seconds from the first note-on to the last note-off.
    pub fn duration(&self) -> f64 {
        self.notes
            .iter()
            .filter_map(|n| n.end_time)
            .fold(0.0, f64::max)
    }

    pub fn to_wire(&self) -> Vec<PhraseNote> {
        self.notes
            .iter()
            .map(|n| PhraseNote {
                pitch: n.pitch,
                start_time: n.start_time,
                end_time: n.end_time.unwrap_or(n.start_time),
                velocity: n.velocity,
                instrument: n.instrument.code(),
            })
            .collect()
    }
}

/// Appendable buffer of the player's note events since the last flush.
#[derive(Debug, Default)]
pub struct TimelineBuffer {
    events: Vec<NoteEvent>,
}

impl TimelineBuffer {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn note_on(&mut self, pitch: u8, velocity: u8, time: f64) {
        // retrigger: only one open event per pitch
        self.note_off(pitch, time);
        self.events
            .push(NoteEvent::open(pitch, velocity, Instrument::Player, time));
    }

    /// Closes the most recent open event for `pitch`; a stray key-up is ignored.
    pub fn note_off(&mut self, pitch: u8, time: f64) {
        if let Some(event) = self
            .events
            .iter_mut()
            .rev()
            .find(|e| e.pitch == pitch && e.is_open())
        {
            event.close(time);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    /// Takes every closed event, re-based to start at zero, and leaves a
    /// fresh buffer behind. Still-held notes carry over untouched.
    pub fn extract_phrase(&mut self) -> Phrase {
        let (closed, held): (Vec<NoteEvent>, Vec<NoteEvent>) = std::mem::take(&mut self.events)
            .into_iter()
            .partition(|e| !e.is_open());
        self.events = held;

        let Some(origin) = closed.iter().map(|e| e.start_time).reduce(f64::min) else {
            return Phrase::default();
        };

        let mut notes: Vec<NoteEvent> = closed
            .into_iter()
            .map(|mut e| {
                e.start_time -= origin;
                e.end_time = e.end_time.map(|t| t - origin);
                e
            })
            .collect();
        notes.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        Phrase { notes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_rebases_and_clears() {
        let mut buffer = TimelineBuffer::new();
        buffer.note_on(60, 100, 10.0);
        buffer.note_off(60, 11.0);
        buffer.note_on(64, 90, 10.5);
        buffer.note_off(64, 12.0);

        let phrase = buffer.extract_phrase();
        assert!(buffer.is_empty());
        assert_eq!(phrase.len(), 2);
        assert_eq!(phrase.notes[0].start_time, 0.0);
        assert_eq!(phrase.notes[0].end_time, Some(1.0));
        assert_eq!(phrase.notes[1].start_time, 0.5);
        assert_eq!(phrase.duration(), 2.0);
    }

    #[test]
    fn extract_on_empty_buffer_is_empty() {
        let mut buffer = TimelineBuffer::new();
        let phrase = buffer.extract_phrase();
        assert!(phrase.is_empty());
        assert!(buffer.is_empty());
        assert_eq!(phrase.duration(), 0.0);
    }

    #[test]
    fn stray_note_off_is_ignored() {
        let mut buffer = TimelineBuffer::new();
        buffer.note_off(60, 1.0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn retrigger_closes_previous_event() {
        let mut buffer = TimelineBuffer::new();
        buffer.note_on(60, 100, 0.0);
        buffer.note_on(60, 100, 0.5);
        buffer.note_off(60, 1.0);

        let events = buffer.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].end_time, Some(0.5));
        assert_eq!(events[1].end_time, Some(1.0));
    }

    #[test]
    fn closed_events_never_end_before_they_start() {
        let mut buffer = TimelineBuffer::new();
        let steps: [(u8, bool, f64); 8] = [
            (60, true, 1.0),
            (62, true, 1.2),
            (60, false, 0.5),
            (62, false, 3.0),
            (60, true, 2.0),
            (60, true, 1.0),
            (60, false, 0.0),
            (64, false, 4.0),
        ];
        for (pitch, down, time) in steps {
            if down {
                buffer.note_on(pitch, 100, time);
            } else {
                buffer.note_off(pitch, time);
            }
        }
        for event in buffer.events() {
            if let Some(end) = event.end_time {
                assert!(end >= event.start_time);
            }
        }
    }

    #[test]
    fn held_notes_survive_extraction() {
        let mut buffer = TimelineBuffer::new();
        buffer.note_on(60, 100, 0.0);
        buffer.note_off(60, 1.0);
        buffer.note_on(67, 100, 1.5);

        let phrase = buffer.extract_phrase();
        assert_eq!(phrase.len(), 1);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.events()[0].is_open());
    }
}
