use chrono::{DateTime, Utc};
use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use thiserror::Error;

use super::{Track, TrackKind};

pub const TICKS_PER_BEAT: u16 = 480;
/// 120 BPM
const MICROS_PER_BEAT: u32 = 500_000;
pub const FILE_SUFFIX: &str = "-duet.mid";
const MAX_DELTA: u64 = (1 << 28) - 1;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write MIDI file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid MIDI file: {0}")]
    Midi(#[from] midly::Error),
    #[error("timecode-based MIDI files are not supported")]
    UnsupportedTiming,
}

/// `2026-10-16T091530.123Z-duet.mid`: ISO-8601 basic time, safe on every filesystem.
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("{}{}", now.format("%Y-%m-%dT%H%M%S%.3fZ"), FILE_SUFFIX)
}

fn ticks_per_second(ticks_per_beat: u16, micros_per_beat: u32) -> f64 {
    ticks_per_beat as f64 * 1_000_000.0 / micros_per_beat as f64
}

fn seconds_to_ticks(seconds: f64) -> u64 {
    (seconds.max(0.0) * ticks_per_second(TICKS_PER_BEAT, MICROS_PER_BEAT)).round() as u64
}

pub fn encode_tracks(tracks: &[Track]) -> Result<Vec<u8>, ExportError> {
    let header = Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_BEAT)),
    );
    let mut smf = Smf::new(header);
    for (index, track) in tracks.iter().enumerate() {
        smf.tracks.push(encode_track(track, index == 0));
    }

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)?;
    Ok(bytes)
}

fn encode_track(track: &Track, with_tempo: bool) -> Vec<TrackEvent<'static>> {
    let channel = u4::new(track.kind.midi_channel());

    // (tick, is_on, pitch, velocity); offs sort before ons on the same tick
    let mut timed: Vec<(u64, bool, u8, u8)> = Vec::with_capacity(track.notes().len() * 2);
    for note in track.closed_notes() {
        let start = seconds_to_ticks(note.start_time);
        // a zero-length note still needs its off after its on
        let end = seconds_to_ticks(note.end_time.unwrap_or(note.start_time)).max(start + 1);
        timed.push((start, true, note.pitch, note.velocity));
        timed.push((end, false, note.pitch, 0));
    }
    timed.sort_by_key(|&(tick, is_on, _, _)| (tick, is_on));

    let mut events = Vec::with_capacity(timed.len() + 3);
    events.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(track.kind.name().as_bytes())),
    });
    if with_tempo {
        events.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(MICROS_PER_BEAT))),
        });
    }

    let mut last_tick = 0u64;
    for (tick, is_on, pitch, velocity) in timed {
        let delta = (tick - last_tick).min(MAX_DELTA) as u32;
        last_tick = tick;

        let key = u7::new(pitch.min(127));
        let message = if is_on {
            MidiMessage::NoteOn {
                key,
                vel: u7::new(velocity.clamp(1, 127)),
            }
        } else {
            MidiMessage::NoteOff {
                key,
                vel: u7::new(0),
            }
        };
        events.push(TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi { channel, message },
        });
    }

    events.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    events
}

/// Parses an exported file back into the four session lanes.
pub fn read_tracks(bytes: &[u8]) -> Result<Vec<Track>, ExportError> {
    let smf = Smf::parse(bytes)?;
    let Timing::Metrical(ticks_per_beat) = smf.header.timing else {
        return Err(ExportError::UnsupportedTiming);
    };

    let tempo = smf
        .tracks
        .iter()
        .flatten()
        .find_map(|event| match event.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some(t.as_int()),
            _ => None,
        })
        .unwrap_or(MICROS_PER_BEAT);
    let tps = ticks_per_second(ticks_per_beat.as_int(), tempo);

    let mut tracks: Vec<Track> = TrackKind::ALL.into_iter().map(Track::new).collect();

    for smf_track in &smf.tracks {
        let mut tick = 0u64;
        for event in smf_track {
            tick += event.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let Some(kind) = TrackKind::from_midi_channel(channel.as_int()) else {
                continue;
            };
            let Some(track) = tracks.iter_mut().find(|t| t.kind == kind) else {
                continue;
            };

            let time = tick as f64 / tps;
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    track.note_on(key.as_int(), vel.as_int(), kind.instrument(), time);
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    track.note_off(key.as_int(), time);
                }
                _ => {}
            }
        }
    }

    Ok(tracks)
}
