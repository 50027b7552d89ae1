mod export;
mod track;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::events::KeyPhase;

pub use export::{ExportError, FILE_SUFFIX, TICKS_PER_BEAT, encode_tracks, export_file_name, read_tracks};
pub use track::{Track, TrackKind};

/// Session-long recording of every note, split into one lane per source.
#[derive(Debug, Clone)]
pub struct MultiTrackRecorder {
    tracks: Vec<Track>,
}

impl MultiTrackRecorder {
    pub fn new() -> Self {
        Self {
            tracks: TrackKind::ALL.into_iter().map(Track::new).collect(),
        }
    }

    pub fn record(&mut self, phase: KeyPhase, instrument: u8, pitch: u8, time: f64, velocity: u8) {
        let kind = TrackKind::for_code(instrument);
        let track = self.track_mut(kind);
        match phase {
            KeyPhase::On => track.note_on(pitch, velocity, kind.instrument(), time),
            KeyPhase::Off => track.note_off(pitch, time),
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> &Track {
        // every kind is created in `new`
        &self.tracks[Self::index(kind)]
    }

    fn track_mut(&mut self, kind: TrackKind) -> &mut Track {
        &mut self.tracks[Self::index(kind)]
    }

    fn index(kind: TrackKind) -> usize {
        match kind {
            TrackKind::Player => 0,
            TrackKind::Drums => 1,
            TrackKind::Ai1 => 2,
            TrackKind::Ai0 => 3,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ExportError> {
        encode_tracks(&self.tracks)
    }

    /// Writes everything recorded so far into `dir` under a timestamped name.
    /// Tracks are left intact, so repeated exports always hold the full session.
    pub fn export(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(export_file_name(Utc::now()));
        fs::write(&path, self.to_bytes()?)?;

        info!(path = %path.display(), "exported session MIDI");
        Ok(path)
    }
}

impl Default for MultiTrackRecorder {
    fn default() -> Self {
        Self::new()
    }
}
