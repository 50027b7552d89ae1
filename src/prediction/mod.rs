mod http;
pub mod protocol;
mod stream;

use std::sync::Arc;
use std::thread;

use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::events::Instrument;
use crate::timing::{Phrase, PhraseNote};

pub use http::{HttpPredictor, Predictor};
pub use protocol::{InboundMessage, OutboundMessage, PredictionKind, ProtocolError, UiMessage};
pub use stream::{StreamHandle, TransportError, connect_stream};

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("predictor answered with HTTP {0}")]
    Status(u16),
    #[error("prediction request timed out")]
    Timeout,
    #[error("prediction transport failed: {0}")]
    Transport(String),
    #[error("failed to read prediction response: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed prediction payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A note as the predictor returns it, relative to the moment it answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedNote {
    pub pitch: u8,
    pub velocity: u8,
    pub start_time: f64,
    pub end_time: f64,
    pub instrument: u8,
    /// Sent by some predictors, never used for scheduling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

pub fn decode_predictions(body: &str) -> Result<Vec<PredictedNote>, PredictionError> {
    Ok(serde_json::from_str(body)?)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub notes: Vec<PhraseNote>,
    /// Seconds of output asked for: phrase length plus a clamped extension.
    pub duration: f64,
}

impl PredictionRequest {
    pub fn from_phrase(phrase: &Phrase, min_additional: f64, max_additional: f64) -> Self {
        let length = phrase.duration();
        let additional = length.min(max_additional).max(min_additional);
        Self {
            notes: phrase.to_wire(),
            duration: length + additional,
        }
    }
}

/// A predicted note placed on the session clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledNote {
    pub pitch: u8,
    pub velocity: u8,
    pub instrument: Instrument,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleOutcome {
    pub accepted: Vec<ScheduledNote>,
    pub discarded: usize,
}

/// Latest AI note start already scheduled. Nothing is ever scheduled at or
/// before it, so late or overlapping answers cannot rewind AI playback.
#[derive(Debug, Clone, Copy, Default)]
pub struct Watermark {
    value: f64,
}

impl Watermark {
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Strictly later starts only: of several notes sharing a start time
    /// (a chord), just the first one is admitted.
    pub fn admit(&mut self, start: f64) -> bool {
        if start > self.value {
            self.value = start;
            true
        } else {
            false
        }
    }
}

/// Results posted back to the session thread by transports.
#[derive(Debug)]
pub enum ClientEvent {
    Predicted(Result<Vec<PredictedNote>, PredictionError>),
    Inbound(InboundMessage),
    Disconnected(String),
}

pub struct RequestTransport {
    predictor: Arc<dyn Predictor>,
    replies: Sender<ClientEvent>,
}

impl RequestTransport {
    pub fn new(predictor: Arc<dyn Predictor>, replies: Sender<ClientEvent>) -> Self {
        Self { predictor, replies }
    }

    /// Runs the request off the session thread; the answer comes back as a
    /// `ClientEvent::Predicted`.
    fn dispatch(&self, request: PredictionRequest) {
        let predictor = Arc::clone(&self.predictor);
        let replies = self.replies.clone();
        let spawned = thread::Builder::new()
            .name("prediction-request".into())
            .spawn(move || {
                let result = predictor.predict(&request);
                let _ = replies.send(ClientEvent::Predicted(result));
            });
        if let Err(e) = spawned {
            warn!("failed to spawn prediction request: {}", e);
        }
    }
}

pub enum Transport {
    Request(RequestTransport),
    Stream(StreamHandle),
}

pub struct PredictionClient {
    transport: Transport,
    watermark: Watermark,
    latency_offset: f64,
    min_additional: f64,
    max_additional: f64,
}

impl PredictionClient {
    pub fn new(transport: Transport, config: &SessionConfig) -> Self {
        Self {
            transport,
            watermark: Watermark::default(),
            latency_offset: config.latency_offset,
            min_additional: config.min_additional,
            max_additional: config.max_additional,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.transport, Transport::Stream(_))
    }

    pub fn watermark(&self) -> f64 {
        self.watermark.value()
    }

    /// Hands a phrase to the predictor. Empty phrases are never sent.
    pub fn send_phrase(&mut self, phrase: &Phrase) -> Option<PredictionRequest> {
        if phrase.is_empty() {
            return None;
        }
        let Transport::Request(transport) = &self.transport else {
            debug!("phrase flush ignored in streaming mode");
            return None;
        };

        let request = PredictionRequest::from_phrase(phrase, self.min_additional, self.max_additional);
        debug!(
            notes = request.notes.len(),
            duration = request.duration,
            "sending phrase"
        );
        transport.dispatch(request.clone());
        Some(request)
    }

    /// Forwards one message over the streaming channel; a no-op otherwise.
    pub fn emit(&mut self, message: OutboundMessage) {
        match &self.transport {
            Transport::Stream(stream) => {
                if let Err(e) = stream.emit(message) {
                    warn!("failed to forward to predictor: {}", e);
                }
            }
            Transport::Request(_) => {
                debug!(?message, "no streaming channel, message dropped");
            }
        }
    }

    pub fn send_ui(&mut self, message: UiMessage, payload: Value) {
        self.emit(OutboundMessage::Ui { message, payload });
    }

    /// Anchors a batch at `now` plus the fixed latency offset.
    pub fn schedule(&mut self, notes: Vec<PredictedNote>, now: f64) -> ScheduleOutcome {
        self.schedule_at(notes, now + self.latency_offset)
    }

    pub fn schedule_at(&mut self, notes: Vec<PredictedNote>, anchor: f64) -> ScheduleOutcome {
        let mut outcome = ScheduleOutcome::default();

        for note in notes {
            let Some(instrument) = Instrument::from_code(note.instrument).filter(|i| i.is_predictable())
            else {
                outcome.discarded += 1;
                continue;
            };

            let start = anchor + note.start_time;
            if !self.watermark.admit(start) {
                debug!(pitch = note.pitch, start, watermark = self.watermark.value(), "stale prediction discarded");
                outcome.discarded += 1;
                continue;
            }

            outcome.accepted.push(ScheduledNote {
                pitch: note.pitch,
                velocity: note.velocity.min(127),
                instrument,
                start,
                end: (anchor + note.end_time).max(start),
            });
        }

        outcome
    }
}
