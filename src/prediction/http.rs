use std::io;
use std::time::Duration;

use super::{PredictedNote, PredictionError, PredictionRequest, decode_predictions};

/// Request/response access to a remote sequence predictor.
pub trait Predictor: Send + Sync {
    fn predict(&self, request: &PredictionRequest) -> Result<Vec<PredictedNote>, PredictionError>;
}

/// POSTs the phrase as JSON with the wanted output length in `?duration=`.
pub struct HttpPredictor {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpPredictor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Predictor for HttpPredictor {
    fn predict(&self, request: &PredictionRequest) -> Result<Vec<PredictedNote>, PredictionError> {
        let response = self
            .agent
            .post(&self.endpoint)
            .query("duration", &request.duration.to_string())
            .send_json(&request.notes)?;
        let body = response.into_string()?;
        decode_predictions(&body)
    }
}

impl From<ureq::Error> for PredictionError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => PredictionError::Status(code),
            ureq::Error::Transport(transport) if is_timeout(&transport) => PredictionError::Timeout,
            ureq::Error::Transport(transport) => PredictionError::Transport(transport.to_string()),
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(|e| matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
}
