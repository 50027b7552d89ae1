mod scheduler;
mod timeline;

pub use scheduler::{DebounceTimer, FlushDecision, PhraseScheduler, SchedulerState};
pub use timeline::{Phrase, PhraseNote, TimelineBuffer};
