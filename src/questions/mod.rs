//! The question subsystem: gap-detection parser, topic-pattern router, and
//! SLA monitor/escalator for questions raised mid-generation. Spec-level
//! contract for an external collaborator — producers call [`gap::parse_gaps`]
//! on their raw output, file a [`store::QuestionStore`] entry for each
//! blocking gap, and the loop stays paused until an answer event lands;
//! [`escalator::QuestionEscalator`] pages a human when that takes too long.

pub mod escalator;
pub mod gap;
pub mod router;
pub mod store;

pub use escalator::QuestionEscalator;
pub use gap::{parse_gaps, GapParseResult};
pub use router::TopicRouter;
pub use store::QuestionStore;
