//! Natural-language to SQL generation.
//!
//! Flow: intent classification, tenant policy check, cache lookup, then at most
//! `max_attempts` generation rounds. Each candidate is normalized and run
//! through the tenant's guard; a rejection feeds structured feedback into the
//! next round.

mod intent;
mod normalize;
mod pipeline;
mod prompt;
mod result;

pub use intent::{classify_intent, QuestionIntent};
pub use normalize::{clamp_date_range, fix_date_literal_intervals, normalize_sql};
pub use pipeline::{SqlGenerator, SqlRequest};
pub use prompt::GuardFeedback;
pub use result::{AnswerShape, CacheInfo, Confidence, SqlGenerationResult};
