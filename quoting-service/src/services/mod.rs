pub mod challenge;
pub mod clock;
pub mod conversion;
pub mod database;
pub mod email;
pub mod metrics;
pub mod renderer;
pub mod sequence;
pub mod totals;

pub use challenge::{ChallengeService, IssuedChallenge, VerifyOutcome};
pub use clock::{Clock, FixedClock, SystemClock};
pub use conversion::ConversionService;
pub use database::Database;
pub use email::{LogDispatcher, NotificationDispatcher, SmtpDispatcher};
pub use metrics::{get_metrics, init_metrics};
pub use renderer::{DocumentRenderer, NoopRenderer};
pub use sequence::SequenceAllocator;
pub use totals::{compute_totals, Totals};
