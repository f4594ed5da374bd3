pub mod clock;
pub mod driver;
pub mod journal;
pub mod session;

pub use clock::SystemTimeSource;
pub use driver::{CommandOutcome, SessionDriver, SessionHandle};
pub use journal::JournalFile;
pub use session::{Command, Phase, PhaseDurations, SessionSnapshot, SessionState, TimerSession};
