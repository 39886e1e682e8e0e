//! Auto-arbitrage sessions and the scheduler that runs them.

mod scheduler;
mod types;

pub use scheduler::{SessionReport, SessionScheduler, TickReport};
pub use types::{AutoArbSession, SessionStatus};
