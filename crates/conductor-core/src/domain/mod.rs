pub mod commit;
pub mod config;
pub mod job;
pub mod phase;
pub mod ticket;
pub mod train;
pub mod user;

pub use commit::Commit;
pub use config::{Config, Mode, Options};
pub use job::{Job, JobResult};
pub use phase::{Phase, PhaseGroup, PhaseType};
pub use ticket::Ticket;
pub use train::Train;
pub use user::User;
